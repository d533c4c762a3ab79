//! Human-readable layout summary

use crate::disk::actions::Action;
use crate::disk::builder::LayoutPlan;
use std::collections::HashMap;
use std::fmt::Write;

fn detail(action: &Action) -> String {
    match action {
        Action::Existing { device, .. } => device.display().to_string(),
        Action::ExistingFilesystem { uuid, .. } => format!("uuid {}", uuid),
        Action::CreateGpt { device: Some(d), .. } => format!("gpt on {}", d.display()),
        Action::CreateGpt { .. } => "gpt".to_string(),
        Action::CreatePartition { size, part_type, .. } => format!("{} {}", part_type, size),
        Action::CreateRaid { level, name, ids, .. } => {
            format!("raid{} {} ({})", level, name, ids.join(","))
        }
        Action::CreateLuks { name, .. } => format!("luks /dev/mapper/{}", name),
        Action::Format { .. } | Action::FormatBtrfs { .. } => String::new(),
    }
}

/// Render the plan as an indented device tree, one row per created
/// identifier, with its filesystem and role.
pub fn render_layout_summary(plan: &LayoutPlan) -> String {
    let mut children: HashMap<&str, Vec<&Action>> = HashMap::new();
    let mut roots = Vec::new();
    let mut formats: HashMap<&str, String> = HashMap::new();

    for action in &plan.actions {
        match action {
            Action::Format { id, fs, label } => {
                let text = match label {
                    Some(l) => format!("{} ({})", fs, l),
                    None => fs.to_string(),
                };
                formats.insert(id.as_str(), text);
            }
            Action::FormatBtrfs { ids, label, raid_type } => {
                let text = match label {
                    Some(l) => format!("btrfs {} ({})", raid_type, l),
                    None => format!("btrfs {}", raid_type),
                };
                for id in ids {
                    formats.insert(id.as_str(), text.clone());
                }
            }
            _ => {
                // Multi-member actions hang under their first member only;
                // the detail column names the rest.
                match action.referenced_ids().first() {
                    Some(parent) => children.entry(*parent).or_default().push(action),
                    None => roots.push(action),
                }
            }
        }
    }

    let mut roles: HashMap<&str, Vec<&str>> = HashMap::new();
    let r = &plan.roles;
    for (role, id) in [("efi", &r.efi), ("bios", &r.bios), ("swap", &r.swap), ("root", &r.root)] {
        if let Some(id) = id {
            roles.entry(id.as_str()).or_default().push(role);
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "\nDisk layout ({} actions):", plan.actions.len());
    let _ = writeln!(out, "{:<28} {:<24} {:<20} {:<8}", "ID", "DEVICE", "FORMAT", "ROLE");
    let _ = writeln!(out, "{}", "-".repeat(82));

    let mut stack: Vec<(&Action, usize)> = roots.into_iter().rev().map(|a| (a, 0)).collect();
    while let Some((action, depth)) = stack.pop() {
        let Some(id) = action.created_id() else { continue };
        let _ = writeln!(
            out,
            "{:<28} {:<24} {:<20} {:<8}",
            format!("{}{}", "  ".repeat(depth), id),
            detail(action),
            formats.get(id).map(String::as_str).unwrap_or("-"),
            roles.get(id).map(|r| r.join(",")).unwrap_or_else(|| "-".to_string()),
        );
        if let Some(kids) = children.get(id) {
            stack.extend(kids.iter().rev().map(|a| (*a, depth + 1)));
        }
    }

    if !plan.cmdline.is_empty() {
        let _ = writeln!(out, "\nKernel cmdline: {}", plan.cmdline.join(" "));
    }
    out
}

pub fn print_layout_summary(plan: &LayoutPlan) {
    println!("{}", render_layout_summary(plan));
}
