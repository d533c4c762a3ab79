//! Block device probing
//!
//! The resolver talks to blkid, lsblk and mdadm through [`BlockProbe`] so the
//! lookups can be exercised against canned output. The parsers here only
//! understand the key=value output formats of those tools.

use crate::utils::command::{command_exists, run_command, run_command_output, run_command_status};
use crate::utils::error::{DiskPlanError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Source of block device metadata
pub trait BlockProbe {
    /// Ask the kernel to re-read partition tables and wait for udev
    fn rescan(&self) -> Result<()>;

    /// `blkid -o export` output for devices carrying `tag=value`; empty when
    /// nothing matches
    fn blkid_by_tag(&self, tag: &str, value: &str) -> Result<String>;

    /// `blkid -o export` output for one device
    fn blkid_device(&self, device: &Path) -> Result<String>;

    /// `lsblk --pairs` output with NAME, PTUUID and PARTUUID columns
    fn lsblk(&self) -> Result<String>;

    /// `mdadm --detail --scan` output for assembled arrays
    fn mdadm_scan(&self) -> Result<String>;
}

/// Utilities `SystemProbe` shells out to
pub const PROBE_TOOLS: [&str; 5] = ["blkid", "lsblk", "mdadm", "partprobe", "udevadm"];

/// Probe backed by the real system utilities
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        if !nix::unistd::geteuid().is_root() {
            warn!("Not running as root; blkid may not report every device");
        }
        let missing = Self::missing_tools();
        if !missing.is_empty() {
            warn!("Missing probe utilities: {}", missing.join(", "));
        }
        Self
    }

    /// Probe utilities not found in PATH
    pub fn missing_tools() -> Vec<&'static str> {
        PROBE_TOOLS
            .iter()
            .copied()
            .filter(|tool| !command_exists(tool))
            .collect()
    }
}

impl BlockProbe for SystemProbe {
    fn rescan(&self) -> Result<()> {
        // Failures only mean the cached view may be stale.
        if let Err(e) = run_command("partprobe", &[]) {
            debug!("partprobe failed: {}", e);
        }
        if let Err(e) = run_command("udevadm", &["settle"]) {
            debug!("udevadm settle failed: {}", e);
        }
        Ok(())
    }

    fn blkid_by_tag(&self, tag: &str, value: &str) -> Result<String> {
        let filter = format!("{}={}", tag, value);
        blkid(&["-c", "/dev/null", "-o", "export", "-t", filter.as_str()])
    }

    fn blkid_device(&self, device: &Path) -> Result<String> {
        let dev = device.to_string_lossy();
        blkid(&["-c", "/dev/null", "-o", "export", &dev])
    }

    fn lsblk(&self) -> Result<String> {
        run_command_output(
            "lsblk",
            &["--all", "--path", "--pairs", "--output", "NAME,PTUUID,PARTUUID"],
        )
    }

    fn mdadm_scan(&self) -> Result<String> {
        run_command_output("mdadm", &["--detail", "--scan"])
    }
}

fn blkid(args: &[&str]) -> Result<String> {
    let (code, stdout) = run_command_status("blkid", args)?;
    blkid_result(args, code, stdout)
}

/// Map a blkid exit status to its output. blkid exits with 2 when no device
/// matches or the device carries no recognizable signature.
fn blkid_result(args: &[&str], code: i32, stdout: String) -> Result<String> {
    match code {
        0 => Ok(stdout),
        2 => Ok(String::new()),
        code => Err(DiskPlanError::CommandFailed {
            command: format!("blkid {}", args.join(" ")),
            stderr: format!("exit status {}", code),
        }),
    }
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    v.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(v)
}

/// Split `blkid -o export` output into one field map per device
pub fn parse_export(output: &str) -> Vec<HashMap<String, String>> {
    let mut devices = Vec::new();
    let mut current = HashMap::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                devices.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            current.insert(key.trim().to_string(), unquote(value).to_string());
        }
    }
    if !current.is_empty() {
        devices.push(current);
    }

    devices
}

/// Value of `field` for the first device in `blkid -o export` output
pub fn export_field(output: &str, field: &str) -> Option<String> {
    parse_export(output)
        .into_iter()
        .find_map(|mut fields| fields.remove(field))
        .filter(|v| !v.is_empty())
}

/// One row of `lsblk --pairs --output NAME,PTUUID,PARTUUID`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsblkEntry {
    pub name: String,
    pub ptuuid: String,
    pub partuuid: String,
}

static PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z_:-]+)="([^"]*)""#).expect("valid pair regex"));

/// Parse `lsblk --pairs` output. Keys are matched case-insensitively and
/// UUID values are lowercased.
pub fn parse_lsblk_pairs(output: &str) -> Vec<LsblkEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields: HashMap<String, String> = PAIR_RE
                .captures_iter(line)
                .map(|c| (c[1].to_ascii_uppercase(), c[2].to_string()))
                .collect();
            let name = fields.remove("NAME")?;
            Some(LsblkEntry {
                name,
                ptuuid: fields.remove("PTUUID").unwrap_or_default().to_lowercase(),
                partuuid: fields.remove("PARTUUID").unwrap_or_default().to_lowercase(),
            })
        })
        .collect()
}

/// An assembled md array as listed by `mdadm --detail --scan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdArray {
    pub device: String,
    /// UUID in mdadm's `8:8:8:8` form, lowercased
    pub uuid: String,
}

/// Parse `ARRAY <device> ... UUID=<uuid> ...` lines
pub fn parse_mdadm_scan(output: &str) -> Vec<MdArray> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            if !tokens.next()?.eq_ignore_ascii_case("ARRAY") {
                return None;
            }
            let device = tokens.next()?.to_string();
            let uuid = tokens.find_map(|t| {
                let (key, value) = t.split_once('=')?;
                key.eq_ignore_ascii_case("uuid")
                    .then(|| value.to_lowercase())
            })?;
            Some(MdArray { device, uuid })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_groups_devices() {
        let out = "DEVNAME=/dev/sda1\nUUID=ABCD-1234\nTYPE=vfat\n\nDEVNAME=/dev/sda2\nUUID=\"11111111-2222-3333-4444-555555555555\"\n";
        let devices = parse_export(out);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["TYPE"], "vfat");
        assert_eq!(devices[1]["UUID"], "11111111-2222-3333-4444-555555555555");
        assert_eq!(export_field(out, "DEVNAME").as_deref(), Some("/dev/sda1"));
        assert_eq!(export_field(out, "PARTUUID"), None);
        assert_eq!(export_field("", "DEVNAME"), None);
    }

    #[test]
    fn lsblk_pairs_parse() {
        let out = concat!(
            "NAME=\"/dev/sda\" PTUUID=\"9A1B-C\" PARTUUID=\"\"\n",
            "NAME=\"/dev/sda1\" PTUUID=\"9a1b-c\" PARTUUID=\"AA-BB\"\n",
            "garbage line\n",
        );
        let entries = parse_lsblk_pairs(out);
        assert_eq!(
            entries,
            vec![
                LsblkEntry {
                    name: "/dev/sda".to_string(),
                    ptuuid: "9a1b-c".to_string(),
                    partuuid: String::new(),
                },
                LsblkEntry {
                    name: "/dev/sda1".to_string(),
                    ptuuid: "9a1b-c".to_string(),
                    partuuid: "aa-bb".to_string(),
                },
            ]
        );
    }

    #[test]
    fn lsblk_lowercase_keys_are_accepted() {
        let entries = parse_lsblk_pairs("name=\"/dev/vdA\" ptuuid=\"x\" partuuid=\"\"");
        assert_eq!(entries.len(), 1);
        // device names keep their case
        assert_eq!(entries[0].name, "/dev/vdA");
    }

    #[test]
    fn blkid_exit_two_is_no_match() {
        let args = ["-c", "/dev/null", "-o", "export", "/dev/sdz"];
        assert_eq!(blkid_result(&args, 2, "noise".to_string()).unwrap(), "");
        assert_eq!(
            blkid_result(&args, 0, "DEVNAME=/dev/sdz\n".to_string()).unwrap(),
            "DEVNAME=/dev/sdz\n"
        );
        assert!(matches!(
            blkid_result(&args, 4, String::new()),
            Err(DiskPlanError::CommandFailed { command, stderr })
                if command == "blkid -c /dev/null -o export /dev/sdz" && stderr == "exit status 4"
        ));
    }

    #[test]
    fn blkid_device_without_signature_is_empty() {
        if !command_exists("blkid") {
            return;
        }
        // Zeroed file without any signature, so blkid exits with 2.
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(1 << 20).unwrap();
        let out = SystemProbe.blkid_device(file.path()).unwrap();
        assert_eq!(export_field(&out, "UUID"), None);
    }

    #[test]
    fn missing_tools_is_a_subset() {
        let missing = SystemProbe::missing_tools();
        assert!(missing.iter().all(|t| PROBE_TOOLS.contains(t)));
    }

    #[test]
    fn mdadm_scan_parse() {
        let out = concat!(
            "ARRAY /dev/md/root metadata=1.2 name=host:root UUID=0B6A3B0E:4C1F4A57:9E7D3C2B:1A0F9E8D\n",
            "ARRAY /dev/md127 metadata=1.2 UUID=deadbeef:00000000:11111111:22222222\n",
            "INACTIVE-ARRAY /dev/md126\n",
        );
        let arrays = parse_mdadm_scan(out);
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays[0].device, "/dev/md/root");
        assert_eq!(arrays[0].uuid, "0b6a3b0e:4c1f4a57:9e7d3c2b:1a0f9e8d");
        assert_eq!(arrays[1].device, "/dev/md127");
    }
}
