//! Layout recipes
//!
//! Each recipe is a fixed sequence of builder primitives. They add no checks
//! of their own beyond rejecting an empty device list; every invariant is
//! enforced by the primitives they call.

use crate::disk::actions::{
    BootType, BtrfsRaid, FormatType, PartitionSize, PartitionType, RaidLevel, RootFs,
};
use crate::disk::builder::LayoutBuilder;
use crate::utils::error::{DiskPlanError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Size of the EFI / BIOS boot partition
pub const BOOT_PARTITION_SIZE: &str = "1GiB";

fn boot_size() -> PartitionSize {
    PartitionSize::Fixed(BOOT_PARTITION_SIZE.to_string())
}

fn assign_boot(b: &mut LayoutBuilder, boot_type: BootType, id: &str) -> Result<()> {
    match boot_type {
        BootType::Efi => b.set_efi(id),
        BootType::Bios => b.set_bios(id),
    }
}

/// Single disk: boot, optional swap, root filling the rest, optionally
/// encrypted.
///
/// Identifiers: `gpt`, `part_<boot>`, `part_swap`, `part_root` and
/// `part_luks_root` (mapper name `root`) when encrypted.
pub fn compose_single_disk_layout(
    b: &mut LayoutBuilder,
    device: &Path,
    swap: Option<PartitionSize>,
    boot_type: BootType,
    use_encryption: bool,
    root_fs: RootFs,
) -> Result<()> {
    info!(
        "Composing single disk layout on {} (boot={}, swap={}, luks={}, root={})",
        device.display(),
        boot_type,
        swap.as_ref().map(|s| s.to_string()).unwrap_or_else(|| "none".to_string()),
        use_encryption,
        root_fs
    );

    let boot_id = format!("part_{}", boot_type);

    b.create_partition_table("gpt", Some(device), None)?;
    b.create_partition(&boot_id, "gpt", boot_size(), boot_type.partition_type())?;
    if let Some(size) = swap.clone() {
        b.create_partition("part_swap", "gpt", size, PartitionType::Swap)?;
    }
    b.create_partition("part_root", "gpt", PartitionSize::Remaining, PartitionType::Linux)?;

    let mut root_id = "part_root";
    if use_encryption {
        b.create_encrypted_volume("part_luks_root", "root", Some("part_root"), None)?;
        root_id = "part_luks_root";
    }

    b.format(&boot_id, boot_type.format_type(), Some(boot_type.as_str()))?;
    if swap.is_some() {
        b.format("part_swap", FormatType::Swap, Some("swap"))?;
    }
    b.format(root_id, root_fs.format_type(), Some("root"))?;

    assign_boot(b, boot_type, &boot_id)?;
    if swap.is_some() {
        b.set_swap("part_swap")?;
    }
    b.set_root(root_id, root_fs)
}

/// Reuse partitions that already exist.
///
/// Identifiers: `part_<boot>_dev0`, `part_swap_dev0`, `part_root_dev0`.
/// The boot partition is only formatted when `format_boot` is set so an
/// existing EFI partition shared with another OS survives.
pub fn compose_existing_partitions_layout(
    b: &mut LayoutBuilder,
    boot: &Path,
    swap: Option<&Path>,
    root: &Path,
    boot_type: BootType,
    root_fs: RootFs,
    format_boot: bool,
) -> Result<()> {
    info!(
        "Composing layout from existing partitions (boot={}, root={})",
        boot.display(),
        root.display()
    );

    let boot_id = format!("part_{}_dev0", boot_type);

    b.register_existing(&boot_id, boot)?;
    if let Some(dev) = swap {
        b.register_existing("part_swap_dev0", dev)?;
    }
    b.register_existing("part_root_dev0", root)?;

    if format_boot {
        b.format(&boot_id, boot_type.format_type(), Some(boot_type.as_str()))?;
    }
    if swap.is_some() {
        b.format("part_swap_dev0", FormatType::Swap, Some("swap"))?;
    }
    b.format("part_root_dev0", root_fs.format_type(), Some("root"))?;

    assign_boot(b, boot_type, &boot_id)?;
    if swap.is_some() {
        b.set_swap("part_swap_dev0")?;
    }
    b.set_root("part_root_dev0", root_fs)
}

/// Striped root (and swap) across all devices, root encrypted on top of
/// the array.
///
/// Every device gets `gpt_devN`, `part_<boot>_devN`, `part_swap_devN` and
/// `part_root_devN`; arrays are `part_raid_swap` and `part_raid_root`, the
/// encrypted root is `part_luks_root`. Only the first boot partition is
/// formatted.
pub fn compose_raid0_luks_layout(
    b: &mut LayoutBuilder,
    devices: &[PathBuf],
    swap: Option<PartitionSize>,
    boot_type: BootType,
    root_fs: RootFs,
) -> Result<()> {
    if devices.is_empty() {
        return Err(DiskPlanError::EmptyArgument("devices".to_string()));
    }
    info!(
        "Composing raid0+luks layout over {} device(s)",
        devices.len()
    );

    for (i, device) in devices.iter().enumerate() {
        let gpt = format!("gpt_dev{}", i);
        b.create_partition_table(&gpt, Some(device.as_path()), None)?;
        b.create_partition(
            &format!("part_{}_dev{}", boot_type, i),
            &gpt,
            boot_size(),
            boot_type.partition_type(),
        )?;
        if let Some(size) = swap.clone() {
            b.create_partition(&format!("part_swap_dev{}", i), &gpt, size, PartitionType::Raid)?;
        }
        b.create_partition(
            &format!("part_root_dev{}", i),
            &gpt,
            PartitionSize::Remaining,
            PartitionType::Raid,
        )?;
    }

    if swap.is_some() {
        let members = b.registry().expand_ids(r"^part_swap_dev[0-9]+$")?;
        b.create_raid("part_raid_swap", RaidLevel::Raid0, "swap", &members)?;
    }
    let members = b.registry().expand_ids(r"^part_root_dev[0-9]+$")?;
    b.create_raid("part_raid_root", RaidLevel::Raid0, "root", &members)?;
    b.create_encrypted_volume("part_luks_root", "root", Some("part_raid_root"), None)?;

    let boot_id = format!("part_{}_dev0", boot_type);
    b.format(&boot_id, boot_type.format_type(), Some(boot_type.as_str()))?;
    if swap.is_some() {
        b.format("part_raid_swap", FormatType::Swap, Some("swap"))?;
    }
    b.format("part_luks_root", root_fs.format_type(), Some("root"))?;

    assign_boot(b, boot_type, &boot_id)?;
    if swap.is_some() {
        b.set_swap("part_raid_swap")?;
    }
    b.set_root("part_luks_root", root_fs)
}

/// One btrfs filesystem spanning every device.
///
/// The first device also carries the boot and optional swap partitions.
/// With encryption each root partition is wrapped in its own LUKS volume
/// (`part_luks_devN`, mapper `luks_devN`) and btrfs spans the volumes.
pub fn compose_btrfs_centric_layout(
    b: &mut LayoutBuilder,
    devices: &[PathBuf],
    swap: Option<PartitionSize>,
    boot_type: BootType,
    raid_type: BtrfsRaid,
    use_encryption: bool,
) -> Result<()> {
    if devices.is_empty() {
        return Err(DiskPlanError::EmptyArgument("devices".to_string()));
    }
    info!(
        "Composing btrfs-centric layout over {} device(s) ({}, luks={})",
        devices.len(),
        raid_type,
        use_encryption
    );

    let root_type = if use_encryption {
        PartitionType::Luks
    } else {
        PartitionType::Linux
    };
    let boot_id = format!("part_{}_dev0", boot_type);

    for (i, device) in devices.iter().enumerate() {
        let gpt = format!("gpt_dev{}", i);
        b.create_partition_table(&gpt, Some(device.as_path()), None)?;
        if i == 0 {
            b.create_partition(&boot_id, &gpt, boot_size(), boot_type.partition_type())?;
            if let Some(size) = swap.clone() {
                b.create_partition("part_swap_dev0", &gpt, size, PartitionType::Swap)?;
            }
        }
        b.create_partition(
            &format!("part_root_dev{}", i),
            &gpt,
            PartitionSize::Remaining,
            root_type,
        )?;
    }

    let prefix = if use_encryption {
        for i in 0..devices.len() {
            b.create_encrypted_volume(
                &format!("part_luks_dev{}", i),
                &format!("luks_dev{}", i),
                Some(format!("part_root_dev{}", i).as_str()),
                None,
            )?;
        }
        "luks"
    } else {
        "root"
    };

    b.format(&boot_id, boot_type.format_type(), Some(boot_type.as_str()))?;
    if swap.is_some() {
        b.format("part_swap_dev0", FormatType::Swap, Some("swap"))?;
    }
    let members = b
        .registry()
        .expand_ids(&format!(r"^part_{}_dev[0-9]+$", prefix))?;
    b.format_btrfs(&members, Some("root"), raid_type)?;

    assign_boot(b, boot_type, &boot_id)?;
    if swap.is_some() {
        b.set_swap("part_swap_dev0")?;
    }
    b.set_root(&format!("part_{}_dev0", prefix), RootFs::Btrfs)
}
