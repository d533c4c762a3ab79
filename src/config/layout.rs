//! Layout configuration structure

use crate::disk::actions::{BootType, BtrfsRaid, PartitionSize, RootFs};
use crate::disk::builder::LayoutBuilder;
use crate::disk::layouts::{
    compose_btrfs_centric_layout, compose_existing_partitions_layout, compose_raid0_luks_layout,
    compose_single_disk_layout,
};
use crate::disk::resolver::DevicePaths;
use crate::disk::uuid_store::{UuidStore, DEFAULT_UUID_STORE};
use crate::utils::error::{DiskPlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Main layout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Directory holding the persisted identifier UUIDs
    #[serde(default = "default_uuid_store")]
    pub uuid_store: PathBuf,
    /// Overrides for the `/dev` directories used while resolving
    #[serde(default)]
    pub devices: DevicePaths,
    pub layout: LayoutRecipe,
}

/// Which layout recipe to run, with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutRecipe {
    /// Boot, optional swap and root on one freshly partitioned disk
    SingleDisk {
        device: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swap: Option<PartitionSize>,
        #[serde(default)]
        boot_type: BootType,
        #[serde(default)]
        encrypt: bool,
        #[serde(default)]
        root_fs: RootFs,
    },
    /// Partitions that already exist
    ExistingPartitions {
        boot: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swap: Option<PathBuf>,
        root: PathBuf,
        #[serde(default)]
        boot_type: BootType,
        #[serde(default)]
        root_fs: RootFs,
        #[serde(default)]
        format_boot: bool,
    },
    /// RAID-0 across all disks with LUKS on the root array
    Raid0Luks {
        devices: Vec<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swap: Option<PartitionSize>,
        #[serde(default)]
        boot_type: BootType,
        #[serde(default)]
        root_fs: RootFs,
    },
    /// One multi-device btrfs spanning every disk
    BtrfsCentric {
        devices: Vec<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swap: Option<PartitionSize>,
        #[serde(default)]
        boot_type: BootType,
        #[serde(default)]
        raid_type: BtrfsRaid,
        #[serde(default)]
        encrypt: bool,
    },
}

impl LayoutRecipe {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SingleDisk { .. } => "single_disk",
            Self::ExistingPartitions { .. } => "existing_partitions",
            Self::Raid0Luks { .. } => "raid0_luks",
            Self::BtrfsCentric { .. } => "btrfs_centric",
        }
    }
}

fn default_uuid_store() -> PathBuf {
    PathBuf::from(DEFAULT_UUID_STORE)
}

fn validate_path(field: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(DiskPlanError::EmptyArgument(field.to_string()));
    }
    if !path.is_absolute() {
        return Err(DiskPlanError::ConfigError(format!(
            "{} must be an absolute path, got '{}'",
            field,
            path.display()
        )));
    }
    Ok(())
}

fn validate_devices(devices: &[PathBuf], min: usize, kind: &str) -> Result<()> {
    if devices.is_empty() {
        return Err(DiskPlanError::EmptyArgument("devices".to_string()));
    }
    if devices.len() < min {
        return Err(DiskPlanError::ConfigError(format!(
            "{} layout needs at least {} devices, got {}",
            kind,
            min,
            devices.len()
        )));
    }
    let mut seen = HashSet::new();
    for device in devices {
        validate_path("devices", device)?;
        if !seen.insert(device) {
            return Err(DiskPlanError::ConfigError(format!(
                "Device '{}' listed more than once",
                device.display()
            )));
        }
    }
    Ok(())
}

impl LayoutConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        LayoutConfig {
            uuid_store: default_uuid_store(),
            devices: DevicePaths::default(),
            layout: LayoutRecipe::SingleDisk {
                device: PathBuf::from("/dev/sda"),
                swap: Some(PartitionSize::Fixed("8GiB".to_string())),
                boot_type: BootType::Efi,
                encrypt: true,
                root_fs: RootFs::Ext4,
            },
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.uuid_store.as_os_str().is_empty() {
            return Err(DiskPlanError::EmptyArgument("uuid_store".to_string()));
        }

        match &self.layout {
            LayoutRecipe::SingleDisk { device, .. } => validate_path("device", device)?,
            LayoutRecipe::ExistingPartitions { boot, swap, root, .. } => {
                validate_path("boot", boot)?;
                validate_path("root", root)?;
                if let Some(swap) = swap {
                    validate_path("swap", swap)?;
                }
                let mut parts = vec![boot, root];
                parts.extend(swap.iter());
                let unique: HashSet<_> = parts.iter().collect();
                if unique.len() != parts.len() {
                    return Err(DiskPlanError::ConfigError(
                        "boot, swap and root must be different partitions".to_string(),
                    ));
                }
            }
            LayoutRecipe::Raid0Luks { devices, .. } => {
                validate_devices(devices, 2, self.layout.kind())?;
            }
            LayoutRecipe::BtrfsCentric { devices, raid_type, .. } => {
                let min = match raid_type {
                    BtrfsRaid::Raid0 => 1,
                    BtrfsRaid::Raid1 => 2,
                };
                validate_devices(devices, min, self.layout.kind())?;
            }
        }

        Ok(())
    }

    /// Validate, then run the configured recipe into a fresh builder
    pub fn build(&self) -> Result<LayoutBuilder> {
        self.validate()?;
        info!("Building {} layout", self.layout.kind());

        let mut b = LayoutBuilder::new(UuidStore::new(&self.uuid_store));
        match &self.layout {
            LayoutRecipe::SingleDisk {
                device,
                swap,
                boot_type,
                encrypt,
                root_fs,
            } => compose_single_disk_layout(&mut b, device, swap.clone(), *boot_type, *encrypt, *root_fs)?,
            LayoutRecipe::ExistingPartitions {
                boot,
                swap,
                root,
                boot_type,
                root_fs,
                format_boot,
            } => compose_existing_partitions_layout(
                &mut b,
                boot,
                swap.as_deref(),
                root,
                *boot_type,
                *root_fs,
                *format_boot,
            )?,
            LayoutRecipe::Raid0Luks {
                devices,
                swap,
                boot_type,
                root_fs,
            } => compose_raid0_luks_layout(&mut b, devices, swap.clone(), *boot_type, *root_fs)?,
            LayoutRecipe::BtrfsCentric {
                devices,
                swap,
                boot_type,
                raid_type,
                encrypt,
            } => compose_btrfs_centric_layout(&mut b, devices, swap.clone(), *boot_type, *raid_type, *encrypt)?,
        }
        Ok(b)
    }
}

impl FromStr for LayoutConfig {
    type Err = DiskPlanError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
