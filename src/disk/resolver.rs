//! Device resolution
//!
//! Turns an identifier back into a device path once the planned actions have
//! run, preferring the stable `/dev/disk/by-id` alias when one exists.

use crate::disk::probe::{export_field, parse_lsblk_pairs, parse_mdadm_scan, BlockProbe, LsblkEntry};
use crate::disk::resolve::{md_uuid, Locator, ResolveTable};
use crate::utils::error::{DiskPlanError, Result};
use indexmap::IndexMap;
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Directory roots consulted while resolving
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePaths {
    pub by_id: PathBuf,
    pub by_partuuid: PathBuf,
    pub by_uuid: PathBuf,
    pub mapper: PathBuf,
}

impl Default for DevicePaths {
    fn default() -> Self {
        Self {
            by_id: PathBuf::from("/dev/disk/by-id"),
            by_partuuid: PathBuf::from("/dev/disk/by-partuuid"),
            by_uuid: PathBuf::from("/dev/disk/by-uuid"),
            mapper: PathBuf::from("/dev/mapper"),
        }
    }
}

impl DevicePaths {
    /// All four roots below one directory, laid out like `/dev`
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            by_id: root.join("disk/by-id"),
            by_partuuid: root.join("disk/by-partuuid"),
            by_uuid: root.join("disk/by-uuid"),
            mapper: root.join("mapper"),
        }
    }
}

/// Read-only view over a resolve table that finds devices on the live system
pub struct DeviceResolver<'a, P: BlockProbe> {
    table: &'a ResolveTable,
    probe: P,
    paths: DevicePaths,
    lsblk_cache: OnceCell<Vec<LsblkEntry>>,
}

impl<'a, P: BlockProbe> DeviceResolver<'a, P> {
    pub fn new(table: &'a ResolveTable, probe: P) -> Self {
        Self::with_paths(table, probe, DevicePaths::default())
    }

    pub fn with_paths(table: &'a ResolveTable, probe: P, paths: DevicePaths) -> Self {
        Self {
            table,
            probe,
            paths,
            lsblk_cache: OnceCell::new(),
        }
    }

    pub fn paths(&self) -> &DevicePaths {
        &self.paths
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Resolve `id` to a device path
    pub fn resolve(&self, id: &str) -> Result<PathBuf> {
        let locator = self.table.lookup(id)?;

        let found = match locator {
            Locator::PartitionUuid(uuid) => {
                self.by_tag(&self.paths.by_partuuid, "PARTUUID", &uuid.to_string(), locator)?
            }
            Locator::FilesystemUuid(uuid) => self.by_tag(&self.paths.by_uuid, "UUID", uuid, locator)?,
            Locator::PartitionTableUuid(uuid) => self.by_ptuuid(uuid, locator)?,
            Locator::RaidUuid(uuid) => self.by_md_uuid(uuid, locator)?,
            Locator::EncryptedVolumeName(name) => self.paths.mapper.join(name),
            Locator::RawDevice(path) => path.clone(),
        };

        let path = self.canonicalize(&found);
        info!("Resolved {} ({}) -> {}", id, locator, path.display());
        Ok(path)
    }

    /// Filesystem UUID currently carried by the device behind `id`
    pub fn filesystem_uuid_of(&self, id: &str) -> Result<String> {
        let device = self.resolve(id)?;
        let output = self.probe.blkid_device(&device)?;
        export_field(&output, "UUID").ok_or_else(|| {
            DiskPlanError::DeviceNotFound(format!("no filesystem UUID on {}", device.display()))
        })
    }

    /// Resolve every identifier in registration order
    pub fn resolve_all(&self) -> Result<IndexMap<String, PathBuf>> {
        self.table
            .iter()
            .map(|(id, _)| -> Result<(String, PathBuf)> { Ok((id.to_string(), self.resolve(id)?)) })
            .collect()
    }

    /// Replace `path` with the first `by-id` alias pointing at the same device
    pub fn canonicalize(&self, path: &Path) -> PathBuf {
        let Ok(real) = fs::canonicalize(path) else {
            return path.to_path_buf();
        };
        let Ok(entries) = fs::read_dir(&self.paths.by_id) else {
            return path.to_path_buf();
        };

        let mut aliases: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        aliases.sort();

        aliases
            .into_iter()
            .find(|alias| fs::canonicalize(alias).map(|r| r == real).unwrap_or(false))
            .unwrap_or_else(|| path.to_path_buf())
    }

    fn by_tag(&self, dir: &Path, tag: &str, value: &str, locator: &Locator) -> Result<PathBuf> {
        // Tables loaded from JSON bypass the builder checks.
        let plain_name = !value.is_empty() && !value.contains('/') && value != "." && value != "..";
        let link = dir.join(value);
        if plain_name && link.exists() {
            return Ok(link);
        }

        self.probe.rescan()?;
        let output = self.probe.blkid_by_tag(tag, value)?;
        export_field(&output, "DEVNAME")
            .map(PathBuf::from)
            .ok_or_else(|| DiskPlanError::DeviceNotFound(locator.to_string()))
    }

    fn lsblk_entries(&self) -> Result<&[LsblkEntry]> {
        let entries = self.lsblk_cache.get_or_try_init(|| -> Result<_> {
            self.probe.rescan()?;
            let entries = parse_lsblk_pairs(&self.probe.lsblk()?);
            debug!("Cached {} lsblk entries", entries.len());
            Ok(entries)
        })?;
        Ok(entries.as_slice())
    }

    fn by_ptuuid(&self, uuid: &Uuid, locator: &Locator) -> Result<PathBuf> {
        let wanted = uuid.to_string();
        self.lsblk_entries()?
            .iter()
            .find(|e| e.ptuuid.eq_ignore_ascii_case(&wanted) && e.partuuid.is_empty())
            .map(|e| PathBuf::from(&e.name))
            .ok_or_else(|| DiskPlanError::DeviceNotFound(locator.to_string()))
    }

    fn by_md_uuid(&self, uuid: &Uuid, locator: &Locator) -> Result<PathBuf> {
        let wanted = md_uuid(uuid);
        let output = self.probe.mdadm_scan()?;
        parse_mdadm_scan(&output)
            .into_iter()
            .find(|array| array.uuid.eq_ignore_ascii_case(&wanted))
            .map(|array| PathBuf::from(array.device))
            .ok_or_else(|| DiskPlanError::DeviceNotFound(locator.to_string()))
    }
}
