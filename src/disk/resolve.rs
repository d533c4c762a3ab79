//! Resolve table: identifier → typed device locator

use crate::utils::error::{DiskPlanError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// How a device behind an identifier can be found once it exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Locator {
    /// GPT disk label UUID of a whole disk
    PartitionTableUuid(Uuid),
    /// GPT partition UUID
    PartitionUuid(Uuid),
    /// Filesystem UUID (not necessarily RFC 4122 shaped, e.g. vfat serials)
    FilesystemUuid(String),
    /// UUID of an md array, stored in its RFC 4122 form
    RaidUuid(Uuid),
    /// Mapper name of an opened LUKS volume
    EncryptedVolumeName(String),
    /// Path of a pre-existing device
    RawDevice(PathBuf),
}

impl Locator {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PartitionTableUuid(_) => "ptuuid",
            Self::PartitionUuid(_) => "partuuid",
            Self::FilesystemUuid(_) => "uuid",
            Self::RaidUuid(_) => "mdadm",
            Self::EncryptedVolumeName(_) => "luks",
            Self::RawDevice(_) => "device",
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartitionTableUuid(u) | Self::PartitionUuid(u) | Self::RaidUuid(u) => {
                write!(f, "{}:{}", self.kind(), u)
            }
            Self::FilesystemUuid(s) | Self::EncryptedVolumeName(s) => {
                write!(f, "{}:{}", self.kind(), s)
            }
            Self::RawDevice(p) => write!(f, "{}:{}", self.kind(), p.display()),
        }
    }
}

/// Convert a UUID into the `8:8:8:8` hex form mdadm uses for array UUIDs
pub fn md_uuid(uuid: &Uuid) -> String {
    let hex = uuid.simple().to_string();
    format!("{}:{}:{}:{}", &hex[0..8], &hex[8..16], &hex[16..24], &hex[24..32])
}

/// Write-once mapping from identifier to locator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveTable {
    entries: IndexMap<String, Locator>,
}

impl ResolveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `AlreadyResolved` if `id` already has a locator
    pub fn register(&mut self, id: &str, locator: Locator) -> Result<()> {
        if self.entries.contains_key(id) {
            return Err(DiskPlanError::AlreadyResolved(id.to_string()));
        }
        self.entries.insert(id.to_string(), locator);
        Ok(())
    }

    pub fn lookup(&self, id: &str) -> Result<&Locator> {
        self.entries
            .get(id)
            .ok_or_else(|| DiskPlanError::UnknownIdentifier(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Locator)> {
        self.entries.iter().map(|(id, loc)| (id.as_str(), loc))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
