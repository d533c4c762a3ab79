//! Layout actions and the ordered action plan
//!
//! The plan is append-only: its order is the execution order for whoever
//! applies it. Every action can be rendered as a `key=value` record ending in
//! the `;` separator, which is why identifiers may not contain `;`.

use crate::utils::error::{DiskPlanError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// GPT partition type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionType {
    Bios,
    Efi,
    Swap,
    Raid,
    Luks,
    Linux,
}

impl PartitionType {
    pub const ALL: [&'static str; 6] = ["bios", "efi", "swap", "raid", "luks", "linux"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bios => "bios",
            Self::Efi => "efi",
            Self::Swap => "swap",
            Self::Raid => "raid",
            Self::Luks => "luks",
            Self::Linux => "linux",
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionType {
    type Err = DiskPlanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bios" => Ok(Self::Bios),
            "efi" => Ok(Self::Efi),
            "swap" => Ok(Self::Swap),
            "raid" => Ok(Self::Raid),
            "luks" => Ok(Self::Luks),
            "linux" => Ok(Self::Linux),
            _ => Err(DiskPlanError::invalid_enum("type", s, &Self::ALL)),
        }
    }
}

/// Filesystem (or swap signature) written by a format action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatType {
    Bios,
    Efi,
    Swap,
    Ext4,
    Btrfs,
}

impl FormatType {
    pub const ALL: [&'static str; 5] = ["bios", "efi", "swap", "ext4", "btrfs"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bios => "bios",
            Self::Efi => "efi",
            Self::Swap => "swap",
            Self::Ext4 => "ext4",
            Self::Btrfs => "btrfs",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatType {
    type Err = DiskPlanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bios" => Ok(Self::Bios),
            "efi" => Ok(Self::Efi),
            "swap" => Ok(Self::Swap),
            "ext4" => Ok(Self::Ext4),
            "btrfs" => Ok(Self::Btrfs),
            _ => Err(DiskPlanError::invalid_enum("type", s, &Self::ALL)),
        }
    }
}

/// Boot partition flavour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootType {
    #[default]
    Efi,
    Bios,
}

impl BootType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Efi => "efi",
            Self::Bios => "bios",
        }
    }

    pub fn partition_type(&self) -> PartitionType {
        match self {
            Self::Efi => PartitionType::Efi,
            Self::Bios => PartitionType::Bios,
        }
    }

    pub fn format_type(&self) -> FormatType {
        match self {
            Self::Efi => FormatType::Efi,
            Self::Bios => FormatType::Bios,
        }
    }
}

impl fmt::Display for BootType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootType {
    type Err = DiskPlanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "efi" => Ok(Self::Efi),
            "bios" => Ok(Self::Bios),
            _ => Err(DiskPlanError::invalid_enum("type", s, &["efi", "bios"])),
        }
    }
}

/// Root filesystem supported by the layout recipes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootFs {
    #[default]
    Ext4,
    Btrfs,
}

impl RootFs {
    pub fn format_type(&self) -> FormatType {
        match self {
            Self::Ext4 => FormatType::Ext4,
            Self::Btrfs => FormatType::Btrfs,
        }
    }

    /// Mount options used for the root filesystem
    pub fn mount_options(&self) -> &'static str {
        match self {
            Self::Btrfs => "defaults,noatime,compress-force=zstd,subvol=/root",
            Self::Ext4 => "defaults,noatime,errors=remount-ro,discard",
        }
    }
}

impl fmt::Display for RootFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.format_type().as_str())
    }
}

impl FromStr for RootFs {
    type Err = DiskPlanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ext4" => Ok(Self::Ext4),
            "btrfs" => Ok(Self::Btrfs),
            _ => Err(DiskPlanError::invalid_enum("root_fs", s, &["ext4", "btrfs"])),
        }
    }
}

/// md RAID level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaidLevel {
    #[serde(rename = "0")]
    Raid0,
    #[serde(rename = "1")]
    Raid1,
    #[serde(rename = "5")]
    Raid5,
    #[serde(rename = "6")]
    Raid6,
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            Self::Raid0 => "0",
            Self::Raid1 => "1",
            Self::Raid5 => "5",
            Self::Raid6 => "6",
        };
        f.write_str(level)
    }
}

impl FromStr for RaidLevel {
    type Err = DiskPlanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" => Ok(Self::Raid0),
            "1" => Ok(Self::Raid1),
            "5" => Ok(Self::Raid5),
            "6" => Ok(Self::Raid6),
            _ => Err(DiskPlanError::invalid_enum("level", s, &["0", "1", "5", "6"])),
        }
    }
}

/// Data profile of a multi-device btrfs filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtrfsRaid {
    #[default]
    Raid0,
    Raid1,
}

impl fmt::Display for BtrfsRaid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raid0 => f.write_str("raid0"),
            Self::Raid1 => f.write_str("raid1"),
        }
    }
}

impl FromStr for BtrfsRaid {
    type Err = DiskPlanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raid0" => Ok(Self::Raid0),
            "raid1" => Ok(Self::Raid1),
            _ => Err(DiskPlanError::invalid_enum("raid_type", s, &["raid0", "raid1"])),
        }
    }
}

static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+(\.[0-9]+)?([KMGTP]i?B|[KMGTP]|%)?$").expect("valid size regex")
});

/// Partition size: either a fixed amount or the rest of the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PartitionSize {
    Remaining,
    Fixed(String),
}

impl PartitionSize {
    pub fn is_remaining(&self) -> bool {
        matches!(self, Self::Remaining)
    }
}

impl FromStr for PartitionSize {
    type Err = DiskPlanError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DiskPlanError::EmptyArgument("size".to_string()));
        }
        if s == "remaining" {
            return Ok(Self::Remaining);
        }
        if !SIZE_RE.is_match(s) {
            return Err(DiskPlanError::InvalidSize(s.to_string()));
        }
        Ok(Self::Fixed(s.to_string()))
    }
}

impl TryFrom<String> for PartitionSize {
    type Error = DiskPlanError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PartitionSize> for String {
    fn from(size: PartitionSize) -> Self {
        size.to_string()
    }
}

impl fmt::Display for PartitionSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remaining => f.write_str("remaining"),
            Self::Fixed(s) => f.write_str(s),
        }
    }
}

/// A single layout action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Reference a device that already exists
    Existing { new_id: String, device: PathBuf },
    /// Reference a filesystem that already exists, by its UUID
    ExistingFilesystem { new_id: String, uuid: String },
    /// Write a new GPT label onto a device or onto a previously created id
    CreateGpt {
        new_id: String,
        device: Option<PathBuf>,
        id: Option<String>,
    },
    CreatePartition {
        new_id: String,
        id: String,
        size: PartitionSize,
        #[serde(rename = "type")]
        part_type: PartitionType,
    },
    CreateRaid {
        new_id: String,
        level: RaidLevel,
        name: String,
        ids: Vec<String>,
        md_uuid: String,
    },
    CreateLuks {
        new_id: String,
        name: String,
        device: Option<PathBuf>,
        id: Option<String>,
    },
    Format {
        id: String,
        #[serde(rename = "type")]
        fs: FormatType,
        label: Option<String>,
    },
    FormatBtrfs {
        ids: Vec<String>,
        label: Option<String>,
        raid_type: BtrfsRaid,
    },
}

impl Action {
    /// Record name used in the serialized plan
    pub fn name(&self) -> &'static str {
        match self {
            Self::Existing { .. } => "existing",
            Self::ExistingFilesystem { .. } => "existing_filesystem",
            Self::CreateGpt { .. } => "create_gpt",
            Self::CreatePartition { .. } => "create_partition",
            Self::CreateRaid { .. } => "create_raid",
            Self::CreateLuks { .. } => "create_luks",
            Self::Format { .. } => "format",
            Self::FormatBtrfs { .. } => "format_btrfs",
        }
    }

    /// Identifier introduced by this action, if any
    pub fn created_id(&self) -> Option<&str> {
        match self {
            Self::Existing { new_id, .. }
            | Self::ExistingFilesystem { new_id, .. }
            | Self::CreateGpt { new_id, .. }
            | Self::CreatePartition { new_id, .. }
            | Self::CreateRaid { new_id, .. }
            | Self::CreateLuks { new_id, .. } => Some(new_id),
            Self::Format { .. } | Self::FormatBtrfs { .. } => None,
        }
    }

    /// Pre-existing identifiers this action depends on
    pub fn referenced_ids(&self) -> Vec<&str> {
        match self {
            Self::Existing { .. } | Self::ExistingFilesystem { .. } => Vec::new(),
            Self::CreateGpt { id, .. } | Self::CreateLuks { id, .. } => {
                id.iter().map(String::as_str).collect()
            }
            Self::CreatePartition { id, .. } | Self::Format { id, .. } => vec![id.as_str()],
            Self::CreateRaid { ids, .. } | Self::FormatBtrfs { ids, .. } => {
                ids.iter().map(String::as_str).collect()
            }
        }
    }

    /// Render as a `key=value ... ;` record
    pub fn to_record(&self) -> String {
        let mut fields = vec![format!("action={}", self.name())];
        let mut push = |k: &str, v: String| fields.push(format!("{}={}", k, v));

        match self {
            Self::Existing { new_id, device } => {
                push("new_id", new_id.clone());
                push("device", device.display().to_string());
            }
            Self::ExistingFilesystem { new_id, uuid } => {
                push("new_id", new_id.clone());
                push("uuid", uuid.clone());
            }
            Self::CreateGpt { new_id, device, id } => {
                push("new_id", new_id.clone());
                if let Some(d) = device {
                    push("device", d.display().to_string());
                }
                if let Some(i) = id {
                    push("id", i.clone());
                }
            }
            Self::CreatePartition {
                new_id,
                id,
                size,
                part_type,
            } => {
                push("new_id", new_id.clone());
                push("id", id.clone());
                push("size", size.to_string());
                push("type", part_type.to_string());
            }
            Self::CreateRaid {
                new_id,
                level,
                name,
                ids,
                md_uuid,
            } => {
                push("new_id", new_id.clone());
                push("level", level.to_string());
                push("name", name.clone());
                push("ids", ids.join(","));
                push("md_uuid", md_uuid.clone());
            }
            Self::CreateLuks {
                new_id,
                name,
                device,
                id,
            } => {
                push("new_id", new_id.clone());
                push("name", name.clone());
                if let Some(d) = device {
                    push("device", d.display().to_string());
                }
                if let Some(i) = id {
                    push("id", i.clone());
                }
            }
            Self::Format { id, fs, label } => {
                push("id", id.clone());
                push("type", fs.to_string());
                if let Some(l) = label {
                    push("label", l.clone());
                }
            }
            Self::FormatBtrfs {
                ids,
                label,
                raid_type,
            } => {
                push("ids", ids.join(","));
                if let Some(l) = label {
                    push("label", l.clone());
                }
                push("raid_type", raid_type.to_string());
            }
        }

        format!("{};", fields.join(" "))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_record())
    }
}

/// Ordered, append-only list of layout actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionPlan {
    actions: Vec<Action>,
}

impl ActionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.actions.iter()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Count actions with the given record name
    pub fn count(&self, name: &str) -> usize {
        self.actions.iter().filter(|a| a.name() == name).count()
    }

    /// Serialized records, one per action
    pub fn to_records(&self) -> Vec<String> {
        self.actions.iter().map(Action::to_record).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<'a> IntoIterator for &'a ActionPlan {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}
