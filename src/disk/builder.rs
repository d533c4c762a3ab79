//! Layout plan builder
//!
//! Every `create_*` call validates its arguments and the identifiers it
//! references before anything is registered, then allocates the new
//! identifier, records how to find the resulting device and appends the
//! action. A rejected call leaves the builder untouched.

use crate::disk::actions::{
    Action, ActionPlan, BtrfsRaid, FormatType, PartitionSize, PartitionType, RaidLevel, RootFs,
};
use crate::disk::registry::{IdRegistry, ID_SEPARATOR};
use crate::disk::resolve::{md_uuid, Locator, ResolveTable};
use crate::disk::uuid_store::UuidStore;
use crate::utils::error::{DiskPlanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Identifiers currently playing each mount role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRoles {
    pub efi: Option<String>,
    pub bios: Option<String>,
    pub swap: Option<String>,
    pub root: Option<String>,
    pub root_fs: Option<RootFs>,
    pub root_mount_options: Option<String>,
}

/// Storage features used by the plan; the boot environment needs matching
/// support (mdadm, cryptsetup, btrfs tools).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutFeatures {
    pub used_raid: bool,
    pub used_luks: bool,
    pub used_btrfs: bool,
    pub used_encryption: bool,
}

/// Finished plan handed to downstream consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutPlan {
    pub actions: ActionPlan,
    pub resolve: ResolveTable,
    pub roles: LayoutRoles,
    pub features: LayoutFeatures,
    /// Kernel command line fragments for the initramfs
    pub cmdline: Vec<String>,
}

impl LayoutPlan {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn check_value(arg: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DiskPlanError::EmptyArgument(arg.to_string()));
    }
    if value.contains(ID_SEPARATOR) || value.chars().any(char::is_whitespace) {
        return Err(DiskPlanError::InvalidArgument {
            arg: arg.to_string(),
            value: value.to_string(),
            reason: "must not contain ';' or whitespace".to_string(),
        });
    }
    Ok(())
}

fn check_device(device: &Path) -> Result<()> {
    check_value("device", &device.to_string_lossy())
}

/// Guarded builder for a disk layout plan
#[derive(Debug)]
pub struct LayoutBuilder {
    registry: IdRegistry,
    table: ResolveTable,
    plan: ActionPlan,
    /// Partition identifier → identifier of its table
    part_to_table: HashMap<String, String>,
    tables: HashSet<String>,
    /// Tables that already received a `size=remaining` partition
    tables_full: HashSet<String>,
    formatted: HashSet<String>,
    mapper_names: HashSet<String>,
    roles: LayoutRoles,
    features: LayoutFeatures,
    cmdline: Vec<String>,
}

impl LayoutBuilder {
    pub fn new(store: UuidStore) -> Self {
        Self {
            registry: IdRegistry::new(store),
            table: ResolveTable::new(),
            plan: ActionPlan::new(),
            part_to_table: HashMap::new(),
            tables: HashSet::new(),
            tables_full: HashSet::new(),
            formatted: HashSet::new(),
            mapper_names: HashSet::new(),
            roles: LayoutRoles::default(),
            features: LayoutFeatures::default(),
            cmdline: Vec::new(),
        }
    }

    /// Allocate `new_id` and record its locator. Callers have already
    /// validated everything else.
    fn allocate(&mut self, new_id: &str, locator: impl FnOnce(Uuid) -> Locator) -> Result<Uuid> {
        let uuid = self.registry.create(new_id)?;
        self.table.register(new_id, locator(uuid))?;
        Ok(uuid)
    }

    fn append(&mut self, action: Action) {
        info!("Plan: {}", action);
        self.plan.push(action);
    }

    /// Reference an existing device under a new identifier
    pub fn register_existing(&mut self, new_id: &str, device: impl AsRef<Path>) -> Result<()> {
        let device = device.as_ref();
        check_device(device)?;
        self.registry.check_new(new_id)?;

        self.allocate(new_id, |_| Locator::RawDevice(device.to_path_buf()))?;
        self.append(Action::Existing {
            new_id: new_id.to_string(),
            device: device.to_path_buf(),
        });
        Ok(())
    }

    /// Reference an existing filesystem by its UUID
    pub fn register_existing_filesystem(&mut self, new_id: &str, fs_uuid: &str) -> Result<()> {
        check_value("uuid", fs_uuid)?;
        // The UUID is looked up as a file name under /dev/disk/by-uuid.
        if fs_uuid.contains('/') || fs_uuid == "." || fs_uuid == ".." {
            return Err(DiskPlanError::InvalidArgument {
                arg: "uuid".to_string(),
                value: fs_uuid.to_string(),
                reason: "must be a plain file name without '/'".to_string(),
            });
        }
        self.registry.check_new(new_id)?;

        self.allocate(new_id, |_| Locator::FilesystemUuid(fs_uuid.to_string()))?;
        self.append(Action::ExistingFilesystem {
            new_id: new_id.to_string(),
            uuid: fs_uuid.to_string(),
        });
        Ok(())
    }

    /// Create a GPT partition table on a device or on an existing identifier.
    ///
    /// Exactly one of `device` and `existing_id` must be given.
    pub fn create_partition_table(
        &mut self,
        new_id: &str,
        device: Option<&Path>,
        existing_id: Option<&str>,
    ) -> Result<()> {
        if device.is_some() == existing_id.is_some() {
            return Err(DiskPlanError::mutually_exclusive(&["device", "id"]));
        }
        if let Some(d) = device {
            check_device(d)?;
        }
        self.registry.check_new(new_id)?;
        if let Some(id) = existing_id {
            self.registry.require_existing(id)?;
        }

        self.allocate(new_id, Locator::PartitionTableUuid)?;
        self.tables.insert(new_id.to_string());
        self.append(Action::CreateGpt {
            new_id: new_id.to_string(),
            device: device.map(Path::to_path_buf),
            id: existing_id.map(str::to_string),
        });
        Ok(())
    }

    /// Append a partition to a table created earlier in this plan
    pub fn create_partition(
        &mut self,
        new_id: &str,
        table_id: &str,
        size: PartitionSize,
        part_type: PartitionType,
    ) -> Result<()> {
        self.registry.check_new(new_id)?;
        self.registry.require_existing(table_id)?;
        if !self.tables.contains(table_id) {
            return Err(DiskPlanError::NotAPartitionTable(table_id.to_string()));
        }
        if self.tables_full.contains(table_id) {
            return Err(DiskPlanError::TableFull(table_id.to_string()));
        }

        self.allocate(new_id, Locator::PartitionUuid)?;
        if size.is_remaining() {
            self.tables_full.insert(table_id.to_string());
        }
        self.part_to_table
            .insert(new_id.to_string(), table_id.to_string());
        self.append(Action::CreatePartition {
            new_id: new_id.to_string(),
            id: table_id.to_string(),
            size,
            part_type,
        });
        Ok(())
    }

    /// Assemble an md array from a `;`-separated list of member identifiers
    pub fn create_raid(
        &mut self,
        new_id: &str,
        level: RaidLevel,
        name: &str,
        member_ids: &str,
    ) -> Result<()> {
        check_value("name", name)?;
        self.registry.check_new(new_id)?;
        let members = self.registry.require_unique_existing_set("ids", member_ids)?;

        let uuid = self.allocate(new_id, Locator::RaidUuid)?;
        let md = md_uuid(&uuid);
        self.features.used_raid = true;
        self.cmdline.push(format!("rd.md.uuid={}", md));
        self.append(Action::CreateRaid {
            new_id: new_id.to_string(),
            level,
            name: name.to_string(),
            ids: members,
            md_uuid: md,
        });
        Ok(())
    }

    /// Wrap an identifier or a raw device in a LUKS container opened as
    /// `/dev/mapper/<name>`. Exactly one of `underlying_id` and `device`
    /// must be given.
    pub fn create_encrypted_volume(
        &mut self,
        new_id: &str,
        name: &str,
        underlying_id: Option<&str>,
        device: Option<&Path>,
    ) -> Result<()> {
        if underlying_id.is_some() == device.is_some() {
            return Err(DiskPlanError::mutually_exclusive(&["device", "id"]));
        }
        check_value("name", name)?;
        if name.contains('/') {
            return Err(DiskPlanError::InvalidArgument {
                arg: "name".to_string(),
                value: name.to_string(),
                reason: "must not contain '/'".to_string(),
            });
        }
        if self.mapper_names.contains(name) {
            return Err(DiskPlanError::InvalidArgument {
                arg: "name".to_string(),
                value: name.to_string(),
                reason: "mapper name already used".to_string(),
            });
        }
        if let Some(d) = device {
            check_device(d)?;
        }
        self.registry.check_new(new_id)?;
        if let Some(id) = underlying_id {
            self.registry.require_existing(id)?;
        }

        let uuid = self.allocate(new_id, |_| Locator::EncryptedVolumeName(name.to_string()))?;
        self.mapper_names.insert(name.to_string());
        self.features.used_luks = true;
        self.features.used_encryption = true;
        self.cmdline.push(format!("rd.luks.uuid={}", uuid));
        self.append(Action::CreateLuks {
            new_id: new_id.to_string(),
            name: name.to_string(),
            device: device.map(Path::to_path_buf),
            id: underlying_id.map(str::to_string),
        });
        Ok(())
    }

    /// Format an identifier. Each identifier can be formatted once.
    pub fn format(&mut self, id: &str, fs: FormatType, label: Option<&str>) -> Result<()> {
        self.registry.require_existing(id)?;
        if let Some(l) = label {
            check_value("label", l)?;
        }
        if self.formatted.contains(id) {
            return Err(DiskPlanError::AlreadyFormatted(id.to_string()));
        }

        self.formatted.insert(id.to_string());
        if fs == FormatType::Btrfs {
            self.features.used_btrfs = true;
        }
        self.append(Action::Format {
            id: id.to_string(),
            fs,
            label: label.map(str::to_string),
        });
        Ok(())
    }

    /// Create one btrfs filesystem spanning several identifiers
    pub fn format_btrfs(
        &mut self,
        ids: &str,
        label: Option<&str>,
        raid_type: BtrfsRaid,
    ) -> Result<()> {
        let members = self.registry.require_unique_existing_set("ids", ids)?;
        if let Some(l) = label {
            check_value("label", l)?;
        }
        if let Some(done) = members.iter().find(|id| self.formatted.contains(*id)) {
            return Err(DiskPlanError::AlreadyFormatted(done.clone()));
        }

        self.formatted.extend(members.iter().cloned());
        self.features.used_btrfs = true;
        self.append(Action::FormatBtrfs {
            ids: members,
            label: label.map(str::to_string),
            raid_type,
        });
        Ok(())
    }

    pub fn set_efi(&mut self, id: &str) -> Result<()> {
        self.registry.require_existing(id)?;
        self.roles.efi = Some(id.to_string());
        Ok(())
    }

    pub fn set_bios(&mut self, id: &str) -> Result<()> {
        self.registry.require_existing(id)?;
        self.roles.bios = Some(id.to_string());
        Ok(())
    }

    pub fn set_swap(&mut self, id: &str) -> Result<()> {
        self.registry.require_existing(id)?;
        self.roles.swap = Some(id.to_string());
        Ok(())
    }

    /// Make `id` the active root and derive its mount options from `fs`
    pub fn set_root(&mut self, id: &str, fs: RootFs) -> Result<()> {
        self.registry.require_existing(id)?;
        self.roles.root = Some(id.to_string());
        self.roles.root_fs = Some(fs);
        self.roles.root_mount_options = Some(fs.mount_options().to_string());
        Ok(())
    }

    pub fn registry(&self) -> &IdRegistry {
        &self.registry
    }

    pub fn resolve_table(&self) -> &ResolveTable {
        &self.table
    }

    pub fn plan(&self) -> &ActionPlan {
        &self.plan
    }

    pub fn roles(&self) -> &LayoutRoles {
        &self.roles
    }

    pub fn features(&self) -> LayoutFeatures {
        self.features
    }

    pub fn cmdline(&self) -> &[String] {
        &self.cmdline
    }

    /// Table identifier a partition was created on
    pub fn table_of(&self, partition_id: &str) -> Option<&str> {
        self.part_to_table.get(partition_id).map(String::as_str)
    }

    /// Whether a table already received its trailing `size=remaining` partition
    pub fn is_table_full(&self, table_id: &str) -> bool {
        self.tables_full.contains(table_id)
    }

    pub fn is_formatted(&self, id: &str) -> bool {
        self.formatted.contains(id)
    }

    /// Devices named directly by the plan, in plan order
    pub fn devices(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.plan
            .iter()
            .filter_map(|a| match a {
                Action::Existing { device, .. } => Some(device.clone()),
                Action::CreateGpt { device, .. } | Action::CreateLuks { device, .. } => {
                    device.clone()
                }
                _ => None,
            })
            .filter(|d| seen.insert(d.clone()))
            .collect()
    }

    pub fn into_plan(self) -> LayoutPlan {
        LayoutPlan {
            actions: self.plan,
            resolve: self.table,
            roles: self.roles,
            features: self.features,
            cmdline: self.cmdline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> (tempfile::TempDir, LayoutBuilder) {
        let dir = tempfile::tempdir().unwrap();
        let b = LayoutBuilder::new(UuidStore::new(dir.path()));
        (dir, b)
    }

    fn size(s: &str) -> PartitionSize {
        s.parse().unwrap()
    }

    #[test]
    fn table_requires_exactly_one_source() {
        let (_dir, mut b) = builder();
        b.register_existing("disk", "/dev/sda").unwrap();

        assert!(matches!(
            b.create_partition_table("gpt", Some(Path::new("/dev/sda")), Some("disk")),
            Err(DiskPlanError::MutuallyExclusiveArguments(_))
        ));
        assert!(matches!(
            b.create_partition_table("gpt", None, None),
            Err(DiskPlanError::MutuallyExclusiveArguments(_))
        ));
        assert!(!b.registry().exists("gpt"));

        b.create_partition_table("gpt", None, Some("disk")).unwrap();
        assert!(matches!(
            b.resolve_table().lookup("gpt").unwrap(),
            Locator::PartitionTableUuid(_)
        ));
    }

    #[test]
    fn table_on_unknown_id_fails_without_minting() {
        let (_dir, mut b) = builder();
        assert!(matches!(
            b.create_partition_table("gpt", None, Some("missing")),
            Err(DiskPlanError::UnknownIdentifier(_))
        ));
        assert!(b.registry().is_empty());
        assert!(b.resolve_table().is_empty());
    }

    #[test]
    fn remaining_closes_the_table() {
        let (_dir, mut b) = builder();
        b.create_partition_table("gpt", Some(Path::new("/dev/sda")), None)
            .unwrap();
        b.create_partition("part_efi", "gpt", size("1GiB"), PartitionType::Efi)
            .unwrap();
        b.create_partition("part_root", "gpt", size("remaining"), PartitionType::Linux)
            .unwrap();
        assert!(b.is_table_full("gpt"));

        let err = b
            .create_partition("part_home", "gpt", size("10GiB"), PartitionType::Linux)
            .unwrap_err();
        assert!(matches!(err, DiskPlanError::TableFull(t) if t == "gpt"));
        assert!(!b.registry().exists("part_home"));
        assert_eq!(b.table_of("part_root"), Some("gpt"));
    }

    #[test]
    fn partition_needs_a_table() {
        let (_dir, mut b) = builder();
        b.register_existing("disk", "/dev/sda").unwrap();
        assert!(matches!(
            b.create_partition("p1", "disk", size("1GiB"), PartitionType::Linux),
            Err(DiskPlanError::NotAPartitionTable(_))
        ));
        assert!(matches!(
            b.create_partition("p1", "nope", size("1GiB"), PartitionType::Linux),
            Err(DiskPlanError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn raid_members_are_checked() {
        let (_dir, mut b) = builder();
        b.create_partition_table("gpt", Some(Path::new("/dev/sda")), None)
            .unwrap();
        b.create_partition("a", "gpt", size("1GiB"), PartitionType::Raid)
            .unwrap();
        b.create_partition("b", "gpt", size("1GiB"), PartitionType::Raid)
            .unwrap();

        assert!(matches!(
            b.create_raid("md", RaidLevel::Raid1, "root", "a;a;b"),
            Err(DiskPlanError::DuplicateInSet { .. })
        ));
        assert!(matches!(
            b.create_raid("md", RaidLevel::Raid1, "root", ""),
            Err(DiskPlanError::EmptyArgument(_))
        ));
        assert!(matches!(
            b.create_raid("md", RaidLevel::Raid1, "root", "a;unknown"),
            Err(DiskPlanError::UnknownIdentifier(_))
        ));
        assert!(!b.registry().exists("md"));

        b.create_raid("md", RaidLevel::Raid1, "root", "a;b").unwrap();
        let uuid = b.registry().uuid_of("md").unwrap();
        match b.plan().actions().last().unwrap() {
            Action::CreateRaid { ids, md_uuid: md, .. } => {
                assert_eq!(ids, &vec!["a".to_string(), "b".to_string()]);
                assert_eq!(md, &md_uuid(&uuid));
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(b.resolve_table().lookup("md").unwrap(), &Locator::RaidUuid(uuid));
        assert!(b.features().used_raid);
        assert_eq!(b.cmdline(), &[format!("rd.md.uuid={}", md_uuid(&uuid))]);
    }

    #[test]
    fn encrypted_volume_is_addressed_by_name() {
        let (_dir, mut b) = builder();
        b.register_existing("disk", "/dev/sdb").unwrap();
        b.create_encrypted_volume("crypt", "data", Some("disk"), None)
            .unwrap();

        assert_eq!(
            b.resolve_table().lookup("crypt").unwrap(),
            &Locator::EncryptedVolumeName("data".to_string())
        );
        let uuid = b.registry().uuid_of("crypt").unwrap();
        assert_eq!(b.cmdline(), &[format!("rd.luks.uuid={}", uuid)]);
        assert!(b.features().used_luks && b.features().used_encryption);

        assert!(matches!(
            b.create_encrypted_volume("crypt2", "data", Some("disk"), None),
            Err(DiskPlanError::InvalidArgument { .. })
        ));
        assert!(matches!(
            b.create_encrypted_volume("crypt3", "other", Some("disk"), Some(Path::new("/dev/sdc"))),
            Err(DiskPlanError::MutuallyExclusiveArguments(_))
        ));
        assert!(matches!(
            b.create_encrypted_volume("crypt4", "bad/name", Some("disk"), None),
            Err(DiskPlanError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn format_twice_fails() {
        let (_dir, mut b) = builder();
        b.register_existing("disk", "/dev/sdb").unwrap();
        b.format("disk", FormatType::Ext4, Some("data")).unwrap();
        assert!(matches!(
            b.format("disk", FormatType::Btrfs, Some("data")),
            Err(DiskPlanError::AlreadyFormatted(id)) if id == "disk"
        ));
        assert_eq!(b.plan().count("format"), 1);
    }

    #[test]
    fn format_btrfs_rejects_formatted_members() {
        let (_dir, mut b) = builder();
        b.register_existing("a", "/dev/sda").unwrap();
        b.register_existing("b", "/dev/sdb").unwrap();
        b.format("a", FormatType::Ext4, None).unwrap();

        assert!(matches!(
            b.format_btrfs("a;b", Some("root"), BtrfsRaid::Raid1),
            Err(DiskPlanError::AlreadyFormatted(id)) if id == "a"
        ));
        assert!(!b.is_formatted("b"));

        b.register_existing("c", "/dev/sdc").unwrap();
        b.format_btrfs("b;c", Some("root"), BtrfsRaid::Raid1).unwrap();
        assert!(b.is_formatted("b") && b.is_formatted("c"));
        assert!(b.features().used_btrfs);
    }

    #[test]
    fn existing_filesystem_uses_fs_uuid() {
        let (_dir, mut b) = builder();
        b.register_existing_filesystem("boot", "ABCD-1234").unwrap();
        assert_eq!(
            b.resolve_table().lookup("boot").unwrap(),
            &Locator::FilesystemUuid("ABCD-1234".to_string())
        );
    }

    #[test]
    fn filesystem_uuid_must_be_a_plain_name() {
        let (_dir, mut b) = builder();
        for bad in ["/etc", "../..", "a/b", "..", "."] {
            assert!(
                matches!(
                    b.register_existing_filesystem("boot", bad),
                    Err(DiskPlanError::InvalidArgument { arg, .. }) if arg == "uuid"
                ),
                "{:?} was accepted",
                bad
            );
        }
        assert!(!b.registry().exists("boot"));
        assert!(b.resolve_table().lookup("boot").is_err());
        assert!(b.plan().is_empty());
    }

    #[test]
    fn bad_device_paths_are_rejected() {
        let (_dir, mut b) = builder();
        assert!(matches!(
            b.register_existing("disk", ""),
            Err(DiskPlanError::EmptyArgument(_))
        ));
        assert!(matches!(
            b.register_existing("disk", "/dev/sda;rm"),
            Err(DiskPlanError::InvalidArgument { .. })
        ));
        assert!(b.plan().is_empty());
    }

    #[test]
    fn roles_require_existing_ids() {
        let (_dir, mut b) = builder();
        assert!(b.set_root("nope", RootFs::Ext4).is_err());
        b.register_existing("disk", "/dev/sda").unwrap();
        b.set_root("disk", RootFs::Btrfs).unwrap();
        assert_eq!(b.roles().root.as_deref(), Some("disk"));
        assert_eq!(
            b.roles().root_mount_options.as_deref(),
            Some(RootFs::Btrfs.mount_options())
        );
    }

    #[test]
    fn devices_are_listed_once_in_order() {
        let (_dir, mut b) = builder();
        b.create_partition_table("gpt0", Some(Path::new("/dev/sdb")), None)
            .unwrap();
        b.register_existing("boot", "/dev/sda1").unwrap();
        b.create_encrypted_volume("c", "c", None, Some(Path::new("/dev/sdb")))
            .unwrap();
        assert_eq!(
            b.devices(),
            vec![PathBuf::from("/dev/sdb"), PathBuf::from("/dev/sda1")]
        );
    }
}
