//! Error types for diskplan

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskPlanError {
    #[error("Invalid identifier '{0}': must be non-empty without ';', '=', ',' or whitespace")]
    InvalidIdentifier(String),

    #[error("Identifier '{0}' already exists")]
    DuplicateIdentifier(String),

    #[error("Identifier '{0}' not found")]
    UnknownIdentifier(String),

    #[error("Argument '{0}' must contain at least one entry")]
    EmptyArgument(String),

    #[error("Argument '{arg}' contains duplicate identifier '{id}'")]
    DuplicateInSet { arg: String, id: String },

    #[error("Cannot add another partition to table '{0}' after size=remaining was used")]
    TableFull(String),

    #[error("Exactly one of the arguments ({}) must be given", .0.join(", "))]
    MutuallyExclusiveArguments(Vec<String>),

    #[error("Invalid option {option}='{value}', must be one of ({})", .allowed.join(", "))]
    InvalidEnumValue {
        option: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("Identifier '{0}' already has a resolve entry")]
    AlreadyResolved(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Probe utility unavailable: {0}")]
    ProbeUtilityUnavailable(String),

    #[error("Identifier '{0}' does not refer to a partition table")]
    NotAPartitionTable(String),

    #[error("Identifier '{0}' is already formatted")]
    AlreadyFormatted(String),

    #[error("Invalid size '{0}'")]
    InvalidSize(String),

    #[error("Invalid argument {arg}='{value}': {reason}")]
    InvalidArgument {
        arg: String,
        value: String,
        reason: String,
    },

    #[error("Command failed: {command}\n{stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Hook '{hook}' failed: {reason}")]
    Hook { hook: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("UUID parse error: {0}")]
    UuidParse(#[from] uuid::Error),
}

impl DiskPlanError {
    pub(crate) fn invalid_enum(option: &str, value: &str, allowed: &[&str]) -> Self {
        Self::InvalidEnumValue {
            option: option.to_string(),
            value: value.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub(crate) fn mutually_exclusive(args: &[&str]) -> Self {
        Self::MutuallyExclusiveArguments(args.iter().map(|s| s.to_string()).collect())
    }
}

pub type Result<T> = std::result::Result<T, DiskPlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_error_lists_allowed_values() {
        let err = DiskPlanError::invalid_enum("type", "ntfs", &["ext4", "btrfs"]);
        assert_eq!(
            err.to_string(),
            "Invalid option type='ntfs', must be one of (ext4, btrfs)"
        );
    }

    #[test]
    fn mutually_exclusive_names_arguments() {
        let err = DiskPlanError::mutually_exclusive(&["device", "id"]);
        assert_eq!(
            err.to_string(),
            "Exactly one of the arguments (device, id) must be given"
        );
    }
}
