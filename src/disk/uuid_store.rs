//! Persistent identifier → UUID storage
//!
//! Each identifier owns one file inside the store directory. The file name is
//! the URL-safe base64 encoding of the identifier, the content is the UUID
//! text. Files are created once and never rewritten, so a resumed install
//! reuses the UUIDs chosen by the interrupted run.
//!
//! New files are written to a temporary file in the store directory, synced
//! and then linked into place without replacing an existing key. A key file is
//! therefore either absent or complete. An empty key file left behind by an
//! older, non-atomic writer is treated as absent and replaced.

use crate::utils::error::{DiskPlanError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

/// Default location of the UUID store
pub const DEFAULT_UUID_STORE: &str = "/tmp/diskplan/uuids";

/// Encode an identifier into its file-name-safe store key
pub fn store_key(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

/// Directory-backed UUID store
#[derive(Debug, Clone)]
pub struct UuidStore {
    dir: PathBuf,
}

impl UuidStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(store_key(id))
    }

    /// Read a stored UUID without generating one. An empty key file counts
    /// as no UUID.
    pub fn load(&self, id: &str) -> Result<Option<Uuid>> {
        let path = self.path_for(id);
        match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(Uuid::parse_str(content.trim())?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DiskPlanError::Io(e)),
        }
    }

    /// Return the stored UUID for `id`, generating and persisting a fresh
    /// random one on first use.
    pub fn load_or_generate(&self, id: &str) -> Result<Uuid> {
        if let Some(uuid) = self.load(id)? {
            debug!("Reusing stored UUID {} for '{}'", uuid, id);
            return Ok(uuid);
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(id);
        if fs::read_to_string(&path).is_ok_and(|c| c.trim().is_empty()) {
            debug!("Discarding empty UUID file for '{}'", id);
            match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(DiskPlanError::Io(e)),
                _ => {}
            }
        }

        let uuid = Uuid::new_v4();
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        writeln!(tmp, "{}", uuid)?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => debug!("Stored new UUID {} for '{}'", uuid, id),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!("UUID for '{}' was stored concurrently", id)
            }
            Err(e) => return Err(DiskPlanError::Io(e.error)),
        }

        // Whatever is on disk now is the UUID every later run will see.
        self.load(id)?
            .ok_or_else(|| DiskPlanError::Io(std::io::Error::from(ErrorKind::NotFound)))
    }
}
