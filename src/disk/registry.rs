//! Identifier registry
//!
//! Owns every symbolic identifier created while building a layout plan and
//! the stable UUID assigned to each of them.

use crate::disk::uuid_store::UuidStore;
use crate::utils::error::{DiskPlanError, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Separator used between identifiers in list arguments and between
/// serialized plan actions
pub const ID_SEPARATOR: char = ';';

/// Registry of identifiers in creation order
#[derive(Debug)]
pub struct IdRegistry {
    store: UuidStore,
    ids: IndexMap<String, Uuid>,
}

impl IdRegistry {
    pub fn new(store: UuidStore) -> Self {
        Self {
            store,
            ids: IndexMap::new(),
        }
    }

    /// Check the shape of an identifier without touching the registry.
    ///
    /// Identifiers end up inside `key=value` plan records and `,`-joined
    /// member lists, so besides the separator they must not carry
    /// whitespace, `=` or `,`.
    pub fn validate_id(id: &str) -> Result<()> {
        let bad_char = |c: char| c == ID_SEPARATOR || c == '=' || c == ',' || c.is_whitespace();
        if id.is_empty() || id.contains(bad_char) {
            return Err(DiskPlanError::InvalidIdentifier(id.to_string()));
        }
        Ok(())
    }

    /// Check that `id` could be created right now
    pub fn check_new(&self, id: &str) -> Result<()> {
        Self::validate_id(id)?;
        if self.exists(id) {
            return Err(DiskPlanError::DuplicateIdentifier(id.to_string()));
        }
        Ok(())
    }

    /// Register a new identifier and assign its persisted UUID
    pub fn create(&mut self, id: &str) -> Result<Uuid> {
        self.check_new(id)?;
        let uuid = self.store.load_or_generate(id)?;
        debug!("Registered identifier '{}' with UUID {}", id, uuid);
        self.ids.insert(id.to_string(), uuid);
        Ok(uuid)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn uuid_of(&self, id: &str) -> Result<Uuid> {
        self.ids
            .get(id)
            .copied()
            .ok_or_else(|| DiskPlanError::UnknownIdentifier(id.to_string()))
    }

    pub fn require_existing(&self, id: &str) -> Result<()> {
        if !self.exists(id) {
            return Err(DiskPlanError::UnknownIdentifier(id.to_string()));
        }
        Ok(())
    }

    /// Validate a `;`-separated list of distinct, registered identifiers.
    ///
    /// Entries are trimmed and empty entries dropped. Returns the members in
    /// the order given.
    pub fn require_unique_existing_set(&self, arg: &str, ids: &str) -> Result<Vec<String>> {
        let members: Vec<String> = ids
            .split(ID_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if members.is_empty() {
            return Err(DiskPlanError::EmptyArgument(arg.to_string()));
        }

        let mut seen = HashSet::new();
        for id in &members {
            if !seen.insert(id.as_str()) {
                return Err(DiskPlanError::DuplicateInSet {
                    arg: arg.to_string(),
                    id: id.clone(),
                });
            }
        }

        for id in &members {
            self.require_existing(id)?;
        }

        Ok(members)
    }

    /// Join all identifiers matching `pattern`, in creation order
    pub fn expand_ids(&self, pattern: &str) -> Result<String> {
        let re = Regex::new(pattern).map_err(|e| DiskPlanError::InvalidArgument {
            arg: "pattern".to_string(),
            value: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let matched: Vec<&str> = self
            .ids
            .keys()
            .filter(|id| re.is_match(id))
            .map(String::as_str)
            .collect();

        Ok(matched.join(&ID_SEPARATOR.to_string()))
    }

    /// Identifiers in creation order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.keys().map(String::as_str)
    }

    /// Identifiers with their UUIDs in creation order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Uuid)> {
        self.ids.iter().map(|(id, uuid)| (id.as_str(), *uuid))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn store(&self) -> &UuidStore {
        &self.store
    }
}
