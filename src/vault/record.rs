//! Credential records and the inputs used to create, change, and query them.
//!
//! A record's `id` is stable across edits and sync.  Every mutation bumps
//! `revision` and `updated_at`; deletes leave a tombstone (`deleted`) so the
//! delete can propagate to other replicas before the record is purged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::errors::{CipherSafeError, Result};

/// Conventional field names, matching the spreadsheet columns.
pub const FIELD_USERNAME: &str = "username";
pub const FIELD_PASSWORD: &str = "password";
pub const FIELD_NOTES: &str = "notes";

/// Maximum title length in characters.
const MAX_TITLE_LEN: usize = 256;

/// Maximum field name length in bytes.
const MAX_FIELD_NAME_LEN: usize = 64;

/// One credential entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub title: String,
    /// Secret fields, name → value.
    pub fields: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tombstone marker.
    #[serde(default)]
    pub deleted: bool,
    pub revision: u64,
    /// Replica that produced this revision.
    pub origin: String,
    /// Set on conflict copies: the record this copy lost against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_of: Option<Uuid>,
}

impl CredentialRecord {
    /// Whether title, fields, and tombstone state are the same.
    pub fn content_eq(&self, other: &Self) -> bool {
        self.title == other.title && self.fields == other.fields && self.deleted == other.deleted
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Overwrite every secret value in place and drop them.
    pub fn zeroize_secrets(&mut self) {
        for value in self.fields.values_mut() {
            value.zeroize();
        }
        self.fields.clear();
    }

    /// Build the record that preserves this (losing) revision next to the
    /// winner.
    ///
    /// The copy's id is derived from the loser's id, revision, and content,
    /// so every replica that resolves the same conflict materialises the
    /// same copy.
    pub fn conflict_copy(&self) -> Self {
        let mut name = Vec::new();
        name.extend_from_slice(&self.revision.to_be_bytes());
        name.extend_from_slice(self.origin.as_bytes());
        name.extend_from_slice(self.updated_at.to_rfc3339().as_bytes());
        name.extend_from_slice(self.title.as_bytes());
        for (key, value) in &self.fields {
            name.extend_from_slice(key.as_bytes());
            name.push(0);
            name.extend_from_slice(value.as_bytes());
            name.push(0);
        }
        let id = Uuid::new_v5(&self.id, &name);
        name.zeroize();

        Self {
            id,
            title: format!("{} (conflict)", self.title),
            fields: self.fields.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted: false,
            revision: self.revision,
            origin: self.origin.clone(),
            conflict_of: Some(self.id),
        }
    }
}

/// Input for creating a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRecord {
    pub title: String,
    pub fields: BTreeMap<String, String>,
}

impl NewRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        self.fields.keys().try_for_each(|name| validate_field_name(name))
    }
}

/// A set of changes applied by `VaultStore::update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub title: Option<String>,
    pub set_fields: BTreeMap<String, String>,
    pub remove_fields: Vec<String>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn set_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_fields.insert(name.into(), value.into());
        self
    }

    pub fn remove_field(mut self, name: impl Into<String>) -> Self {
        self.remove_fields.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.set_fields.is_empty() && self.remove_fields.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(CipherSafeError::InvalidRecord("update changes nothing".into()));
        }
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        self.set_fields.keys().try_for_each(|name| validate_field_name(name))
    }

    /// Apply to `record` without touching revision or timestamps.
    pub(crate) fn apply_to(mut self, record: &mut CredentialRecord) {
        if let Some(title) = self.title.take() {
            record.title = title;
        }
        for name in &self.remove_fields {
            if let Some(mut old) = record.fields.remove(name) {
                old.zeroize();
            }
        }
        for (name, value) in std::mem::take(&mut self.set_fields) {
            if let Some(mut old) = record.fields.insert(name, value) {
                old.zeroize();
            }
        }
    }
}

/// Query for `VaultStore::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Case-insensitive substring match on the title.
    pub title_contains: Option<String>,
    /// Only conflict copies.
    pub conflicts_only: bool,
    /// Include tombstones.
    pub include_deleted: bool,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn search(text: impl Into<String>) -> Self {
        Self {
            title_contains: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &CredentialRecord) -> bool {
        if record.deleted && !self.include_deleted {
            return false;
        }
        if self.conflicts_only && record.conflict_of.is_none() {
            return false;
        }
        match &self.title_contains {
            Some(needle) => record
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

/// Validate that a title is usable.
fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(CipherSafeError::InvalidRecord("title cannot be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(CipherSafeError::InvalidRecord(format!(
            "title cannot exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate that a field name is safe.
///
/// Allowed: ASCII letters, digits, underscores, hyphens, periods, spaces.
fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CipherSafeError::InvalidRecord("field name cannot be empty".into()));
    }
    if name.len() > MAX_FIELD_NAME_LEN {
        return Err(CipherSafeError::InvalidRecord(format!(
            "field name cannot exceed {MAX_FIELD_NAME_LEN} characters"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b' '))
    {
        return Err(CipherSafeError::InvalidRecord(format!(
            "field name '{name}' contains invalid characters"
        )));
    }
    Ok(())
}
