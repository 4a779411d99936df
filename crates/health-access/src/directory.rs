//! Patient and clinician directories
//!
//! Profiles are opaque attribute maps. Ids are sequential (`PT1000`,
//! `PT1001`, ... for patients, `DR5000`, ... for clinicians) and serve only as
//! lookup keys; nothing secret is ever derived from them.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::info;

/// Opaque profile attributes
pub type Attributes = Map<String, Value>;

/// Read-only lookups consumed by issuance and redemption (the patient
/// directory contract; clinicians use the same shape).
pub trait Directory: Send + Sync {
    fn exists(&self, id: &str) -> bool;

    fn get_attributes(&self, id: &str) -> Option<Attributes>;
}

/// In-process directory with sequential ids
#[derive(Debug)]
pub struct InMemoryDirectory {
    prefix: String,
    offset: u64,
    entries: RwLock<BTreeMap<String, Attributes>>,
}

impl InMemoryDirectory {
    pub fn new(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            prefix: prefix.into(),
            offset,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Patient directory: `PT1000`, `PT1001`, ...
    pub fn patients() -> Self {
        Self::new("PT", 1000)
    }

    /// Clinician directory: `DR5000`, `DR5001`, ...
    pub fn clinicians() -> Self {
        Self::new("DR", 5000)
    }

    /// Rebuild a directory from exported entries
    pub fn from_entries(
        prefix: impl Into<String>,
        offset: u64,
        entries: BTreeMap<String, Attributes>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            offset,
            entries: RwLock::new(entries),
        }
    }

    /// Add a profile and return its assigned id.
    ///
    /// Ids continue after the highest one stored, so restored directories
    /// with gaps never reuse an id. `id` and `created_at` attributes are set
    /// by the directory and override any supplied values.
    pub fn register(&self, mut attributes: Attributes, created_at: DateTime<Utc>) -> String {
        let mut entries = self.entries.write().expect("directory lock poisoned");
        let id = format!("{}{}", self.prefix, self.next_number(&entries));

        attributes.insert("id".to_string(), Value::String(id.clone()));
        attributes.insert(
            "created_at".to_string(),
            Value::String(created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        entries.insert(id.clone(), attributes);

        info!(id = %id, "registered directory entry");
        id
    }

    fn next_number(&self, entries: &BTreeMap<String, Attributes>) -> u64 {
        entries
            .keys()
            .filter_map(|id| id.strip_prefix(self.prefix.as_str())?.parse::<u64>().ok())
            .max()
            .map_or(self.offset, |highest| (highest + 1).max(self.offset))
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("directory lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Copy of every entry, keyed by id
    pub fn entries(&self) -> BTreeMap<String, Attributes> {
        self.entries.read().expect("directory lock poisoned").clone()
    }
}

impl Directory for InMemoryDirectory {
    fn exists(&self, id: &str) -> bool {
        self.entries
            .read()
            .expect("directory lock poisoned")
            .contains_key(id)
    }

    fn get_attributes(&self, id: &str) -> Option<Attributes> {
        self.entries
            .read()
            .expect("directory lock poisoned")
            .get(id)
            .cloned()
    }
}
