//! Persisted state
//!
//! The whole in-process state is written as one JSON document. Block hashes
//! are computed over a canonical encoding, so the field order the file ends up
//! with does not matter: reloaded blocks still verify.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::directory::Attributes;
use crate::error::SnapshotError;
use crate::ledger::Block;
use crate::records::Record;
use crate::registry::RegistrySnapshot;

/// Current snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to rebuild an [`AccessService`](crate::service::AccessService)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    pub ledger: Vec<Block>,
    pub registry: RegistrySnapshot,
    pub patients: BTreeMap<String, Attributes>,
    pub clinicians: BTreeMap<String, Attributes>,
    pub records: BTreeMap<String, Vec<Record>>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            ledger: Vec::new(),
            registry: RegistrySnapshot::default(),
            patients: BTreeMap::new(),
            clinicians: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }
}

impl StateSnapshot {
    /// Read a snapshot; a missing file is an empty state. Snapshots written
    /// in any other format version are rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let snapshot: StateSnapshot = serde_json::from_str(&text)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        info!(
            path = %path.display(),
            blocks = snapshot.ledger.len(),
            tokens = snapshot.registry.tokens.len(),
            "loaded state snapshot"
        );
        Ok(snapshot)
    }

    /// Write atomically: temp file, then rename over the target
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        info!(path = %path.display(), blocks = self.ledger.len(), "saved state snapshot");
        Ok(())
    }
}
