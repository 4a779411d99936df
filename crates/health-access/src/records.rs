//! Per-patient medical record storage
//!
//! Record contents are opaque to the access core. What matters here is that
//! every append lands in the ledger as `RECORD_ADDED` and that redemption can
//! list a patient's records in the order they were added.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::directory::Directory;
use crate::error::AccessError;
use crate::ledger::{Ledger, LedgerAction};

/// A stored medical record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// `REC1`, `REC2`, ... per patient
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub description: String,
    /// Clinical date of the record, as given by the author
    pub date: Option<String>,
    pub doctor_notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fields supplied when adding a record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub record_type: String,
    pub description: String,
    pub date: Option<String>,
    pub doctor_notes: Option<String>,
}

/// Record storage contract consumed by redemption
pub trait RecordStore: Send + Sync {
    /// Store a record for a patient and return its id
    fn append_record(
        &self,
        patient_id: &str,
        record: NewRecord,
        at: DateTime<Utc>,
    ) -> Result<String, AccessError>;

    /// Records for a patient in insertion order; empty for unknown patients
    fn list_records(&self, patient_id: &str) -> Vec<Record>;
}

/// In-process record store that chains every append into the ledger
pub struct InMemoryRecordStore {
    ledger: Arc<Ledger>,
    patients: Arc<dyn Directory>,
    records: RwLock<BTreeMap<String, Vec<Record>>>,
}

impl InMemoryRecordStore {
    pub fn new(ledger: Arc<Ledger>, patients: Arc<dyn Directory>) -> Self {
        Self::from_records(ledger, patients, BTreeMap::new())
    }

    /// Rebuild from exported records
    pub fn from_records(
        ledger: Arc<Ledger>,
        patients: Arc<dyn Directory>,
        records: BTreeMap<String, Vec<Record>>,
    ) -> Self {
        Self {
            ledger,
            patients,
            records: RwLock::new(records),
        }
    }

    /// Copy of every patient's records
    pub fn export(&self) -> BTreeMap<String, Vec<Record>> {
        self.records.read().expect("record store lock poisoned").clone()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn append_record(
        &self,
        patient_id: &str,
        record: NewRecord,
        at: DateTime<Utc>,
    ) -> Result<String, AccessError> {
        if !self.patients.exists(patient_id) {
            return Err(AccessError::SubjectNotFound {
                subject_id: patient_id.to_string(),
            });
        }

        let mut records = self.records.write().expect("record store lock poisoned");
        let list = records.entry(patient_id.to_string()).or_default();

        let stored = Record {
            id: format!("REC{}", list.len() + 1),
            record_type: record.record_type,
            description: record.description,
            date: record.date,
            doctor_notes: record.doctor_notes,
            timestamp: at,
        };
        // Record serialization is plain data and cannot fail
        let payload = serde_json::to_value(&stored).unwrap_or_default();

        // Ledger append happens under the store lock so record ids and
        // RECORD_ADDED blocks stay in the same order.
        self.ledger
            .append(LedgerAction::RecordAdded, patient_id, None, at, payload);

        let id = stored.id.clone();
        list.push(stored);

        info!(patient = patient_id, record = %id, "added medical record");
        Ok(id)
    }

    fn list_records(&self, patient_id: &str) -> Vec<Record> {
        self.records
            .read()
            .expect("record store lock poisoned")
            .get(patient_id)
            .cloned()
            .unwrap_or_default()
    }
}
