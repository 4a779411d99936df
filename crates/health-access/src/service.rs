//! Wires the components together
//!
//! Each component owns its own state. The service holds them behind `Arc`s so
//! a front end can share one instance across threads.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::RegistryConfig;
use crate::directory::InMemoryDirectory;
use crate::ledger::Ledger;
use crate::records::InMemoryRecordStore;
use crate::registry::AccessTokenRegistry;
use crate::snapshot::{StateSnapshot, SNAPSHOT_VERSION};

/// A ledger, directories, a record store and a token registry sharing one chain
pub struct AccessService {
    pub ledger: Arc<Ledger>,
    pub patients: Arc<InMemoryDirectory>,
    pub clinicians: Arc<InMemoryDirectory>,
    pub records: Arc<InMemoryRecordStore>,
    pub registry: AccessTokenRegistry,
}

impl AccessService {
    /// Fresh state with an empty chain
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self::from_snapshot(StateSnapshot::default(), config, clock)
    }

    /// Rebuild from a snapshot. The chain is restored as stored; run
    /// `ledger.verify_integrity()` before trusting it.
    pub fn from_snapshot(
        snapshot: StateSnapshot,
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(Ledger::from_blocks(snapshot.ledger));
        let patients = Arc::new(InMemoryDirectory::from_entries("PT", 1000, snapshot.patients));
        let clinicians = Arc::new(InMemoryDirectory::from_entries(
            "DR",
            5000,
            snapshot.clinicians,
        ));
        let records = Arc::new(InMemoryRecordStore::from_records(
            ledger.clone(),
            patients.clone(),
            snapshot.records,
        ));
        let registry = AccessTokenRegistry::new(
            config,
            ledger.clone(),
            patients.clone(),
            records.clone(),
            clock,
        )
        .with_clinicians(clinicians.clone())
        .with_snapshot(snapshot.registry);

        Self {
            ledger,
            patients,
            clinicians,
            records,
            registry,
        }
    }

    /// Export the full state
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            version: SNAPSHOT_VERSION,
            ledger: self.ledger.all_blocks(),
            registry: self.registry.export(),
            patients: self.patients.entries(),
            clinicians: self.clinicians.entries(),
            records: self.records.export(),
        }
    }
}
