//! Health Access - auditable, temporary access to patient records
//!
//! A patient issues a short-lived access code; a clinician scans it and reads
//! the patient's records while it is valid. Every grant, read, revocation and
//! record append is committed to a tamper-evident hash chain.
//!
//! # Components
//!
//! - [`hash_chain`]: canonical JSON fingerprints, the primitive everything
//!   else relies on
//! - [`ledger`]: append-only, hash-linked audit log with integrity checks
//! - [`registry`]: issue, redeem and revoke time-scoped access tokens
//! - [`directory`] / [`records`]: the patient directory and record store the
//!   registry consults
//! - [`snapshot`] / [`service`]: persistence and wiring
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Duration;
//! use health_access::{AccessService, Attributes, RegistryConfig, SystemClock};
//!
//! let service = AccessService::new(RegistryConfig::default(), Arc::new(SystemClock));
//! let patient = service.patients.register(Attributes::new(), chrono::Utc::now());
//!
//! let issued = service.registry.issue(&patient, Duration::minutes(30), None).unwrap();
//! let records = service
//!     .registry
//!     .redeem(&issued.token_id, &issued.secret, "DR5000")
//!     .unwrap();
//!
//! assert_eq!(records.subject_id, patient);
//! assert_eq!(service.ledger.len(), 2);
//! assert!(service.ledger.verify_integrity().is_valid());
//! ```

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod hash_chain;
pub mod ledger;
pub mod records;
pub mod registry;
pub mod service;
pub mod snapshot;
pub mod token;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RegistryConfig;
pub use directory::{Attributes, Directory, InMemoryDirectory};
pub use error::{AccessError, ConfigError, SnapshotError};
pub use hash_chain::{fingerprint, Hash, GENESIS_HASH};
pub use ledger::{Block, ChainViolation, IntegrityVerdict, Ledger, LedgerAction, ViolationKind};
pub use records::{InMemoryRecordStore, NewRecord, Record, RecordStore};
pub use registry::{AccessTokenRegistry, DeniedAttempt, RecordSet, RegistrySnapshot};
pub use service::AccessService;
pub use snapshot::StateSnapshot;
pub use token::{
    AccessToken, CodeEncoder, IssuedToken, JsonCodeEncoder, RedemptionEntry, RedemptionPayload,
    TokenSecret, TokenState,
};
