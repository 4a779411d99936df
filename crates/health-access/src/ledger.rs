//! Append-only, hash-chained audit ledger
//!
//! Every sensitive action (granting access, redeeming a token, revoking a
//! token, adding a record) is committed as a [`Block`] whose `previous_hash`
//! is the fingerprint of the block before it. Block 0 points at
//! [`GENESIS_HASH`].
//!
//! # Integrity
//!
//! [`Ledger::verify_integrity`] walks the chain from index 0 and recomputes
//! each block's fingerprint. Any single-field edit, reordering, or deletion
//! breaks the chain at the first affected block and is reported with its
//! index. The ledger never repairs or truncates itself.
//!
//! # Concurrency
//!
//! `append` holds the write lock across read-last-block, compute-hash and
//! push, so concurrent appenders never share a `previous_hash` or a
//! `sequence_index`. `verify_integrity` reads under the shared lock and so
//! sees a consistent prefix of the chain.

use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::hash_chain::{fingerprint, Hash, GENESIS_HASH};

/// Kind of action a block records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerAction {
    GrantAccess,
    RedeemAccess,
    RecordAdded,
    RevokeAccess,
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAction::GrantAccess => "GRANT_ACCESS",
            LedgerAction::RedeemAccess => "REDEEM_ACCESS",
            LedgerAction::RecordAdded => "RECORD_ADDED",
            LedgerAction::RevokeAccess => "REVOKE_ACCESS",
        }
    }
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable, hash-linked ledger entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    sequence_index: u64,
    action: LedgerAction,
    subject_id: String,
    actor_id: Option<String>,
    timestamp: DateTime<Utc>,
    payload: Value,
    previous_hash: Hash,
    hash: Hash,
}

impl Block {
    fn new(
        sequence_index: u64,
        action: LedgerAction,
        subject_id: String,
        actor_id: Option<String>,
        timestamp: DateTime<Utc>,
        payload: Value,
        previous_hash: Hash,
    ) -> Self {
        let mut block = Block {
            sequence_index,
            action,
            subject_id,
            actor_id,
            timestamp,
            payload,
            previous_hash,
            hash: GENESIS_HASH,
        };
        block.hash = block.recompute_hash();
        block
    }

    pub fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    pub fn action(&self) -> LedgerAction {
        self.action
    }

    /// Patient the action concerns
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Party that performed the action; `None` for self-service actions
    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn previous_hash(&self) -> Hash {
        self.previous_hash
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// Fingerprint over every stored field except `hash` itself
    pub fn recompute_hash(&self) -> Hash {
        fingerprint(&json!({
            "sequence_index": self.sequence_index,
            "action": self.action.as_str(),
            "subject_id": self.subject_id,
            "actor_id": self.actor_id,
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            "payload": self.payload,
            "previous_hash": self.previous_hash.to_hex(),
        }))
    }
}

/// Why a block failed verification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// Block sits at the wrong position (reordered or a block was removed)
    SequenceMismatch { expected: u64, found: u64 },
    /// Stored hash does not match the recomputed fingerprint (fields edited)
    HashMismatch { stored: Hash, recomputed: Hash },
    /// `previous_hash` does not reference the prior block
    BrokenLink { expected: Hash, found: Hash },
}

/// First point at which a chain stops verifying
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainViolation {
    pub index: u64,
    pub kind: ViolationKind,
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::SequenceMismatch { expected, found } => write!(
                f,
                "block {}: sequence index {} where {} was expected",
                self.index, found, expected
            ),
            ViolationKind::HashMismatch { stored, recomputed } => write!(
                f,
                "block {}: stored hash {} does not match recomputed {}",
                self.index, stored, recomputed
            ),
            ViolationKind::BrokenLink { expected, found } => write!(
                f,
                "block {}: previous hash {} does not reference {}",
                self.index, found, expected
            ),
        }
    }
}

/// Outcome of an integrity walk
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityVerdict {
    Valid { length: u64 },
    Violated(ChainViolation),
}

impl IntegrityVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, IntegrityVerdict::Valid { .. })
    }

    pub fn first_invalid_index(&self) -> Option<u64> {
        match self {
            IntegrityVerdict::Valid { .. } => None,
            IntegrityVerdict::Violated(violation) => Some(violation.index),
        }
    }

    pub fn violation(&self) -> Option<&ChainViolation> {
        match self {
            IntegrityVerdict::Valid { .. } => None,
            IntegrityVerdict::Violated(violation) => Some(violation),
        }
    }
}

/// Walk a block sequence from index 0 and report the first invalid block.
pub fn verify_chain(blocks: &[Block]) -> IntegrityVerdict {
    let mut expected_previous = GENESIS_HASH;

    for (position, block) in blocks.iter().enumerate() {
        let index = position as u64;

        let kind = if block.sequence_index != index {
            Some(ViolationKind::SequenceMismatch {
                expected: index,
                found: block.sequence_index,
            })
        } else {
            let recomputed = block.recompute_hash();
            if recomputed != block.hash {
                Some(ViolationKind::HashMismatch {
                    stored: block.hash,
                    recomputed,
                })
            } else if block.previous_hash != expected_previous {
                Some(ViolationKind::BrokenLink {
                    expected: expected_previous,
                    found: block.previous_hash,
                })
            } else {
                None
            }
        };

        if let Some(kind) = kind {
            return IntegrityVerdict::Violated(ChainViolation { index, kind });
        }
        expected_previous = block.hash;
    }

    IntegrityVerdict::Valid {
        length: blocks.len() as u64,
    }
}

/// The append-only ledger
#[derive(Debug, Default)]
pub struct Ledger {
    blocks: RwLock<Vec<Block>>,
}

impl Ledger {
    /// Create an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a previously exported chain as-is.
    ///
    /// Nothing is checked or repaired here; call
    /// [`verify_integrity`](Self::verify_integrity) on the result.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: RwLock::new(blocks),
        }
    }

    /// Commit a new block and return its hash.
    ///
    /// A timestamp earlier than the last block's is committed as the last
    /// block's timestamp, keeping the chain non-decreasing in time.
    pub fn append(
        &self,
        action: LedgerAction,
        subject_id: &str,
        actor_id: Option<&str>,
        timestamp: DateTime<Utc>,
        payload: Value,
    ) -> Hash {
        self.append_block(action, subject_id, actor_id, timestamp, payload)
            .hash
    }

    /// Like [`append`](Self::append), returning a copy of the committed block
    /// so callers can mirror its (possibly clamped) timestamp.
    pub fn append_block(
        &self,
        action: LedgerAction,
        subject_id: &str,
        actor_id: Option<&str>,
        timestamp: DateTime<Utc>,
        payload: Value,
    ) -> Block {
        let mut blocks = self.blocks.write().expect("ledger lock poisoned");

        let sequence_index = blocks.len() as u64;
        let (previous_hash, committed_at) = match blocks.last() {
            Some(last) => (last.hash, timestamp.max(last.timestamp)),
            None => (GENESIS_HASH, timestamp),
        };
        if committed_at != timestamp {
            debug!(
                requested = %timestamp,
                committed = %committed_at,
                "clamped block timestamp to keep chain ordered"
            );
        }

        let block = Block::new(
            sequence_index,
            action,
            subject_id.to_string(),
            actor_id.map(str::to_string),
            committed_at,
            payload,
            previous_hash,
        );

        debug!(
            index = sequence_index,
            action = %action,
            subject = subject_id,
            hash = %block.hash,
            "appended ledger block"
        );
        blocks.push(block.clone());
        block
    }

    /// Check every block's fingerprint and linkage.
    pub fn verify_integrity(&self) -> IntegrityVerdict {
        let blocks = self.blocks.read().expect("ledger lock poisoned");
        let verdict = verify_chain(&blocks);
        if let IntegrityVerdict::Violated(violation) = &verdict {
            warn!(index = violation.index, "ledger integrity violation: {}", violation);
        }
        verdict
    }

    /// Read-only copy of the chain
    pub fn all_blocks(&self) -> Vec<Block> {
        self.blocks.read().expect("ledger lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.read().expect("ledger lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hash of the newest block, or the genesis anchor for an empty chain
    pub fn last_hash(&self) -> Hash {
        self.blocks
            .read()
            .expect("ledger lock poisoned")
            .last()
            .map(Block::hash)
            .unwrap_or(GENESIS_HASH)
    }

    /// Audit trail for one patient, in chain order
    pub fn blocks_for_subject(&self, subject_id: &str) -> Vec<Block> {
        self.filter_blocks(|b| b.subject_id == subject_id)
    }

    /// Every action performed by one party, in chain order
    pub fn blocks_by_actor(&self, actor_id: &str) -> Vec<Block> {
        self.filter_blocks(|b| b.actor_id.as_deref() == Some(actor_id))
    }

    fn filter_blocks(&self, keep: impl Fn(&Block) -> bool) -> Vec<Block> {
        self.blocks
            .read()
            .expect("ledger lock poisoned")
            .iter()
            .filter(|b| keep(*b))
            .cloned()
            .collect()
    }
}
