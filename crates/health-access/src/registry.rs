//! Access token registry
//!
//! Issues, redeems and revokes time-scoped access tokens. Every successful
//! grant, redemption and revocation is chained into the [`Ledger`].
//!
//! # Redemption checks
//!
//! In order:
//! 1. Redeeming party is a registered clinician (only if configured)
//! 2. Token exists
//! 3. Secret matches (constant time)
//! 4. Token is not revoked
//! 5. `issued_at <= at_time < expires_at`
//!
//! The secret is checked before any state so that a caller without it learns
//! nothing about whether the token is revoked or expired.
//!
//! # Failed attempts
//!
//! Failed redemptions do not touch the ledger. Every one is emitted as a
//! warning. Attempts against issued tokens are also kept in a bounded
//! denied-attempt log (oldest dropped first); unknown token ids are not, so
//! guessing ids cannot grow persisted state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RegistryConfig;
use crate::directory::{Attributes, Directory};
use crate::error::AccessError;
use crate::ledger::{Ledger, LedgerAction};
use crate::records::{Record, RecordStore};
use crate::token::{
    AccessToken, IssuedToken, RedemptionEntry, RedemptionPayload, TokenSecret, TokenState,
};

/// What a successful redemption returns
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordSet {
    pub subject_id: String,
    /// Patient profile attributes
    pub patient: Attributes,
    /// Records in the order they were added
    pub records: Vec<Record>,
}

/// A redemption that was refused
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeniedAttempt {
    pub token_id: String,
    pub actor_id: String,
    pub time: DateTime<Utc>,
    /// Error code, e.g. `TOKEN_EXPIRED`
    pub reason: String,
}

/// Exportable registry state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub tokens: Vec<AccessToken>,
    pub next_token_seq: u64,
    pub denied_attempts: Vec<DeniedAttempt>,
}

#[derive(Default)]
struct RegistryState {
    tokens: HashMap<String, AccessToken>,
    /// Number of the last issued token id
    next_token_seq: u64,
    denied: VecDeque<DeniedAttempt>,
}

/// Issues and redeems access tokens
pub struct AccessTokenRegistry {
    config: RegistryConfig,
    ledger: Arc<Ledger>,
    patients: Arc<dyn Directory>,
    clinicians: Option<Arc<dyn Directory>>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<RegistryState>,
}

impl AccessTokenRegistry {
    pub fn new(
        config: RegistryConfig,
        ledger: Arc<Ledger>,
        patients: Arc<dyn Directory>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ledger,
            patients,
            clinicians: None,
            records,
            clock,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Directory consulted when `require_registered_clinician` is set
    pub fn with_clinicians(mut self, clinicians: Arc<dyn Directory>) -> Self {
        self.clinicians = Some(clinicians);
        self
    }

    /// Replace registry state with a previously exported snapshot
    pub fn with_snapshot(self, snapshot: RegistrySnapshot) -> Self {
        {
            let mut state = self.state.lock().expect("registry lock poisoned");
            state.tokens = snapshot
                .tokens
                .into_iter()
                .map(|t| (t.token_id.clone(), t))
                .collect();
            state.next_token_seq = snapshot.next_token_seq;
            state.denied = snapshot.denied_attempts.into();
            let capacity = self.config.denied_log_capacity;
            while state.denied.len() > capacity {
                state.denied.pop_front();
            }
        }
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Issue a token for `subject_id` valid for `validity` from now.
    ///
    /// `actor_id` is `None` when the patient issues the code themselves.
    pub fn issue(
        &self,
        subject_id: &str,
        validity: Duration,
        actor_id: Option<&str>,
    ) -> Result<IssuedToken, AccessError> {
        let invalid = || AccessError::InvalidDuration {
            minutes: validity.num_minutes(),
            max_minutes: self.config.max_validity_minutes,
        };
        if validity <= Duration::zero() {
            return Err(invalid());
        }
        if let Some(max) = self.config.max_validity() {
            if validity > max {
                return Err(invalid());
            }
        }
        if !self.patients.exists(subject_id) {
            return Err(AccessError::SubjectNotFound {
                subject_id: subject_id.to_string(),
            });
        }

        let mut state = self.state.lock().expect("registry lock poisoned");
        let issued_at = self.clock.now();
        let expires_at = issued_at.checked_add_signed(validity).ok_or_else(invalid)?;

        state.next_token_seq += 1;
        let token_id = format!("{}{}", self.config.token_prefix, state.next_token_seq);
        let secret = TokenSecret::generate(issued_at);

        let token = AccessToken::new(
            token_id.clone(),
            subject_id.to_string(),
            &secret,
            issued_at,
            expires_at,
            actor_id.map(str::to_string),
        );
        state.tokens.insert(token_id.clone(), token);

        self.ledger.append(
            LedgerAction::GrantAccess,
            subject_id,
            actor_id,
            issued_at,
            json!({
                "token_id": token_id,
                "expires_at": expires_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            }),
        );

        info!(
            token = %token_id,
            patient = subject_id,
            expires_at = %expires_at,
            "issued access token"
        );

        Ok(IssuedToken {
            token_id,
            subject_id: subject_id.to_string(),
            secret,
            issued_at,
            expires_at,
        })
    }

    /// Issue with the configured default validity
    pub fn issue_default(
        &self,
        subject_id: &str,
        actor_id: Option<&str>,
    ) -> Result<IssuedToken, AccessError> {
        self.issue(subject_id, self.config.default_validity(), actor_id)
    }

    /// Redeem a token now
    pub fn redeem(
        &self,
        token_id: &str,
        secret: &TokenSecret,
        actor_id: &str,
    ) -> Result<RecordSet, AccessError> {
        self.redeem_at(token_id, secret, actor_id, self.clock.now())
    }

    /// Redeem the contents of a scanned code now
    pub fn redeem_payload(
        &self,
        payload: &RedemptionPayload,
        actor_id: &str,
    ) -> Result<RecordSet, AccessError> {
        self.redeem(&payload.token_id, &payload.secret, actor_id)
    }

    /// Redeem a token as of `at_time`.
    ///
    /// Each success appends exactly one redemption-log entry and one
    /// `REDEEM_ACCESS` block. Failures append neither.
    pub fn redeem_at(
        &self,
        token_id: &str,
        secret: &TokenSecret,
        actor_id: &str,
        at_time: DateTime<Utc>,
    ) -> Result<RecordSet, AccessError> {
        let subject_id = {
            let mut state = self.state.lock().expect("registry lock poisoned");

            if let Err(err) = self.check_redemption(&state, token_id, secret, actor_id, at_time) {
                warn!(
                    token = token_id,
                    actor = actor_id,
                    reason = err.code(),
                    "denied redemption attempt"
                );
                if state.tokens.contains_key(token_id) {
                    if state.denied.len() >= self.config.denied_log_capacity {
                        state.denied.pop_front();
                    }
                    state.denied.push_back(DeniedAttempt {
                        token_id: token_id.to_string(),
                        actor_id: actor_id.to_string(),
                        time: at_time,
                        reason: err.code().to_string(),
                    });
                }
                return Err(err);
            }

            let token = state
                .tokens
                .get_mut(token_id)
                .ok_or_else(|| AccessError::TokenNotFound {
                    token_id: token_id.to_string(),
                })?;
            let subject_id = token.subject_id.clone();

            // The log mirrors the committed block, including any clamping
            let block = self.ledger.append_block(
                LedgerAction::RedeemAccess,
                &subject_id,
                Some(actor_id),
                at_time,
                json!({ "token_id": token_id }),
            );
            token.redemption_log.push(RedemptionEntry {
                actor_id: actor_id.to_string(),
                time: block.timestamp(),
            });
            subject_id
        };

        info!(
            token = token_id,
            patient = %subject_id,
            actor = actor_id,
            "redeemed access token"
        );

        Ok(RecordSet {
            patient: self.patients.get_attributes(&subject_id).unwrap_or_default(),
            records: self.records.list_records(&subject_id),
            subject_id,
        })
    }

    fn check_redemption(
        &self,
        state: &RegistryState,
        token_id: &str,
        secret: &TokenSecret,
        actor_id: &str,
        at_time: DateTime<Utc>,
    ) -> Result<(), AccessError> {
        if self.config.require_registered_clinician {
            let known = self
                .clinicians
                .as_ref()
                .is_some_and(|directory| directory.exists(actor_id));
            if !known {
                return Err(AccessError::ClinicianNotFound {
                    actor_id: actor_id.to_string(),
                });
            }
        }

        let token = state
            .tokens
            .get(token_id)
            .ok_or_else(|| AccessError::TokenNotFound {
                token_id: token_id.to_string(),
            })?;

        if !token.secret_matches(secret) {
            return Err(AccessError::SecretMismatch {
                token_id: token_id.to_string(),
            });
        }

        if token.revoked_at.is_none() && at_time < token.issued_at {
            return Err(AccessError::TokenNotYetValid {
                token_id: token_id.to_string(),
                issued_at: token.issued_at,
            });
        }

        match token.state_at(at_time) {
            TokenState::Active => Ok(()),
            TokenState::Revoked => Err(AccessError::TokenRevoked {
                token_id: token_id.to_string(),
            }),
            TokenState::Expired => Err(AccessError::TokenExpired {
                token_id: token_id.to_string(),
                expired_at: token.expires_at,
            }),
        }
    }

    /// Revoke a token. Later redemptions fail with `TokenRevoked`.
    ///
    /// Revoking an already revoked token changes nothing.
    pub fn revoke(&self, token_id: &str, actor_id: &str) -> Result<(), AccessError> {
        let mut state = self.state.lock().expect("registry lock poisoned");
        let token = state
            .tokens
            .get_mut(token_id)
            .ok_or_else(|| AccessError::TokenNotFound {
                token_id: token_id.to_string(),
            })?;

        if token.revoked_at.is_some() {
            debug!(token = token_id, "token already revoked");
            return Ok(());
        }

        let block = self.ledger.append_block(
            LedgerAction::RevokeAccess,
            &token.subject_id,
            Some(actor_id),
            self.clock.now(),
            json!({ "token_id": token_id }),
        );
        token.revoked_at = Some(block.timestamp());
        token.revoked_by = Some(actor_id.to_string());

        info!(token = token_id, actor = actor_id, "revoked access token");
        Ok(())
    }

    /// Snapshot of one token, including its redemption history
    pub fn token(&self, token_id: &str) -> Option<AccessToken> {
        self.state
            .lock()
            .expect("registry lock poisoned")
            .tokens
            .get(token_id)
            .cloned()
    }

    /// Current state of a token
    pub fn token_state(&self, token_id: &str) -> Option<TokenState> {
        let now = self.clock.now();
        self.state
            .lock()
            .expect("registry lock poisoned")
            .tokens
            .get(token_id)
            .map(|t| t.state_at(now))
    }

    /// Every token ever issued for a patient, oldest first
    pub fn tokens_for_subject(&self, subject_id: &str) -> Vec<AccessToken> {
        let state = self.state.lock().expect("registry lock poisoned");
        let mut tokens: Vec<AccessToken> = state
            .tokens
            .values()
            .filter(|t| t.subject_id == subject_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| (t.issued_at, t.token_id.clone()));
        tokens
    }

    /// Refused redemptions of issued tokens, oldest first
    pub fn denied_attempts(&self) -> Vec<DeniedAttempt> {
        let state = self.state.lock().expect("registry lock poisoned");
        state.denied.iter().cloned().collect()
    }

    /// Export tokens and counters for persistence
    pub fn export(&self) -> RegistrySnapshot {
        let state = self.state.lock().expect("registry lock poisoned");
        let mut tokens: Vec<AccessToken> = state.tokens.values().cloned().collect();
        tokens.sort_by_key(|t| (t.issued_at, t.token_id.clone()));
        RegistrySnapshot {
            tokens,
            next_token_seq: state.next_token_seq,
            denied_attempts: state.denied.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::InMemoryDirectory;
    use crate::records::{InMemoryRecordStore, NewRecord};
    use chrono::TimeZone;

    struct Fixture {
        clock: Arc<ManualClock>,
        ledger: Arc<Ledger>,
        clinicians: Arc<InMemoryDirectory>,
        records: Arc<InMemoryRecordStore>,
        registry: AccessTokenRegistry,
    }

    fn fixture_with(config: RegistryConfig) -> Fixture {
        let start = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let ledger = Arc::new(Ledger::new());
        let patients = Arc::new(InMemoryDirectory::patients());
        let clinicians = Arc::new(InMemoryDirectory::clinicians());

        let mut profile = Attributes::new();
        profile.insert("name".into(), json!("Asha Rao"));
        patients.register(profile, start);
        clinicians.register(Attributes::new(), start);

        let records = Arc::new(InMemoryRecordStore::new(ledger.clone(), patients.clone()));
        let registry = AccessTokenRegistry::new(
            config,
            ledger.clone(),
            patients,
            records.clone(),
            clock.clone(),
        )
        .with_clinicians(clinicians.clone());

        Fixture {
            clock,
            ledger,
            clinicians,
            records,
            registry,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RegistryConfig::default())
    }

    #[test]
    fn test_issue_appends_grant() {
        let f = fixture();
        let issued = f.registry.issue("PT1000", Duration::minutes(30), None).unwrap();

        assert_eq!(issued.token_id, "QR1");
        assert_eq!(issued.expires_at - issued.issued_at, Duration::minutes(30));

        let blocks = f.ledger.all_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].action(), LedgerAction::GrantAccess);
        assert_eq!(blocks[0].subject_id(), "PT1000");
        assert_eq!(blocks[0].actor_id(), None);
        assert_eq!(blocks[0].payload()["token_id"], json!("QR1"));
    }

    #[test]
    fn test_issue_ids_are_sequential() {
        let f = fixture();
        let a = f.registry.issue_default("PT1000", None).unwrap();
        let b = f.registry.issue_default("PT1000", Some("PT1000")).unwrap();
        assert_eq!((a.token_id.as_str(), b.token_id.as_str()), ("QR1", "QR2"));
        assert_ne!(a.secret, b.secret);
    }

    #[test]
    fn test_issue_rejects_non_positive_duration() {
        let f = fixture();
        for validity in [Duration::zero(), Duration::minutes(-5)] {
            let err = f.registry.issue("PT1000", validity, None).unwrap_err();
            assert!(matches!(err, AccessError::InvalidDuration { .. }), "{:?}", validity);
        }
        assert!(f.ledger.is_empty());
    }

    #[test]
    fn test_long_validity_allowed_without_cap() {
        let f = fixture();
        let issued = f.registry.issue("PT1000", Duration::hours(48), None).unwrap();
        assert_eq!(issued.expires_at - issued.issued_at, Duration::hours(48));

        f.clock.advance(Duration::hours(47));
        assert!(f
            .registry
            .redeem(&issued.token_id, &issued.secret, "DR5000")
            .is_ok());
    }

    #[test]
    fn test_configured_cap_rejects_longer_validity() {
        let f = fixture_with(RegistryConfig {
            max_validity_minutes: Some(24 * 60),
            ..Default::default()
        });
        let err = f.registry.issue("PT1000", Duration::hours(25), None).unwrap_err();
        assert_eq!(
            err,
            AccessError::InvalidDuration {
                minutes: 25 * 60,
                max_minutes: Some(24 * 60),
            }
        );
        assert!(f.registry.issue("PT1000", Duration::hours(24), None).is_ok());
    }

    #[test]
    fn test_unrepresentable_deadline_rejected() {
        let f = fixture();
        let err = f.registry.issue("PT1000", Duration::days(1_000_000_000), None).unwrap_err();
        assert!(matches!(err, AccessError::InvalidDuration { .. }));
        assert!(f.ledger.is_empty());
    }

    #[test]
    fn test_grant_payload_keeps_subsecond_deadline() {
        let f = fixture();
        f.clock.advance(Duration::milliseconds(250) + Duration::nanoseconds(7));
        let issued = f.registry.issue_default("PT1000", None).unwrap();

        let block = &f.ledger.all_blocks()[0];
        let chained: DateTime<Utc> =
            serde_json::from_value(block.payload()["expires_at"].clone()).unwrap();
        assert_eq!(chained, issued.expires_at);
    }

    #[test]
    fn test_issue_rejects_unknown_subject() {
        let f = fixture();
        let err = f.registry.issue("PT9999", Duration::minutes(30), None).unwrap_err();
        assert_eq!(
            err,
            AccessError::SubjectNotFound {
                subject_id: "PT9999".into()
            }
        );
        assert!(f.ledger.is_empty());
    }

    #[test]
    fn test_redeem_returns_current_records() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();

        // Record added after issuance is still visible: the set is read at redemption
        f.records
            .append_record(
                "PT1000",
                NewRecord {
                    record_type: "allergy".into(),
                    description: "Penicillin".into(),
                    ..Default::default()
                },
                f.clock.now(),
            )
            .unwrap();

        let set = f
            .registry
            .redeem(&issued.token_id, &issued.secret, "DR5000")
            .unwrap();
        assert_eq!(set.subject_id, "PT1000");
        assert_eq!(set.patient["name"], json!("Asha Rao"));
        assert_eq!(set.records.len(), 1);
        assert_eq!(set.records[0].description, "Penicillin");

        let token = f.registry.token(&issued.token_id).unwrap();
        assert_eq!(token.redemption_log().len(), 1);
        assert_eq!(token.redemption_log()[0].actor_id, "DR5000");
    }

    #[test]
    fn test_multiple_clinicians_each_logged() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();
        f.clinicians.register(Attributes::new(), f.clock.now());

        f.registry.redeem(&issued.token_id, &issued.secret, "DR5000").unwrap();
        f.clock.advance(Duration::minutes(1));
        f.registry.redeem(&issued.token_id, &issued.secret, "DR5001").unwrap();

        let log = f.registry.token(&issued.token_id).unwrap().redemption_log().to_vec();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].actor_id, "DR5001");

        let redeems: Vec<_> = f
            .ledger
            .all_blocks()
            .into_iter()
            .filter(|b| b.action() == LedgerAction::RedeemAccess)
            .collect();
        assert_eq!(redeems.len(), 2);
        assert_eq!(redeems[1].actor_id(), Some("DR5001"));
    }

    #[test]
    fn test_wrong_secret_regardless_of_state() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();
        let wrong = TokenSecret::from("0".repeat(64));

        let active = f.registry.redeem(&issued.token_id, &wrong, "DR5000");
        assert!(matches!(active, Err(AccessError::SecretMismatch { .. })));

        let expired = f.registry.redeem_at(
            &issued.token_id,
            &wrong,
            "DR5000",
            issued.expires_at + Duration::minutes(1),
        );
        assert!(matches!(expired, Err(AccessError::SecretMismatch { .. })));

        f.registry.revoke(&issued.token_id, "PT1000").unwrap();
        let revoked = f.registry.redeem(&issued.token_id, &wrong, "DR5000");
        assert!(matches!(revoked, Err(AccessError::SecretMismatch { .. })));
    }

    #[test]
    fn test_redeem_before_issuance_rejected() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();

        let err = f
            .registry
            .redeem_at(
                &issued.token_id,
                &issued.secret,
                "DR5000",
                issued.issued_at - Duration::hours(1),
            )
            .unwrap_err();
        assert_eq!(
            err,
            AccessError::TokenNotYetValid {
                token_id: issued.token_id.clone(),
                issued_at: issued.issued_at,
            }
        );
        assert_eq!(f.ledger.len(), 1);
        assert!(f.registry.token(&issued.token_id).unwrap().redemption_log().is_empty());
    }

    #[test]
    fn test_redemption_log_matches_committed_block_time() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();

        // A later record append pushes the chain ahead of the redemption time
        f.records
            .append_record(
                "PT1000",
                NewRecord {
                    record_type: "lab".into(),
                    description: "CBC".into(),
                    ..Default::default()
                },
                issued.issued_at + Duration::minutes(10),
            )
            .unwrap();
        f.registry
            .redeem_at(
                &issued.token_id,
                &issued.secret,
                "DR5000",
                issued.issued_at + Duration::minutes(5),
            )
            .unwrap();

        let block = f.ledger.all_blocks().pop().unwrap();
        let log = f.registry.token(&issued.token_id).unwrap().redemption_log().to_vec();
        assert_eq!(block.action(), LedgerAction::RedeemAccess);
        assert_eq!(log[0].time, block.timestamp());
        assert_eq!(log[0].time, issued.issued_at + Duration::minutes(10));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let f = fixture();
        let issued = f.registry.issue("PT1000", Duration::minutes(30), None).unwrap();
        let just_before = issued.expires_at - Duration::milliseconds(1);

        assert!(f
            .registry
            .redeem_at(&issued.token_id, &issued.secret, "DR5000", just_before)
            .is_ok());

        let err = f
            .registry
            .redeem_at(&issued.token_id, &issued.secret, "DR5000", issued.expires_at)
            .unwrap_err();
        assert_eq!(
            err,
            AccessError::TokenExpired {
                token_id: issued.token_id.clone(),
                expired_at: issued.expires_at,
            }
        );
    }

    #[test]
    fn test_revoke_blocks_redemption_and_is_logged() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();

        f.registry.revoke(&issued.token_id, "PT1000").unwrap();
        let err = f
            .registry
            .redeem(&issued.token_id, &issued.secret, "DR5000")
            .unwrap_err();
        assert!(matches!(err, AccessError::TokenRevoked { .. }));

        // Revoked stays revoked after the deadline passes
        f.clock.advance(Duration::hours(2));
        assert_eq!(
            f.registry.token_state(&issued.token_id),
            Some(TokenState::Revoked)
        );
        let err = f
            .registry
            .redeem(&issued.token_id, &issued.secret, "DR5000")
            .unwrap_err();
        assert!(matches!(err, AccessError::TokenRevoked { .. }));

        let actions: Vec<_> = f.ledger.all_blocks().iter().map(|b| b.action()).collect();
        assert_eq!(actions, vec![LedgerAction::GrantAccess, LedgerAction::RevokeAccess]);
    }

    #[test]
    fn test_repeat_revoke_is_noop() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();
        f.registry.revoke(&issued.token_id, "PT1000").unwrap();
        f.registry.revoke(&issued.token_id, "PT1000").unwrap();

        assert_eq!(f.ledger.len(), 2);
        assert!(matches!(
            f.registry.revoke("QR404", "PT1000"),
            Err(AccessError::TokenNotFound { .. })
        ));
    }

    #[test]
    fn test_denied_attempts_recorded_not_chained() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();
        let before = f.ledger.len();

        let _ = f.registry.redeem(&issued.token_id, &TokenSecret::from("guess"), "DR5001");
        f.clock.advance(Duration::hours(1));
        let _ = f.registry.redeem(&issued.token_id, &issued.secret, "DR5000");

        assert_eq!(f.ledger.len(), before);
        let denied = f.registry.denied_attempts();
        assert_eq!(denied.len(), 2);
        assert_eq!(denied[0].reason, "SECRET_MISMATCH");
        assert_eq!(denied[0].actor_id, "DR5001");
        assert_eq!(denied[1].reason, "TOKEN_EXPIRED");
    }

    #[test]
    fn test_unknown_token_ids_not_logged() {
        let f = fixture();
        let secret = TokenSecret::from("guess");
        for i in 0..50 {
            let err = f.registry.redeem(&format!("QR{}", 900 + i), &secret, "DR5000");
            assert!(matches!(err, Err(AccessError::TokenNotFound { .. })));
        }
        assert!(f.registry.denied_attempts().is_empty());
        assert!(f.registry.export().denied_attempts.is_empty());
    }

    #[test]
    fn test_denied_log_is_bounded() {
        let f = fixture_with(RegistryConfig {
            denied_log_capacity: 3,
            ..Default::default()
        });
        let issued = f.registry.issue_default("PT1000", None).unwrap();

        for i in 0..5 {
            let actor = format!("DR{}", 6000 + i);
            let _ = f.registry.redeem(&issued.token_id, &TokenSecret::from("guess"), &actor);
        }

        let actors: Vec<_> = f
            .registry
            .denied_attempts()
            .into_iter()
            .map(|d| d.actor_id)
            .collect();
        assert_eq!(actors, vec!["DR6002", "DR6003", "DR6004"]);
    }

    #[test]
    fn test_require_registered_clinician() {
        let f = fixture_with(RegistryConfig {
            require_registered_clinician: true,
            ..Default::default()
        });
        let issued = f.registry.issue_default("PT1000", None).unwrap();

        let err = f
            .registry
            .redeem(&issued.token_id, &issued.secret, "DR7777")
            .unwrap_err();
        assert!(matches!(err, AccessError::ClinicianNotFound { .. }));
        assert!(f
            .registry
            .redeem(&issued.token_id, &issued.secret, "DR5000")
            .is_ok());
    }

    #[test]
    fn test_redeem_scanned_payload() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();
        let text = serde_json::to_string(&issued.payload()).unwrap();

        let scanned = RedemptionPayload::decode(&text).unwrap();
        let set = f.registry.redeem_payload(&scanned, "DR5000").unwrap();
        assert_eq!(set.subject_id, "PT1000");
    }

    #[test]
    fn test_snapshot_restores_tokens_and_counter() {
        let f = fixture();
        let issued = f.registry.issue_default("PT1000", None).unwrap();
        f.registry.redeem(&issued.token_id, &issued.secret, "DR5000").unwrap();
        let snapshot = f.registry.export();

        let g = fixture();
        let restored = g.registry.with_snapshot(snapshot);
        assert_eq!(
            restored.token(&issued.token_id).unwrap().redemption_log().len(),
            1
        );
        // Restored secret digest still accepts the original secret
        assert!(restored
            .redeem(&issued.token_id, &issued.secret, "DR5000")
            .is_ok());
        assert_eq!(restored.issue_default("PT1000", None).unwrap().token_id, "QR2");
    }

    #[test]
    fn test_tokens_for_subject_after_expiry() {
        let f = fixture();
        f.registry.issue("PT1000", Duration::minutes(5), None).unwrap();
        f.clock.advance(Duration::minutes(1));
        f.registry.issue("PT1000", Duration::minutes(5), None).unwrap();
        f.clock.advance(Duration::hours(1));

        let tokens = f.registry.tokens_for_subject("PT1000");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].token_id(), "QR1");
        assert_eq!(f.registry.token_state("QR1"), Some(TokenState::Expired));
        assert_eq!(f.registry.token_state("QR404"), None);
    }
}
