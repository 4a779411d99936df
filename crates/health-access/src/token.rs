//! Access tokens and the scannable redemption payload
//!
//! A token is split in two:
//! - `token_id`: sequential, shown in logs and on screens
//! - secret: 256 bits derived from OS entropy, handed out once inside the
//!   scannable payload and stored only as a SHA-256 digest
//!
//! Presenting the secret is the capability check. It is compared in constant
//! time against the stored digest.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;

use crate::hash_chain::{fingerprint, sha256, Hash};

/// Bytes of OS entropy mixed into every secret
const SECRET_NONCE_BYTES: usize = 32;

/// The capability half of an access token.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);

impl TokenSecret {
    /// Derive a fresh secret from the issuance time and a CSPRNG nonce
    pub fn generate(issued_at: DateTime<Utc>) -> Self {
        let mut nonce = [0u8; SECRET_NONCE_BYTES];
        OsRng.fill_bytes(&mut nonce);

        let seed = json!({
            "issued_at": issued_at.timestamp_nanos_opt(),
            "nonce": hex::encode(nonce),
        });
        TokenSecret(fingerprint(&seed).to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest kept by the registry in place of the secret itself
    pub fn digest(&self) -> Hash {
        sha256(self.0.as_bytes())
    }
}

impl From<String> for TokenSecret {
    fn from(value: String) -> Self {
        TokenSecret(value)
    }
}

impl From<&str> for TokenSecret {
    fn from(value: &str) -> Self {
        TokenSecret(value.to_string())
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(***)")
    }
}

/// Lifecycle state, derived on read
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    Active,
    Expired,
    Revoked,
}

/// One successful redemption
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionEntry {
    pub actor_id: String,
    pub time: DateTime<Utc>,
}

/// A time-scoped grant of read access to one patient's records
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub(crate) token_id: String,
    pub(crate) subject_id: String,
    pub(crate) secret_digest: Hash,
    pub(crate) issued_at: DateTime<Utc>,
    /// Exclusive deadline
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) issued_by: Option<String>,
    pub(crate) redemption_log: Vec<RedemptionEntry>,
    pub(crate) revoked_at: Option<DateTime<Utc>>,
    pub(crate) revoked_by: Option<String>,
}

impl AccessToken {
    pub(crate) fn new(
        token_id: String,
        subject_id: String,
        secret: &TokenSecret,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        issued_by: Option<String>,
    ) -> Self {
        Self {
            token_id,
            subject_id,
            secret_digest: secret.digest(),
            issued_at,
            expires_at,
            issued_by,
            redemption_log: Vec::new(),
            revoked_at: None,
            revoked_by: None,
        }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn issued_by(&self) -> Option<&str> {
        self.issued_by.as_deref()
    }

    pub fn redemption_log(&self) -> &[RedemptionEntry] {
        &self.redemption_log
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    pub fn revoked_by(&self) -> Option<&str> {
        self.revoked_by.as_deref()
    }

    /// Revocation wins over expiry; a revoked token never reports `Expired`.
    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if self.revoked_at.is_some() {
            TokenState::Revoked
        } else if now >= self.expires_at {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }

    /// Constant-time check of a presented secret
    pub fn secret_matches(&self, presented: &TokenSecret) -> bool {
        bool::from(
            presented
                .digest()
                .as_bytes()
                .ct_eq(self.secret_digest.as_bytes()),
        )
    }
}

/// Everything handed back to the patient at issuance
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub token_id: String,
    pub subject_id: String,
    pub secret: TokenSecret,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// Structured data to embed in the scannable code
    pub fn payload(&self) -> RedemptionPayload {
        RedemptionPayload {
            token_id: self.token_id.clone(),
            secret: self.secret.clone(),
            subject_id: self.subject_id.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Contents of a scannable access code.
///
/// Self-describing, so a verifier can see whose records and until when before
/// redeeming.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionPayload {
    pub token_id: String,
    pub secret: TokenSecret,
    pub subject_id: String,
    pub expires_at: DateTime<Utc>,
}

impl RedemptionPayload {
    /// Parse the text form produced by [`JsonCodeEncoder`]
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Turns a redemption payload into something a scanner can read.
///
/// Rendering the visual code is left to implementors.
pub trait CodeEncoder {
    type Output;
    type Error;

    fn encode(&self, payload: &RedemptionPayload) -> Result<Self::Output, Self::Error>;
}

/// Compact JSON text, ready to hand to a QR renderer
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodeEncoder;

impl CodeEncoder for JsonCodeEncoder {
    type Output = String;
    type Error = serde_json::Error;

    fn encode(&self, payload: &RedemptionPayload) -> Result<String, serde_json::Error> {
        serde_json::to_string(payload)
    }
}
