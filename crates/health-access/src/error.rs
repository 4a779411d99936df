//! Error types
//!
//! Access errors are deterministic: retrying the same call against the same
//! state fails the same way. Chain integrity problems are not errors at all;
//! they are reported as an [`IntegrityVerdict`](crate::ledger::IntegrityVerdict).

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors from issuing, redeeming or revoking access, and from record appends
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AccessError {
    /// The patient is not in the directory
    #[error("patient not found: {subject_id}")]
    SubjectNotFound { subject_id: String },

    /// Validity window is zero, negative, out of range, or longer than the
    /// configured cap (if one is set)
    #[error("invalid validity duration: {minutes} minutes")]
    InvalidDuration {
        minutes: i64,
        max_minutes: Option<i64>,
    },

    #[error("access token not found: {token_id}")]
    TokenNotFound { token_id: String },

    #[error("access token {token_id} expired at {expired_at}")]
    TokenExpired {
        token_id: String,
        expired_at: DateTime<Utc>,
    },

    /// Redemption time precedes issuance
    #[error("access token {token_id} is not valid before {issued_at}")]
    TokenNotYetValid {
        token_id: String,
        issued_at: DateTime<Utc>,
    },

    #[error("access token {token_id} has been revoked")]
    TokenRevoked { token_id: String },

    /// The presented secret does not match the token's
    #[error("secret does not match access token {token_id}")]
    SecretMismatch { token_id: String },

    /// Redeeming party is not a registered clinician (only when required by config)
    #[error("clinician not found: {actor_id}")]
    ClinicianNotFound { actor_id: String },
}

impl AccessError {
    /// Short reason code, used for denied-attempt logs
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::SubjectNotFound { .. } => "SUBJECT_NOT_FOUND",
            AccessError::InvalidDuration { .. } => "INVALID_DURATION",
            AccessError::TokenNotFound { .. } => "TOKEN_NOT_FOUND",
            AccessError::TokenExpired { .. } => "TOKEN_EXPIRED",
            AccessError::TokenNotYetValid { .. } => "TOKEN_NOT_YET_VALID",
            AccessError::TokenRevoked { .. } => "TOKEN_REVOKED",
            AccessError::SecretMismatch { .. } => "SECRET_MISMATCH",
            AccessError::ClinicianNotFound { .. } => "CLINICIAN_NOT_FOUND",
        }
    }
}

/// Errors loading or saving persisted state
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed state file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state file version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
