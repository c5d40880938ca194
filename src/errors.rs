//! Error types for the warden license engine.
//!
//! Expected licensing conditions (offline, session conflict, revocation,
//! hardware mismatch) are *not* errors here; they are modeled as statuses and
//! outcome values so callers can distinguish "offline, using cache" from
//! "corrupted, needs reactivation" instead of treating all failures alike.
//! `LicenseError` covers transport faults, storage faults, and genuinely
//! unexpected conditions.

use thiserror::Error;

/// Errors surfaced by the license engine and its collaborators.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// The license server could not be reached at all.
    #[error("license server unreachable: {0}")]
    Network(String),

    /// The request exceeded its bounded timeout.
    #[error("license server request timed out")]
    Timeout,

    /// The server answered with a 5xx. Treated the same as a network failure
    /// for authorization purposes.
    #[error("license server error: {0}")]
    ServerError(String),

    /// The server answered with something the client cannot interpret
    /// (unexpected status code or malformed body).
    #[error("unexpected server response: {0}")]
    Protocol(String),

    /// The cached license failed signature or parse checks. The caller must
    /// treat the machine as unlicensed and re-activate.
    #[error("cached license is corrupted: {0}")]
    Corrupted(String),

    /// Disk I/O failure on the local store.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// At-rest encryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// At-rest decryption failed (wrong key or tampered data).
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A human-entered activation code does not have the expected shape.
    #[error("invalid activation code: {0}")]
    InvalidCode(String),
}

impl LicenseError {
    /// Returns true if the operation may simply be retried later, once the
    /// network or server recovers. These failures never deny access by
    /// themselves; the engine falls back to offline evaluation instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LicenseError::Network(_) | LicenseError::Timeout | LicenseError::ServerError(_)
        )
    }
}

impl From<reqwest::Error> for LicenseError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LicenseError::Timeout
        } else if e.is_connect() || e.is_request() {
            LicenseError::Network(e.to_string())
        } else if e.is_decode() {
            LicenseError::Protocol(e.to_string())
        } else {
            LicenseError::Network(e.to_string())
        }
    }
}

/// Convenience alias used throughout the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;
