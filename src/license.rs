//! License data model and signed-blob verification.
//!
//! A license is issued by the server as a signed blob:
//! `payload` is base64 of the license JSON, `signature` is base64 of an
//! Ed25519 signature over the payload bytes, verifiable with a public key
//! embedded in the client. Licenses are immutable once received and are
//! superseded wholesale by a newer signed blob, never patched field-by-field.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};

use crate::errors::{LicenseError, LicenseResult};
use crate::fingerprint::FingerprintSet;

/// Embedded Ed25519 public key for license verification (32 bytes).
///
/// The corresponding private key never leaves the license server.
pub const LICENSE_PUBLIC_KEY: [u8; 32] = [
    0x3d, 0x4a, 0x17, 0xc9, 0x5e, 0x02, 0xb8, 0x61, 0xf4, 0x9b, 0x2c, 0xd7, 0x88, 0x13, 0xa5,
    0x6e, 0x71, 0xee, 0x0c, 0x54, 0xb2, 0x9f, 0x40, 0x26, 0xd1, 0x8a, 0x33, 0xc5, 0x6b, 0x07,
    0xfa, 0x92,
];

/// The decoded license payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    /// Server-side license identifier (opaque).
    pub license_id: String,
    /// Human-entered activation code this license was issued for.
    pub license_code: String,
    pub customer_name: String,
    pub customer_email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Tier name (e.g. "standard", "enterprise").
    pub tier: String,
    /// Ordered feature flags, e.g. `Tier:Enterprise`, `Module:Calibration`.
    pub features: Vec<String>,
    /// Fingerprint sets of the machines this license is bound to. More than
    /// one entry means the tier allows multiple authorized machines.
    pub fingerprints: Vec<FingerprintSet>,
}

impl License {
    /// Check if a specific feature flag is enabled.
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Whether the license expiry date has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A signed license blob as issued by the server and persisted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedLicense {
    /// Base64 of the license payload JSON.
    pub payload: String,
    /// Base64 of the Ed25519 signature over the payload bytes.
    pub signature: String,
}

impl SignedLicense {
    /// Verify the signature with the embedded public key and decode the
    /// payload.
    ///
    /// Any failure (bad base64, bad signature, malformed JSON) is
    /// [`LicenseError::Corrupted`]: the blob must be replaced by
    /// re-activation, never repaired locally.
    pub fn verify_and_decode(&self) -> LicenseResult<License> {
        self.verify_and_decode_with_key(&LICENSE_PUBLIC_KEY)
    }

    /// Verify against a caller-supplied public key. Used by tests with a
    /// generated key pair.
    pub fn verify_and_decode_with_key(&self, public_key: &[u8; 32]) -> LicenseResult<License> {
        let signature = B64
            .decode(&self.signature)
            .map_err(|e| LicenseError::Corrupted(format!("signature base64: {e}")))?;

        UnparsedPublicKey::new(&ED25519, public_key)
            .verify(self.payload.as_bytes(), &signature)
            .map_err(|_| LicenseError::Corrupted("signature verification failed".to_string()))?;

        let payload = B64
            .decode(&self.payload)
            .map_err(|e| LicenseError::Corrupted(format!("payload base64: {e}")))?;

        serde_json::from_slice(&payload)
            .map_err(|e| LicenseError::Corrupted(format!("payload JSON: {e}")))
    }
}

/// Current license status as decided by the validation engine.
///
/// `Revoked` and `HardwareMismatch` are terminal for the session: the former
/// is a hard stop, the latter requires an explicit reset-and-reactivate. All
/// other states are re-evaluated on every check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LicenseStatus {
    /// No license stored on this machine.
    Unlicensed,
    /// An activation round trip is in flight.
    Activating,
    Valid,
    /// Expired on paper, but within the grace window anchored to the last
    /// successful online check.
    GracePeriod { days_remaining: u32 },
    Expired,
    Revoked,
    HardwareMismatch,
    /// The cached license failed signature or parse checks.
    Corrupted,
}

impl LicenseStatus {
    /// Whether the application may run under this status.
    pub fn is_usable(&self) -> bool {
        matches!(self, LicenseStatus::Valid | LicenseStatus::GracePeriod { .. })
    }

    /// Whether this status ends the session until an operator intervenes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LicenseStatus::Revoked | LicenseStatus::HardwareMismatch)
    }

    /// Actionable next steps for statuses that block normal use.
    pub fn advice(&self) -> Option<&'static str> {
        match self {
            LicenseStatus::Revoked => Some(
                "This license has been revoked. Contact support; if you believe \
                 this is a server error, support can walk you through the \
                 emergency revocation-clear procedure.",
            ),
            LicenseStatus::HardwareMismatch => Some(
                "This license is bound to different hardware. Reset the \
                 activation on this machine and re-activate with your code.",
            ),
            LicenseStatus::Corrupted => Some(
                "The locally stored license is unreadable. Re-activate with \
                 your activation code while online.",
            ),
            LicenseStatus::Expired => Some(
                "This license has expired. Renew it, then run an online check.",
            ),
            _ => None,
        }
    }
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LicenseStatus::GracePeriod { days_remaining } => {
                write!(f, "GracePeriod({days_remaining} days remaining)")
            }
            other => write!(f, "{other:?}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Helpers for producing signed licenses with a throwaway key pair.

    use super::*;
    use chrono::Duration;
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};

    pub struct TestSigner {
        key_pair: Ed25519KeyPair,
    }

    impl TestSigner {
        pub fn generate() -> Self {
            let rng = SystemRandom::new();
            let pkcs8 =
                Ed25519KeyPair::generate_pkcs8(&rng).expect("key generation should succeed");
            let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
                .expect("key parsing should succeed");
            Self { key_pair }
        }

        pub fn public_key(&self) -> [u8; 32] {
            let mut key = [0u8; 32];
            key.copy_from_slice(self.key_pair.public_key().as_ref());
            key
        }

        pub fn sign(&self, license: &License) -> SignedLicense {
            let payload = B64.encode(serde_json::to_vec(license).expect("license serializes"));
            let signature = B64.encode(self.key_pair.sign(payload.as_bytes()).as_ref());
            SignedLicense { payload, signature }
        }
    }

    pub fn sample_license(expires_in_days: i64) -> License {
        License {
            license_id: "LIC-0001".to_string(),
            license_code: "AB12-CD34-EF56-GH78".to_string(),
            customer_name: "Test Customer".to_string(),
            customer_email: "customer@example.com".to_string(),
            issued_at: Utc::now() - Duration::days(30),
            expires_at: Utc::now() + Duration::days(expires_in_days),
            tier: "standard".to_string(),
            features: vec![
                "Tier:Standard".to_string(),
                "Module:Equipment".to_string(),
            ],
            fingerprints: vec![],
        }
    }
}
