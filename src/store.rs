//! Durable local store for the last known-good license, the revocation
//! denylist, and validation bookkeeping.
//!
//! ## Layout
//!
//! Three files under an application-private directory (platform app-data
//! directory by default, overridable for tests and multi-tenant installs):
//!
//! - `warden_license.enc` — the last signed license blob; absence means
//!   `Unlicensed`
//! - `warden_revocations.enc` — the local revocation denylist
//! - `warden_meta.enc` — cached status, enabled features, and the timestamp
//!   of the last successful online check
//!
//! All three are AES-256-GCM encrypted with a key derived from the OS
//! machine id.
//!
//! ## Invariants
//!
//! Every write lands in a uniquely named temp file and is renamed into
//! place, so a crash mid-write never corrupts the existing valid file. All
//! reads and writes for a store instance serialize through one mutex
//! (single-writer discipline), even when the heartbeat task and a foreground
//! validation call arrive concurrently.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::encryption::{decrypt_from_base64, encrypt_to_base64, KEY_SIZE};
use crate::errors::{LicenseError, LicenseResult};
use crate::fingerprint;
use crate::license::{LicenseStatus, SignedLicense};
use crate::revocation::RevocationEntry;

const LICENSE_FILE: &str = "warden_license.enc";
const REVOCATION_FILE: &str = "warden_revocations.enc";
const META_FILE: &str = "warden_meta.enc";

/// Validation bookkeeping persisted alongside the license.
///
/// Owned exclusively by the store; mutated only by the validation engine
/// after a successful store write; read by every authorization check,
/// including fully offline ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedValidationState {
    pub status: LicenseStatus,
    /// When the server last confirmed this license. The offline grace window
    /// is anchored here, not at the license's own expiry date.
    pub last_online_check: Option<DateTime<Utc>>,
    /// Feature flags copied from the license at the last check.
    pub features: Vec<String>,
}

impl Default for CachedValidationState {
    fn default() -> Self {
        Self {
            status: LicenseStatus::Unlicensed,
            last_online_check: None,
            features: Vec::new(),
        }
    }
}

/// Single-writer store over the three persisted files.
#[derive(Debug)]
pub struct LicenseStore {
    dir: PathBuf,
    key: [u8; KEY_SIZE],
    // Serializes every read and write; the files are the only shared
    // mutable state in the engine.
    lock: Mutex<()>,
}

/// Derive the at-rest encryption key from the machine identity.
fn derive_storage_key() -> [u8; KEY_SIZE] {
    let salted = format!("warden_store_v1:{}", fingerprint::storage_key_material());
    let hash = digest(&SHA256, salted.as_bytes());

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(hash.as_ref());
    key
}

impl LicenseStore {
    /// Open (creating if needed) the store described by the configuration.
    pub async fn open(config: &StorageConfig) -> LicenseResult<Self> {
        let dir = if config.dir.is_empty() {
            dirs::data_dir()
                .ok_or_else(|| {
                    LicenseError::Storage(std::io::Error::new(
                        ErrorKind::NotFound,
                        "could not determine app data directory",
                    ))
                })?
                .join("warden")
        } else {
            PathBuf::from(&config.dir)
        };

        fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            key: derive_storage_key(),
            lock: Mutex::new(()),
        })
    }

    /// Directory the store files live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // === License blob ===

    /// Persist a signed license, replacing any previous one wholesale.
    pub async fn save_license(&self, license: &SignedLicense) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        self.write_json(LICENSE_FILE, license).await
    }

    /// Load the cached signed license. `None` means this machine is
    /// unlicensed.
    pub async fn load_license(&self) -> LicenseResult<Option<SignedLicense>> {
        let _guard = self.lock.lock().await;
        self.read_license_unlocked().await
    }

    /// Remove the cached license. Part of the reset-and-reactivate flow for
    /// hardware mismatches; bookkeeping and the denylist are left intact.
    pub async fn clear_license(&self) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        tracing::warn!("clearing cached license (activation reset)");
        self.remove_file(LICENSE_FILE).await
    }

    // === Validation bookkeeping ===

    /// Read the cached validation state; defaults to `Unlicensed` with no
    /// recorded online check.
    pub async fn cached_state(&self) -> LicenseResult<CachedValidationState> {
        let _guard = self.lock.lock().await;
        self.read_meta_unlocked().await
    }

    /// Overwrite the cached validation state.
    pub async fn save_cached_state(&self, state: &CachedValidationState) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        self.write_json(META_FILE, state).await
    }

    /// Record a successful online check without touching status or features.
    pub async fn update_last_online_check(&self, now: DateTime<Utc>) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_meta_unlocked().await?;
        state.last_online_check = Some(now);
        self.write_json(META_FILE, &state).await
    }

    // === Revocation denylist ===

    /// Add a server-asserted revocation entry. Adding the same license ID
    /// again replaces the entry.
    pub async fn add_revocation(&self, entry: RevocationEntry) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_revocations_unlocked().await?;
        entries.retain(|e| e.license_id != entry.license_id);
        entries.push(entry);
        self.write_json(REVOCATION_FILE, &entries).await
    }

    /// Whether a license ID is on the denylist.
    pub async fn is_revoked(&self, license_id: &str) -> LicenseResult<bool> {
        let _guard = self.lock.lock().await;
        let entries = self.read_revocations_unlocked().await?;
        Ok(entries.iter().any(|e| e.license_id == license_id))
    }

    /// The recorded reason for a revocation, if present.
    pub async fn revocation_reason(&self, license_id: &str) -> LicenseResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let entries = self.read_revocations_unlocked().await?;
        Ok(entries
            .iter()
            .find(|e| e.license_id == license_id)
            .map(|e| e.reason.clone()))
    }

    /// All license IDs currently denylisted.
    pub async fn all_revoked_ids(&self) -> LicenseResult<Vec<String>> {
        let _guard = self.lock.lock().await;
        let entries = self.read_revocations_unlocked().await?;
        Ok(entries.into_iter().map(|e| e.license_id).collect())
    }

    /// Operator escape hatch: remove one entry from the denylist.
    ///
    /// Never called by the validation engine. The reason is mandatory and
    /// logged for audit.
    pub async fn clear_revocation(&self, license_id: &str, reason: &str) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        tracing::warn!(
            license_id,
            reason,
            at = %Utc::now(),
            "operator cleared a local revocation entry"
        );
        let mut entries = self.read_revocations_unlocked().await?;
        entries.retain(|e| e.license_id != license_id);
        self.write_json(REVOCATION_FILE, &entries).await
    }

    /// Operator escape hatch: wipe the entire local denylist.
    ///
    /// The documented recovery path when a transient server error incorrectly
    /// populated the list. The reason is mandatory and logged for audit.
    pub async fn clear_all_revocations(&self, reason: &str) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        tracing::warn!(
            reason,
            at = %Utc::now(),
            "operator cleared ALL local revocation entries"
        );
        self.write_json(REVOCATION_FILE, &Vec::<RevocationEntry>::new())
            .await
    }

    // === Unlocked internals (caller holds the mutex) ===

    async fn read_license_unlocked(&self) -> LicenseResult<Option<SignedLicense>> {
        match self.read_json(LICENSE_FILE).await {
            Ok(found) => Ok(found),
            // An unreadable license file is a corrupted cache, not an I/O
            // fault: the caller must force re-activation.
            Err(LicenseError::Decryption(e)) => {
                Err(LicenseError::Corrupted(format!("license file unreadable: {e}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn read_meta_unlocked(&self) -> LicenseResult<CachedValidationState> {
        Ok(self.read_json(META_FILE).await?.unwrap_or_default())
    }

    async fn read_revocations_unlocked(&self) -> LicenseResult<Vec<RevocationEntry>> {
        Ok(self.read_json(REVOCATION_FILE).await?.unwrap_or_default())
    }

    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> LicenseResult<Option<T>> {
        let path = self.dir.join(name);
        let encrypted = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LicenseError::Storage(e)),
        };

        let decrypted = decrypt_from_base64(&encrypted, &self.key)?;
        let value = serde_json::from_slice(&decrypted)
            .map_err(|e| LicenseError::Decryption(format!("deserialize {name}: {e}")))?;
        Ok(Some(value))
    }

    /// Atomic write: encrypt, land in a unique temp file, rename into place.
    async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> LicenseResult<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| LicenseError::Encryption(format!("serialize {name}: {e}")))?;
        let encrypted = encrypt_to_base64(&json, &self.key)?;

        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.{}.tmp", Uuid::new_v4()));

        fs::write(&tmp, encrypted).await?;
        match fs::rename(&tmp, &path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(LicenseError::Storage(e))
            }
        }
    }

    async fn remove_file(&self, name: &str) -> LicenseResult<()> {
        match fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LicenseError::Storage(e)),
        }
    }
}
