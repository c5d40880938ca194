//! Revocation guard: the merge point between server-pushed and locally
//! cached revocation state.
//!
//! The guard has no network access of its own. Entries arrive only as copies
//! of server-asserted data (absorbed by the validation engine from server
//! responses) and are persisted by the local store as a denylist: presence of
//! an entry is always sufficient to deny access, regardless of an otherwise
//! valid signature or expiry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LicenseResult;
use crate::store::LicenseStore;

/// One denylist entry, copied verbatim from a server response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationEntry {
    pub license_id: String,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}

/// Read-mostly view over the store's persisted revocation list.
#[derive(Debug, Clone)]
pub struct RevocationGuard {
    store: Arc<LicenseStore>,
}

impl RevocationGuard {
    pub fn new(store: Arc<LicenseStore>) -> Self {
        Self { store }
    }

    /// Whether a license ID is on the local denylist.
    pub async fn is_revoked(&self, license_id: &str) -> LicenseResult<bool> {
        self.store.is_revoked(license_id).await
    }

    /// The recorded reason for a revocation, if any.
    pub async fn reason(&self, license_id: &str) -> LicenseResult<Option<String>> {
        self.store.revocation_reason(license_id).await
    }

    /// All license IDs currently on the denylist.
    pub async fn all_revoked_ids(&self) -> LicenseResult<Vec<String>> {
        self.store.all_revoked_ids().await
    }

    /// Merge server-pushed revocation entries into the local denylist.
    ///
    /// Called by the validation engine whenever a server response carries
    /// revocation data; this is the only path by which entries appear.
    pub async fn absorb(&self, entries: &[RevocationEntry]) -> LicenseResult<()> {
        for entry in entries {
            tracing::info!(
                license_id = %entry.license_id,
                reason = %entry.reason,
                "recording server-asserted revocation"
            );
            self.store.add_revocation(entry.clone()).await?;
        }
        Ok(())
    }
}
