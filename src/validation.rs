//! Validation engine: decides the current license status.
//!
//! The decision procedure combines the cached signed license, a live server
//! round trip when the network allows, fingerprint matching, the local
//! revocation denylist, and grace-period arithmetic. A transient server
//! failure never denies a paying user by itself, and never grants access to
//! a revoked one: offline evaluation still consults the local denylist.
//!
//! Offline fallback triggers on *any* server-side failure shape —
//! unreachable, timeout, 5xx, or a response the client cannot interpret. A
//! half-upgraded or misbehaving server must never deny a paying user; the
//! offline rules (denylist, fingerprint match, grace window) still bound
//! what the fallback can grant. Before falling back, the engine attempts one
//! lightweight lookup against the revocation endpoint, which may still be
//! reachable when the full validate round trip is not.
//!
//! The engine is an explicit service instance constructed once at startup
//! and passed by reference to everything that needs authorization decisions.
//! Status changes are published on a bounded broadcast channel; interested
//! components subscribe instead of registering ambient callbacks.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tokio::sync::broadcast;

use crate::api::{ActivateRequest, ApiClient, ServerStatus, ValidateRequest};
use crate::config::WardenConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::fingerprint::{self, FingerprintPolicy, FingerprintProvider, FingerprintSet};
use crate::license::{License, LicenseStatus, LICENSE_PUBLIC_KEY};
use crate::revocation::{RevocationEntry, RevocationGuard};
use crate::store::{CachedValidationState, LicenseStore};

/// Capacity of the status-change broadcast channel. Slow subscribers lag and
/// observe only the most recent statuses, they never block the engine.
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// The license validation engine.
pub struct ValidationEngine {
    store: Arc<LicenseStore>,
    guard: RevocationGuard,
    provider: FingerprintProvider,
    api: ApiClient,
    grace_period_days: i64,
    fingerprint_policy: FingerprintPolicy,
    code_pattern: Regex,
    verifying_key: [u8; 32],
    status_tx: broadcast::Sender<LicenseStatus>,
}

impl ValidationEngine {
    pub fn new(
        config: &WardenConfig,
        store: Arc<LicenseStore>,
        guard: RevocationGuard,
        provider: FingerprintProvider,
        api: ApiClient,
    ) -> LicenseResult<Self> {
        Self::with_verifying_key(config, store, guard, provider, api, LICENSE_PUBLIC_KEY)
    }

    /// Construct with a caller-supplied verifying key instead of the
    /// embedded one. Used by tests with a generated key pair.
    pub fn with_verifying_key(
        config: &WardenConfig,
        store: Arc<LicenseStore>,
        guard: RevocationGuard,
        provider: FingerprintProvider,
        api: ApiClient,
        verifying_key: [u8; 32],
    ) -> LicenseResult<Self> {
        let code_pattern = Regex::new(&config.license.code_pattern)
            .map_err(|e| LicenseError::Config(format!("license.code_pattern: {e}")))?;
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        Ok(Self {
            store,
            guard,
            provider,
            api,
            grace_period_days: config.license.grace_period_days,
            fingerprint_policy: FingerprintPolicy::new(config.license.minimum_match_fraction),
            code_pattern,
            verifying_key,
            status_tx,
        })
    }

    /// Subscribe to status-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<LicenseStatus> {
        self.status_tx.subscribe()
    }

    /// Feature flags from the license as of the last check. Always read from
    /// the cached license data, never inferred from tier names.
    pub async fn enabled_features(&self) -> LicenseResult<Vec<String>> {
        Ok(self.store.cached_state().await?.features)
    }

    fn publish(&self, status: &LicenseStatus) {
        // No subscribers is fine; the channel is advisory.
        let _ = self.status_tx.send(status.clone());
    }

    /// Activate this machine with a human-entered code.
    ///
    /// Activation requires connectivity by design: a transport failure is a
    /// retryable error with no local state change, never satisfied from
    /// cache.
    pub async fn activate(&self, license_code: &str, email: &str) -> LicenseResult<LicenseStatus> {
        let code = license_code.trim().to_uppercase();
        if !self.code_pattern.is_match(&code) {
            return Err(LicenseError::InvalidCode(format!(
                "activation code '{code}' does not match the expected shape"
            )));
        }

        self.publish(&LicenseStatus::Activating);

        let request = ActivateRequest {
            license_key: code.clone(),
            email: email.trim().to_string(),
            hardware_fingerprints: vec![self.provider.capture()],
            machine_name: fingerprint::machine_name(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            os_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        };

        let response = match self.api.activate(&request).await {
            Ok(r) => r,
            Err(e) => {
                // Republish whatever we actually are; activation changed nothing.
                let current = self.store.cached_state().await?.status;
                self.publish(&current);
                return Err(e);
            }
        };

        if !response.success {
            let current = self.store.cached_state().await?.status;
            self.publish(&current);
            return Err(LicenseError::InvalidCode(response.message));
        }

        let signed = response.signed_license.ok_or_else(|| {
            LicenseError::Protocol("activation succeeded but no license attached".to_string())
        })?;
        let license = signed.verify_and_decode_with_key(&self.verifying_key)?;

        // Persist before reporting: a caller never observes a status more
        // optimistic than what is on disk.
        self.store.save_license(&signed).await?;
        self.store
            .save_cached_state(&CachedValidationState {
                status: LicenseStatus::Valid,
                last_online_check: Some(Utc::now()),
                features: license.features.clone(),
            })
            .await?;

        tracing::info!(license_id = %license.license_id, "license activated");
        self.publish(&LicenseStatus::Valid);
        Ok(LicenseStatus::Valid)
    }

    /// The core decision procedure, executed at startup and periodically
    /// thereafter.
    pub async fn check_status(&self) -> LicenseResult<LicenseStatus> {
        // 1. Load the cached signed license.
        let signed = match self.store.load_license().await {
            Ok(Some(s)) => s,
            Ok(None) => {
                self.publish(&LicenseStatus::Unlicensed);
                return Ok(LicenseStatus::Unlicensed);
            }
            Err(LicenseError::Corrupted(e)) => {
                tracing::warn!(error = %e, "cached license unreadable, re-activation required");
                self.publish(&LicenseStatus::Corrupted);
                return Ok(LicenseStatus::Corrupted);
            }
            Err(e) => return Err(e),
        };

        let license = match signed.verify_and_decode_with_key(&self.verifying_key) {
            Ok(l) => l,
            Err(LicenseError::Corrupted(e)) => {
                tracing::warn!(error = %e, "cached license failed verification");
                self.publish(&LicenseStatus::Corrupted);
                return Ok(LicenseStatus::Corrupted);
            }
            Err(e) => return Err(e),
        };

        let current_fp = self.provider.capture();

        // 2. Attempt the bounded online round trip.
        match self
            .api
            .validate(&ValidateRequest {
                license_id: license.license_id.clone(),
                hardware_fingerprints: vec![current_fp.clone()],
            })
            .await
        {
            Ok(response) => {
                // Server-pushed revocation data is absorbed before anything
                // is reported.
                if !response.revoked.is_empty() {
                    self.guard.absorb(&response.revoked).await?;
                }

                if let Some(updated) = response.updated_license {
                    match updated.verify_and_decode_with_key(&self.verifying_key) {
                        Ok(_) => self.store.save_license(&updated).await?,
                        Err(e) => {
                            tracing::warn!(error = %e, "ignoring unverifiable updated license")
                        }
                    }
                }

                if response.status == ServerStatus::Unknown {
                    tracing::warn!("server returned an unrecognized status, evaluating offline");
                    return self
                        .offline_evaluation(&license, &current_fp, response.message.as_deref())
                        .await;
                }

                // The local denylist is always sufficient to deny, even when
                // the server is reachable and says otherwise.
                let locally_revoked = self.guard.is_revoked(&license.license_id).await?;
                let status = match response.status {
                    ServerStatus::Revoked => LicenseStatus::Revoked,
                    _ if locally_revoked => LicenseStatus::Revoked,
                    ServerStatus::Valid => LicenseStatus::Valid,
                    ServerStatus::Expired => LicenseStatus::Expired,
                    ServerStatus::HardwareMismatch => LicenseStatus::HardwareMismatch,
                    ServerStatus::Unknown => unreachable!("handled above"),
                };

                // Persist server truth before reporting it.
                self.store
                    .save_cached_state(&CachedValidationState {
                        status: status.clone(),
                        last_online_check: Some(Utc::now()),
                        features: license.features.clone(),
                    })
                    .await?;

                tracing::debug!(%status, "online check complete");
                self.publish(&status);
                Ok(status)
            }
            Err(e) if offline_fallback_applies(&e) => {
                tracing::debug!(error = %e, "license server unavailable, evaluating offline");
                self.refresh_revocation(&license.license_id).await;
                self.offline_evaluation(&license, &current_fp, None).await
            }
            Err(e) => Err(e),
        }
    }

    /// Targeted denylist refresh for when the full validate round trip
    /// fails: the lightweight revocation endpoint may still be reachable.
    /// Best-effort; any failure here leaves the local denylist as-is.
    async fn refresh_revocation(&self, license_id: &str) {
        match self.api.revocation_status(license_id).await {
            Ok(status) if status.is_revoked => {
                let entry = RevocationEntry {
                    license_id: license_id.to_string(),
                    reason: status
                        .reason
                        .unwrap_or_else(|| "revoked by server".to_string()),
                    revoked_at: Utc::now(),
                };
                if let Err(e) = self.guard.absorb(&[entry]).await {
                    tracing::warn!(error = %e, "failed to persist revocation entry");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "revocation endpoint unavailable, keeping local list")
            }
        }
    }

    /// 3. Offline evaluation: cached license plus local denylist plus grace
    /// arithmetic. Read-only; the cached state keeps describing the last
    /// *online* verdict.
    async fn offline_evaluation(
        &self,
        license: &License,
        current_fp: &FingerprintSet,
        server_message: Option<&str>,
    ) -> LicenseResult<LicenseStatus> {
        if let Some(msg) = server_message {
            tracing::debug!(msg, "server message accompanying offline fallback");
        }

        // A local denylist hit is a hard stop even offline.
        if self.guard.is_revoked(&license.license_id).await? {
            let reason = self.guard.reason(&license.license_id).await?;
            tracing::warn!(license_id = %license.license_id, ?reason, "license locally revoked");
            self.publish(&LicenseStatus::Revoked);
            return Ok(LicenseStatus::Revoked);
        }

        // Fingerprint mismatch blocks regardless of expiry. An unbound
        // license (no stored sets) cannot mismatch.
        let bound = &license.fingerprints;
        let matched = bound.is_empty()
            || bound
                .iter()
                .any(|stored| fingerprint::matches(stored, current_fp, &self.fingerprint_policy));
        if !matched {
            tracing::warn!(license_id = %license.license_id, "hardware fingerprint mismatch");
            self.publish(&LicenseStatus::HardwareMismatch);
            return Ok(LicenseStatus::HardwareMismatch);
        }

        let now = Utc::now();
        if !license.is_expired(now) {
            self.publish(&LicenseStatus::Valid);
            return Ok(LicenseStatus::Valid);
        }

        // Expired on paper: the grace window is anchored to the last
        // successful online contact, not to the license's own expiry, so a
        // machine that was legitimately offline is judged leniently while a
        // stale never-renewed cache is not indefinitely excused.
        let cached = self.store.cached_state().await?;
        let status = match cached.last_online_check {
            Some(last_check) if cached.status == LicenseStatus::Valid => {
                let grace_end = last_check + chrono::Duration::days(self.grace_period_days);
                if now < grace_end {
                    let days_remaining = (grace_end - now).num_days().max(0) as u32;
                    LicenseStatus::GracePeriod { days_remaining }
                } else {
                    LicenseStatus::Expired
                }
            }
            _ => LicenseStatus::Expired,
        };

        tracing::debug!(%status, "offline evaluation complete");
        self.publish(&status);
        Ok(status)
    }

    /// Reset this machine's activation after a hardware mismatch.
    ///
    /// Clears the cached license (the denylist and bookkeeping survive) so
    /// the operator can re-activate with their code.
    pub async fn reset_activation(&self) -> LicenseResult<()> {
        self.store.clear_license().await?;
        self.store
            .save_cached_state(&CachedValidationState::default())
            .await?;
        self.publish(&LicenseStatus::Unlicensed);
        Ok(())
    }
}

/// Failures that trigger offline evaluation instead of denying access.
/// 5xx and malformed responses are treated the same as an unreachable
/// network for authorization purposes.
fn offline_fallback_applies(e: &LicenseError) -> bool {
    matches!(
        e,
        LicenseError::Network(_)
            | LicenseError::Timeout
            | LicenseError::ServerError(_)
            | LicenseError::Protocol(_)
    )
}
