//! Session arbitration: one active device per license.
//!
//! After a positive validation, the arbitrator claims the license for this
//! device against the server and keeps the claim alive with a periodic
//! heartbeat. A conflict (another device already active) is surfaced with
//! enough detail for the user to decide between waiting and an explicit
//! forced takeover. Brief network blips never boot a legitimate user: a
//! failed heartbeat only marks the session unconfirmed, and a hard loss is
//! declared after a configured number of consecutive misses.
//!
//! Exactly one heartbeat is ever in flight: the loop is sequential and the
//! ticker skips missed ticks instead of queueing them, so a slow network
//! cannot build an unbounded backlog.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, ConflictInfo, SessionStartReply, SessionStartRequest};
use crate::config::SessionConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::fingerprint::{self, FingerprintProvider};

/// A live claim on the license, held only while the process runs. Never
/// persisted; a crash leaves the server to expire the claim via heartbeat
/// timeout.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub device_name: String,
    pub primary_fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Server-declared expiry, refreshed by each successful heartbeat.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Observable heartbeat health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionHealth {
    /// No session is held.
    Inactive,
    /// The last heartbeat was acknowledged.
    Confirmed,
    /// Heartbeats are failing but the session is still locally active.
    Unconfirmed { misses: u32 },
    /// The session is gone: the miss threshold was reached or the server
    /// invalidated the token (e.g. forced takeover by another device).
    Lost,
}

/// Outcome of [`SessionArbitrator::start_session`].
#[derive(Debug)]
pub enum SessionStart {
    Started(Session),
    /// Another device holds the active session. Whether to wait or
    /// force-terminate is the user's decision.
    Conflict(ConflictInfo),
}

#[derive(Debug, Default)]
struct Inner {
    session: Option<Session>,
    misses: u32,
    cancel: Option<CancellationToken>,
}

/// Enforces "one active device per license" against the server.
///
/// Transport failures from [`start_session`](Self::start_session) are
/// retryable errors; whether to proceed in a degraded single-device-assumed
/// mode or to block is the caller's policy, not the arbitrator's.
pub struct SessionArbitrator {
    api: ApiClient,
    provider: FingerprintProvider,
    heartbeat_interval: Duration,
    max_heartbeat_misses: u32,
    shutdown_grace: Duration,
    inner: Mutex<Inner>,
    health_tx: watch::Sender<SessionHealth>,
}

impl SessionArbitrator {
    pub fn new(config: &SessionConfig, api: ApiClient, provider: FingerprintProvider) -> Self {
        let (health_tx, _) = watch::channel(SessionHealth::Inactive);
        Self {
            api,
            provider,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            max_heartbeat_misses: config.max_heartbeat_misses,
            shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            inner: Mutex::new(Inner::default()),
            health_tx,
        }
    }

    /// Watch heartbeat health transitions.
    pub fn health(&self) -> watch::Receiver<SessionHealth> {
        self.health_tx.subscribe()
    }

    /// Snapshot of the current session, if one is held.
    pub async fn session(&self) -> Option<Session> {
        self.inner.lock().await.session.clone()
    }

    /// Claim the license for this device and begin the heartbeat loop.
    pub async fn start_session(self: &Arc<Self>, license_id: &str) -> LicenseResult<SessionStart> {
        let fingerprint = self.provider.capture();
        let device_name = fingerprint::machine_name();

        let request = SessionStartRequest {
            license_id: license_id.to_string(),
            hardware_fingerprint: fingerprint.primary.clone(),
            machine_name: device_name.clone(),
        };

        match self.api.start_session(&request).await? {
            SessionStartReply::Conflict(info) => {
                tracing::info!(
                    active_device = %info.active_device,
                    can_force_terminate = info.can_force_terminate,
                    "session conflict: another device is active"
                );
                Ok(SessionStart::Conflict(info))
            }
            SessionStartReply::Started(resp) => {
                if !resp.success || resp.session_token.is_empty() {
                    return Err(LicenseError::Protocol(
                        "session start reported success without a token".to_string(),
                    ));
                }

                let session = Session {
                    token: resp.session_token,
                    device_name,
                    primary_fingerprint: fingerprint.primary,
                    started_at: Utc::now(),
                    last_heartbeat: None,
                    expires_at: None,
                };

                let cancel = CancellationToken::new();
                {
                    let mut inner = self.inner.lock().await;
                    // Replacing a previous session also stops its loop.
                    if let Some(old) = inner.cancel.take() {
                        old.cancel();
                    }
                    inner.session = Some(session.clone());
                    inner.misses = 0;
                    inner.cancel = Some(cancel.clone());
                }
                self.health_tx.send_replace(SessionHealth::Confirmed);

                self.spawn_heartbeat_loop(cancel);
                tracing::info!("session started");
                Ok(SessionStart::Started(session))
            }
        }
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>, cancel: CancellationToken) {
        let arbitrator = Arc::clone(self);
        let interval = self.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A tick that fires while a heartbeat is still in flight is
            // dropped, not queued.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The interval fires immediately; the session was just confirmed.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match arbitrator.heartbeat().await {
                            SessionHealth::Lost | SessionHealth::Inactive => break,
                            _ => {}
                        }
                    }
                }
            }
        });
    }

    /// Send one heartbeat and update health.
    ///
    /// Driven by the background loop; also callable directly (e.g. to force
    /// a liveness probe before a critical operation).
    pub async fn heartbeat(&self) -> SessionHealth {
        let token = {
            let inner = self.inner.lock().await;
            match &inner.session {
                Some(s) => s.token.clone(),
                None => return SessionHealth::Inactive,
            }
        };

        match self.api.heartbeat(&token).await {
            Ok(resp) if resp.success && resp.is_valid => {
                let mut inner = self.inner.lock().await;
                inner.misses = 0;
                if let Some(session) = inner.session.as_mut() {
                    session.last_heartbeat = Some(Utc::now());
                    session.expires_at = resp.expires_at;
                }
                self.health_tx.send_replace(SessionHealth::Confirmed);
                SessionHealth::Confirmed
            }
            Ok(resp) => {
                // The server explicitly disowned the token: evicted by a
                // forced takeover or expired server-side.
                tracing::warn!(message = ?resp.message, "server invalidated the session");
                let mut inner = self.inner.lock().await;
                inner.session = None;
                inner.misses = 0;
                if let Some(cancel) = inner.cancel.take() {
                    cancel.cancel();
                }
                self.health_tx.send_replace(SessionHealth::Lost);
                SessionHealth::Lost
            }
            Err(e) => {
                // A transport failure is a miss, never an immediate loss.
                let mut inner = self.inner.lock().await;
                inner.misses += 1;
                let misses = inner.misses;

                if misses >= self.max_heartbeat_misses {
                    tracing::warn!(misses, error = %e, "heartbeat miss threshold reached");
                    inner.session = None;
                    inner.misses = 0;
                    if let Some(cancel) = inner.cancel.take() {
                        cancel.cancel();
                    }
                    self.health_tx.send_replace(SessionHealth::Lost);
                    SessionHealth::Lost
                } else {
                    tracing::debug!(misses, error = %e, "heartbeat missed, will retry");
                    let health = SessionHealth::Unconfirmed { misses };
                    self.health_tx.send_replace(health.clone());
                    health
                }
            }
        }
    }

    /// Release the session, best-effort.
    ///
    /// The heartbeat loop is cancelled first, then a single time-boxed
    /// release request is attempted. Local token state is cleared no matter
    /// what the server says: failing to release a token must never prevent
    /// the application from closing.
    pub async fn end_session(&self) {
        let token = {
            let mut inner = self.inner.lock().await;
            if let Some(cancel) = inner.cancel.take() {
                cancel.cancel();
            }
            inner.misses = 0;
            inner.session.take().map(|s| s.token)
        };
        self.health_tx.send_replace(SessionHealth::Inactive);

        let Some(token) = token else { return };

        match tokio::time::timeout(self.shutdown_grace, self.api.end_session(&token)).await {
            Ok(Ok(())) => tracing::debug!("session released"),
            Ok(Err(e)) => tracing::debug!(error = %e, "session release failed, abandoning token"),
            Err(_) => tracing::debug!("session release exceeded shutdown deadline, abandoning"),
        }
    }

    /// Ask the server to evict the other device's session.
    ///
    /// Explicitly operator-confirmed; on success the caller may retry
    /// [`start_session`](Self::start_session).
    pub async fn force_terminate(&self, license_id: &str) -> LicenseResult<bool> {
        let fingerprint = self.provider.capture();
        let request = SessionStartRequest {
            license_id: license_id.to_string(),
            hardware_fingerprint: fingerprint.primary,
            machine_name: fingerprint::machine_name(),
        };

        let response = self.api.force_terminate(&request).await?;
        tracing::info!(success = response.success, "force-terminate requested");
        Ok(response.success)
    }
}
