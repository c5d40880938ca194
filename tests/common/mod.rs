//! Shared test support: a throwaway Ed25519 signer and an in-process mock
//! license server exercising the real wire contract.

// Each integration test binary compiles this module separately and uses a
// different subset of it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde_json::{json, Value};
use uuid::Uuid;

use warden::fingerprint::FingerprintSet;
use warden::license::License;
use warden::SignedLicense;

// === Signing ===

pub struct TestSigner {
    key_pair: Ed25519KeyPair,
}

impl TestSigner {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).expect("key generation");
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).expect("key parsing");
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

pub fn sample_license(
    license_id: &str,
    expires_in_days: i64,
    fingerprints: Vec<FingerprintSet>,
) -> License {
    License {
        license_id: license_id.to_string(),
        license_code: "AB12-CD34-EF56-GH78".to_string(),
        customer_name: "Acme Labs".to_string(),
        customer_email: "ops@acme.example".to_string(),
        issued_at: Utc::now() - Duration::days(90),
        expires_at: Utc::now() + Duration::days(expires_in_days),
        tier: "enterprise".to_string(),
        features: vec![
            "Tier:Enterprise".to_string(),
            "Module:Equipment".to_string(),
            "Module:Calibration".to_string(),
        ],
        fingerprints,
    }
}

// === Mock license server ===

#[derive(Debug)]
pub struct SessionRecord {
    pub token: String,
    pub device: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MockInner {
    /// Status string returned by /validate.
    pub validate_status: String,
    /// Revocation entries pushed along with /validate responses.
    pub push_revoked: Vec<(String, String)>,
    /// Signed license returned by /activate (None means refusal).
    pub activate_license: Option<SignedLicense>,
    /// Updated license attached to /validate responses.
    pub updated_license: Option<SignedLicense>,
    /// When set, /validate answers 500 (other routes stay reachable).
    pub fail_validate: bool,
    /// Active sessions keyed by license ID.
    pub sessions: HashMap<String, SessionRecord>,
    /// When set, /heartbeat answers 500 (simulated outage).
    pub fail_heartbeats: bool,
    /// When set, /heartbeat reports the token as invalidated.
    pub invalidate_heartbeats: bool,
    /// When set, /session/end answers 500.
    pub fail_session_end: bool,
}

#[derive(Clone, Default)]
pub struct MockState(pub Arc<Mutex<MockInner>>);

impl MockState {
    pub fn new() -> Self {
        let state = Self::default();
        state.0.lock().unwrap().validate_status = "Valid".to_string();
        state
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.0.lock().unwrap()
    }

    /// Pre-seed an active session held by another simulated device.
    pub fn seed_session(&self, license_id: &str, device: &str) {
        self.lock().sessions.insert(
            license_id.to_string(),
            SessionRecord {
                token: Uuid::new_v4().to_string(),
                device: device.to_string(),
                last_seen: Utc::now(),
            },
        );
    }
}

/// Spin up the mock server on a random port and return its base URL.
pub async fn spawn_mock_server(state: MockState) -> String {
    let router = Router::new()
        .route("/api/license/activate", post(activate))
        .route("/api/license/validate", post(validate))
        .route("/api/license/revoked/:license_id", get(revocation_status))
        .route("/api/license/session/start", post(session_start))
        .route("/api/license/session/heartbeat", post(heartbeat))
        .route("/api/license/session/end", post(session_end))
        .route("/api/license/session/force-terminate", post(force_terminate))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server");
    });

    format!("http://{addr}")
}

async fn activate(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    assert!(body.get("licenseKey").is_some(), "activate body missing licenseKey");
    assert!(body.get("hardwareFingerprints").is_some());
    assert!(body.get("machineName").is_some());

    let license = state.lock().activate_license.clone();
    match license {
        Some(signed) => Json(json!({
            "success": true,
            "message": "activated",
            "signedLicense": signed,
        })),
        None => Json(json!({
            "success": false,
            "message": "unknown activation code",
            "signedLicense": null,
        })),
    }
}

async fn validate(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    assert!(body.get("licenseId").is_some(), "validate body missing licenseId");

    let inner = state.lock();
    if inner.fail_validate {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
    }

    let revoked: Vec<Value> = inner
        .push_revoked
        .iter()
        .map(|(id, reason)| {
            json!({
                "licenseId": id,
                "reason": reason,
                "revokedAt": Utc::now(),
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "isValid": inner.validate_status == "Valid",
            "status": inner.validate_status,
            "message": null,
            "serverTime": Utc::now(),
            "updatedLicense": inner.updated_license,
            "revoked": revoked,
        })),
    )
}

async fn revocation_status(
    State(state): State<MockState>,
    Path(license_id): Path<String>,
) -> Json<Value> {
    let inner = state.lock();
    let hit = inner.push_revoked.iter().find(|(id, _)| *id == license_id);
    Json(json!({
        "isRevoked": hit.is_some(),
        "reason": hit.map(|(_, reason)| reason.clone()),
    }))
}

async fn session_start(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let license_id = body["licenseId"].as_str().unwrap_or_default().to_string();
    let machine_name = body["machineName"].as_str().unwrap_or_default().to_string();

    let mut inner = state.lock();
    if let Some(existing) = inner.sessions.get(&license_id) {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "message": "license already in use",
                "conflictInfo": {
                    "activeDevice": existing.device,
                    "lastSeen": existing.last_seen,
                    "canForceTerminate": true,
                },
            })),
        );
    }

    let token = Uuid::new_v4().to_string();
    inner.sessions.insert(
        license_id,
        SessionRecord {
            token: token.clone(),
            device: machine_name,
            last_seen: Utc::now(),
        },
    );

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "sessionToken": token,
            "message": "session started",
        })),
    )
}

async fn heartbeat(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let token = body["sessionToken"].as_str().unwrap_or_default();

    let mut inner = state.lock();
    if inner.fail_heartbeats {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
    }
    if inner.invalidate_heartbeats {
        return (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "isValid": false,
                "expiresAt": null,
                "serverTime": Utc::now(),
                "message": "session terminated by another device",
            })),
        );
    }

    let known = inner.sessions.values_mut().find(|s| s.token == token);
    match known {
        Some(record) => {
            record.last_seen = Utc::now();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "isValid": true,
                    "expiresAt": Utc::now() + Duration::minutes(5),
                    "serverTime": Utc::now(),
                    "message": null,
                })),
            )
        }
        None => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "isValid": false,
                "expiresAt": null,
                "serverTime": Utc::now(),
                "message": "unknown session token",
            })),
        ),
    }
}

async fn session_end(
    State(state): State<MockState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let token = body["sessionToken"].as_str().unwrap_or_default().to_string();

    let mut inner = state.lock();
    if inner.fail_session_end {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
    }
    inner.sessions.retain(|_, s| s.token != token);
    (StatusCode::OK, Json(json!({ "success": true })))
}

async fn force_terminate(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    let license_id = body["licenseId"].as_str().unwrap_or_default();

    state.lock().sessions.remove(license_id);
    Json(json!({ "success": true }))
}
