//! Wire contract with the license server.
//!
//! All endpoints are plain JSON over HTTPS with bounded timeouts. Transport
//! failures and 5xx responses map to retryable [`LicenseError`] variants;
//! they never deny access by themselves (the engine falls back to offline
//! evaluation instead). The session-start 409 conflict is a *value*, not an
//! error, because it requires a user decision.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::fingerprint::FingerprintSet;
use crate::license::SignedLicense;
use crate::revocation::RevocationEntry;

/// Authoritative license status as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Valid,
    Expired,
    Revoked,
    HardwareMismatch,
    /// Forward compatibility: an unrecognized status is treated as a
    /// protocol-level surprise by the engine, never as a grant.
    #[serde(other)]
    Unknown,
}

// === Request/response bodies (field names fixed by the wire contract) ===

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub license_key: String,
    pub email: String,
    pub hardware_fingerprints: Vec<FingerprintSet>,
    pub machine_name: String,
    pub app_version: String,
    pub os_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateResponse {
    pub success: bool,
    pub message: String,
    pub signed_license: Option<SignedLicense>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub license_id: String,
    pub hardware_fingerprints: Vec<FingerprintSet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub is_valid: bool,
    pub status: ServerStatus,
    pub message: Option<String>,
    pub server_time: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_license: Option<SignedLicense>,
    /// Revocation data riding along on the response, absorbed into the
    /// local denylist by the engine.
    #[serde(default)]
    pub revoked: Vec<RevocationEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevocationStatus {
    pub is_revoked: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartRequest {
    pub license_id: String,
    pub hardware_fingerprint: String,
    pub machine_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartResponse {
    pub success: bool,
    pub session_token: String,
    pub message: Option<String>,
}

/// Details of the other device holding the active session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub active_device: String,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    pub can_force_terminate: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionConflictBody {
    #[allow(dead_code)]
    message: Option<String>,
    conflict_info: ConflictInfo,
}

/// Outcome of a session-start round trip.
#[derive(Debug)]
pub enum SessionStartReply {
    Started(SessionStartResponse),
    Conflict(ConflictInfo),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub session_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub success: bool,
    pub is_valid: bool,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub server_time: Option<chrono::DateTime<chrono::Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionEndRequest {
    session_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceTerminateResponse {
    pub success: bool,
}

/// HTTP client over the license server's endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ServerConfig) -> LicenseResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LicenseError::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a body and decode the response, mapping 5xx to `ServerError` and
    /// any other unexpected status to `Protocol`.
    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> LicenseResult<Resp> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        let status = resp.status();

        if status.is_server_error() {
            return Err(LicenseError::ServerError(format!("{path} returned {status}")));
        }
        if !status.is_success() {
            return Err(LicenseError::Protocol(format!("{path} returned {status}")));
        }

        resp.json::<Resp>()
            .await
            .map_err(|e| LicenseError::Protocol(format!("{path} body: {e}")))
    }

    /// `POST /api/license/activate`
    pub async fn activate(&self, req: &ActivateRequest) -> LicenseResult<ActivateResponse> {
        self.post_json("/api/license/activate", req).await
    }

    /// `POST /api/license/validate`
    pub async fn validate(&self, req: &ValidateRequest) -> LicenseResult<ValidateResponse> {
        self.post_json("/api/license/validate", req).await
    }

    /// `GET /api/license/revoked/{licenseId}`
    pub async fn revocation_status(&self, license_id: &str) -> LicenseResult<RevocationStatus> {
        let path = format!("/api/license/revoked/{license_id}");
        let resp = self.http.get(self.url(&path)).send().await?;
        let status = resp.status();

        if status.is_server_error() {
            return Err(LicenseError::ServerError(format!("{path} returned {status}")));
        }
        if !status.is_success() {
            return Err(LicenseError::Protocol(format!("{path} returned {status}")));
        }

        resp.json::<RevocationStatus>()
            .await
            .map_err(|e| LicenseError::Protocol(format!("{path} body: {e}")))
    }

    /// `POST /api/license/session/start`
    ///
    /// A 409 with conflict details is the conflict branch, not an error.
    pub async fn start_session(
        &self,
        req: &SessionStartRequest,
    ) -> LicenseResult<SessionStartReply> {
        let path = "/api/license/session/start";
        let resp = self.http.post(self.url(path)).json(req).send().await?;
        let status = resp.status();

        if status == StatusCode::CONFLICT {
            let body: SessionConflictBody = resp
                .json()
                .await
                .map_err(|e| LicenseError::Protocol(format!("{path} conflict body: {e}")))?;
            return Ok(SessionStartReply::Conflict(body.conflict_info));
        }
        if status.is_server_error() {
            return Err(LicenseError::ServerError(format!("{path} returned {status}")));
        }
        if !status.is_success() {
            return Err(LicenseError::Protocol(format!("{path} returned {status}")));
        }

        let body: SessionStartResponse = resp
            .json()
            .await
            .map_err(|e| LicenseError::Protocol(format!("{path} body: {e}")))?;
        Ok(SessionStartReply::Started(body))
    }

    /// `POST /api/license/session/heartbeat`
    pub async fn heartbeat(&self, session_token: &str) -> LicenseResult<HeartbeatResponse> {
        self.post_json(
            "/api/license/session/heartbeat",
            &HeartbeatRequest {
                session_token: session_token.to_string(),
            },
        )
        .await
    }

    /// `POST /api/license/session/end` — best-effort, response body ignored.
    pub async fn end_session(&self, session_token: &str) -> LicenseResult<()> {
        let resp = self
            .http
            .post(self.url("/api/license/session/end"))
            .json(&SessionEndRequest {
                session_token: session_token.to_string(),
            })
            .send()
            .await?;

        if resp.status().is_server_error() {
            return Err(LicenseError::ServerError(format!(
                "session end returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// `POST /api/license/session/force-terminate`
    pub async fn force_terminate(
        &self,
        req: &SessionStartRequest,
    ) -> LicenseResult<ForceTerminateResponse> {
        self.post_json("/api/license/session/force-terminate", req)
            .await
    }
}
