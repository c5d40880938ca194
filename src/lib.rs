//! warden - hardware-bound license validation and session enforcement.
//!
//! The engine gates use of a host application: activation binds a license to
//! this machine's hardware fingerprint, periodic checks decide validity
//! online or offline (with a grace window anchored to the last successful
//! server contact), a locally cached revocation denylist always wins, and a
//! heartbeat-backed session keeps the license on one active device at a
//! time.
//!
//! # Wiring
//!
//! Construct the services once at startup and inject them; there is no
//! implicit global state:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warden::api::ApiClient;
//! use warden::config::WardenConfig;
//! use warden::fingerprint::FingerprintProvider;
//! use warden::revocation::RevocationGuard;
//! use warden::session::SessionArbitrator;
//! use warden::store::LicenseStore;
//! use warden::validation::ValidationEngine;
//!
//! # async fn wire() -> warden::errors::LicenseResult<()> {
//! let config = WardenConfig::load()?;
//! let store = Arc::new(LicenseStore::open(&config.storage).await?);
//! let api = ApiClient::new(&config.server)?;
//! let guard = RevocationGuard::new(Arc::clone(&store));
//! let provider = FingerprintProvider::new();
//!
//! let engine = ValidationEngine::new(
//!     &config,
//!     Arc::clone(&store),
//!     guard,
//!     provider.clone(),
//!     api.clone(),
//! )?;
//! let arbitrator = Arc::new(SessionArbitrator::new(&config.session, api, provider));
//!
//! let status = engine.check_status().await?;
//! if status.is_usable() {
//!     arbitrator.start_session("LIC-0001").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod encryption;
pub mod errors;
pub mod fingerprint;
pub mod license;
pub mod revocation;
pub mod session;
pub mod store;
pub mod validation;

pub use errors::{LicenseError, LicenseResult};
pub use license::{License, LicenseStatus, SignedLicense};
