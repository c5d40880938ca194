//! Diagnostic tool for warden installations.
//!
//! Prints the captured hardware fingerprint, the cached license state, and
//! the effective configuration. Useful when triaging activation or
//! hardware-mismatch reports.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use warden::config::WardenConfig;
use warden::errors::LicenseResult;
use warden::fingerprint::FingerprintProvider;
use warden::store::LicenseStore;

#[tokio::main]
async fn main() -> LicenseResult<()> {
    let config = WardenConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    println!("warden doctor\n");
    println!("server url:        {}", config.server.base_url);
    println!("grace period:      {} days", config.license.grace_period_days);
    println!("match fraction:    {}", config.license.minimum_match_fraction);
    println!(
        "heartbeat:         every {}s, lost after {} misses",
        config.session.heartbeat_interval_secs, config.session.max_heartbeat_misses
    );

    let fingerprint = FingerprintProvider::new().capture();
    println!("\nhardware fingerprint ({} components):", fingerprint.components.len());
    for component in &fingerprint.components {
        println!("  {:?}: {}", component.kind, component.hash);
    }
    println!("  primary: {}", fingerprint.primary);

    let store = Arc::new(LicenseStore::open(&config.storage).await?);
    println!("\nstore directory:   {}", store.dir().display());

    match store.load_license().await {
        Ok(Some(signed)) => match signed.verify_and_decode() {
            Ok(license) => {
                println!("license:           {} ({})", license.license_id, license.tier);
                println!("  customer:        {}", license.customer_name);
                println!("  expires:         {}", license.expires_at);
                println!("  features:        {}", license.features.join(", "));
            }
            Err(e) => println!("license:           present but unverifiable ({e})"),
        },
        Ok(None) => println!("license:           none (unlicensed)"),
        Err(e) => println!("license:           unreadable ({e})"),
    }

    let state = store.cached_state().await?;
    println!("cached status:     {}", state.status);
    match state.last_online_check {
        Some(t) => println!("last online check: {t}"),
        None => println!("last online check: never"),
    }

    let revoked = store.all_revoked_ids().await?;
    if revoked.is_empty() {
        println!("local denylist:    empty");
    } else {
        println!("local denylist:    {}", revoked.join(", "));
    }

    Ok(())
}
