//! Session arbitration tests: single-seat enforcement, heartbeat loss
//! accounting, and fail-open shutdown, all against the in-process mock
//! server.

mod common;

use std::sync::Arc;

use warden::api::ApiClient;
use warden::config::{ServerConfig, SessionConfig};
use warden::fingerprint::FingerprintProvider;
use warden::session::{SessionArbitrator, SessionHealth, SessionStart};

use common::{spawn_mock_server, MockState};

fn build_arbitrator(base_url: &str) -> Arc<SessionArbitrator> {
    let server = ServerConfig {
        base_url: base_url.to_string(),
        request_timeout_secs: 5,
    };
    let session = SessionConfig {
        // Long interval so the background loop never races the test; the
        // tests drive `heartbeat()` directly.
        heartbeat_interval_secs: 3600,
        max_heartbeat_misses: 4,
        shutdown_grace_secs: 5,
    };

    let api = ApiClient::new(&server).unwrap();
    Arc::new(SessionArbitrator::new(&session, api, FingerprintProvider::new()))
}

#[tokio::test]
async fn starting_a_session_yields_a_token_and_confirmed_health() {
    let state = MockState::new();
    let url = spawn_mock_server(state).await;
    let arbitrator = build_arbitrator(&url);

    let start = arbitrator.start_session("lic-session-1").await.unwrap();
    let session = match start {
        SessionStart::Started(s) => s,
        SessionStart::Conflict(info) => panic!("unexpected conflict: {info:?}"),
    };

    assert!(!session.token.is_empty());
    assert_eq!(*arbitrator.health().borrow(), SessionHealth::Confirmed);
    assert!(arbitrator.session().await.is_some());
}

#[tokio::test]
async fn a_second_device_gets_a_conflict_with_takeover_details() {
    let state = MockState::new();
    state.seed_session("lic-contended", "LAB-PC-07");
    let url = spawn_mock_server(state).await;
    let arbitrator = build_arbitrator(&url);

    match arbitrator.start_session("lic-contended").await.unwrap() {
        SessionStart::Conflict(info) => {
            assert_eq!(info.active_device, "LAB-PC-07");
            assert!(info.can_force_terminate);
        }
        SessionStart::Started(s) => panic!("expected conflict, got session {s:?}"),
    }
    assert!(arbitrator.session().await.is_none());
}

#[tokio::test]
async fn force_terminate_evicts_the_other_device_and_a_retry_succeeds() {
    let state = MockState::new();
    state.seed_session("lic-takeover", "LAB-PC-07");
    let url = spawn_mock_server(state).await;
    let arbitrator = build_arbitrator(&url);

    assert!(matches!(
        arbitrator.start_session("lic-takeover").await.unwrap(),
        SessionStart::Conflict(_)
    ));

    assert!(arbitrator.force_terminate("lic-takeover").await.unwrap());

    match arbitrator.start_session("lic-takeover").await.unwrap() {
        SessionStart::Started(session) => assert!(!session.token.is_empty()),
        SessionStart::Conflict(info) => panic!("still conflicted: {info:?}"),
    }
}

#[tokio::test]
async fn heartbeat_misses_accumulate_before_the_session_is_lost() {
    let state = MockState::new();
    let url = spawn_mock_server(state.clone()).await;
    let arbitrator = build_arbitrator(&url);

    arbitrator.start_session("lic-flaky-net").await.unwrap();
    state.lock().fail_heartbeats = true;

    // Three misses: degraded but still locally active.
    for expected in 1..=3u32 {
        assert_eq!(
            arbitrator.heartbeat().await,
            SessionHealth::Unconfirmed { misses: expected }
        );
        assert!(arbitrator.session().await.is_some());
    }

    // The fourth consecutive miss crosses the threshold.
    assert_eq!(arbitrator.heartbeat().await, SessionHealth::Lost);
    assert!(arbitrator.session().await.is_none());
    assert_eq!(*arbitrator.health().borrow(), SessionHealth::Lost);
}

#[tokio::test]
async fn a_successful_heartbeat_resets_the_miss_counter() {
    let state = MockState::new();
    let url = spawn_mock_server(state.clone()).await;
    let arbitrator = build_arbitrator(&url);

    arbitrator.start_session("lic-recovering").await.unwrap();

    state.lock().fail_heartbeats = true;
    assert_eq!(
        arbitrator.heartbeat().await,
        SessionHealth::Unconfirmed { misses: 1 }
    );

    state.lock().fail_heartbeats = false;
    assert_eq!(arbitrator.heartbeat().await, SessionHealth::Confirmed);

    // The counter restarted from zero after the acknowledged beat.
    state.lock().fail_heartbeats = true;
    assert_eq!(
        arbitrator.heartbeat().await,
        SessionHealth::Unconfirmed { misses: 1 }
    );
}

#[tokio::test]
async fn a_server_invalidated_token_is_an_immediate_loss() {
    let state = MockState::new();
    let url = spawn_mock_server(state.clone()).await;
    let arbitrator = build_arbitrator(&url);

    arbitrator.start_session("lic-evicted").await.unwrap();
    state.lock().invalidate_heartbeats = true;

    assert_eq!(arbitrator.heartbeat().await, SessionHealth::Lost);
    assert!(arbitrator.session().await.is_none());
}

#[tokio::test]
async fn heartbeat_without_a_session_reports_inactive() {
    let url = spawn_mock_server(MockState::new()).await;
    let arbitrator = build_arbitrator(&url);

    assert_eq!(arbitrator.heartbeat().await, SessionHealth::Inactive);
}

#[tokio::test]
async fn end_session_releases_the_server_side_seat() {
    let state = MockState::new();
    let url = spawn_mock_server(state.clone()).await;
    let arbitrator = build_arbitrator(&url);

    arbitrator.start_session("lic-clean-exit").await.unwrap();
    arbitrator.end_session().await;

    assert!(arbitrator.session().await.is_none());
    assert_eq!(*arbitrator.health().borrow(), SessionHealth::Inactive);
    assert!(state.lock().sessions.is_empty());
}

#[tokio::test]
async fn end_session_clears_local_state_even_when_the_server_errors() {
    let state = MockState::new();
    let url = spawn_mock_server(state.clone()).await;
    let arbitrator = build_arbitrator(&url);

    arbitrator.start_session("lic-dirty-exit").await.unwrap();
    state.lock().fail_session_end = true;

    // Must not error or hang: releasing the seat is best-effort.
    arbitrator.end_session().await;

    assert!(arbitrator.session().await.is_none());
    assert_eq!(*arbitrator.health().borrow(), SessionHealth::Inactive);
}
