//! Close classification, reconnection scheduling and generation guarding.

mod common;

use collab_link::{ConnectionOptions, ConnectionState, HandshakeError};
use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_normal_close_does_not_reconnect() {
    let h = harness();
    h.client.connect("p1").await.unwrap();

    h.server.last_socket().server_close(1000, "bye");
    settle().await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.server.attempt_count(), 1);
    let status = h.client.connection_status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!status.reconnect_scheduled);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(h.tokens.refresh_calls(), 0);
    assert_eq!(h.events.disconnects().last().and_then(|d| d.code), Some(1000));
}

#[tokio::test(start_paused = true)]
async fn test_going_away_does_not_reconnect() {
    let h = harness();
    h.client.connect("p1").await.unwrap();

    h.server.last_socket().server_close(1001, "going away");
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.server.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_refreshes_and_reconnects() {
    let h = harness();
    h.client.connect("p1").await.unwrap();

    h.server.last_socket().drop_connection();
    settle().await;
    assert_eq!(h.tokens.refresh_calls(), 1);
    let status = h.client.connection_status();
    assert!(status.reconnect_scheduled);
    assert_eq!(status.reconnect_attempts, 1);
    assert_eq!(h.events.disconnects().last().and_then(|d| d.code), Some(1006));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(h.server.attempt_count(), 2);
    assert!(h.client.is_connected());
    let socket = h.server.last_socket();
    assert_eq!(socket.subscribed_project().as_deref(), Some("p1"));
    assert_eq!(socket.token(), h.tokens.current());
    assert_eq!(h.client.connection_status().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_close_refreshes_and_reconnects() {
    let h = harness();
    h.client.connect("p1").await.unwrap();

    h.server.last_socket().server_close(4001, "Unauthorized");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(h.tokens.refresh_calls(), 1);
    assert_eq!(h.server.attempt_count(), 2);
    assert!(h.client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_policy_close_refreshes_unless_reason_is_forbidden() {
    let h = harness();
    h.client.connect("p1").await.unwrap();

    h.server.last_socket().server_close(1008, "token expired");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(h.tokens.refresh_calls(), 1);
    assert!(h.client.is_connected());

    h.server.last_socket().server_close(1008, "User is not a member of this project");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.tokens.refresh_calls(), 1);
    assert_eq!(*h.forbidden.lock().unwrap(), vec!["p1".to_string()]);
    assert_eq!(h.server.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_close_notifies_and_unbinds() {
    let h = harness();
    h.client.connect("p2").await.unwrap();

    h.server.last_socket().server_close(4003, "Forbidden");
    settle().await;

    assert_eq!(*h.forbidden.lock().unwrap(), vec!["p2".to_string()]);
    let status = h.client.connection_status();
    assert_eq!(status.project_id, None);
    assert!(!status.reconnect_scheduled);
    assert!(h.events.errors().iter().any(|e| !e.recoverable));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.server.attempt_count(), 1);
    assert_eq!(h.tokens.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cleared_forbidden_callback_is_not_invoked() {
    let h = harness();
    h.client.clear_on_forbidden_callback();
    h.client.connect("p2").await.unwrap();

    h.server.last_socket().server_close(4003, "Forbidden");
    settle().await;

    assert!(h.forbidden.lock().unwrap().is_empty());
    assert_eq!(h.client.connection_status().project_id, None);
}

#[tokio::test(start_paused = true)]
async fn test_other_close_codes_retry_without_refresh() {
    let h = harness();
    h.client.connect("p1").await.unwrap();

    h.server.last_socket().server_close(1011, "internal error");
    settle().await;
    assert!(h.client.connection_status().reconnect_scheduled);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(h.tokens.refresh_calls(), 0);
    assert_eq!(h.server.attempt_count(), 2);
    assert!(h.client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_timer_after_disconnect_is_inert() {
    let h = harness();
    h.client.connect("p1").await.unwrap();
    h.server.last_socket().server_close(1011, "restart");
    settle().await;
    assert!(h.client.connection_status().reconnect_scheduled);

    h.client.disconnect(None).await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.server.attempt_count(), 1);
    let status = h.client.connection_status();
    assert!(!status.reconnect_scheduled);
    assert_eq!(status.state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_timer_for_previous_project_is_inert() {
    let h = harness();
    h.client.connect("p1").await.unwrap();
    h.server.last_socket().server_close(1011, "restart");
    settle().await;

    h.client.connect("p2").await.unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.server.attempt_count(), 2);
    let open = h.server.open_sockets();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].subscribed_project().as_deref(), Some("p2"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_after_close_stops_reconnecting() {
    let h = harness();
    h.client.connect("p1").await.unwrap();
    h.tokens.set_refresh_ok(false);

    h.server.last_socket().drop_connection();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.tokens.refresh_calls(), 1);
    assert_eq!(h.server.attempt_count(), 1);
    let status = h.client.connection_status();
    assert!(status.auth_failure_detected);
    assert!(!status.reconnect_scheduled);

    h.tokens.set_refresh_ok(true);
    h.client.connect("p1").await.unwrap();
    assert!(h.client.is_connected());
    assert!(!h.client.connection_status().auth_failure_detected);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_refresh_retries_until_network_returns() {
    let h = harness();
    h.client.connect("p1").await.unwrap();
    h.tokens.set_offline(true);
    h.server.fail_all_handshakes(true);

    h.server.last_socket().drop_connection();
    settle().await;

    assert_eq!(h.tokens.refresh_calls(), 1);
    let status = h.client.connection_status();
    assert!(!status.auth_failure_detected);
    assert!(status.reconnect_scheduled);

    // First retry at 1s still hits the outage.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.server.attempt_count(), 2);
    assert!(!h.client.is_connected());

    h.tokens.set_offline(false);
    h.server.fail_all_handshakes(false);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.server.attempt_count(), 3);
    assert!(h.client.is_connected());
    assert_eq!(h.server.last_socket().subscribed_project().as_deref(), Some("p1"));
    let status = h.client.connection_status();
    assert!(!status.auth_failure_detected);
    assert_eq!(status.reconnect_attempts, 0);
    assert!(h.events.errors().iter().all(|e| e.recoverable));
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_survives_disconnect_until_connect() {
    let h = harness();
    h.client.connect("p1").await.unwrap();
    h.tokens.set_refresh_ok(false);

    h.server.last_socket().drop_connection();
    settle().await;
    assert!(h.client.connection_status().auth_failure_detected);

    h.client.disconnect(None).await;
    let status = h.client.connection_status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.project_id, None);
    assert!(status.auth_failure_detected);

    h.client.connect("p1").await.unwrap();
    assert!(h.client.is_connected());
    assert!(!h.client.connection_status().auth_failure_detected);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_sequence_and_attempt_cap() {
    let h = harness();
    h.server.fail_all_handshakes(true);

    assert!(h.client.connect("p1").await.is_err());
    tokio::time::sleep(Duration::from_secs(600)).await;

    // One explicit attempt plus ten reconnects.
    let times = h.server.attempt_times();
    assert_eq!(times.len(), 11);
    let gaps: Vec<u128> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    let expected = [1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000, 30000, 30000];
    for (gap, want) in gaps.iter().zip(expected.iter()) {
        assert!(gap.abs_diff(*want) <= 5, "gap {}ms, expected {}ms", gap, want);
    }

    let status = h.client.connection_status();
    assert!(status.reconnect_exhausted);
    assert!(!status.reconnect_scheduled);
    assert_eq!(status.reconnect_attempts, 10);
    let fatal: Vec<_> = h.events.errors().into_iter().filter(|e| !e.recoverable).collect();
    assert_eq!(fatal.len(), 1);
    assert!(fatal[0].message.contains("Max reconnection attempts"));

    // Only an explicit connect resumes.
    h.server.fail_all_handshakes(false);
    h.client.connect("p1").await.unwrap();
    let status = h.client.connection_status();
    assert!(!status.reconnect_exhausted);
    assert_eq!(status.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_backoff_options() {
    let h = harness_with(ScriptedTokenSource::valid(), |builder| {
        builder.connection_options(
            ConnectionOptions::new()
                .with_reconnect_delay_ms(200)
                .with_max_reconnect_delay_ms(500)
                .with_max_reconnect_attempts(3),
        )
    });
    h.server.fail_all_handshakes(true);

    let _ = h.client.connect("p1").await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    let times = h.server.attempt_times();
    assert_eq!(times.len(), 4);
    let gaps: Vec<u128> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    for (gap, want) in gaps.iter().zip([200u128, 400, 500].iter()) {
        assert!(gap.abs_diff(*want) <= 5, "gap {}ms, expected {}ms", gap, want);
    }
}

#[tokio::test(start_paused = true)]
async fn test_auto_reconnect_disabled() {
    let h = harness_with(ScriptedTokenSource::valid(), |builder| {
        builder.connection_options(ConnectionOptions::new().with_auto_reconnect(false))
    });
    h.client.connect("p1").await.unwrap();

    h.server.last_socket().drop_connection();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.server.attempt_count(), 1);
    assert!(!h.client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_hidden_application_defers_reconnect() {
    let visible = Arc::new(AtomicBool::new(true));
    let probe = Arc::clone(&visible);
    let h = harness_with(ScriptedTokenSource::valid(), move |builder| {
        builder.visibility(move || probe.load(Ordering::SeqCst))
    });
    h.client.connect("p1").await.unwrap();

    visible.store(false, Ordering::SeqCst);
    h.server.last_socket().drop_connection();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.server.attempt_count(), 1);
    let status = h.client.connection_status();
    assert!(status.reconnect_scheduled);
    assert_eq!(status.reconnect_attempts, 0);

    visible.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(7)).await;

    assert_eq!(h.server.attempt_count(), 2);
    assert!(h.client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_unauthorized_refreshes_then_retries() {
    let h = harness();
    h.server.reject_next(HandshakeError::Unauthorized("Unauthorized".to_string()));

    assert!(h.client.connect("p1").await.is_err());
    settle().await;
    assert_eq!(h.tokens.refresh_calls(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(h.server.attempt_count(), 2);
    assert!(h.client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_schedules_reconnect() {
    let h = harness();
    h.server.set_handshake_delay(Duration::from_secs(30));

    let result = h.client.connect("p1").await;
    assert!(matches!(result, Err(collab_link::CollabLinkError::TimeoutError(_))));
    assert!(h.client.connection_status().reconnect_scheduled);

    h.server.set_handshake_delay(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(h.server.attempt_count(), 2);
    assert!(h.client.is_connected());
}
