#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Lifecycle tests for the realtime channel against a local WebSocket server.
//!
//! Covers:
//! - Authenticate on connect, and re-presenting after a rejection
//! - Immediate reconnect after a server close, with a fresh authenticate
//! - Backoff after transport loss, and giving up after the retry budget
//! - Reusing the live channel instead of opening a second one
//! - Close semantics and the liveness check

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use taskflow::channel::{
    ChannelEvent, ConnectionManager, ConnectionState, DisconnectReason, OpenOutcome,
};
use taskflow::credentials::{Credential, CredentialSource, CredentialVault};
use taskflow::router::EventRouter;
use taskflow_proto::channel::AuthAck;

use support::{FakeChannelServer, WAIT, dead_channel_url, eventually, fast_channel};

// =============================================================================
// Helpers
// =============================================================================

fn manager_for(url: &str) -> (ConnectionManager, mpsc::Receiver<ChannelEvent>) {
    let manager = ConnectionManager::new(fast_channel(url), Arc::new(EventRouter::new()));
    let events = manager.take_events().unwrap();
    (manager, events)
}

/// Waits for the first event matching `pred`, skipping the rest.
async fn wait_event(
    events: &mut mpsc::Receiver<ChannelEvent>,
    pred: impl Fn(&ChannelEvent) -> bool,
) -> ChannelEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event queue closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for channel event")
}

async fn wait_state(manager: &ConnectionManager, pred: impl Fn(&ConnectionState) -> bool) {
    let mut rx = manager.subscribe_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for channel state")
        .expect("state sender dropped");
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn authenticates_right_after_connect() {
    let mut server = FakeChannelServer::start().await;
    let (manager, mut events) = manager_for(&server.url());

    let outcome = manager.open(Credential::new("abc"));
    assert!(matches!(outcome, OpenOutcome::Spawned(_)));

    let conn = &mut server.accept().await;
    assert_eq!(conn.next_auth().await, "abc");
    conn.ack(AuthAck::accepted("u1"));

    let event = wait_event(&mut events, |e| matches!(e, ChannelEvent::Authenticated { .. })).await;
    assert_eq!(
        event,
        ChannelEvent::Authenticated {
            user_id: Some("u1".to_string())
        }
    );
    wait_state(&manager, ConnectionState::is_authenticated).await;
    assert_eq!(manager.channel_id(), Some(outcome.channel_id()));
}

#[tokio::test]
async fn rejected_credential_is_presented_again_on_same_channel() {
    let mut server = FakeChannelServer::start().await;
    let (manager, mut events) = manager_for(&server.url());
    manager.open(Credential::new("abc"));

    let mut conn = server.accept().await;
    assert_eq!(conn.next_auth().await, "abc");
    conn.ack(AuthAck::rejected("token expired"));

    let event = wait_event(&mut events, |e| matches!(e, ChannelEvent::AuthRejected { .. })).await;
    assert_eq!(
        event,
        ChannelEvent::AuthRejected {
            reason: "token expired".to_string(),
            retry_in: Duration::from_millis(200),
        }
    );
    assert_eq!(manager.state(), ConnectionState::Connected);

    // Retried after the delay without reconnecting.
    assert_eq!(conn.next_auth().await, "abc");
    assert_eq!(server.accepted(), 1);

    conn.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;
}

#[tokio::test]
async fn open_while_connected_reauthenticates_without_new_channel() {
    let mut server = FakeChannelServer::start().await;
    let (manager, _events) = manager_for(&server.url());
    let first = manager.open(Credential::new("abc"));

    let mut conn = server.accept().await;
    assert_eq!(conn.next_auth().await, "abc");
    conn.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;

    let second = manager.open(Credential::new("def"));
    assert_eq!(second, OpenOutcome::Reauthenticated(first.channel_id()));
    assert_eq!(conn.next_auth().await, "def");
    assert!(server.no_connection_for(Duration::from_millis(300)).await);
    assert_eq!(server.accepted(), 1);
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn server_close_reconnects_immediately_and_reauthenticates() {
    let mut server = FakeChannelServer::start().await;
    let mut config = fast_channel(&server.url());
    // A long backoff would make any delayed reconnect miss the wait below.
    config.reconnect.initial_delay = Duration::from_secs(30);
    config.reconnect.max_delay = Duration::from_secs(30);
    let manager = ConnectionManager::new(config, Arc::new(EventRouter::new()));
    let mut events = manager.take_events().unwrap();
    manager.open(Credential::new("abc"));

    let mut first = server.accept().await;
    assert_eq!(first.next_auth().await, "abc");
    first.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;

    first.close();
    let event = wait_event(&mut events, |e| matches!(e, ChannelEvent::Disconnected { .. })).await;
    assert_eq!(
        event,
        ChannelEvent::Disconnected {
            reason: DisconnectReason::ServerClosed
        }
    );

    let mut second = server.accept().await;
    assert_eq!(second.next_auth().await, "abc");
    second.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;
}

#[tokio::test]
async fn repeated_close_before_authentication_backs_off_and_gives_up() {
    let mut server = FakeChannelServer::start().await;
    let mut config = fast_channel(&server.url());
    config.reconnect.max_attempts = 2;
    let manager = ConnectionManager::new(config, Arc::new(EventRouter::new()));
    let mut events = manager.take_events().unwrap();
    manager.open(Credential::new("abc"));

    // Every connection is hung up on before the ack.
    for _ in 0..4 {
        let mut conn = server.accept().await;
        assert_eq!(conn.next_auth().await, "abc");
        conn.close();
    }

    let mut retries = Vec::new();
    let exhausted = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await.unwrap() {
                ChannelEvent::Reconnecting { attempt, delay, .. } => retries.push((attempt, delay)),
                ChannelEvent::ReconnectsExhausted { attempts } => return attempts,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    // The first close reconnected at once; the rest went through backoff.
    assert_eq!(
        retries,
        vec![
            (1, Duration::from_millis(50)),
            (2, Duration::from_millis(100)),
        ]
    );
    assert_eq!(exhausted, 2);
    wait_state(&manager, |s| *s == ConnectionState::Disconnected).await;
    assert!(server.no_connection_for(Duration::from_millis(300)).await);
}

#[tokio::test]
async fn authenticated_session_resets_close_count() {
    let mut server = FakeChannelServer::start().await;
    let mut config = fast_channel(&server.url());
    config.reconnect.initial_delay = Duration::from_secs(30);
    config.reconnect.max_delay = Duration::from_secs(30);
    let manager = ConnectionManager::new(config, Arc::new(EventRouter::new()));
    manager.open(Credential::new("abc"));

    // Unauthenticated close, then an authenticated one: both reconnect at once.
    let mut first = server.accept().await;
    assert_eq!(first.next_auth().await, "abc");
    first.close();

    let mut second = server.accept().await;
    assert_eq!(second.next_auth().await, "abc");
    second.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;
    second.close();

    let mut third = server.accept().await;
    assert_eq!(third.next_auth().await, "abc");
    third.close();

    let mut fourth = server.accept().await;
    assert_eq!(fourth.next_auth().await, "abc");
    fourth.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;
}

#[tokio::test]
async fn transport_loss_backs_off_then_reconnects() {
    let mut server = FakeChannelServer::start().await;
    let (manager, mut events) = manager_for(&server.url());
    manager.open(Credential::new("abc"));

    let mut first = server.accept().await;
    first.next_auth().await;
    first.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;

    first.kill();
    let event = wait_event(&mut events, |e| matches!(e, ChannelEvent::Disconnected { .. })).await;
    assert!(matches!(
        event,
        ChannelEvent::Disconnected {
            reason: DisconnectReason::Transport(_)
        }
    ));
    let event = wait_event(&mut events, |e| matches!(e, ChannelEvent::Reconnecting { .. })).await;
    assert_eq!(
        event,
        ChannelEvent::Reconnecting {
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_millis(50),
        }
    );

    let mut second = server.accept().await;
    assert_eq!(second.next_auth().await, "abc");
}

#[tokio::test]
async fn gives_up_after_retry_budget() {
    let url = dead_channel_url().await;
    let mut config = fast_channel(&url);
    config.reconnect.max_attempts = 2;
    config.reconnect.initial_delay = Duration::from_millis(10);
    let manager = ConnectionManager::new(config, Arc::new(EventRouter::new()));
    let mut events = manager.take_events().unwrap();

    manager.open(Credential::new("abc"));

    let mut retries = Vec::new();
    let exhausted = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await.unwrap() {
                ChannelEvent::Reconnecting { attempt, delay, .. } => retries.push((attempt, delay)),
                ChannelEvent::ReconnectsExhausted { attempts } => return attempts,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(exhausted, 2);
    assert_eq!(
        retries,
        vec![
            (1, Duration::from_millis(10)),
            (2, Duration::from_millis(20)),
        ]
    );
    wait_state(&manager, |s| *s == ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn open_during_backoff_connects_now() {
    let mut server = FakeChannelServer::start().await;
    let mut config = fast_channel(&server.url());
    config.reconnect.initial_delay = Duration::from_secs(30);
    config.reconnect.max_delay = Duration::from_secs(30);
    let manager = ConnectionManager::new(config, Arc::new(EventRouter::new()));
    manager.open(Credential::new("abc"));

    let first = server.accept().await;
    wait_state(&manager, ConnectionState::is_connected).await;
    first.kill();
    wait_state(&manager, |s| matches!(s, ConnectionState::Backoff { .. })).await;

    let outcome = manager.open(Credential::new("fresh"));
    assert!(matches!(outcome, OpenOutcome::Nudged(_)));
    let mut second = server.accept().await;
    assert_eq!(second.next_auth().await, "fresh");
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn close_sends_close_frame_and_is_idempotent() {
    let mut server = FakeChannelServer::start().await;
    let (manager, mut events) = manager_for(&server.url());
    manager.open(Credential::new("abc"));

    let mut conn = server.accept().await;
    conn.next_auth().await;
    conn.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;

    manager.close();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.channel_id(), None);
    assert_eq!(conn.next().await, support::Inbound::Closed);
    let event = wait_event(&mut events, |e| matches!(e, ChannelEvent::Disconnected { .. })).await;
    assert_eq!(
        event,
        ChannelEvent::Disconnected {
            reason: DisconnectReason::ClientClosed
        }
    );

    manager.close();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(server.no_connection_for(Duration::from_millis(300)).await);
}

#[tokio::test]
async fn close_before_open_is_a_no_op() {
    let (manager, _events) = manager_for("ws://127.0.0.1:9/ws");
    manager.close();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.liveness_running());
}

#[tokio::test]
async fn events_can_be_taken_once() {
    let (manager, _events) = manager_for("ws://127.0.0.1:9/ws");
    assert!(manager.take_events().is_none());
}

// =============================================================================
// Liveness
// =============================================================================

fn vault_with(token: &str) -> Arc<CredentialVault> {
    let vault = Arc::new(CredentialVault::in_memory());
    vault.hold(Credential::new(token), None).unwrap();
    vault
}

#[tokio::test]
async fn liveness_opens_channel_when_none_is_up() {
    let mut server = FakeChannelServer::start().await;
    let (manager, _events) = manager_for(&server.url());
    let vault = vault_with("abc");

    manager.start_liveness(Arc::clone(&vault) as Arc<dyn CredentialSource>);
    assert!(manager.liveness_running());

    let mut conn = server.accept().await;
    assert_eq!(conn.next_auth().await, "abc");
    conn.ack(AuthAck::accepted("u1"));
    wait_state(&manager, ConnectionState::is_authenticated).await;

    // Connected: later ticks leave it alone.
    assert!(server.no_connection_for(Duration::from_millis(600)).await);
    assert_eq!(server.accepted(), 1);
    assert!(conn.quiet_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn liveness_does_not_duplicate_a_connect_in_flight() {
    // Accepts TCP but never answers the handshake, so the channel stays in
    // Connecting while the check ticks.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    let (manager, _events) = manager_for(&format!("ws://{addr}/ws"));
    let vault = vault_with("abc");
    let first = manager.open(Credential::new("abc"));
    manager.start_liveness(Arc::clone(&vault) as Arc<dyn CredentialSource>);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert!(matches!(manager.state(), ConnectionState::Connecting { .. }));
    assert_eq!(manager.channel_id(), Some(first.channel_id()));
}

#[tokio::test]
async fn liveness_reopens_after_retries_run_out() {
    let mut server = FakeChannelServer::start().await;
    let mut config = fast_channel(&server.url());
    config.reconnect.max_attempts = 0;
    let manager = ConnectionManager::new(config, Arc::new(EventRouter::new()));
    let mut events = manager.take_events().unwrap();
    let vault = vault_with("abc");
    manager.open(Credential::new("abc"));
    manager.start_liveness(Arc::clone(&vault) as Arc<dyn CredentialSource>);

    let first = server.accept().await;
    wait_state(&manager, ConnectionState::is_connected).await;
    first.kill();
    wait_event(&mut events, |e| matches!(e, ChannelEvent::ReconnectsExhausted { .. })).await;

    let mut second = server.accept().await;
    assert_eq!(second.next_auth().await, "abc");
}

#[tokio::test]
async fn liveness_stops_once_credential_is_gone() {
    let (manager, _events) = manager_for(&dead_channel_url().await);
    let vault = vault_with("abc");
    manager.start_liveness(Arc::clone(&vault) as Arc<dyn CredentialSource>);
    assert!(manager.liveness_running());

    vault.clear();
    assert!(eventually(|| !manager.liveness_running()).await);
}

#[tokio::test]
async fn close_stops_liveness() {
    let (manager, _events) = manager_for(&dead_channel_url().await);
    let vault = vault_with("abc");
    manager.start_liveness(Arc::clone(&vault) as Arc<dyn CredentialSource>);
    manager.close();
    assert!(!manager.liveness_running());
}
