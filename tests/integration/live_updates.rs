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

//! Push events travelling from the channel through the router into the store.
//!
//! A signed-in session is connected to a fake channel server; the server
//! pushes frames and the tests watch the store.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use taskflow::credentials::Credential;
use taskflow::router::{DropReason, EventKind, EventRouter, RouteOutcome};
use taskflow::session::Session;
use taskflow::store::AppState;
use taskflow_proto::channel::{AuthAck, ServerEvent};
use taskflow_proto::notification::NotificationId;
use taskflow_proto::task::{TaskId, TaskStatus};

use support::{
    FakeChannelServer, FakeConnection, WAIT, dead_api_url, eventually, fast_config,
    notification_json, task, task_json,
};

// =============================================================================
// Helpers
// =============================================================================

/// A session connected and authenticated against `server`.
async fn connected_session(server: &mut FakeChannelServer) -> (Session, FakeConnection) {
    let config = fast_config(&dead_api_url().await, &server.url());
    let session = Session::in_memory(&config).unwrap();
    session.vault().hold(Credential::new("abc"), None).unwrap();
    session.connect().unwrap();

    let mut conn = server.accept().await;
    assert_eq!(conn.next_auth().await, "abc");
    conn.ack(AuthAck::accepted("u1"));
    let mut state = session.channel().subscribe_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| s.is_authenticated()))
        .await
        .unwrap()
        .unwrap();
    (session, conn)
}

async fn wait_store(session: &Session, pred: impl Fn(&AppState) -> bool) {
    let mut rx = session.store().subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for store")
        .unwrap();
}

// =============================================================================
// Task updates
// =============================================================================

#[tokio::test]
async fn task_updates_apply_in_arrival_order() {
    let mut server = FakeChannelServer::start().await;
    let (session, conn) = connected_session(&mut server).await;
    session
        .store()
        .update(|s| {
            s.tasks.all.push(task("t1", "Draft", "todo"));
            s.tasks.assigned.push(task("t1", "Draft", "todo"));
            true
        });

    conn.push(&ServerEvent::TaskUpdate(task_json("t1", "Draft", "in-progress")));
    conn.push(&ServerEvent::TaskUpdate(task_json("t1", "Final", "completed")));

    let id = TaskId::new("t1");
    wait_store(&session, |s| {
        s.task(&id).is_some_and(|t| t.status == TaskStatus::Completed)
    })
    .await;

    let state = session.store().snapshot();
    assert_eq!(state.tasks.all.len(), 1);
    assert_eq!(state.tasks.all[0].title, "Final");
    assert_eq!(state.tasks.assigned[0].status, TaskStatus::Completed);
}

#[tokio::test]
async fn unknown_task_is_appended_to_full_list() {
    let mut server = FakeChannelServer::start().await;
    let (session, conn) = connected_session(&mut server).await;

    conn.push(&ServerEvent::TaskUpdate(task_json("t9", "New", "todo")));

    let id = TaskId::new("t9");
    wait_store(&session, |s| s.task(&id).is_some()).await;
    let state = session.store().snapshot();
    assert_eq!(state.tasks.all.len(), 1);
    assert!(state.tasks.created.is_empty());
}

#[tokio::test]
async fn pushed_task_collaborators_are_deduplicated() {
    let mut server = FakeChannelServer::start().await;
    let (session, conn) = connected_session(&mut server).await;

    let mut payload = task_json("t1", "Shared", "todo");
    payload["collaborators"] = json!([
        {"_id": "u2", "username": "bo", "email": "bo@example.com"},
        {"_id": "u2", "username": "bo", "email": "bo@example.com"},
        {"_id": "u3", "username": "cy", "email": "cy@example.com"},
    ]);
    conn.push(&ServerEvent::TaskUpdate(payload));

    let id = TaskId::new("t1");
    wait_store(&session, |s| s.task(&id).is_some()).await;
    let ids: Vec<String> = session.store().read(|s| {
        s.task(&id)
            .unwrap()
            .collaborators
            .iter()
            .map(|c| c.id.clone())
            .collect()
    });
    assert_eq!(ids, ["u2", "u3"]);
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn duplicate_notification_counts_once() {
    let mut server = FakeChannelServer::start().await;
    let (session, conn) = connected_session(&mut server).await;

    conn.push(&ServerEvent::Notification(notification_json("n1", false)));
    conn.push(&ServerEvent::Notification(notification_json("n1", false)));
    conn.push(&ServerEvent::Notification(notification_json("n2", false)));

    wait_store(&session, |s| s.notifications.len() == 2).await;
    // Frames are handled in order, so once n2 is in, both n1 copies were seen.
    let state = session.store().snapshot();
    assert_eq!(state.unread_count(), 2);
    assert_eq!(session.store().unread_count(), 2);
    assert_eq!(state.notifications[0].id, NotificationId::new("n2"));
}

#[tokio::test]
async fn pushed_unread_does_not_undo_a_local_read() {
    let mut server = FakeChannelServer::start().await;
    let (session, conn) = connected_session(&mut server).await;
    session
        .store()
        .apply_notification(support::notification("n1", true));

    conn.push(&ServerEvent::Notification(notification_json("n1", false)));
    conn.push(&ServerEvent::Notification(notification_json("n2", false)));

    wait_store(&session, |s| s.notifications.len() == 2).await;
    let state = session.store().snapshot();
    assert!(state.notification(&NotificationId::new("n1")).unwrap().read);
    assert_eq!(state.unread_count(), 1);
}

#[tokio::test]
async fn malformed_events_are_dropped_and_channel_stays_up() {
    let mut server = FakeChannelServer::start().await;
    let (session, conn) = connected_session(&mut server).await;

    conn.push(&ServerEvent::Notification(json!({"message": "no id"})));
    conn.push(&ServerEvent::Notification(json!({"_id": "", "message": "empty id"})));
    conn.push(&ServerEvent::TaskUpdate(json!({"_id": 42})));
    conn.push_raw("not json at all");
    conn.push(&ServerEvent::Other {
        event: "typing".to_string(),
        data: json!({"_id": "x"}),
    });
    conn.push(&ServerEvent::Notification(notification_json("n1", false)));

    wait_store(&session, |s| !s.notifications.is_empty()).await;
    let state = session.store().snapshot();
    assert_eq!(state.notifications.len(), 1);
    assert_eq!(state.notifications[0].id, NotificationId::new("n1"));
    assert!(state.tasks.all.is_empty());
    assert!(session.channel().is_connected());
    assert_eq!(server.accepted(), 1);
}

// =============================================================================
// Handler registration
// =============================================================================

#[tokio::test]
async fn reconnect_does_not_duplicate_delivery() {
    let mut server = FakeChannelServer::start().await;
    let (session, first) = connected_session(&mut server).await;

    // A second connect re-registers the handlers; they must replace, not
    // stack.
    session.connect().unwrap();
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);
    let reconciler = session.reconciler().clone();
    session.router().on_notification(move |n| {
        counter.fetch_add(1, Ordering::SeqCst);
        reconciler.apply_notification(n);
    });

    first.close();
    let mut second = server.accept().await;
    second.next_auth().await;
    second.ack(AuthAck::accepted("u1"));

    second.push(&ServerEvent::Notification(notification_json("n1", false)));
    wait_store(&session, |s| s.notifications.len() == 1).await;
    assert!(eventually(|| delivered.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert_eq!(session.store().unread_count(), 1);
}

#[test]
fn router_reports_what_it_did() {
    let router = EventRouter::new();
    assert_eq!(
        router.route(ServerEvent::Notification(notification_json("n1", false))),
        RouteOutcome::NoHandler(EventKind::Notification)
    );

    router.on_notification(|_| {});
    assert_eq!(
        router.route(ServerEvent::Notification(notification_json("n1", false))),
        RouteOutcome::Delivered(EventKind::Notification)
    );
    assert_eq!(
        router.route(ServerEvent::Notification(json!({"_id": ""}))),
        RouteOutcome::Dropped {
            kind: EventKind::Notification,
            reason: DropReason::MissingId,
        }
    );
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn sign_out_closes_channel_and_clears_state() {
    let mut server = FakeChannelServer::start().await;
    let (session, mut conn) = connected_session(&mut server).await;
    conn.push(&ServerEvent::Notification(notification_json("n1", false)));
    wait_store(&session, |s| s.notifications.len() == 1).await;

    // The logout request fails (no REST backend); sign-out goes ahead.
    session.sign_out().await;

    assert_eq!(conn.next().await, support::Inbound::Closed);
    assert!(!session.vault().is_signed_in());
    assert!(!session.channel().is_connected());
    assert!(!session.channel().liveness_running());
    assert_eq!(session.store().snapshot(), AppState::default());
    assert!(server.no_connection_for(Duration::from_millis(500)).await);
}

#[tokio::test]
async fn clearing_the_credential_elsewhere_closes_channel() {
    let mut server = FakeChannelServer::start().await;
    let (session, mut conn) = connected_session(&mut server).await;

    session.vault().clear();

    assert_eq!(conn.next().await, support::Inbound::Closed);
    assert!(eventually(|| !session.channel().is_connected()).await);
    assert!(server.no_connection_for(Duration::from_millis(500)).await);
}
