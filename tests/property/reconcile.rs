//! Property tests for the state merge functions.
//!
//! Uses proptest to verify, for arbitrary sequences of pushes and local
//! read actions:
//! 1. Notification ids stay unique and the unread count matches the list.
//! 2. Applying the same record twice changes nothing the second time.
//! 3. A read flag never goes back to unread through a push.
//! 4. After a task update every cached copy equals the pushed record.
//! 5. Reverting a mark-all restores exactly the flags it flipped.

use std::collections::HashSet;

use proptest::prelude::*;
use taskflow::store::{AppState, reconcile};
use taskflow_proto::notification::{Notification, NotificationId, NotificationKind};
use taskflow_proto::task::{Collaborator, Priority, Task, TaskId, TaskStatus};

// --- Strategies ---

fn arb_notification() -> impl Strategy<Value = Notification> {
    (0u8..6, any::<bool>(), 0u8..3).prop_map(|(id, read, text)| Notification {
        id: NotificationId::new(format!("n{id}")),
        user_id: "u1".to_string(),
        message: format!("message {text}"),
        kind: NotificationKind::TaskUpdated,
        read,
        related_task_id: None,
        created_at: None,
    })
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Todo),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Completed),
    ]
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        0u8..4,
        "[a-z]{1,8}",
        arb_status(),
        prop::collection::vec(0u8..4, 0..6),
    )
        .prop_map(|(id, title, status, collaborators)| Task {
            id: TaskId::new(format!("t{id}")),
            title,
            description: String::new(),
            status,
            priority: Priority::Medium,
            due_date: None,
            created_by: "u1".to_string(),
            assigned_to: None,
            collaborators: collaborators
                .into_iter()
                .map(|c| Collaborator {
                    id: format!("u{c}"),
                    username: format!("user{c}"),
                    email: format!("user{c}@example.com"),
                })
                .collect(),
            created_at: None,
            updated_at: None,
        })
}

#[derive(Debug, Clone)]
enum Op {
    Push(Notification),
    MarkRead(u8),
    MarkAll,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => arb_notification().prop_map(Op::Push),
        2 => (0u8..6).prop_map(Op::MarkRead),
        1 => Just(Op::MarkAll),
    ]
}

fn run(ops: &[Op]) -> Vec<Notification> {
    let mut list = Vec::new();
    for op in ops {
        match op {
            Op::Push(n) => {
                reconcile::apply_notification(&mut list, n.clone());
            }
            Op::MarkRead(id) => {
                reconcile::mark_read(&mut list, &NotificationId::new(format!("n{id}")));
            }
            Op::MarkAll => {
                reconcile::mark_all_read(&mut list);
            }
        }
    }
    list
}

// --- Properties ---

proptest! {
    #[test]
    fn ids_unique_and_count_matches(ops in prop::collection::vec(arb_op(), 0..40)) {
        let state = AppState {
            notifications: run(&ops),
            ..AppState::default()
        };
        let ids: HashSet<_> = state.notifications.iter().map(|n| n.id.clone()).collect();
        prop_assert_eq!(ids.len(), state.notifications.len());
        let unread = state.notifications.iter().filter(|n| !n.read).count();
        prop_assert_eq!(state.unread_count(), unread);
    }

    #[test]
    fn notification_push_is_idempotent(
        ops in prop::collection::vec(arb_op(), 0..20),
        n in arb_notification(),
    ) {
        let mut list = run(&ops);
        reconcile::apply_notification(&mut list, n.clone());
        let once = list.clone();
        prop_assert!(!reconcile::apply_notification(&mut list, n));
        prop_assert_eq!(list, once);
    }

    #[test]
    fn read_flag_survives_pushes(
        ops in prop::collection::vec(arb_op(), 0..20),
        pushes in prop::collection::vec(arb_notification(), 0..20),
    ) {
        let mut list = run(&ops);
        let read_before: HashSet<_> = list.iter().filter(|n| n.read).map(|n| n.id.clone()).collect();
        for n in pushes {
            reconcile::apply_notification(&mut list, n);
        }
        for id in &read_before {
            prop_assert!(
                list.iter().any(|n| &n.id == id && n.read),
                "{} went back to unread",
                id
            );
        }
    }

    #[test]
    fn mark_all_then_revert_restores_flags(ops in prop::collection::vec(arb_op(), 0..30)) {
        let mut list = run(&ops);
        let before = list.clone();
        let flipped = reconcile::mark_all_read(&mut list);
        prop_assert!(list.iter().all(|n| n.read));
        prop_assert_eq!(flipped.len(), before.iter().filter(|n| !n.read).count());
        let mut pending: HashSet<_> = flipped.iter().cloned().collect();
        reconcile::revert_read(&mut list, &mut pending, &flipped);
        prop_assert!(pending.is_empty());
        prop_assert_eq!(list, before);
    }

    #[test]
    fn task_update_replaces_every_copy(
        seed in prop::collection::vec(arb_task(), 0..12),
        update in arb_task(),
    ) {
        let mut state = AppState::default();
        for (i, task) in seed.into_iter().enumerate() {
            match i % 3 {
                0 => state.tasks.all.push(task),
                1 => state.tasks.assigned.push(task),
                _ => state.tasks.search_results.push(task),
            }
        }

        reconcile::apply_task_update(&mut state.tasks, update.clone());
        let once = state.clone();
        prop_assert!(!reconcile::apply_task_update(&mut state.tasks, update.clone()));
        prop_assert_eq!(&state, &once);

        let mut expected = update;
        expected.dedup_collaborators();
        let copies: Vec<&Task> = [
            &state.tasks.all,
            &state.tasks.created,
            &state.tasks.assigned,
            &state.tasks.overdue,
            &state.tasks.search_results,
        ]
        .into_iter()
        .flatten()
        .filter(|t| t.id == expected.id)
        .collect();
        prop_assert!(!copies.is_empty());
        for copy in copies {
            prop_assert_eq!(copy, &expected);
        }
        prop_assert!(state.tasks.all.iter().any(|t| t.id == expected.id));
    }
}
