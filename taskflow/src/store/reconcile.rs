//! Pure merge functions for live updates and local mutations.
//!
//! Every function reports whether it changed anything so callers only
//! notify subscribers on real changes. Applying the same record twice is
//! a no-op the second time.

use std::collections::HashSet;

use taskflow_proto::notification::{Notification, NotificationId};
use taskflow_proto::task::{Task, TaskId};

use super::state::TaskViews;

/// Merges one notification into a newest-first list.
///
/// - Unknown id: inserted at the front.
/// - Known id: replaced in place. A copy already marked read stays read.
///
/// Returns `true` if the list changed.
pub fn apply_notification(list: &mut Vec<Notification>, mut incoming: Notification) -> bool {
    match list.iter_mut().find(|n| n.id == incoming.id) {
        Some(existing) => {
            incoming.read |= existing.read;
            if *existing == incoming {
                return false;
            }
            *existing = incoming;
            true
        }
        None => {
            list.insert(0, incoming);
            true
        }
    }
}

/// Merges a batch fetched from the backend, keeping the local read flags.
///
/// The result is the fetched list in server order; cached entries absent
/// from the batch are dropped.
pub fn replace_notifications(list: &mut Vec<Notification>, fetched: Vec<Notification>) -> bool {
    let merged: Vec<Notification> = fetched
        .into_iter()
        .map(|mut n| {
            if list.iter().any(|old| old.id == n.id && old.read) {
                n.read = true;
            }
            n
        })
        .collect();
    if *list == merged {
        return false;
    }
    *list = merged;
    true
}

/// Replaces every cached copy of `task` across all views.
///
/// A task id not present in the full list is appended to it.
///
/// Returns `true` if any view changed.
pub fn apply_task_update(views: &mut TaskViews, mut task: Task) -> bool {
    task.dedup_collaborators();
    let mut changed = false;

    for list in views.lists_mut() {
        for slot in list.iter_mut().filter(|t| t.id == task.id) {
            if *slot != task {
                slot.clone_from(&task);
                changed = true;
            }
        }
    }

    if let Some(current) = views.current.as_mut()
        && current.id == task.id
        && *current != task
    {
        current.clone_from(&task);
        changed = true;
    }

    if !views.all.iter().any(|t| t.id == task.id) {
        views.all.push(task);
        changed = true;
    }
    changed
}

/// Adds a freshly created task to the full and created lists.
pub fn insert_created(views: &mut TaskViews, task: Task) -> bool {
    let mut changed = apply_task_update(views, task.clone());
    if !views.created.iter().any(|t| t.id == task.id) {
        views.created.push(task);
        changed = true;
    }
    changed
}

/// Removes task `id` from every view.
pub fn remove_task(views: &mut TaskViews, id: &TaskId) -> bool {
    let mut changed = false;
    for list in views.lists_mut() {
        let before = list.len();
        list.retain(|t| &t.id != id);
        changed |= list.len() != before;
    }
    if views.current.as_ref().is_some_and(|t| &t.id == id) {
        views.current = None;
        changed = true;
    }
    changed
}

/// Marks notification `id` read.
///
/// Returns `true` only if it was unread, i.e. this call flipped it.
pub fn mark_read(list: &mut [Notification], id: &NotificationId) -> bool {
    match list.iter_mut().find(|n| &n.id == id) {
        Some(n) if !n.read => {
            n.read = true;
            true
        }
        _ => false,
    }
}

/// Marks every notification read and returns the ids this call flipped.
pub fn mark_all_read(list: &mut [Notification]) -> Vec<NotificationId> {
    list.iter_mut()
        .filter(|n| !n.read)
        .map(|n| {
            n.read = true;
            n.id.clone()
        })
        .collect()
}

/// Drops pending local reads that `incoming` reports read by the server.
pub fn settle_reads<'a>(
    pending: &mut HashSet<NotificationId>,
    incoming: impl IntoIterator<Item = &'a Notification>,
) {
    for n in incoming.into_iter().filter(|n| n.read) {
        pending.remove(&n.id);
    }
}

/// Marks `ids` unread again.
///
/// Only ids still in `pending` are reverted; a read reported by the server
/// since the local flip stands.
pub fn revert_read(
    list: &mut [Notification],
    pending: &mut HashSet<NotificationId>,
    ids: &[NotificationId],
) -> bool {
    let mut changed = false;
    for id in ids {
        if !pending.remove(id) {
            continue;
        }
        if let Some(n) = list.iter_mut().find(|n| &n.id == id) {
            n.read = false;
            changed = true;
        }
    }
    changed
}

/// Restores `previous` into every copy of the task that still equals
/// `optimistic`.
///
/// Copies replaced since the optimistic change are left as they are.
pub fn revert_task(views: &mut TaskViews, optimistic: &Task, previous: &Task) -> bool {
    let mut changed = false;
    for list in views.lists_mut() {
        for slot in list.iter_mut().filter(|t| **t == *optimistic) {
            slot.clone_from(previous);
            changed = true;
        }
    }
    if let Some(current) = views.current.as_mut()
        && *current == *optimistic
    {
        current.clone_from(previous);
        changed = true;
    }
    changed
}
