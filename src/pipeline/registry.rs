//! Per-session registry of dispatched evaluation tasks.
//!
//! Background dispatch is never fire-and-forget into the runtime: every
//! spawned evaluation is registered here under (session, turn) so the
//! orchestrator can ask what is still running. The claim flag itself lives
//! in the store (it must be shared with inline recovery); the registry
//! tracks the task handles.
//!
//! Handles are abandoned, never aborted: a task that outlives its session
//! still attempts its terminal write, which the store turns into a no-op.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Dispatch status of one registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// The task is still running.
    Running,
    /// The task's future has completed.
    Finished,
}

struct TaskEntry {
    handle: JoinHandle<()>,
    dispatched_at: DateTime<Utc>,
}

/// Registry of evaluation task handles, keyed by session and turn.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<HashMap<Uuid, HashMap<u32, TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dispatched task. A turn is dispatched exactly once, so a
    /// second registration for the same key replaces (and abandons) the
    /// previous handle.
    pub fn register(&self, session: Uuid, turn: u32, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.entry(session).or_default().insert(
            turn,
            TaskEntry {
                handle,
                dispatched_at: Utc::now(),
            },
        );
    }

    /// Dispatch status for a turn, `None` if it was never registered.
    pub fn status(&self, session: Uuid, turn: u32) -> Option<DispatchStatus> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.get(&session).and_then(|turns| {
            turns.get(&turn).map(|entry| {
                if entry.handle.is_finished() {
                    DispatchStatus::Finished
                } else {
                    DispatchStatus::Running
                }
            })
        })
    }

    /// When the task for a turn was dispatched.
    pub fn dispatched_at(&self, session: Uuid, turn: u32) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .get(&session)
            .and_then(|turns| turns.get(&turn))
            .map(|entry| entry.dispatched_at)
    }

    /// Number of registered tasks still running for a session.
    pub fn active_count(&self, session: Uuid) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .get(&session)
            .map(|turns| {
                turns
                    .values()
                    .filter(|entry| !entry.handle.is_finished())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drops all handles for a session, abandoning any still-running tasks.
    /// Returns how many handles were removed.
    pub fn remove_session(&self, session: Uuid) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.remove(&session).map(|turns| turns.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_register_and_query_status() {
        let registry = TaskRegistry::new();
        let session = Uuid::new_v4();

        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        registry.register(session, 1, handle);

        assert_eq!(registry.status(session, 1), Some(DispatchStatus::Running));
        assert_eq!(registry.status(session, 2), None);
        assert_eq!(registry.active_count(session), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(registry.status(session, 1), Some(DispatchStatus::Finished));
        assert_eq!(registry.active_count(session), 0);
    }

    #[tokio::test]
    async fn test_remove_session_abandons_tasks() {
        let registry = TaskRegistry::new();
        let session = Uuid::new_v4();

        registry.register(session, 1, tokio::spawn(async {}));
        registry.register(session, 2, tokio::spawn(async {}));

        assert_eq!(registry.remove_session(session), 2);
        assert_eq!(registry.status(session, 1), None);
        assert_eq!(registry.remove_session(session), 0);
    }

    #[tokio::test]
    async fn test_dispatched_at_recorded() {
        let registry = TaskRegistry::new();
        let session = Uuid::new_v4();
        registry.register(session, 1, tokio::spawn(async {}));
        assert!(registry.dispatched_at(session, 1).is_some());
        assert!(registry.dispatched_at(session, 9).is_none());
    }
}
