//! Bookkeeping of pending and completed tasks.

use crate::task::{Task, TaskId, TaskStatus};
use axo_types::{AxoError, AxoResult};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Tracks every task a consumer has seen.
///
/// A task lives in exactly one of the two maps. Once completed it is never
/// admitted to `pending` again while it is still remembered.
///
/// Without a history limit the completed map grows with every task. With
/// one, the oldest completed tasks are forgotten first, and a forgotten id
/// is no longer rejected by [`add_pending`](Self::add_pending).
#[derive(Debug, Default)]
pub struct TasksManager {
    pending: HashMap<TaskId, Task>,
    completed: HashMap<TaskId, Task>,
    completion_order: VecDeque<TaskId>,
    history_limit: Option<usize>,
}

impl TasksManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` completed tasks.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            history_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn history_limit(&self) -> Option<usize> {
        self.history_limit
    }

    pub fn add_pending(&mut self, task: Task) -> AxoResult<()> {
        let id = task.id();
        if self.completed.contains_key(&id) {
            return Err(AxoError::already_exists(format!("{} already completed", id)));
        }
        if self.pending.contains_key(&id) {
            return Err(AxoError::already_exists(format!("{} already pending", id)));
        }
        self.pending.insert(id, task);
        Ok(())
    }

    /// Moves a pending task to `completed` with a terminal status.
    pub fn complete(&mut self, id: TaskId, status: TaskStatus) -> AxoResult<&Task> {
        if !status.is_terminal() {
            return Err(AxoError::validation(format!(
                "{} is not a terminal status",
                status
            )));
        }
        let mut task = self
            .pending
            .remove(&id)
            .ok_or_else(|| AxoError::not_found(format!("{} is not pending", id)))?;
        task.set_status(status);
        debug!(task_id = %id, %status, "task completed");
        self.completion_order.push_back(id);
        if let Some(limit) = self.history_limit {
            // The newest task is always kept so it can be returned.
            self.prune_completed(limit.max(1));
        }
        Ok(self.completed.entry(id).or_insert(task))
    }

    /// Forgets the oldest completed tasks until at most `keep` remain.
    ///
    /// Returns how many were forgotten.
    pub fn prune_completed(&mut self, keep: usize) -> usize {
        let mut forgotten = 0;
        while self.completion_order.len() > keep {
            let Some(oldest) = self.completion_order.pop_front() else {
                break;
            };
            if self.completed.remove(&oldest).is_some() {
                forgotten += 1;
            }
        }
        if forgotten > 0 {
            debug!(forgotten, kept = self.completed.len(), "pruned task history");
        }
        forgotten
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.pending.get(&id).or_else(|| self.completed.get(&id))
    }

    pub fn is_pending(&self, id: TaskId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn is_completed(&self, id: TaskId) -> bool {
        self.completed.contains_key(&id)
    }

    /// Tasks, pending or completed, whose metadata maps `key` to `value`.
    pub fn find_by_metadata(&self, key: &str, value: &str) -> Vec<&Task> {
        self.pending
            .values()
            .chain(self.completed.values())
            .filter(|task| task.metadata_value(key) == Some(value))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOperation;
    use axo_types::ErrorKind;
    use std::time::Duration;

    fn task() -> Task {
        Task::new(TaskOperation::Put, Duration::from_secs(1))
    }

    #[test]
    fn test_pending_then_completed() {
        let mut manager = TasksManager::new();
        let task = task();
        let id = task.id();
        manager.add_pending(task).unwrap();
        assert!(manager.is_pending(id));

        let completed = manager.complete(id, TaskStatus::Success).unwrap();
        assert_eq!(completed.status(), TaskStatus::Success);
        assert!(manager.is_completed(id));
        assert!(!manager.is_pending(id));
        assert_eq!(manager.get(id).unwrap().status(), TaskStatus::Success);
    }

    #[test]
    fn test_completed_task_not_readmitted() {
        let mut manager = TasksManager::new();
        let task = task();
        let id = task.id();
        manager.add_pending(task.clone()).unwrap();
        manager.complete(id, TaskStatus::Failed).unwrap();

        let err = manager.add_pending(task).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_complete_requires_pending_and_terminal() {
        let mut manager = TasksManager::new();
        let err = manager.complete(TaskId::new(), TaskStatus::Success).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let task = task();
        let id = task.id();
        manager.add_pending(task).unwrap();
        let err = manager.complete(id, TaskStatus::Running).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn test_find_by_metadata() {
        let mut manager = TasksManager::new();
        let a = task().with_metadata("key", "k1");
        let b = task().with_metadata("key", "k2");
        let a_id = a.id();
        manager.add_pending(a).unwrap();
        manager.add_pending(b).unwrap();
        manager.complete(a_id, TaskStatus::Success).unwrap();

        let found = manager.find_by_metadata("key", "k1");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), a_id);
        assert!(manager.find_by_metadata("key", "k3").is_empty());
    }

    #[test]
    fn test_history_limit_forgets_oldest() {
        let mut manager = TasksManager::with_history_limit(2);
        let ids: Vec<TaskId> = (0..3)
            .map(|_| {
                let task = task();
                let id = task.id();
                manager.add_pending(task).unwrap();
                manager.complete(id, TaskStatus::Success).unwrap();
                id
            })
            .collect();

        assert_eq!(manager.completed_count(), 2);
        assert!(!manager.is_completed(ids[0]));
        assert!(manager.is_completed(ids[1]));
        assert!(manager.is_completed(ids[2]));
    }

    #[test]
    fn test_prune_completed_keeps_pending() {
        let mut manager = TasksManager::new();
        let waiting = task();
        let waiting_id = waiting.id();
        manager.add_pending(waiting).unwrap();
        for _ in 0..4 {
            let task = task();
            let id = task.id();
            manager.add_pending(task).unwrap();
            manager.complete(id, TaskStatus::Failed).unwrap();
        }

        assert_eq!(manager.prune_completed(1), 3);
        assert_eq!(manager.completed_count(), 1);
        assert!(manager.is_pending(waiting_id));
        assert_eq!(manager.prune_completed(1), 0);
    }
}
