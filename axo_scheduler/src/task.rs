//! Deferred units of work.

use axo_types::{AxoError, AxoResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Metadata key naming the task a derived task came from.
pub const SOURCE_TASK_KEY: &str = "source_task_id";

/// Task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a TaskId from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// What a task asks the runtime to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOperation {
    Put,
    Get,
    Delete,
    /// Notification that another task waited too long and was discarded
    Drop,
    MethodExec,
}

impl fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOperation::Put => write!(f, "PUT"),
            TaskOperation::Get => write!(f, "GET"),
            TaskOperation::Delete => write!(f, "DELETE"),
            TaskOperation::Drop => write!(f, "DROP"),
            TaskOperation::MethodExec => write!(f, "METHOD_EXEC"),
        }
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Timeout,
    Cancelled,
    /// Discarded after exceeding its maximum waiting time
    Dropped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "Pending"),
            TaskStatus::Running => write!(f, "Running"),
            TaskStatus::Success => write!(f, "Success"),
            TaskStatus::Failed => write!(f, "Failed"),
            TaskStatus::Timeout => write!(f, "Timeout"),
            TaskStatus::Cancelled => write!(f, "Cancelled"),
            TaskStatus::Dropped => write!(f, "Dropped"),
        }
    }
}

/// A unit of deferred work.
///
/// `executes_at` is never earlier than `created_at`. Only the scheduler loop
/// updates `waiting_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    operation: TaskOperation,
    created_at: DateTime<Utc>,
    executes_at: DateTime<Utc>,
    waiting_time: Duration,
    max_waiting_time: Duration,
    status: TaskStatus,
    metadata: BTreeMap<String, String>,
}

impl Task {
    /// A task due immediately.
    pub fn new(operation: TaskOperation, max_waiting_time: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            operation,
            created_at: now,
            executes_at: now,
            waiting_time: Duration::ZERO,
            max_waiting_time,
            status: TaskStatus::Pending,
            metadata: BTreeMap::new(),
        }
    }

    /// Moves the due time to `created_at + delay`.
    pub fn with_delay(self, delay: Duration) -> AxoResult<Self> {
        let delta = TimeDelta::from_std(delay)
            .map_err(|_| AxoError::validation(format!("delay {:?} is out of range", delay)))?;
        let executes_at = self
            .created_at
            .checked_add_signed(delta)
            .ok_or_else(|| AxoError::validation(format!("delay {:?} is out of range", delay)))?;
        self.with_executes_at(executes_at)
    }

    pub fn with_executes_at(mut self, executes_at: DateTime<Utc>) -> AxoResult<Self> {
        if executes_at < self.created_at {
            return Err(AxoError::validation(format!(
                "{} would execute at {} before its creation at {}",
                self.id, executes_at, self.created_at
            )));
        }
        self.executes_at = executes_at;
        Ok(self)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A fresh task for `operation` carrying this task's metadata and limits.
    pub fn derive(&self, operation: TaskOperation) -> Self {
        let mut derived = Self::new(operation, self.max_waiting_time);
        derived.metadata = self.metadata.clone();
        derived
            .metadata
            .insert(SOURCE_TASK_KEY.to_string(), self.id.as_uuid().to_string());
        derived
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn operation(&self) -> TaskOperation {
        self.operation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn executes_at(&self) -> DateTime<Utc> {
        self.executes_at
    }

    pub fn waiting_time(&self) -> Duration {
        self.waiting_time
    }

    pub fn max_waiting_time(&self) -> Duration {
        self.max_waiting_time
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.executes_at
    }

    /// Sets `waiting_time = now - created_at`; returns true once the task
    /// has waited at least `max_waiting_time`.
    pub(crate) fn update_waiting_time(&mut self, now: DateTime<Utc>) -> bool {
        self.waiting_time = (now - self.created_at).to_std().unwrap_or(Duration::ZERO);
        self.waiting_time >= self.max_waiting_time
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.id, self.operation, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axo_types::ErrorKind;

    #[test]
    fn test_task_id_creation() {
        assert_ne!(TaskId::new(), TaskId::new());
        let uuid = Uuid::new_v4();
        assert_eq!(TaskId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn test_new_task_is_due() {
        let task = Task::new(TaskOperation::Get, Duration::from_secs(1));
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.created_at(), task.executes_at());
        assert!(task.is_due(Utc::now()));
    }

    #[test]
    fn test_executes_at_not_before_creation() {
        let task = Task::new(TaskOperation::Put, Duration::from_secs(1));
        let earlier = task.created_at() - TimeDelta::seconds(1);
        let err = task.with_executes_at(earlier).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValidationFailed);

        let task = Task::new(TaskOperation::Put, Duration::from_secs(1))
            .with_delay(Duration::from_secs(60))
            .unwrap();
        assert!(!task.is_due(Utc::now()));
    }

    #[test]
    fn test_waiting_time() {
        let mut task = Task::new(TaskOperation::Put, Duration::from_millis(500));
        let created = task.created_at();
        assert!(!task.update_waiting_time(created + TimeDelta::milliseconds(100)));
        assert_eq!(task.waiting_time(), Duration::from_millis(100));
        assert!(task.update_waiting_time(created + TimeDelta::milliseconds(500)));
    }

    #[test]
    fn test_derived_task_keeps_metadata() {
        let task = Task::new(TaskOperation::Put, Duration::from_secs(3)).with_metadata("path", "/tmp/x");
        let derived = task.derive(TaskOperation::Drop);
        assert_ne!(derived.id(), task.id());
        assert_eq!(derived.operation(), TaskOperation::Drop);
        assert_eq!(derived.metadata_value("path"), Some("/tmp/x"));
        let source = task.id().as_uuid().to_string();
        assert_eq!(derived.metadata_value(SOURCE_TASK_KEY), Some(source.as_str()));
        assert_eq!(derived.max_waiting_time(), Duration::from_secs(3));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Dropped.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
    }
}
