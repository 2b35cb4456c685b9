//! # Task Scheduler
//!
//! Defers work until it can run and drops work that waited too long.
//!
//! ## Philosophy
//!
//! - **One owner**: the scheduler loop is the only code that mutates a queued
//!   task. Everyone else talks to it through channels.
//! - **Bounded waiting**: every task carries a maximum waiting time. A task
//!   that exceeds it is discarded and a `Drop` notice is forwarded instead,
//!   exactly once.
//! - **Errors never halt the loop**: a task that cannot be forwarded is
//!   logged and the loop moves on.
//!
//! ## Example
//!
//! ```ignore
//! let (tx, rx) = std::sync::mpsc::channel();
//! let scheduler = Scheduler::spawn(SchedulerConfig::default(), Box::new(FileResourceProbe), tx)?;
//! scheduler.submit(Task::new(TaskOperation::Put, Duration::from_secs(30)).with_metadata("path", "/data/out.bin"))?;
//! let ready = rx.recv()?;
//! ```

pub mod manager;
pub mod probe;
pub mod scheduler;
pub mod task;

pub use manager::TasksManager;
pub use probe::{lock_path, FileResourceProbe, FnProbe, ResourceProbe, ResourceState, LOCK_SUFFIX, PATH_KEY};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats};
pub use task::{Task, TaskId, TaskOperation, TaskStatus, SOURCE_TASK_KEY};
