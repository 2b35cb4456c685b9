//! The scheduler loop.
//!
//! The loop owns its queue outright: tasks arrive over a bounded channel,
//! are drained into a local deque, and leave either forwarded to the runtime
//! queue or dropped. Nothing else touches a queued task, so re-enqueueing
//! can never block on the submission channel.

use crate::probe::{ResourceProbe, ResourceState};
use crate::task::{Task, TaskId, TaskOperation, TaskStatus};
use axo_types::{AxoError, AxoResult};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::mpsc::{
    self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError, TrySendError,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Scheduler loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Pause before re-examining tasks that are not ready yet.
    pub heartbeat: Duration,
    /// Capacity of the submission queue.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_millis(500),
            queue_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Reads `AXO_HEARTBEAT_MS` and `AXO_QUEUE_CAPACITY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let heartbeat = std::env::var("AXO_HEARTBEAT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.heartbeat);

        let queue_capacity: usize = std::env::var("AXO_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(defaults.queue_capacity);

        Self {
            heartbeat,
            queue_capacity,
        }
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub requeued: u64,
    /// Tasks still queued at shutdown
    pub abandoned: u64,
}

enum Command {
    Submit(Task),
    Shutdown,
}

enum Step {
    Done,
    Requeue(Task),
}

/// Entry point for starting the scheduler loop.
pub struct Scheduler;

impl Scheduler {
    /// Starts the loop on its own thread.
    ///
    /// Ready tasks are sent to `runtime_queue`.
    pub fn spawn(
        config: SchedulerConfig,
        probe: Box<dyn ResourceProbe>,
        runtime_queue: Sender<Task>,
    ) -> AxoResult<SchedulerHandle> {
        let (tx, rx) = mpsc::sync_channel(config.queue_capacity.max(1));
        let worker = SchedulerLoop {
            heartbeat: config.heartbeat,
            probe,
            inbound: rx,
            outbound: runtime_queue,
            queue: VecDeque::new(),
            stats: SchedulerStats::default(),
        };
        let handle = thread::Builder::new()
            .name("axo-scheduler".to_string())
            .spawn(move || worker.run())
            .map_err(|err| AxoError::internal(format!("cannot spawn scheduler: {}", err)))?;
        info!(heartbeat_ms = config.heartbeat.as_millis() as u64, "scheduler started");
        Ok(SchedulerHandle {
            tx,
            handle: Some(handle),
        })
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    tx: SyncSender<Command>,
    handle: Option<JoinHandle<SchedulerStats>>,
}

impl SchedulerHandle {
    /// Queues a task, waiting while the submission queue is full.
    pub fn submit(&self, task: Task) -> AxoResult<()> {
        self.tx
            .send(Command::Submit(task))
            .map_err(|_| AxoError::internal("scheduler has stopped"))
    }

    /// Queues a task without waiting.
    pub fn try_submit(&self, task: Task) -> AxoResult<()> {
        match self.tx.try_send(Command::Submit(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(AxoError::conflict("scheduler queue is full")),
            Err(TrySendError::Disconnected(_)) => Err(AxoError::internal("scheduler has stopped")),
        }
    }

    /// Stops the loop and waits for it.
    pub fn shutdown(mut self) -> SchedulerStats {
        self.stop()
    }

    fn stop(&mut self) -> SchedulerStats {
        let Some(handle) = self.handle.take() else {
            return SchedulerStats::default();
        };
        // A full queue still has room for the command once the loop drains it.
        let _ = self.tx.send(Command::Shutdown);
        match handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("scheduler thread panicked");
                SchedulerStats::default()
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SchedulerLoop {
    heartbeat: Duration,
    probe: Box<dyn ResourceProbe>,
    inbound: Receiver<Command>,
    outbound: Sender<Task>,
    queue: VecDeque<Task>,
    stats: SchedulerStats,
}

impl SchedulerLoop {
    fn run(mut self) -> SchedulerStats {
        loop {
            if self.queue.is_empty() {
                match self.inbound.recv() {
                    Ok(Command::Submit(task)) => self.accept(task),
                    Ok(Command::Shutdown) | Err(_) => break,
                }
            }
            if !self.drain_inbound() {
                break;
            }

            let mut requeued = false;
            for _ in 0..self.queue.len() {
                let Some(task) = self.queue.pop_front() else {
                    break;
                };
                if let Step::Requeue(task) = self.step(task) {
                    self.stats.requeued += 1;
                    self.queue.push_back(task);
                    requeued = true;
                }
            }

            if requeued {
                match self.inbound.recv_timeout(self.heartbeat) {
                    Ok(Command::Submit(task)) => self.accept(task),
                    Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
        }

        self.stats.abandoned = self.queue.len() as u64;
        info!(
            forwarded = self.stats.forwarded,
            dropped = self.stats.dropped,
            abandoned = self.stats.abandoned,
            "scheduler stopped"
        );
        self.stats
    }

    fn accept(&mut self, task: Task) {
        debug!(task_id = %task.id(), operation = %task.operation(), "task submitted");
        self.stats.submitted += 1;
        self.queue.push_back(task);
    }

    /// Takes everything already submitted. Returns false on shutdown.
    fn drain_inbound(&mut self) -> bool {
        loop {
            match self.inbound.try_recv() {
                Ok(Command::Submit(task)) => self.accept(task),
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => return true,
            }
        }
    }

    fn step(&mut self, mut task: Task) -> Step {
        let now = Utc::now();
        let resource = match task.operation() {
            TaskOperation::Put => Some(self.probe.probe(&task)),
            _ => None,
        };

        if resource == Some(ResourceState::Ready) {
            let put = task.derive(TaskOperation::Put);
            task.set_status(TaskStatus::Success);
            self.forward(put, task.id());
            return Step::Done;
        }

        if !task.is_due(now) || resource.is_some() {
            if task.update_waiting_time(now) {
                let notice = task.derive(TaskOperation::Drop);
                task.set_status(TaskStatus::Dropped);
                warn!(
                    task_id = %task.id(),
                    operation = %task.operation(),
                    waited_ms = task.waiting_time().as_millis() as u64,
                    "task exceeded its maximum waiting time"
                );
                self.stats.dropped += 1;
                self.forward(notice, task.id());
                return Step::Done;
            }
            return Step::Requeue(task);
        }

        let id = task.id();
        self.forward(task, id);
        Step::Done
    }

    fn forward(&mut self, task: Task, origin: TaskId) {
        let task_id = task.id();
        let operation = task.operation();
        match self.outbound.send(task) {
            Ok(()) => {
                self.stats.forwarded += 1;
                debug!(%task_id, %operation, %origin, "task forwarded");
            }
            Err(_) => {
                error!(%task_id, %operation, "runtime queue is closed, task lost");
            }
        }
    }
}
