//! The runtime: invocation, persistence and the task loops.

use crate::config::RuntimeConfig;
use crate::invoker::{Invoker, ProxyInvoker};
use axo_endpoints::{EndpointRegistration, EndpointRegistry, LocalEndpoint, LocalEndpointRegistry};
use axo_mobility::{ActiveObject, Kwargs, TypeRegistry};
use axo_protocol::{EndpointHandler, EndpointServer, EventPublisher};
use axo_scheduler::{
    FileResourceProbe, ResourceProbe, Scheduler, SchedulerHandle, Task, TaskId, TaskOperation,
    TaskStatus, TasksManager, PATH_KEY, SOURCE_TASK_KEY,
};
use axo_storage::{
    AxoStorage, BallRef, LocalStorageService, Pointer, StorageService, StoredObject, Tags,
};
use axo_types::{AxoError, AxoResult, MetadataX};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Task metadata naming the storage key a task targets.
pub const KEY_KEY: &str = "key";

/// Task metadata naming the bucket a task targets.
pub const BUCKET_KEY: &str = "bucket_id";

/// Outcome of one task processed by the runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub operation: TaskOperation,
    pub status: TaskStatus,
    pub key: Option<String>,
    pub error: Option<AxoError>,
}

/// Composes storage, endpoints and the scheduler behind one handle.
pub struct Runtime {
    config: RuntimeConfig,
    storage: AxoStorage,
    registry: Arc<dyn EndpointRegistry>,
    types: TypeRegistry,
    invoker: ProxyInvoker,
    scheduler: Option<SchedulerHandle>,
    consumer: Option<JoinHandle<TasksManager>>,
    reports: Receiver<TaskReport>,
}

impl Runtime {
    /// Starts a runtime whose uploads wait on files named by task metadata.
    pub fn new(
        config: RuntimeConfig,
        storage: Arc<dyn StorageService>,
        registry: Arc<dyn EndpointRegistry>,
        types: TypeRegistry,
    ) -> AxoResult<Self> {
        Self::with_probe(config, storage, registry, types, Box::new(FileResourceProbe))
    }

    pub fn with_probe(
        config: RuntimeConfig,
        storage: Arc<dyn StorageService>,
        registry: Arc<dyn EndpointRegistry>,
        types: TypeRegistry,
        probe: Box<dyn ResourceProbe>,
    ) -> AxoResult<Self> {
        let (runtime_tx, runtime_rx) = mpsc::channel();
        let (report_tx, reports) = mpsc::channel();

        let consumer = UploadConsumer {
            storage: storage.clone(),
            default_bucket: config.upload_bucket_id.clone(),
            chunk_size: config.chunk_size,
            uploaded: HashSet::new(),
            tasks: TasksManager::with_history_limit(config.task_history_limit),
            reports: report_tx,
        };
        let consumer = thread::Builder::new()
            .name("axo-runtime".to_string())
            .spawn(move || consumer.run(runtime_rx))
            .map_err(|err| AxoError::internal(format!("cannot spawn runtime loop: {}", err)))?;

        let scheduler = Scheduler::spawn(config.scheduler.clone(), probe, runtime_tx)?;

        info!(
            runtime_id = %config.runtime_id,
            mode = %config.mode,
            endpoints = registry.len(),
            "runtime started"
        );

        Ok(Self {
            storage: AxoStorage::new(storage, config.runtime_id.clone())
                .with_chunk_size(config.chunk_size),
            invoker: ProxyInvoker::new(registry.clone()),
            config,
            registry,
            types,
            scheduler: Some(scheduler),
            consumer: Some(consumer),
            reports,
        })
    }

    /// A single-process runtime: blobs under `config.storage_root` and one
    /// in-process endpoint hosting `types`.
    pub fn local(config: RuntimeConfig, types: TypeRegistry) -> AxoResult<Self> {
        let storage = LocalStorageService::open(&config.storage_root, config.runtime_id.clone())?;
        let handler = Arc::new(EndpointHandler::new(config.runtime_id.clone(), types.clone()));
        let registration = EndpointRegistration::new(
            config.runtime_id.clone(),
            config.hostname.clone(),
            config.request_port,
            config.event_port,
        );
        let endpoint = Arc::new(LocalEndpoint::new(registration, handler));
        let registry = Arc::new(LocalEndpointRegistry::new(endpoint));
        Self::new(config, Arc::new(storage), registry, types)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn EndpointRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &AxoStorage {
        &self.storage
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Runs `method` on an endpoint picked for `metadata`.
    pub fn call(
        &self,
        object: &mut dyn ActiveObject,
        metadata: &MetadataX,
        method: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> AxoResult<Value> {
        self.invoker.invoke(object, metadata, method, args, kwargs)
    }

    /// Stores `object` under its metadata's bucket and key.
    pub fn persistify(&self, object: &dyn ActiveObject, metadata: &MetadataX) -> AxoResult<StoredObject> {
        let mut tags = Tags::new();
        tags.insert("uri".to_string(), metadata.uri().to_string());
        tags.insert("class_name".to_string(), metadata.class_name().to_string());
        tags.insert("version".to_string(), metadata.version().to_string());
        self.storage
            .put_active_object(metadata.bucket_id(), metadata.key(), object, &tags)
    }

    pub fn get_active_object(&self, bucket_id: &str, key: &str) -> AxoResult<Box<dyn ActiveObject>> {
        self.storage.get_active_object(bucket_id, key, &self.types)
    }

    pub fn delete_active_object(&self, bucket_id: &str, key: &str) -> AxoResult<()> {
        self.storage.delete_object(bucket_id, key)
    }

    /// Lazy handle to a stored blob.
    pub fn pointer(&self, ball: BallRef) -> Pointer {
        Pointer::new(self.storage.service().clone(), ball).chunk_size(self.config.chunk_size)
    }

    /// Hands a task to the scheduler.
    pub fn schedule(&self, task: Task) -> AxoResult<TaskId> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| AxoError::internal("runtime is shut down"))?;
        let id = task.id();
        scheduler.submit(task)?;
        Ok(id)
    }

    /// Schedules the upload of `path` once it is complete.
    ///
    /// The key defaults to the file name.
    pub fn upload_file(&self, path: impl AsRef<Path>, key: Option<&str>) -> AxoResult<TaskId> {
        let path = path.as_ref();
        let key = match key {
            Some(key) => key.to_string(),
            None => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    AxoError::validation(format!("{} has no file name", path.display()))
                })?,
        };
        let task = Task::new(TaskOperation::Put, self.config.upload_max_waiting_time)
            .with_metadata(PATH_KEY, path.to_string_lossy())
            .with_metadata(KEY_KEY, key)
            .with_metadata(BUCKET_KEY, self.config.upload_bucket_id.clone());
        self.schedule(task)
    }

    /// Reports produced since the last call.
    pub fn take_reports(&self) -> Vec<TaskReport> {
        self.reports.try_iter().collect()
    }

    /// Waits up to `timeout` for the next report.
    pub fn next_report(&self, timeout: Duration) -> Option<TaskReport> {
        self.reports.recv_timeout(timeout).ok()
    }

    /// Serves this runtime's types over TCP on the configured ports.
    pub fn serve(&self) -> AxoResult<EndpointServer> {
        let events = Arc::new(EventPublisher::bind(&self.config.event_addr())?);
        let handler = EndpointHandler::new(self.config.runtime_id.clone(), self.types.clone())
            .with_events(events);
        EndpointServer::bind(&self.config.request_addr(), Arc::new(handler))
    }

    /// Stops the scheduler and the runtime loop and returns the loop's
    /// task history.
    pub fn shutdown(&mut self) -> AxoResult<TasksManager> {
        if let Some(scheduler) = self.scheduler.take() {
            let stats = scheduler.shutdown();
            debug!(?stats, "scheduler joined");
        }
        let consumer = self
            .consumer
            .take()
            .ok_or_else(|| AxoError::internal("runtime is already shut down"))?;
        let tasks = consumer
            .join()
            .map_err(|_| AxoError::internal("runtime loop panicked"))?;
        info!(
            runtime_id = %self.config.runtime_id,
            completed = tasks.completed_count(),
            "runtime stopped"
        );
        Ok(tasks)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            if let Err(err) = self.shutdown() {
                error!(error = %err, "runtime shutdown failed");
            }
        }
    }
}

/// Runtime side of the scheduler queue.
struct UploadConsumer {
    storage: Arc<dyn StorageService>,
    default_bucket: String,
    chunk_size: usize,
    /// `bucket/key` locations uploaded so far. One entry per distinct
    /// location for the life of the runtime; it is what keeps a second
    /// upload of the same file from running.
    uploaded: HashSet<String>,
    /// Bounded by `RuntimeConfig::task_history_limit`.
    tasks: TasksManager,
    reports: Sender<TaskReport>,
}

impl UploadConsumer {
    fn run(mut self, queue: Receiver<Task>) -> TasksManager {
        // Ends once the scheduler drops its sender.
        for task in queue {
            self.process(task);
        }
        self.tasks
    }

    fn process(&mut self, task: Task) {
        let id = task.id();
        let operation = task.operation();
        let key = task.metadata_value(KEY_KEY).map(str::to_string);
        let bucket = task
            .metadata_value(BUCKET_KEY)
            .unwrap_or(self.default_bucket.as_str())
            .to_string();

        let (status, error) = match operation {
            TaskOperation::Put => self.put(&task, &bucket, key.as_deref()),
            TaskOperation::Drop => {
                warn!(
                    task_id = %id,
                    source_task_id = task.metadata_value(SOURCE_TASK_KEY).unwrap_or("-"),
                    path = task.metadata_value(PATH_KEY).unwrap_or("-"),
                    "task dropped after exceeding its waiting time"
                );
                (TaskStatus::Dropped, None)
            }
            TaskOperation::Get => outcome(self.get(&bucket, key.as_deref())),
            TaskOperation::Delete => outcome(self.delete(&bucket, key.as_deref())),
            TaskOperation::MethodExec => (
                TaskStatus::Failed,
                Some(AxoError::bad_request(
                    "method execution is not a schedulable task",
                )),
            ),
        };

        if let Err(err) = self.record(task, status) {
            error!(task_id = %id, error = %err, "cannot record task");
        }
        let report = TaskReport {
            task_id: id,
            operation,
            status,
            key,
            error,
        };
        if self.reports.send(report).is_err() {
            debug!(task_id = %id, "no report listener");
        }
    }

    fn record(&mut self, task: Task, status: TaskStatus) -> AxoResult<()> {
        let id = task.id();
        self.tasks.add_pending(task)?;
        self.tasks.complete(id, status)?;
        Ok(())
    }

    fn put(&mut self, task: &Task, bucket: &str, key: Option<&str>) -> (TaskStatus, Option<AxoError>) {
        let (Some(path), Some(key)) = (task.metadata_value(PATH_KEY), key) else {
            return (
                TaskStatus::Failed,
                Some(AxoError::validation("upload task needs path and key")),
            );
        };
        let location = format!("{}/{}", bucket, key);
        if self.uploaded.contains(&location) {
            debug!(task_id = %task.id(), %location, "already uploaded");
            return (TaskStatus::Cancelled, None);
        }

        let mut tags = Tags::new();
        tags.insert("path".to_string(), path.to_string());
        if let Some(source) = task.metadata_value(SOURCE_TASK_KEY) {
            tags.insert(SOURCE_TASK_KEY.to_string(), source.to_string());
        }
        match self
            .storage
            .put_data_from_file(bucket, key, Path::new(path), &tags, self.chunk_size)
        {
            Ok(_) => {
                info!(task_id = %task.id(), %location, path, "file uploaded");
                self.uploaded.insert(location);
                (TaskStatus::Success, None)
            }
            Err(err) => {
                error!(task_id = %task.id(), %location, error = %err, "upload failed");
                (TaskStatus::Failed, Some(err))
            }
        }
    }

    fn get(&self, bucket: &str, key: Option<&str>) -> AxoResult<()> {
        let key = key.ok_or_else(|| AxoError::validation("get task needs a key"))?;
        let metadata = self.storage.get_metadata(bucket, key)?;
        debug!(bucket_id = bucket, key, size = metadata.size, "blob present");
        Ok(())
    }

    fn delete(&self, bucket: &str, key: Option<&str>) -> AxoResult<()> {
        let key = key.ok_or_else(|| AxoError::validation("delete task needs a key"))?;
        if self.storage.delete(bucket, key)? {
            Ok(())
        } else {
            Err(AxoError::not_found(format!("{}/{} does not exist", bucket, key)))
        }
    }
}

fn outcome(result: AxoResult<()>) -> (TaskStatus, Option<AxoError>) {
    match result {
        Ok(()) => (TaskStatus::Success, None),
        Err(err) => (TaskStatus::Failed, Some(err)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logging::init_test_tracing;
    use axo_mobility::{arg, ActiveType, MethodTable};
    use axo_scheduler::{lock_path, SchedulerConfig};
    use axo_storage::MemoryStorageService;
    use axo_types::{ErrorKind, MetadataInit};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::fs;

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct Calculator {
        pub calls: u64,
    }

    impl Calculator {
        fn add(&mut self, args: &[Value], _: &Kwargs) -> AxoResult<Value> {
            self.calls += 1;
            Ok(json!(arg::<i64>(args, 0)? + arg::<i64>(args, 1)?))
        }

        fn divide(&mut self, args: &[Value], _: &Kwargs) -> AxoResult<Value> {
            self.calls += 1;
            let divisor: i64 = arg(args, 1)?;
            if divisor == 0 {
                return Err(AxoError::validation("division by zero"));
            }
            Ok(json!(arg::<i64>(args, 0)? / divisor))
        }
    }

    impl ActiveType for Calculator {
        const TYPE_NAME: &'static str = "Calculator";
        const MODULE: &'static str = "tests";

        fn method_table() -> MethodTable<Self> {
            MethodTable::new()
                .with("add", Calculator::add)
                .with("divide", Calculator::divide)
        }
    }

    pub fn types() -> TypeRegistry {
        TypeRegistry::new().with::<Calculator>().unwrap()
    }

    pub fn calculator_registry(endpoint_id: &str) -> (Arc<dyn EndpointRegistry>, Arc<EndpointHandler>) {
        let handler = Arc::new(EndpointHandler::new(endpoint_id, types()));
        let registration = EndpointRegistration::new(endpoint_id, "localhost", 0, 0);
        let endpoint = Arc::new(LocalEndpoint::new(registration, handler.clone()));
        (Arc::new(LocalEndpointRegistry::new(endpoint)), handler)
    }

    fn config(dir: &Path) -> RuntimeConfig {
        RuntimeConfig {
            storage_root: dir.join("blobs"),
            upload_bucket_id: "uploads".to_string(),
            upload_max_waiting_time: Duration::from_secs(5),
            scheduler: SchedulerConfig {
                heartbeat: Duration::from_millis(20),
                queue_capacity: 16,
            },
            ..RuntimeConfig::default()
        }
    }

    fn memory_runtime(dir: &Path) -> (Runtime, Arc<MemoryStorageService>) {
        init_test_tracing();
        let storage = Arc::new(MemoryStorageService::new("test"));
        let (registry, _) = calculator_registry("e0");
        let runtime = Runtime::new(config(dir), storage.clone(), registry, types()).unwrap();
        (runtime, storage)
    }

    #[test]
    fn test_persistify_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::local(config(dir.path()), types()).unwrap();
        let metadata = MetadataX::new(MetadataInit::default().key("calc").bucket_id("b1")).unwrap();

        runtime.persistify(&Calculator { calls: 7 }, &metadata).unwrap();
        let mut restored = runtime.get_active_object("b1", "calc").unwrap();
        assert_eq!(restored.type_name(), "Calculator");
        assert_eq!(restored.attributes().unwrap()["calls"], json!(7));

        let sum = runtime
            .call(restored.as_mut(), &metadata, "add", &[json!(2), json!(3)], &Kwargs::new())
            .unwrap();
        assert_eq!(sum, json!(5));

        runtime.delete_active_object("b1", "calc").unwrap();
        let err = runtime.get_active_object("b1", "calc").err().unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_upload_runs_once_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let (mut runtime, storage) = memory_runtime(dir.path());
        let file = dir.path().join("data.bin");
        fs::write(&file, b"payload").unwrap();

        runtime.upload_file(&file, None).unwrap();
        let first = runtime.next_report(Duration::from_secs(3)).unwrap();
        assert_eq!(first.operation, TaskOperation::Put);
        assert_eq!(first.status, TaskStatus::Success);
        assert_eq!(first.key.as_deref(), Some("data.bin"));
        assert_eq!(storage.get("uploads", "data.bin", 0).unwrap(), b"payload");

        runtime.upload_file(&file, None).unwrap();
        let second = runtime.next_report(Duration::from_secs(3)).unwrap();
        assert_eq!(second.status, TaskStatus::Cancelled);

        let tasks = runtime.shutdown().unwrap();
        assert_eq!(tasks.completed_count(), 2);
        assert!(tasks.is_completed(first.task_id));
    }

    #[test]
    fn test_upload_waits_for_lock_release() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, storage) = memory_runtime(dir.path());
        let file = dir.path().join("slow.bin");
        fs::write(&file, b"partial").unwrap();
        fs::write(lock_path(&file), b"").unwrap();

        runtime.upload_file(&file, Some("slow")).unwrap();
        assert!(runtime.next_report(Duration::from_millis(150)).is_none());

        fs::write(&file, b"complete").unwrap();
        fs::remove_file(lock_path(&file)).unwrap();
        let report = runtime.next_report(Duration::from_secs(3)).unwrap();
        assert_eq!(report.status, TaskStatus::Success);
        assert_eq!(storage.get("uploads", "slow", 0).unwrap(), b"complete");
    }

    #[test]
    fn test_missing_file_reported_as_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _) = memory_runtime(dir.path());
        let task = Task::new(TaskOperation::Put, Duration::from_millis(200))
            .with_metadata(PATH_KEY, dir.path().join("never").to_string_lossy())
            .with_metadata(KEY_KEY, "never");
        let source = runtime.schedule(task).unwrap();

        let report = runtime.next_report(Duration::from_secs(3)).unwrap();
        assert_eq!(report.operation, TaskOperation::Drop);
        assert_eq!(report.status, TaskStatus::Dropped);
        assert_ne!(report.task_id, source);
        assert!(runtime.next_report(Duration::from_millis(300)).is_none());
    }

    #[test]
    fn test_get_and_delete_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, storage) = memory_runtime(dir.path());
        storage.put("b1", "k1", b"hello", &Tags::new(), 0).unwrap();

        let get = Task::new(TaskOperation::Get, Duration::from_secs(1))
            .with_metadata(BUCKET_KEY, "b1")
            .with_metadata(KEY_KEY, "k1");
        runtime.schedule(get).unwrap();
        assert_eq!(
            runtime.next_report(Duration::from_secs(2)).unwrap().status,
            TaskStatus::Success
        );

        for expected in [TaskStatus::Success, TaskStatus::Failed] {
            let delete = Task::new(TaskOperation::Delete, Duration::from_secs(1))
                .with_metadata(BUCKET_KEY, "b1")
                .with_metadata(KEY_KEY, "k1");
            runtime.schedule(delete).unwrap();
            let report = runtime.next_report(Duration::from_secs(2)).unwrap();
            assert_eq!(report.status, expected);
        }
        let reports = runtime.take_reports();
        assert!(reports.is_empty());
    }

    #[test]
    fn test_method_exec_task_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (runtime, _) = memory_runtime(dir.path());
        runtime
            .schedule(Task::new(TaskOperation::MethodExec, Duration::from_secs(1)))
            .unwrap();
        let report = runtime.next_report(Duration::from_secs(2)).unwrap();
        assert_eq!(report.status, TaskStatus::Failed);
        assert_eq!(report.error.unwrap().kind, ErrorKind::BadRequest);
    }

    #[test]
    fn test_task_history_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            task_history_limit: 2,
            ..config(dir.path())
        };
        let (registry, _) = calculator_registry("e0");
        let mut runtime =
            Runtime::new(config, Arc::new(MemoryStorageService::new("test")), registry, types())
                .unwrap();

        for _ in 0..3 {
            runtime
                .schedule(Task::new(TaskOperation::MethodExec, Duration::from_secs(1)))
                .unwrap();
            runtime.next_report(Duration::from_secs(2)).unwrap();
        }
        let history = runtime.shutdown().unwrap();
        assert_eq!(history.completed_count(), 2);
        assert_eq!(history.history_limit(), Some(2));
    }

    #[test]
    fn test_schedule_after_shutdown_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (mut runtime, _) = memory_runtime(dir.path());
        runtime.shutdown().unwrap();
        assert!(runtime
            .schedule(Task::new(TaskOperation::Get, Duration::from_secs(1)))
            .is_err());
        assert!(runtime.shutdown().is_err());
    }
}
