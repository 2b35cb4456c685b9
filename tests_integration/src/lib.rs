//! Integration Test Utilities
//!
//! Shared fixtures for the cross-crate tests under `tests/`.
//!
//! ## Test Philosophy
//!
//! - **Real wiring**: fixtures use the same constructors production code
//!   uses; TCP tests bind real sockets on ephemeral ports.
//! - **Injected faults**: storage failures come from wrappers around a real
//!   backend, never from mocks of the code under test.
//! - **Observable effects**: every fixture exposes enough (call counts,
//!   handlers) to assert on side effects, not only on return values.

use axo_endpoints::{DistributedEndpoint, EndpointRegistration};
use axo_mobility::{arg, kwarg, ActiveType, Kwargs, MethodTable, TypeRegistry};
use axo_protocol::{ClientConfig, EndpointHandler, EndpointServer};
use axo_runtime::RuntimeConfig;
use axo_scheduler::SchedulerConfig;
use axo_storage::{AxoStorageMetadata, MemoryStorageService, StorageService, Tags};
use axo_types::{AxoError, AxoResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A small stateful object used across the integration tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub count: i64,
    pub label: String,
}

impl Counter {
    pub fn new(label: &str) -> Self {
        Self {
            count: 0,
            label: label.to_string(),
        }
    }

    fn increment(&mut self, args: &[Value], kwargs: &Kwargs) -> AxoResult<Value> {
        let by: i64 = if args.is_empty() { 1 } else { arg(args, 0)? };
        let times: i64 = kwarg(kwargs, "times")?.unwrap_or(1);
        self.count += by * times;
        Ok(json!(self.count))
    }

    fn describe(&mut self, _: &[Value], _: &Kwargs) -> AxoResult<Value> {
        Ok(json!(format!("{}={}", self.label, self.count)))
    }
}

impl ActiveType for Counter {
    const TYPE_NAME: &'static str = "Counter";
    const MODULE: &'static str = "tests_integration";

    fn method_table() -> MethodTable<Self> {
        MethodTable::new()
            .with("increment", Counter::increment)
            .with("describe", Counter::describe)
    }
}

pub fn test_types() -> AxoResult<TypeRegistry> {
    TypeRegistry::new().with::<Counter>()
}

/// Runtime configuration with fast loops, rooted at `dir`.
pub fn runtime_config(dir: &Path) -> RuntimeConfig {
    RuntimeConfig {
        storage_root: dir.join("blobs"),
        upload_bucket_id: "uploads".to_string(),
        upload_max_waiting_time: Duration::from_secs(5),
        scheduler: SchedulerConfig {
            heartbeat: Duration::from_millis(20),
            queue_capacity: 64,
        },
        ..RuntimeConfig::default()
    }
}

/// Client settings that fail fast.
pub fn fast_client() -> ClientConfig {
    ClientConfig::default()
        .with_max_retries(2)
        .with_retry_backoff(Duration::from_millis(50))
        .with_connect_timeout(Duration::from_millis(500))
        .with_receive_timeout(Duration::from_secs(5))
}

/// Serves [`test_types`] on an ephemeral localhost port.
pub fn spawn_server(endpoint_id: &str) -> AxoResult<EndpointServer> {
    let handler = Arc::new(EndpointHandler::new(endpoint_id, test_types()?));
    EndpointServer::bind("127.0.0.1:0", handler)
}

/// Remote endpoint pointing at a running server.
pub fn remote_endpoint(endpoint_id: &str, server: &EndpointServer) -> DistributedEndpoint {
    let registration =
        EndpointRegistration::new(endpoint_id, "127.0.0.1", server.local_addr().port(), 0);
    DistributedEndpoint::new(registration, fast_client())
}

/// Which storage calls should fail.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Puts to keys ending with this suffix fail.
    pub fail_put_suffix: Option<String>,
    /// Every delete fails.
    pub fail_deletes: bool,
}

/// Memory storage with injected faults and call counters.
pub struct FaultyStorage {
    inner: MemoryStorageService,
    plan: Mutex<FaultPlan>,
    gets: Mutex<usize>,
}

impl FaultyStorage {
    pub fn new(plan: FaultPlan) -> Self {
        Self {
            inner: MemoryStorageService::new("faulty"),
            plan: Mutex::new(plan),
            gets: Mutex::new(0),
        }
    }

    pub fn set_plan(&self, plan: FaultPlan) {
        *self.plan.lock() = plan;
    }

    /// Number of data fetches served so far.
    pub fn gets(&self) -> usize {
        *self.gets.lock()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl StorageService for FaultyStorage {
    fn put(
        &self,
        bucket_id: &str,
        key: &str,
        data: &[u8],
        tags: &Tags,
        chunk_size: usize,
    ) -> AxoResult<String> {
        if let Some(suffix) = &self.plan.lock().fail_put_suffix {
            if key.ends_with(suffix.as_str()) {
                return Err(AxoError::put_data(format!("injected failure for {}", key)));
            }
        }
        self.inner.put(bucket_id, key, data, tags, chunk_size)
    }

    fn get(&self, bucket_id: &str, key: &str, chunk_size: usize) -> AxoResult<Vec<u8>> {
        *self.gets.lock() += 1;
        self.inner.get(bucket_id, key, chunk_size)
    }

    fn get_metadata(&self, bucket_id: &str, key: &str) -> AxoResult<AxoStorageMetadata> {
        self.inner.get_metadata(bucket_id, key)
    }

    fn delete(&self, bucket_id: &str, key: &str) -> AxoResult<bool> {
        if self.plan.lock().fail_deletes {
            return Err(AxoError::delete(format!("injected failure for {}", key)));
        }
        self.inner.delete(bucket_id, key)
    }

    fn disable(&self, bucket_id: &str, key: &str) -> AxoResult<()> {
        self.inner.disable(bucket_id, key)
    }
}
