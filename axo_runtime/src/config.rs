//! Runtime configuration.

use axo_protocol::ClientConfig;
use axo_scheduler::SchedulerConfig;
use axo_storage::DEFAULT_CHUNK_SIZE;
use axo_types::{new_id, AxoError, AxoResult};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where method calls run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// One endpoint inside this process
    Local,
    /// Remote endpoints reached over the network
    Distributed,
}

impl FromStr for RuntimeMode {
    type Err = AxoError;

    fn from_str(s: &str) -> AxoResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(RuntimeMode::Local),
            "distributed" => Ok(RuntimeMode::Distributed),
            other => Err(AxoError::validation(format!("unknown runtime mode '{}'", other))),
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeMode::Local => write!(f, "local"),
            RuntimeMode::Distributed => write!(f, "distributed"),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub runtime_id: String,
    pub mode: RuntimeMode,
    /// Host this runtime's endpoint is reached at
    pub hostname: String,
    pub protocol: String,
    pub request_port: u16,
    pub event_port: u16,
    /// Root directory of the local blob store
    pub storage_root: PathBuf,
    /// Bucket that scheduled file uploads land in
    pub upload_bucket_id: String,
    pub chunk_size: usize,
    /// Maximum waiting time given to upload tasks
    pub upload_max_waiting_time: Duration,
    pub log_level: String,
    /// Completed tasks remembered by the runtime loop
    pub task_history_limit: usize,
    pub client: ClientConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_id: new_id(),
            mode: RuntimeMode::Local,
            hostname: "127.0.0.1".to_string(),
            protocol: "tcp".to_string(),
            request_port: 16667,
            event_port: 16666,
            storage_root: std::env::temp_dir().join("axo"),
            upload_bucket_id: "axo-uploads".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            upload_max_waiting_time: Duration::from_secs(60),
            log_level: "info".to_string(),
            task_history_limit: 10_000,
            client: ClientConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl RuntimeConfig {
    /// Builds the configuration from `AXO_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let runtime_id = std::env::var("AXO_RUNTIME_ID").unwrap_or(defaults.runtime_id);
        let mode = env_parse("AXO_MODE").unwrap_or(defaults.mode);
        let hostname = std::env::var("AXO_HOSTNAME").unwrap_or(defaults.hostname);
        let protocol = std::env::var("AXO_PROTOCOL").unwrap_or(defaults.protocol);
        let request_port = env_parse("AXO_REQ_PORT").unwrap_or(defaults.request_port);
        let event_port = env_parse("AXO_PUBSUB_PORT").unwrap_or(defaults.event_port);
        let storage_root = std::env::var("AXO_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_root);
        let upload_bucket_id =
            std::env::var("AXO_BUCKET_ID").unwrap_or(defaults.upload_bucket_id);
        let chunk_size = env_parse("AXO_CHUNK_SIZE")
            .filter(|size: &usize| *size > 0)
            .unwrap_or(defaults.chunk_size);
        let upload_max_waiting_time = env_parse("AXO_UPLOAD_MAX_WAIT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.upload_max_waiting_time);
        let log_level = std::env::var("AXO_LOG_LEVEL").unwrap_or(defaults.log_level);
        let task_history_limit =
            env_parse("AXO_TASK_HISTORY").unwrap_or(defaults.task_history_limit);

        Self {
            runtime_id,
            mode,
            hostname,
            protocol,
            request_port,
            event_port,
            storage_root,
            upload_bucket_id,
            chunk_size,
            upload_max_waiting_time,
            log_level,
            task_history_limit,
            client: ClientConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
        }
    }

    pub fn request_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.request_port)
    }

    pub fn event_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.event_port)
    }
}
