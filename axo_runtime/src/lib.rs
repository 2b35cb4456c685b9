//! # Axo Runtime
//!
//! Ties the pieces together: objects are persisted through the storage
//! layer, their methods are dispatched to endpoints picked by the registry,
//! and file uploads are deferred through the scheduler until the file is
//! complete.
//!
//! ## Philosophy
//!
//! - **Injected, not global**: storage, registry and type table are passed
//!   in. A runtime owns nothing it was not handed, apart from its two loops.
//! - **Loops own their state**: the scheduler owns the waiting queue, the
//!   runtime loop owns the upload de-duplication set and task history.
//!   Callers only see [`TaskReport`]s.
//! - **Shutdown is explicit**: [`Runtime::shutdown`] stops both loops and
//!   returns the task history; dropping a runtime does the same silently.
//!
//! ## Example
//!
//! ```ignore
//! logging::init_tracing("info");
//! let runtime = Runtime::local(RuntimeConfig::from_env(), types)?;
//! runtime.persistify(&counter, &metadata)?;
//! let value = runtime.call(&mut counter, &metadata, "increment", &[json!(1)], &Kwargs::new())?;
//! ```

pub mod config;
pub mod invoker;
pub mod logging;
pub mod runtime;

pub use config::{RuntimeConfig, RuntimeMode};
pub use invoker::{DirectInvoker, Invoker, ProxyInvoker};
pub use logging::{init_test_tracing, init_tracing};
pub use runtime::{Runtime, TaskReport, BUCKET_KEY, KEY_KEY};
