//! # Storage Blob Layer
//!
//! This crate stores the bytes behind active objects and their artifacts.
//!
//! ## Philosophy
//!
//! **A blob is only as good as its checksum.**
//!
//! Every stored blob carries metadata with its size and SHA-256. The rule
//! `size == len(data) && checksum == sha256(data)` is enforced twice:
//! a violating write is rejected before any I/O, and a violating read is an
//! error, never silently returned data.
//!
//! ## Design
//!
//! - **StorageService**: bucketed key/value interface shared by all backends
//! - **MemoryStorageService** / **LocalStorageService**: in-process and
//!   directory-per-bucket backends
//! - **AxoStorage**: two-blob layout (`K_source`, `K_attrs`) for active objects
//! - **BallRef**: immutable reference to a stored blob
//! - **Pointer**: lazy, optionally single-use materialization of a `BallRef`

pub mod axo;
pub mod local;
pub mod memory;
pub mod metadata;
pub mod pointer;
pub mod service;

pub use axo::{attrs_key, source_key, AxoBlob, AxoStorage, StoredObject, ATTRS_SUFFIX, SOURCE_SUFFIX};
pub use local::LocalStorageService;
pub use memory::MemoryStorageService;
pub use metadata::{
    checksum, chunk_refs, AxoStorageMetadata, BallRef, ChunkRef, Tags, BALL_SCHEMA_VERSION,
    DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_TYPE,
};
pub use pointer::{Pointer, PointerState};
pub use service::{validate_location, StorageService};
