//! # Axo Types
//!
//! This crate defines the fundamental types shared by every part of the
//! Axo active-object runtime.
//!
//! ## Philosophy
//!
//! - **Identity is derived, not edited**: an object's URI is always a pure
//!   function of its identity fields.
//! - **Copies, not mutation**: version bumps and endpoint moves return new
//!   records, so concurrent readers never observe a half-updated identity.
//! - **Tagged failures**: every error carries an [`ErrorKind`] that survives
//!   component and network boundaries.
//!
//! ## Key Types
//!
//! - [`MetadataX`]: canonical identity of an active object instance
//! - [`AxoUri`]: parsed `axo://bucket:key/version` address
//! - [`AxoError`] / [`ErrorKind`]: the error taxonomy

pub mod error;
pub mod ids;
pub mod metadata;

pub use error::{AxoError, AxoResult, ErrorKind};
pub use ids::{generate_id, is_generated_id, new_id, DEFAULT_ID_LEN, ID_ALPHABET};
pub use metadata::{normalize, AxoUri, MetadataInit, MetadataX, VersionBump, URI_SCHEME};
