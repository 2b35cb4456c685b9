//! Error taxonomy shared by every Axo crate.
//!
//! Every public operation returns an [`AxoResult`]. The [`ErrorKind`] travels
//! with the error across component boundaries and over the wire, where it is
//! encoded as a signed status code.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or inconsistent data, detected before any I/O
    ValidationFailed,
    /// The addressed resource does not exist
    NotFound,
    /// The resource already exists and may not be replaced
    AlreadyExists,
    /// Backend read failed
    GetDataFailed,
    /// Backend write failed
    PutDataFailed,
    /// Publishing metadata failed
    PutMetadataFailed,
    /// Backend delete failed
    DeleteFailed,
    /// Operation on an invalid or consumed handle
    BadRequest,
    /// Protocol or connection failure
    TransportError,
    /// Remote peer did not answer in time
    Timeout,
    /// Conflicting concurrent access
    ConcurrencyConflict,
    /// Unexpected failure
    InternalError,
}

impl ErrorKind {
    /// All kinds, in wire-code order.
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::ValidationFailed,
        ErrorKind::NotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::GetDataFailed,
        ErrorKind::PutDataFailed,
        ErrorKind::PutMetadataFailed,
        ErrorKind::DeleteFailed,
        ErrorKind::BadRequest,
        ErrorKind::TransportError,
        ErrorKind::Timeout,
        ErrorKind::ConcurrencyConflict,
        ErrorKind::InternalError,
    ];

    /// Signed status code carried in protocol responses.
    ///
    /// `0` is reserved for success, so every kind maps to a negative value.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::ValidationFailed => -1,
            ErrorKind::NotFound => -2,
            ErrorKind::AlreadyExists => -3,
            ErrorKind::GetDataFailed => -4,
            ErrorKind::PutDataFailed => -5,
            ErrorKind::PutMetadataFailed => -6,
            ErrorKind::DeleteFailed => -7,
            ErrorKind::BadRequest => -8,
            ErrorKind::TransportError => -9,
            ErrorKind::Timeout => -10,
            ErrorKind::ConcurrencyConflict => -11,
            ErrorKind::InternalError => -12,
        }
    }

    /// Inverse of [`ErrorKind::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }

    /// Stable upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::AlreadyExists => "ALREADY_EXISTS",
            ErrorKind::GetDataFailed => "GET_DATA_FAILED",
            ErrorKind::PutDataFailed => "PUT_DATA_FAILED",
            ErrorKind::PutMetadataFailed => "PUT_METADATA_FAILED",
            ErrorKind::DeleteFailed => "DELETE_FAILED",
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::TransportError => "TRANSPORT_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct AxoError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result alias used throughout the runtime.
pub type AxoResult<T> = Result<T, AxoError>;

impl AxoError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn get_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GetDataFailed, message)
    }

    pub fn put_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PutDataFailed, message)
    }

    pub fn put_metadata(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PutMetadataFailed, message)
    }

    pub fn delete(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeleteFailed, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConcurrencyConflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Prefixes the message while keeping the originating kind.
    pub fn with_context(self, context: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{}: {}", context, self.message),
        }
    }

    /// Returns true if the error has the given kind.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}
