//! # Endpoint Protocol
//!
//! This crate moves method calls between a caller and the endpoint that
//! executes them.
//!
//! ## Philosophy
//!
//! - **Explicit framing**: a request is exactly `[topic, operation, payload]`
//!   and a response exactly `[topic, operation, status, metadata, result]`.
//!   Anything else is a transport error.
//! - **Failures keep their kind**: a remote `NOT_FOUND` arrives as a local
//!   `ErrorKind::NotFound`, carried by the signed status code.
//! - **Unreachable is not fatal**: a client that exhausts its retries
//!   reports `ConnectOutcome::Unreachable` and tries again on the next call.
//!
//! ## Design
//!
//! - **Transport**: `TcpTransport` for real peers, `LoopbackTransport` for
//!   in-process endpoints
//! - **EndpointClient**: connection state machine with health checks
//! - **EndpointHandler** / **EndpointServer**: server side
//! - **EventPublisher** / **EventSubscriber**: best-effort notifications

pub mod client;
pub mod config;
pub mod events;
pub mod handler;
mod net;
pub mod server;
pub mod transport;
pub mod wire;

pub use client::{ConnectOutcome, ConnectionState, EndpointClient};
pub use config::ClientConfig;
pub use events::{Event, EventPublisher, EventSubscriber};
pub use handler::EndpointHandler;
pub use server::EndpointServer;
pub use transport::{LoopbackTransport, TcpTransport, Transport};
pub use wire::{
    read_message, write_message, MethodExecRequest, Operation, Request, Response,
    ResponseMetadata, STATUS_OK,
};
