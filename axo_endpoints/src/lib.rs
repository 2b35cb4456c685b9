//! # Endpoint Registry
//!
//! This crate decides where a method call runs.
//!
//! ## Philosophy
//!
//! Callers never pick sockets. They ask a registry for an endpoint, either by
//! id or by letting the registry's policy choose, and talk to whatever
//! [`Endpoint`] comes back. Whether that endpoint lives in this process or
//! across the network is the registry's business.
//!
//! ## Design
//!
//! - **LocalEndpointRegistry**: one in-process endpoint
//! - **DistributedEndpointRegistry**: remote endpoints, round robin
//! - **PortRange**: ports handed to new endpoints, never reusing held ones

pub mod endpoint;
pub mod ports;
pub mod registry;

pub use endpoint::{DistributedEndpoint, Endpoint, EndpointRegistration, LocalEndpoint};
pub use ports::{allocate_port, allocate_port_pair, PortRange};
pub use registry::{DistributedEndpointRegistry, EndpointRegistry, LocalEndpointRegistry};
