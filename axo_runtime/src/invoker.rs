//! Method invocation strategies.

use axo_endpoints::EndpointRegistry;
use axo_mobility::{to_bytes, ActiveObject, Kwargs};
use axo_protocol::MethodExecRequest;
use axo_types::{AxoResult, MetadataX};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Runs a method of an active object somewhere.
pub trait Invoker: Send + Sync {
    fn invoke(
        &self,
        object: &mut dyn ActiveObject,
        metadata: &MetadataX,
        method: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> AxoResult<Value>;
}

/// Calls the method on the object in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectInvoker;

impl Invoker for DirectInvoker {
    fn invoke(
        &self,
        object: &mut dyn ActiveObject,
        _metadata: &MetadataX,
        method: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> AxoResult<Value> {
        object.call(method, args, kwargs)
    }
}

/// Ships the object to an endpoint chosen by the registry and runs the
/// method there.
///
/// The endpoint receives a snapshot: state changes made by the remote call
/// stay on the endpoint.
#[derive(Clone)]
pub struct ProxyInvoker {
    registry: Arc<dyn EndpointRegistry>,
}

impl ProxyInvoker {
    pub fn new(registry: Arc<dyn EndpointRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<dyn EndpointRegistry> {
        &self.registry
    }
}

impl Invoker for ProxyInvoker {
    fn invoke(
        &self,
        object: &mut dyn ActiveObject,
        metadata: &MetadataX,
        method: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> AxoResult<Value> {
        let endpoint = self.registry.get_endpoint(metadata.endpoint_id())?;
        endpoint.put_metadata(metadata)?;
        let request = MethodExecRequest {
            key: metadata.key().to_string(),
            method: method.to_string(),
            frame: to_bytes(&*object)?,
            args: args.to_vec(),
            kwargs: kwargs.clone(),
        };
        debug!(
            endpoint_id = endpoint.id(),
            uri = %metadata.uri_for_method(method),
            "dispatching method"
        );
        endpoint.method_exec(&request)
    }
}
