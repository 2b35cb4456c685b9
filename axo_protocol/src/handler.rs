//! Server-side request handling.

use crate::events::{Event, EventPublisher};
use crate::wire::{MethodExecRequest, Operation, Request, Response, ResponseMetadata};
use axo_mobility::TypeRegistry;
use axo_types::{AxoError, AxoResult, MetadataX};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Executes requests addressed to one endpoint.
///
/// The handler keeps the identity records pushed with `PUT_METADATA` and
/// rebuilds objects for `METHOD_EXEC` through its [`TypeRegistry`].
pub struct EndpointHandler {
    endpoint_id: String,
    types: TypeRegistry,
    metadata: RwLock<HashMap<String, MetadataX>>,
    events: Option<Arc<EventPublisher>>,
}

impl EndpointHandler {
    pub fn new(endpoint_id: impl Into<String>, types: TypeRegistry) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            types,
            metadata: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    /// Publishes an event after every method execution.
    pub fn with_events(mut self, events: Arc<EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Identity record last stored under `key`.
    pub fn metadata(&self, key: &str) -> Option<MetadataX> {
        self.metadata.read().get(key).cloned()
    }

    pub fn metadata_count(&self) -> usize {
        self.metadata.read().len()
    }

    /// Handles a raw multipart request and always produces a response.
    pub fn handle_parts(&self, parts: Vec<Vec<u8>>) -> AxoResult<Vec<Vec<u8>>> {
        match Request::from_parts(parts) {
            Ok(request) => self.handle(&request).into_parts(),
            Err(err) => {
                warn!(endpoint_id = %self.endpoint_id, error = %err, "malformed request");
                Response::error("", "", self.response_metadata(Instant::now()), &err).into_parts()
            }
        }
    }

    pub fn handle(&self, request: &Request) -> Response {
        let started = Instant::now();
        let result = self.dispatch(request);
        let metadata = self.response_metadata(started);
        let response = match result {
            Ok(payload) => Response::ok(request, metadata, payload),
            Err(err) => {
                debug!(
                    endpoint_id = %self.endpoint_id,
                    topic = %request.topic,
                    operation = %request.operation,
                    error = %err,
                    "request failed"
                );
                Response::error(
                    request.topic.clone(),
                    request.operation.as_str(),
                    metadata,
                    &err,
                )
            }
        };

        if request.operation == Operation::MethodExec {
            if let Some(events) = &self.events {
                events.publish(&Event::new(
                    self.endpoint_id.clone(),
                    request.topic.clone(),
                    request.operation.as_str(),
                    response.status,
                ));
            }
        }
        response
    }

    fn response_metadata(&self, started: Instant) -> ResponseMetadata {
        ResponseMetadata {
            endpoint_id: self.endpoint_id.clone(),
            service_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn dispatch(&self, request: &Request) -> AxoResult<Vec<u8>> {
        match request.operation {
            Operation::Ping => Ok(request.payload.clone()),
            Operation::PutMetadata => self.put_metadata(&request.payload),
            Operation::MethodExec => self.method_exec(&request.payload),
        }
    }

    fn put_metadata(&self, payload: &[u8]) -> AxoResult<Vec<u8>> {
        let metadata: MetadataX = serde_json::from_slice(payload)
            .map_err(|err| AxoError::put_metadata(format!("invalid metadata: {}", err)))?;
        info!(
            endpoint_id = %self.endpoint_id,
            key = metadata.key(),
            uri = metadata.uri(),
            "stored metadata"
        );
        self.metadata
            .write()
            .insert(metadata.key().to_string(), metadata);
        Ok(Vec::new())
    }

    fn method_exec(&self, payload: &[u8]) -> AxoResult<Vec<u8>> {
        let request = MethodExecRequest::decode(payload)?;
        let mut object = self.types.from_bytes(&request.frame)?;
        let result = object.call(&request.method, &request.args, &request.kwargs)?;
        debug!(
            endpoint_id = %self.endpoint_id,
            key = %request.key,
            method = %request.method,
            "executed method"
        );
        serde_json::to_vec(&result)
            .map_err(|err| AxoError::internal(format!("method result: {}", err)))
    }
}
