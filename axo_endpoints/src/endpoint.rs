//! Endpoints: the places where methods run.

use axo_protocol::{
    ClientConfig, ConnectOutcome, ConnectionState, EndpointClient, EndpointHandler,
    MethodExecRequest, Operation, Request, ResponseMetadata, TcpTransport, Transport,
};
use axo_types::{AxoError, AxoResult, MetadataX};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// How an endpoint is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRegistration {
    pub endpoint_id: String,
    pub hostname: String,
    pub protocol: String,
    pub request_port: u16,
    pub event_port: u16,
}

impl EndpointRegistration {
    pub fn new(
        endpoint_id: impl Into<String>,
        hostname: impl Into<String>,
        request_port: u16,
        event_port: u16,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            hostname: hostname.into(),
            protocol: "tcp".to_string(),
            request_port,
            event_port,
        }
    }

    pub fn request_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.request_port)
    }

    pub fn event_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.event_port)
    }
}

/// A place where active-object methods can run.
pub trait Endpoint: Send + Sync {
    fn id(&self) -> &str;

    fn registration(&self) -> &EndpointRegistration;

    /// Checks reachability without failing.
    fn probe(&self) -> ConnectOutcome;

    fn ping(&self) -> AxoResult<ResponseMetadata>;

    fn put_metadata(&self, metadata: &MetadataX) -> AxoResult<()>;

    fn method_exec(&self, request: &MethodExecRequest) -> AxoResult<Value>;
}

/// Endpoint served by a handler in this process.
pub struct LocalEndpoint {
    registration: EndpointRegistration,
    handler: Arc<EndpointHandler>,
}

impl LocalEndpoint {
    pub fn new(registration: EndpointRegistration, handler: Arc<EndpointHandler>) -> Self {
        Self {
            registration,
            handler,
        }
    }

    pub fn handler(&self) -> &Arc<EndpointHandler> {
        &self.handler
    }

    fn handle(&self, request: Request) -> AxoResult<Vec<u8>> {
        self.handler.handle(&request).into_result()
    }
}

impl Endpoint for LocalEndpoint {
    fn id(&self) -> &str {
        &self.registration.endpoint_id
    }

    fn registration(&self) -> &EndpointRegistration {
        &self.registration
    }

    fn probe(&self) -> ConnectOutcome {
        ConnectOutcome::Connected
    }

    fn ping(&self) -> AxoResult<ResponseMetadata> {
        let response = self
            .handler
            .handle(&Request::new("ping", Operation::Ping, Vec::new()));
        let metadata = response.metadata.clone();
        response.into_result()?;
        Ok(metadata)
    }

    fn put_metadata(&self, metadata: &MetadataX) -> AxoResult<()> {
        let payload = serde_json::to_vec(metadata)
            .map_err(|err| AxoError::put_metadata(err.to_string()))?;
        self.handle(Request::new(metadata.key(), Operation::PutMetadata, payload))
            .map(|_| ())
    }

    fn method_exec(&self, request: &MethodExecRequest) -> AxoResult<Value> {
        let result = self.handle(Request::new(
            request.key.clone(),
            Operation::MethodExec,
            request.encode()?,
        ))?;
        serde_json::from_slice(&result)
            .map_err(|err| AxoError::internal(format!("method result: {}", err)))
    }
}

/// Endpoint reached through an [`EndpointClient`].
///
/// The client sits behind a mutex, so concurrent callers take turns.
pub struct DistributedEndpoint {
    registration: EndpointRegistration,
    client: Mutex<EndpointClient>,
}

impl DistributedEndpoint {
    /// Connects over TCP to the registration's request port.
    pub fn new(registration: EndpointRegistration, config: ClientConfig) -> Self {
        let transport = TcpTransport::new(registration.request_addr(), &config);
        Self::with_transport(registration, Box::new(transport), config)
    }

    pub fn with_transport(
        registration: EndpointRegistration,
        transport: Box<dyn Transport>,
        config: ClientConfig,
    ) -> Self {
        let client = EndpointClient::new(registration.endpoint_id.clone(), transport, config);
        Self {
            registration,
            client: Mutex::new(client),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.lock().state()
    }
}

impl Endpoint for DistributedEndpoint {
    fn id(&self) -> &str {
        &self.registration.endpoint_id
    }

    fn registration(&self) -> &EndpointRegistration {
        &self.registration
    }

    fn probe(&self) -> ConnectOutcome {
        self.client.lock().ensure_connected()
    }

    fn ping(&self) -> AxoResult<ResponseMetadata> {
        self.client.lock().ping()
    }

    fn put_metadata(&self, metadata: &MetadataX) -> AxoResult<()> {
        self.client.lock().put_metadata(metadata)
    }

    fn method_exec(&self, request: &MethodExecRequest) -> AxoResult<Value> {
        self.client.lock().method_exec(request)
    }
}
