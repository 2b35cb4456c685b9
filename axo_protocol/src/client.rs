//! Endpoint client and its connection state machine.

use crate::config::ClientConfig;
use crate::transport::Transport;
use crate::wire::{MethodExecRequest, Operation, Request, Response, ResponseMetadata};
use axo_types::{AxoError, AxoResult, ErrorKind, MetadataX};
use serde_json::Value;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

const PING_TOPIC: &str = "ping";
const PING_PAYLOAD: &[u8] = b"ping";

/// Connection lifecycle of an [`EndpointClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Healthy,
    Failed,
}

/// Result of [`EndpointClient::ensure_connected`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    Connected,
    /// Every attempt failed. Not fatal: the next call tries again.
    Unreachable { attempts: u32, last_error: AxoError },
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectOutcome::Connected)
    }
}

/// Client for one remote endpoint.
///
/// Requests take `&mut self`, so at most one request is in flight per
/// client. Callers that share a client wrap it in a mutex.
pub struct EndpointClient {
    endpoint_id: String,
    transport: Box<dyn Transport>,
    config: ClientConfig,
    state: ConnectionState,
    last_healthy: Option<Instant>,
}

impl EndpointClient {
    pub fn new(
        endpoint_id: impl Into<String>,
        transport: Box<dyn Transport>,
        config: ClientConfig,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            transport,
            config,
            state: ConnectionState::Disconnected,
            last_healthy: None,
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peer(&self) -> &str {
        self.transport.peer()
    }

    fn health_is_fresh(&self) -> bool {
        self.state == ConnectionState::Healthy
            && self
                .last_healthy
                .map(|at| at.elapsed() < self.config.health_check_interval)
                .unwrap_or(false)
    }

    fn exchange(&mut self, request: Request) -> AxoResult<Response> {
        let topic = request.topic.clone();
        let operation = request.operation;
        let parts = self.transport.request(request.into_parts())?;
        let response = Response::from_parts(parts)?;
        if response.topic != topic || response.operation != operation.as_str() {
            return Err(AxoError::transport(format!(
                "response for {}/{} does not match request {}/{}",
                response.topic, response.operation, topic, operation
            )));
        }
        Ok(response)
    }

    fn probe(&mut self) -> AxoResult<ResponseMetadata> {
        let request = Request::new(PING_TOPIC, Operation::Ping, PING_PAYLOAD.to_vec());
        let response = self.exchange(request)?;
        let metadata = response.metadata.clone();
        if response.into_result()? != PING_PAYLOAD {
            return Err(AxoError::transport("ping echo mismatch"));
        }
        Ok(metadata)
    }

    /// Makes sure the endpoint answers pings.
    ///
    /// A healthy connection whose last successful ping is older than the
    /// health-check interval is pinged again first. Otherwise up to
    /// `max_retries` connect-and-ping cycles run, with a fixed backoff
    /// between them.
    pub fn ensure_connected(&mut self) -> ConnectOutcome {
        if self.health_is_fresh() {
            return ConnectOutcome::Connected;
        }
        if self.state == ConnectionState::Healthy {
            match self.probe() {
                Ok(_) => {
                    self.last_healthy = Some(Instant::now());
                    return ConnectOutcome::Connected;
                }
                Err(err) => {
                    warn!(endpoint_id = %self.endpoint_id, error = %err, "health check failed");
                }
            }
        }

        let attempts = self.config.max_retries.max(1);
        let mut last_error = AxoError::transport("no connection attempt made");
        for attempt in 1..=attempts {
            self.state = ConnectionState::Connecting;
            let result = match self.transport.reconnect() {
                Ok(()) => self.probe(),
                Err(err) => Err(err),
            };
            match result {
                Ok(metadata) => {
                    self.state = ConnectionState::Healthy;
                    self.last_healthy = Some(Instant::now());
                    info!(
                        endpoint_id = %self.endpoint_id,
                        peer = self.transport.peer(),
                        remote_endpoint = %metadata.endpoint_id,
                        attempt,
                        "endpoint connected"
                    );
                    return ConnectOutcome::Connected;
                }
                Err(err) => {
                    debug!(
                        endpoint_id = %self.endpoint_id,
                        attempt,
                        error = %err,
                        "connection attempt failed"
                    );
                    last_error = err;
                    if attempt < attempts {
                        thread::sleep(self.config.retry_backoff);
                    }
                }
            }
        }

        self.state = ConnectionState::Failed;
        self.transport.close();
        warn!(
            endpoint_id = %self.endpoint_id,
            peer = self.transport.peer(),
            attempts,
            error = %last_error,
            "endpoint unreachable"
        );
        ConnectOutcome::Unreachable {
            attempts,
            last_error,
        }
    }

    fn call(&mut self, request: Request) -> AxoResult<Response> {
        if let ConnectOutcome::Unreachable { last_error, .. } = self.ensure_connected() {
            return Err(AxoError::transport(format!(
                "endpoint {} unreachable: {}",
                self.endpoint_id, last_error
            )));
        }
        let result = self.exchange(request);
        if let Err(err) = &result {
            if err.is(ErrorKind::TransportError) || err.is(ErrorKind::Timeout) {
                self.state = ConnectionState::Failed;
            }
        }
        result
    }

    /// Round trip that bypasses the freshness shortcut of the health check.
    pub fn ping(&mut self) -> AxoResult<ResponseMetadata> {
        let response = self.call(Request::new(
            PING_TOPIC,
            Operation::Ping,
            PING_PAYLOAD.to_vec(),
        ))?;
        let metadata = response.metadata.clone();
        response.into_result()?;
        self.last_healthy = Some(Instant::now());
        Ok(metadata)
    }

    /// Publishes an identity record to the endpoint.
    pub fn put_metadata(&mut self, metadata: &MetadataX) -> AxoResult<()> {
        let payload = serde_json::to_vec(metadata)
            .map_err(|err| AxoError::put_metadata(err.to_string()))?;
        self.call(Request::new(
            metadata.key(),
            Operation::PutMetadata,
            payload,
        ))?
        .into_result()
        .map(|_| ())
    }

    /// Runs a method remotely and returns its JSON result.
    pub fn method_exec(&mut self, request: &MethodExecRequest) -> AxoResult<Value> {
        let payload = request.encode()?;
        let response = self.call(Request::new(
            request.key.clone(),
            Operation::MethodExec,
            payload,
        ))?;
        let result = response.into_result()?;
        serde_json::from_slice(&result)
            .map_err(|err| AxoError::transport(format!("method result: {}", err)))
    }

    pub fn disconnect(&mut self) {
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        self.last_healthy = None;
    }
}
