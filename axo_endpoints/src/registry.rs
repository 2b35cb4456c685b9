//! Endpoint registries and selection policies.

use crate::endpoint::Endpoint;
use crate::ports::{allocate_port, allocate_port_pair, PortRange};
use axo_protocol::ConnectOutcome;
use axo_types::{AxoError, AxoResult};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where method calls are sent.
pub trait EndpointRegistry: Send + Sync {
    /// The endpoint registered as `endpoint_id`, or the policy's pick when
    /// the id is empty or unknown.
    fn get_endpoint(&self, endpoint_id: &str) -> AxoResult<Arc<dyn Endpoint>>;

    fn add_endpoint(&self, endpoint: Arc<dyn Endpoint>) -> AxoResult<()>;

    fn remove_endpoint(&self, endpoint_id: &str) -> AxoResult<Arc<dyn Endpoint>>;

    /// Registered endpoints in registration order.
    fn endpoints(&self) -> Vec<Arc<dyn Endpoint>>;

    fn len(&self) -> usize {
        self.endpoints().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Request and event ports held by registered endpoints.
    fn used_ports(&self) -> HashSet<u16> {
        self.endpoints()
            .iter()
            .flat_map(|endpoint| {
                let registration = endpoint.registration();
                [registration.request_port, registration.event_port]
            })
            .collect()
    }

    fn allocate_port(&self, range: &PortRange) -> AxoResult<u16> {
        allocate_port(range, &self.used_ports())
    }

    fn allocate_port_pair(&self, range: &PortRange) -> AxoResult<(u16, u16)> {
        allocate_port_pair(range, &self.used_ports())
    }
}

/// Registry holding the single in-process endpoint.
pub struct LocalEndpointRegistry {
    endpoint: RwLock<Option<Arc<dyn Endpoint>>>,
}

impl LocalEndpointRegistry {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            endpoint: RwLock::new(Some(endpoint)),
        }
    }

    pub fn empty() -> Self {
        Self {
            endpoint: RwLock::new(None),
        }
    }
}

impl EndpointRegistry for LocalEndpointRegistry {
    fn get_endpoint(&self, _endpoint_id: &str) -> AxoResult<Arc<dyn Endpoint>> {
        self.endpoint
            .read()
            .clone()
            .ok_or_else(|| AxoError::not_found("no local endpoint registered"))
    }

    fn add_endpoint(&self, endpoint: Arc<dyn Endpoint>) -> AxoResult<()> {
        let mut slot = self.endpoint.write();
        if let Some(existing) = slot.as_ref() {
            return Err(AxoError::already_exists(format!(
                "local registry already holds endpoint {}",
                existing.id()
            )));
        }
        *slot = Some(endpoint);
        Ok(())
    }

    fn remove_endpoint(&self, endpoint_id: &str) -> AxoResult<Arc<dyn Endpoint>> {
        let mut slot = self.endpoint.write();
        match slot.as_ref() {
            Some(endpoint) if endpoint.id() == endpoint_id => slot
                .take()
                .ok_or_else(|| AxoError::not_found(endpoint_id.to_string())),
            _ => Err(AxoError::not_found(format!(
                "endpoint {} is not registered",
                endpoint_id
            ))),
        }
    }

    fn endpoints(&self) -> Vec<Arc<dyn Endpoint>> {
        self.endpoint.read().iter().cloned().collect()
    }
}

/// Registry of remote endpoints, selected round robin.
///
/// The selection counter only ever grows, so the n-th unpinned call goes to
/// endpoint `n % len` in registration order.
pub struct DistributedEndpointRegistry {
    endpoints: RwLock<Vec<Arc<dyn Endpoint>>>,
    counter: AtomicUsize,
}

impl DistributedEndpointRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for DistributedEndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry for DistributedEndpointRegistry {
    fn get_endpoint(&self, endpoint_id: &str) -> AxoResult<Arc<dyn Endpoint>> {
        let endpoints = self.endpoints.read();
        if endpoints.is_empty() {
            return Err(AxoError::not_found("no endpoints registered"));
        }
        if !endpoint_id.is_empty() {
            if let Some(endpoint) = endpoints.iter().find(|e| e.id() == endpoint_id) {
                return Ok(endpoint.clone());
            }
            debug!(endpoint_id, "unknown endpoint, using round robin");
        }
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % endpoints.len();
        Ok(endpoints[index].clone())
    }

    /// Registers an endpoint after an eager reachability probe.
    ///
    /// An unreachable endpoint is still registered; the failure is logged.
    fn add_endpoint(&self, endpoint: Arc<dyn Endpoint>) -> AxoResult<()> {
        if self.endpoints.read().iter().any(|e| e.id() == endpoint.id()) {
            return Err(AxoError::already_exists(format!(
                "endpoint {} is already registered",
                endpoint.id()
            )));
        }

        match endpoint.probe() {
            ConnectOutcome::Connected => {
                info!(endpoint_id = endpoint.id(), "endpoint reachable");
            }
            ConnectOutcome::Unreachable {
                attempts,
                last_error,
            } => {
                warn!(
                    endpoint_id = endpoint.id(),
                    attempts,
                    error = %last_error,
                    "registering unreachable endpoint"
                );
            }
        }

        let mut endpoints = self.endpoints.write();
        if endpoints.iter().any(|e| e.id() == endpoint.id()) {
            return Err(AxoError::already_exists(format!(
                "endpoint {} is already registered",
                endpoint.id()
            )));
        }
        endpoints.push(endpoint);
        Ok(())
    }

    fn remove_endpoint(&self, endpoint_id: &str) -> AxoResult<Arc<dyn Endpoint>> {
        let mut endpoints = self.endpoints.write();
        let index = endpoints
            .iter()
            .position(|e| e.id() == endpoint_id)
            .ok_or_else(|| AxoError::not_found(format!("endpoint {} is not registered", endpoint_id)))?;
        Ok(endpoints.remove(index))
    }

    fn endpoints(&self) -> Vec<Arc<dyn Endpoint>> {
        self.endpoints.read().clone()
    }

    fn len(&self) -> usize {
        self.endpoints.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::tests::local;
    use crate::endpoint::{DistributedEndpoint, EndpointRegistration};
    use axo_protocol::ClientConfig;
    use axo_types::ErrorKind;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn test_round_robin_order() {
        let registry = DistributedEndpointRegistry::new();
        for id in ["e0", "e1", "e2"] {
            registry.add_endpoint(local(id)).unwrap();
        }
        let picks: Vec<String> = (0..4)
            .map(|_| registry.get_endpoint("").unwrap().id().to_string())
            .collect();
        assert_eq!(picks, vec!["e0", "e1", "e2", "e0"]);
    }

    #[test]
    fn test_known_id_bypasses_policy() {
        let registry = DistributedEndpointRegistry::new();
        registry.add_endpoint(local("e0")).unwrap();
        registry.add_endpoint(local("e1")).unwrap();
        assert_eq!(registry.get_endpoint("e1").unwrap().id(), "e1");
        assert_eq!(registry.get_endpoint("e1").unwrap().id(), "e1");
        assert_eq!(registry.get_endpoint("nope").unwrap().id(), "e0");
    }

    #[test]
    fn test_duplicate_and_removal() {
        let registry = DistributedEndpointRegistry::new();
        registry.add_endpoint(local("e0")).unwrap();
        let err = registry.add_endpoint(local("e0")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);

        registry.remove_endpoint("e0").unwrap();
        assert!(registry.is_empty());
        let err = registry.get_endpoint("").err().unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);
        let err = registry.remove_endpoint("e0").err().unwrap();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_unreachable_endpoint_is_still_registered() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = ClientConfig::default()
            .with_max_retries(1)
            .with_connect_timeout(Duration::from_millis(200));
        let registration = EndpointRegistration::new("far", "127.0.0.1", port, port);
        let registry = DistributedEndpointRegistry::new();
        registry
            .add_endpoint(Arc::new(DistributedEndpoint::new(registration, config)))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_local_registry_holds_one_endpoint() {
        let registry = LocalEndpointRegistry::new(local("only"));
        assert_eq!(registry.get_endpoint("anything").unwrap().id(), "only");
        let err = registry.add_endpoint(local("other")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyExists);

        registry.remove_endpoint("only").unwrap();
        assert!(registry.is_empty());
        registry.add_endpoint(local("other")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ports_avoid_registered_endpoints() {
        let registry = DistributedEndpointRegistry::new();
        let registration = EndpointRegistration::new("e0", "localhost", 16000, 16001);
        let handler = crate::endpoint::tests::handler("e0");
        registry
            .add_endpoint(Arc::new(crate::endpoint::LocalEndpoint::new(registration, handler)))
            .unwrap();

        let range = PortRange::default();
        assert_eq!(registry.allocate_port(&range).unwrap(), 16002);
        assert_eq!(registry.allocate_port_pair(&range).unwrap(), (16002, 16003));
    }
}
