use crate::config::ServiceConfig;
use crate::endpoint::{self, EndpointRef};
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::Invocation;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Source of the current endpoint list for a service.
///
/// A directory is usually backed by a registry subscription and may return a
/// different list on every call. The cluster layer treats each returned list as
/// a read-only snapshot.
pub trait Directory: Send + Sync {
    /// Service interface name, used in error messages
    fn service(&self) -> &str;

    /// Consumer-side configuration of the service
    fn config(&self) -> &ServiceConfig;

    /// Current endpoints for `invocation`.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails or the directory is destroyed.
    fn list(&self, invocation: &Invocation) -> Result<Vec<EndpointRef>>;

    /// Returns `true` if at least one endpoint can currently be called.
    fn is_available(&self) -> bool;

    /// Releases the directory. Must be idempotent.
    fn destroy(&self) {}
}

/// Directory over an explicitly managed endpoint list.
///
/// Endpoints are kept in insertion order; duplicates (same address and service
/// key) are ignored.
///
/// # Example
///
/// ```ignore
/// let directory = StaticDirectory::new(ServiceConfig::new("UserService"), endpoints);
/// directory.add_endpoint(another);
/// assert_eq!(directory.endpoint_count(), 3);
/// ```
pub struct StaticDirectory {
    config: ServiceConfig,
    endpoints: RwLock<Vec<EndpointRef>>,
    destroyed: AtomicBool,
}

impl StaticDirectory {
    /// Creates a directory with a static endpoint list.
    pub fn new(config: ServiceConfig, endpoints: Vec<EndpointRef>) -> Self {
        let mut unique: Vec<EndpointRef> = Vec::with_capacity(endpoints.len());
        for ep in endpoints {
            if !endpoint::contains(&unique, &ep) {
                unique.push(ep);
            }
        }

        Self {
            config,
            endpoints: RwLock::new(unique),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Adds an endpoint to the list
    pub fn add_endpoint(&self, ep: EndpointRef) {
        let mut endpoints = self.endpoints.write();
        if !endpoint::contains(&endpoints, &ep) {
            endpoints.push(ep);
        }
    }

    /// Removes every endpoint with the given address
    pub fn remove_endpoint(&self, address: &str) {
        self.endpoints.write().retain(|e| e.address() != address);
    }

    /// Get the number of endpoints
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Get a snapshot of all endpoints
    pub fn endpoints(&self) -> Vec<EndpointRef> {
        self.endpoints.read().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl Directory for StaticDirectory {
    fn service(&self) -> &str {
        &self.config.interface
    }

    fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn list(&self, _invocation: &Invocation) -> Result<Vec<EndpointRef>> {
        if self.is_destroyed() {
            return Err(MadrpcError::Destroyed {
                service: self.config.interface.clone(),
            });
        }
        Ok(self.endpoints())
    }

    fn is_available(&self) -> bool {
        !self.is_destroyed() && self.endpoints.read().iter().any(|e| e.is_available())
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.endpoints.write().clear();
            tracing::debug!(service = %self.config.interface, "Static directory destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use async_trait::async_trait;
    use madrpc_common::protocol::RpcResult;
    use serde_json::json;
    use std::sync::Arc;

    struct Node {
        addr: String,
        up: bool,
    }

    #[async_trait]
    impl Endpoint for Node {
        fn address(&self) -> &str {
            &self.addr
        }

        fn service_key(&self) -> &str {
            "Svc"
        }

        fn is_available(&self) -> bool {
            self.up
        }

        async fn invoke(&self, _invocation: &Invocation) -> Result<RpcResult> {
            Ok(RpcResult::empty())
        }
    }

    fn node(addr: &str, up: bool) -> EndpointRef {
        Arc::new(Node {
            addr: addr.to_string(),
            up,
        })
    }

    fn directory(endpoints: Vec<EndpointRef>) -> StaticDirectory {
        StaticDirectory::new(ServiceConfig::new("Svc"), endpoints)
    }

    #[test]
    fn test_directory_creation_dedupes() {
        let dir = directory(vec![node("a", true), node("a", true), node("b", true)]);
        assert_eq!(dir.endpoint_count(), 2);
    }

    #[test]
    fn test_add_endpoint() {
        let dir = directory(vec![node("a", true)]);
        dir.add_endpoint(node("b", true));
        assert_eq!(dir.endpoint_count(), 2);
    }

    #[test]
    fn test_add_duplicate_endpoint() {
        let dir = directory(vec![node("a", true)]);
        dir.add_endpoint(node("a", true));
        assert_eq!(dir.endpoint_count(), 1);
    }

    #[test]
    fn test_remove_endpoint() {
        let dir = directory(vec![node("a", true), node("b", true), node("c", true)]);
        dir.remove_endpoint("b");
        assert_eq!(endpoint::addresses(&dir.endpoints()), vec!["a", "c"]);
    }

    #[test]
    fn test_list_returns_snapshot_in_order() {
        let dir = directory(vec![node("a", true), node("b", false)]);
        let list = dir.list(&Invocation::new("m", json!(null))).unwrap();
        assert_eq!(endpoint::addresses(&list), vec!["a", "b"]);
    }

    #[test]
    fn test_availability() {
        assert!(directory(vec![node("a", false), node("b", true)]).is_available());
        assert!(!directory(vec![node("a", false)]).is_available());
        assert!(!directory(vec![]).is_available());
    }

    #[test]
    fn test_destroy_is_idempotent_and_rejects_list() {
        let dir = directory(vec![node("a", true)]);
        dir.destroy();
        dir.destroy();
        assert!(dir.is_destroyed());
        assert!(!dir.is_available());
        let err = dir.list(&Invocation::new("m", json!(null))).err().unwrap();
        assert!(err.is_destroyed());
    }
}
