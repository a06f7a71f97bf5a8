use async_trait::async_trait;
use madrpc_common::protocol::error::Result;
use madrpc_common::protocol::{Invocation, RpcResult};
use std::sync::Arc;

/// A single callable remote target.
///
/// Endpoints are provided by the surrounding system (one per provider process
/// and service). The cluster layer only reads their availability and invokes
/// them; it never changes their state.
///
/// # Identity
///
/// Two endpoints are the same endpoint when both their [`address`](Self::address)
/// and [`service_key`](Self::service_key) are equal. A single endpoint list never
/// contains the same endpoint twice.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Network address of the provider (e.g., "127.0.0.1:9001")
    fn address(&self) -> &str;

    /// Key of the service this endpoint implements, formatted as
    /// `group/interface:version` with empty parts omitted
    fn service_key(&self) -> &str;

    /// Live availability of the endpoint. Never cached by callers.
    fn is_available(&self) -> bool;

    /// Endpoint-level parameter lookup (e.g., `registry.default`).
    fn parameter(&self, _key: &str) -> Option<&str> {
        None
    }

    /// Performs the call against this endpoint.
    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult>;
}

/// Shared handle to an endpoint.
pub type EndpointRef = Arc<dyn Endpoint>;

/// Returns `true` if `a` and `b` identify the same endpoint.
pub fn same_endpoint(a: &dyn Endpoint, b: &dyn Endpoint) -> bool {
    a.address() == b.address() && a.service_key() == b.service_key()
}

/// Returns `true` if `endpoint` is a member of `endpoints`.
pub fn contains(endpoints: &[EndpointRef], endpoint: &EndpointRef) -> bool {
    endpoints
        .iter()
        .any(|e| same_endpoint(e.as_ref(), endpoint.as_ref()))
}

/// Position of `endpoint` within `endpoints`.
pub fn position(endpoints: &[EndpointRef], endpoint: &EndpointRef) -> Option<usize> {
    endpoints
        .iter()
        .position(|e| same_endpoint(e.as_ref(), endpoint.as_ref()))
}

/// Addresses of `endpoints`, in order.
pub fn addresses(endpoints: &[EndpointRef]) -> Vec<String> {
    endpoints.iter().map(|e| e.address().to_string()).collect()
}
