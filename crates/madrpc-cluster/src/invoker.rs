//! Cluster invoker
//!
//! [`ClusterInvoker`] is what the application layer calls. It owns the
//! [`Selector`] and the endpoint [`Directory`] of one service, and hands every
//! call to the configured [`ClusterKind`] strategy.
//!
//! # Call flow
//!
//! 1. Reject the call if the invoker was destroyed
//! 2. Tag the invocation with its id (`invocation.id` attachment)
//! 3. Fetch the current endpoint list from the directory
//! 4. Resolve the load-balance policy for the called method
//! 5. Run the strategy
//!
//! # Example
//!
//! ```ignore
//! let directory = Arc::new(StaticDirectory::new(config, endpoints));
//! let invoker = ClusterInvoker::from_config(directory)?;
//! let result = invoker.invoke(&Invocation::new("find", json!({"id": 7}))).await?;
//! invoker.destroy();
//! ```

use crate::config::{
    ServiceConfig, AVAILABLE_CHECK_KEY, CLUSTER_KEY, DEFAULT_AVAILABLE_CHECK, DEFAULT_CLUSTER,
    DEFAULT_STICKY, STICKY_KEY,
};
use crate::directory::Directory;
use crate::endpoint::{Endpoint, EndpointRef};
use crate::load_balance::{LoadBalance, LoadBalanceRegistry};
use crate::merger::MergerRegistry;
use crate::selector::Selector;
use crate::strategy::{ClusterKind, Strategy};
use async_trait::async_trait;
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::{Invocation, RpcResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Attachment carrying the invocation id down to the endpoint.
pub const INVOCATION_ID_KEY: &str = "invocation.id";

/// State shared between an invoker and the background work it starts.
pub(crate) struct InvokerCore {
    directory: Arc<dyn Directory>,
    selector: Selector,
    destroyed: AtomicBool,
}

impl InvokerCore {
    fn new(directory: Arc<dyn Directory>) -> Self {
        let availability_check = directory
            .config()
            .parameter_or(AVAILABLE_CHECK_KEY, DEFAULT_AVAILABLE_CHECK);
        Self {
            directory,
            selector: Selector::new(availability_check),
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn service(&self) -> &str {
        self.directory.service()
    }

    pub(crate) fn config(&self) -> &ServiceConfig {
        self.directory.config()
    }

    /// Registry address used in error messages.
    pub(crate) fn registry(&self) -> &str {
        self.config().registry.as_deref().unwrap_or("N/A")
    }

    pub(crate) fn selector(&self) -> &Selector {
        &self.selector
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn check_destroyed(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(MadrpcError::Destroyed {
                service: self.service().to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn list(&self, invocation: &Invocation) -> Result<Vec<EndpointRef>> {
        self.directory.list(invocation)
    }

    /// Fails with `NoEndpointAvailable` for an empty list.
    pub(crate) fn check_endpoints(
        &self,
        endpoints: &[EndpointRef],
        invocation: &Invocation,
    ) -> Result<()> {
        if endpoints.is_empty() {
            return Err(self.no_endpoint(
                invocation,
                format!(
                    "No provider available for the service {} from registry {}. \
                     Please check if the providers have been started and registered.",
                    self.config().service_key(),
                    self.registry()
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn no_endpoint(&self, invocation: &Invocation, reason: String) -> MadrpcError {
        MadrpcError::NoEndpointAvailable {
            service: self.service().to_string(),
            method: invocation.method.clone(),
            reason,
        }
    }

    /// Selects an endpoint through the selector, honoring the method's
    /// `sticky` parameter.
    pub(crate) fn select(
        &self,
        load_balance: &dyn LoadBalance,
        invocation: &Invocation,
        endpoints: &[EndpointRef],
        excluded: &[EndpointRef],
    ) -> Result<EndpointRef> {
        let sticky = self
            .config()
            .method_bool(&invocation.method, STICKY_KEY, DEFAULT_STICKY);

        self.selector
            .select(load_balance, invocation, endpoints, excluded, sticky)
            .ok_or_else(|| {
                self.no_endpoint(
                    invocation,
                    format!(
                        "No provider available for the service {} from registry {}",
                        self.config().service_key(),
                        self.registry()
                    ),
                )
            })
    }
}

/// Fault-tolerant invoker over all endpoints of one service.
///
/// Cheap to share behind an `Arc`; concurrent calls are allowed.
pub struct ClusterInvoker {
    kind: ClusterKind,
    core: Arc<InvokerCore>,
    strategy: Strategy,
    load_balances: LoadBalanceRegistry,
    address: String,
    service_key: String,
}

impl ClusterInvoker {
    /// Creates an invoker running `kind` over `directory`.
    pub fn new(kind: ClusterKind, directory: Arc<dyn Directory>) -> Self {
        let strategy = Strategy::new(kind, directory.config());
        let service_key = directory.config().service_key();
        let address = directory
            .config()
            .registry
            .clone()
            .unwrap_or_else(|| service_key.clone());

        Self {
            kind,
            core: Arc::new(InvokerCore::new(directory)),
            strategy,
            load_balances: LoadBalanceRegistry::default(),
            address,
            service_key,
        }
    }

    /// Creates an invoker for the strategy named by the `cluster` parameter.
    ///
    /// # Errors
    ///
    /// Returns `MadrpcError::Configuration` if the name is unknown.
    pub fn from_config(directory: Arc<dyn Directory>) -> Result<Self> {
        let kind: ClusterKind = directory
            .config()
            .parameter(CLUSTER_KEY)
            .unwrap_or(DEFAULT_CLUSTER)
            .parse()?;
        Ok(Self::new(kind, directory))
    }

    /// Replaces the load-balance policies available to this invoker.
    pub fn with_load_balances(mut self, load_balances: LoadBalanceRegistry) -> Self {
        self.load_balances = load_balances;
        self
    }

    /// Replaces the mergers used by a mergeable invoker. Ignored by other kinds.
    pub fn with_mergers(mut self, mergers: MergerRegistry) -> Self {
        self.strategy.set_mergers(mergers);
        self
    }

    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    pub fn service(&self) -> &str {
        self.core.service()
    }

    /// Invokes the service according to the cluster strategy.
    ///
    /// # Errors
    ///
    /// - `MadrpcError::Destroyed` once [`destroy`](Self::destroy) was called
    /// - `MadrpcError::Configuration` for an unknown load balance or merger
    /// - any error the strategy lets through
    pub async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        self.core.check_destroyed()?;

        let mut invocation = invocation.clone();
        let id = invocation.id.to_string();
        invocation.set_attachment_if_absent(INVOCATION_ID_KEY, id);

        let endpoints = self.core.list(&invocation)?;
        let load_balance = self.load_balances.resolve(self.core.config(), &invocation)?;

        self.strategy
            .invoke(&self.core, &invocation, endpoints, load_balance)
            .await
    }

    /// Availability of the sticky endpoint if one is remembered, otherwise of
    /// the directory.
    pub fn is_available(&self) -> bool {
        if self.core.is_destroyed() {
            return false;
        }
        match self.core.selector().sticky_endpoint() {
            Some(endpoint) => endpoint.is_available(),
            None => self.core.directory.is_available(),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.core.is_destroyed()
    }

    /// Tears the invoker down. Later calls fail with `MadrpcError::Destroyed`.
    ///
    /// Calling this more than once has no further effect.
    pub fn destroy(&self) {
        if self
            .core
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.strategy.destroy();
        self.core.directory.destroy();
        tracing::info!(
            service = %self.core.service(),
            cluster = %self.kind,
            "Cluster invoker destroyed"
        );
    }
}

/// A cluster invoker is itself an endpoint, which lets a mergeable invoker
/// aggregate over one nested invoker per service group.
#[async_trait]
impl Endpoint for ClusterInvoker {
    fn address(&self) -> &str {
        &self.address
    }

    fn service_key(&self) -> &str {
        &self.service_key
    }

    fn is_available(&self) -> bool {
        ClusterInvoker::is_available(self)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        ClusterInvoker::invoke(self, invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Echo {
        addr: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Endpoint for Echo {
        fn address(&self) -> &str {
            &self.addr
        }

        fn service_key(&self) -> &str {
            "Svc"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RpcResult::new(json!(invocation.attachment(INVOCATION_ID_KEY))))
        }
    }

    fn echo(addr: &str) -> Arc<Echo> {
        Arc::new(Echo {
            addr: addr.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn invoker(config: ServiceConfig, endpoints: Vec<EndpointRef>) -> Result<ClusterInvoker> {
        ClusterInvoker::from_config(Arc::new(StaticDirectory::new(config, endpoints)))
    }

    #[test]
    fn test_from_config_defaults_to_failover() {
        let invoker = invoker(ServiceConfig::new("Svc"), vec![]).unwrap();
        assert_eq!(invoker.kind(), ClusterKind::Failover);
        assert_eq!(invoker.service(), "Svc");
    }

    #[test]
    fn test_from_config_reads_cluster_key() {
        let config = ServiceConfig::new("Svc").with_parameter("cluster", "forking");
        assert_eq!(invoker(config, vec![]).unwrap().kind(), ClusterKind::Forking);
    }

    #[test]
    fn test_from_config_unknown_cluster() {
        let config = ServiceConfig::new("Svc").with_parameter("cluster", "quorum");
        let err = invoker(config, vec![]).err().unwrap();
        assert!(matches!(err, MadrpcError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_invocation_id_attached() {
        let invoker = invoker(ServiceConfig::new("Svc"), vec![echo("a") as EndpointRef]).unwrap();
        let invocation = Invocation::new("m", json!(null));
        let result = invoker.invoke(&invocation).await.unwrap();
        assert_eq!(result.value(), Some(&json!(invocation.id.to_string())));
    }

    #[tokio::test]
    async fn test_existing_invocation_id_kept() {
        let invoker = invoker(ServiceConfig::new("Svc"), vec![echo("a") as EndpointRef]).unwrap();
        let invocation = Invocation::new("m", json!(null)).with_attachment(INVOCATION_ID_KEY, "trace-1");
        let result = invoker.invoke(&invocation).await.unwrap();
        assert_eq!(result.value(), Some(&json!("trace-1")));
    }

    #[tokio::test]
    async fn test_unknown_load_balance_rejected() {
        let config = ServiceConfig::new("Svc").with_parameter("loadbalance", "consistenthash");
        let invoker = invoker(config, vec![echo("a") as EndpointRef]).unwrap();
        let err = invoker.invoke(&Invocation::new("m", json!(null))).await.unwrap_err();
        assert!(matches!(err, MadrpcError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let a = echo("a");
        let invoker = invoker(ServiceConfig::new("Svc"), vec![a.clone() as EndpointRef]).unwrap();
        assert!(invoker.is_available());

        invoker.destroy();
        invoker.destroy();
        assert!(invoker.is_destroyed());
        assert!(!invoker.is_available());

        let err = invoker.invoke(&Invocation::new("m", json!(null))).await.unwrap_err();
        assert!(err.is_destroyed());
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_availability_follows_sticky_endpoint() {
        let config = ServiceConfig::new("Svc").with_parameter("sticky", "true");
        let invoker = invoker(config, vec![echo("a") as EndpointRef]).unwrap();
        assert!(invoker.core.selector().sticky_endpoint().is_none());

        invoker.invoke(&Invocation::new("m", json!(null))).await.unwrap();
        assert_eq!(invoker.core.selector().sticky_endpoint().unwrap().address(), "a");
        assert!(invoker.is_available());
    }
}
