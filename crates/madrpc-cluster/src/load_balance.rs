use crate::config::{ServiceConfig, DEFAULT_LOADBALANCE, LOADBALANCE_KEY};
use crate::endpoint::EndpointRef;
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::Invocation;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Policy choosing one endpoint out of a list.
///
/// Policies see the list exactly as the selector hands it over; they neither
/// filter for availability nor know about excluded endpoints.
pub trait LoadBalance: Send + Sync {
    /// Registry name of the policy (e.g., "random")
    fn name(&self) -> &str;

    /// Picks one endpoint. Returns `None` only for an empty list.
    fn select(&self, endpoints: &[EndpointRef], invocation: &Invocation) -> Option<EndpointRef>;
}

/// Uniformly random selection.
#[derive(Debug, Default)]
pub struct RandomLoadBalance;

impl RandomLoadBalance {
    pub const NAME: &'static str = "random";
}

impl LoadBalance for RandomLoadBalance {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn select(&self, endpoints: &[EndpointRef], _invocation: &Invocation) -> Option<EndpointRef> {
        match endpoints.len() {
            0 => None,
            1 => Some(endpoints[0].clone()),
            len => Some(endpoints[rand::rng().random_range(0..len)].clone()),
        }
    }
}

/// Round-robin selection, one rotation per method.
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalance {
    sequences: Mutex<HashMap<String, usize>>,
}

impl RoundRobinLoadBalance {
    pub const NAME: &'static str = "roundrobin";

    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalance for RoundRobinLoadBalance {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn select(&self, endpoints: &[EndpointRef], invocation: &Invocation) -> Option<EndpointRef> {
        if endpoints.is_empty() {
            return None;
        }

        let mut sequences = self.sequences.lock();
        let next = sequences.entry(invocation.method.clone()).or_insert(0);
        let index = *next % endpoints.len();
        *next = next.wrapping_add(1);
        Some(endpoints[index].clone())
    }
}

/// Named load-balance policies available to cluster invokers.
///
/// The registry starts with [`RandomLoadBalance`] and [`RoundRobinLoadBalance`];
/// further policies are added with [`register`](Self::register). The policy
/// for a call is chosen by the `loadbalance` parameter of the called method.
#[derive(Clone)]
pub struct LoadBalanceRegistry {
    policies: HashMap<String, Arc<dyn LoadBalance>>,
}

impl Default for LoadBalanceRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(RandomLoadBalance));
        registry.register(Arc::new(RoundRobinLoadBalance::new()));
        registry
    }
}

impl LoadBalanceRegistry {
    /// Creates a registry with no policies.
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// Registers `policy` under its own name, replacing any previous policy.
    pub fn register(&mut self, policy: Arc<dyn LoadBalance>) -> &mut Self {
        self.policies.insert(policy.name().to_string(), policy);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LoadBalance>> {
        self.policies.get(name).cloned()
    }

    /// Resolves the policy configured for `invocation`'s method.
    ///
    /// # Errors
    ///
    /// Returns `MadrpcError::Configuration` if the configured name is unknown.
    pub fn resolve(
        &self,
        config: &ServiceConfig,
        invocation: &Invocation,
    ) -> Result<Arc<dyn LoadBalance>> {
        let name = config
            .method_parameter_str(&invocation.method, LOADBALANCE_KEY)
            .unwrap_or(DEFAULT_LOADBALANCE);

        self.get(name).ok_or_else(|| {
            MadrpcError::Configuration(format!(
                "Unknown load balance '{}' for {}.{}",
                name, config.interface, invocation.method
            ))
        })
    }
}
