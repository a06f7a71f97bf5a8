//! Fault-tolerance strategies
//!
//! Each strategy turns one logical call into one or more endpoint calls:
//!
//! | kind | endpoints called | on failure |
//! |---|---|---|
//! | failover | one at a time, up to `retries + 1` | retries another endpoint, raises after the last |
//! | failback | one | returns an empty result, retries in the background |
//! | failfast | one | raises immediately |
//! | failsafe | one | logs, returns an empty result |
//! | forking | up to `forks` concurrently | raises only if all fail or time runs out |
//! | broadcast | all, sequentially | raises the last failure after calling all |
//! | registryaware | the default-registry endpoint, else the first available | raises immediately |
//! | mergeable | all groups, concurrently when merging | see [`MergeableStrategy`] |
//!
//! Business errors are never retried and never turned into something else.

mod broadcast;
mod failback;
mod failfast;
mod failover;
mod failsafe;
mod forking;
mod mergeable;
mod registry_aware;

pub(crate) use broadcast::BroadcastStrategy;
pub(crate) use failback::FailbackStrategy;
pub(crate) use failfast::FailfastStrategy;
pub(crate) use failover::FailoverStrategy;
pub(crate) use failsafe::FailsafeStrategy;
pub(crate) use forking::ForkingStrategy;
pub(crate) use mergeable::MergeableStrategy;
pub(crate) use registry_aware::RegistryAwareStrategy;

use crate::config::ServiceConfig;
use crate::endpoint::EndpointRef;
use crate::invoker::InvokerCore;
use crate::load_balance::LoadBalance;
use crate::merger::MergerRegistry;
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::{Invocation, RpcResult};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Names of the available cluster strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterKind {
    Failover,
    Failback,
    Failfast,
    Failsafe,
    Forking,
    Broadcast,
    RegistryAware,
    Mergeable,
}

impl ClusterKind {
    pub const ALL: [ClusterKind; 8] = [
        ClusterKind::Failover,
        ClusterKind::Failback,
        ClusterKind::Failfast,
        ClusterKind::Failsafe,
        ClusterKind::Forking,
        ClusterKind::Broadcast,
        ClusterKind::RegistryAware,
        ClusterKind::Mergeable,
    ];

    /// Configuration name of the strategy.
    pub fn name(&self) -> &'static str {
        match self {
            ClusterKind::Failover => "failover",
            ClusterKind::Failback => "failback",
            ClusterKind::Failfast => "failfast",
            ClusterKind::Failsafe => "failsafe",
            ClusterKind::Forking => "forking",
            ClusterKind::Broadcast => "broadcast",
            ClusterKind::RegistryAware => "registryaware",
            ClusterKind::Mergeable => "mergeable",
        }
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ClusterKind {
    type Err = MadrpcError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        ClusterKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| MadrpcError::Configuration(format!("Unknown cluster '{}'", name)))
    }
}

/// One strategy instance per invoker.
pub(crate) enum Strategy {
    Failover(FailoverStrategy),
    Failback(FailbackStrategy),
    Failfast(FailfastStrategy),
    Failsafe(FailsafeStrategy),
    Forking(ForkingStrategy),
    Broadcast(BroadcastStrategy),
    RegistryAware(RegistryAwareStrategy),
    Mergeable(MergeableStrategy),
}

impl Strategy {
    pub(crate) fn new(kind: ClusterKind, config: &ServiceConfig) -> Self {
        match kind {
            ClusterKind::Failover => Strategy::Failover(FailoverStrategy),
            ClusterKind::Failback => Strategy::Failback(FailbackStrategy::new(config)),
            ClusterKind::Failfast => Strategy::Failfast(FailfastStrategy),
            ClusterKind::Failsafe => Strategy::Failsafe(FailsafeStrategy),
            ClusterKind::Forking => Strategy::Forking(ForkingStrategy),
            ClusterKind::Broadcast => Strategy::Broadcast(BroadcastStrategy),
            ClusterKind::RegistryAware => Strategy::RegistryAware(RegistryAwareStrategy),
            ClusterKind::Mergeable => {
                Strategy::Mergeable(MergeableStrategy::new(MergerRegistry::default()))
            }
        }
    }

    pub(crate) fn set_mergers(&mut self, mergers: MergerRegistry) {
        if let Strategy::Mergeable(strategy) = self {
            *strategy = MergeableStrategy::new(mergers);
        }
    }

    pub(crate) async fn invoke(
        &self,
        core: &Arc<InvokerCore>,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
        load_balance: Arc<dyn LoadBalance>,
    ) -> Result<RpcResult> {
        match self {
            Strategy::Failover(s) => {
                s.invoke(core, invocation, endpoints, load_balance.as_ref())
                    .await
            }
            Strategy::Failback(s) => s.invoke(core, invocation, endpoints, load_balance).await,
            Strategy::Failfast(s) => {
                s.invoke(core, invocation, endpoints, load_balance.as_ref())
                    .await
            }
            Strategy::Failsafe(s) => {
                s.invoke(core, invocation, endpoints, load_balance.as_ref())
                    .await
            }
            Strategy::Forking(s) => {
                s.invoke(core, invocation, endpoints, load_balance.as_ref())
                    .await
            }
            Strategy::Broadcast(s) => s.invoke(core, invocation, endpoints).await,
            Strategy::RegistryAware(s) => s.invoke(core, invocation, endpoints).await,
            Strategy::Mergeable(s) => s.invoke(core, invocation, endpoints).await,
        }
    }

    /// Releases resources owned by the strategy.
    pub(crate) fn destroy(&self) {
        if let Strategy::Failback(s) = self {
            s.destroy();
        }
    }
}
