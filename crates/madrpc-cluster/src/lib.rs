//! MaDRPC Cluster
//!
//! Client-side fault tolerance over a dynamic set of endpoints implementing the
//! same service. A [`ClusterInvoker`] takes one logical call and decides how to
//! call the endpoints its [`Directory`] lists: retry elsewhere, retry later,
//! give up, race, broadcast, route to a default registry or merge group results.

pub mod config;
pub mod directory;
pub mod endpoint;
pub mod invoker;
pub mod load_balance;
pub mod merger;
pub mod selector;
pub mod strategy;
pub mod timer;

pub use config::ServiceConfig;
pub use directory::{Directory, StaticDirectory};
pub use endpoint::{Endpoint, EndpointRef};
pub use invoker::{ClusterInvoker, INVOCATION_ID_KEY};
pub use load_balance::{LoadBalance, LoadBalanceRegistry, RandomLoadBalance, RoundRobinLoadBalance};
pub use merger::{ListMerger, MapMerger, Merger, MergerRegistry, MethodMerge, SetMerger};
pub use selector::Selector;
pub use strategy::ClusterKind;
pub use timer::{HashedWheelTimer, Timeout, TimerError, TimerTask};
