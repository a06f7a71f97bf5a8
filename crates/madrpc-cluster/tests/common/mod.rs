//! Shared mock endpoints and policies for the cluster integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use madrpc_cluster::{
    ClusterInvoker, ClusterKind, Endpoint, EndpointRef, LoadBalance, LoadBalanceRegistry,
    ServiceConfig, StaticDirectory,
};
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::{Invocation, RpcResult};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a mock endpoint answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Value(Value),
    Empty,
    Network,
    Business,
    NoEndpoint,
}

pub struct MockEndpoint {
    addr: String,
    service_key: String,
    available: AtomicBool,
    calls: AtomicUsize,
    default: Reply,
    script: Mutex<VecDeque<Reply>>,
    delay: Duration,
    params: HashMap<String, String>,
    seen: Mutex<Vec<Invocation>>,
}

impl MockEndpoint {
    /// Endpoint answering with its own address.
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            service_key: "UserService".to_string(),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            default: Reply::Value(json!(addr)),
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            params: HashMap::new(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Reply used once the script is exhausted.
    pub fn replying(mut self, reply: Reply) -> Self {
        self.default = reply;
        self
    }

    /// Queues a reply for the next call.
    pub fn then(self, reply: Reply) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_service_key(mut self, key: &str) -> Self {
        self.service_key = key.to_string();
        self
    }

    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn last_invocation(&self) -> Option<Invocation> {
        self.seen.lock().last().cloned()
    }

    fn answer(&self, reply: Reply) -> Result<RpcResult> {
        match reply {
            Reply::Value(v) => Ok(RpcResult::new(v)),
            Reply::Empty => Ok(RpcResult::empty()),
            Reply::Network => Err(MadrpcError::network(format!("{} unreachable", self.addr))),
            Reply::Business => Err(MadrpcError::business(format!("{} rejected the call", self.addr))),
            Reply::NoEndpoint => Err(MadrpcError::NoEndpointAvailable {
                service: self.service_key.clone(),
                method: "any".to_string(),
                reason: "group is empty".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn address(&self) -> &str {
        &self.addr
    }

    fn service_key(&self) -> &str {
        &self.service_key
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn parameter(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(invocation.clone());

        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer(reply)
    }
}

/// Always picks the first endpoint of the list it is given.
#[derive(Default)]
pub struct FirstLoadBalance {
    calls: AtomicUsize,
}

impl FirstLoadBalance {
    pub const NAME: &'static str = "first";

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LoadBalance for FirstLoadBalance {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn select(&self, endpoints: &[EndpointRef], _invocation: &Invocation) -> Option<EndpointRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        endpoints.first().cloned()
    }
}

pub fn refs(endpoints: &[Arc<MockEndpoint>]) -> Vec<EndpointRef> {
    endpoints
        .iter()
        .map(|e| e.clone() as EndpointRef)
        .collect()
}

/// Config using the deterministic `first` policy.
pub fn config() -> ServiceConfig {
    ServiceConfig::new("UserService")
        .with_registry("127.0.0.1:2181")
        .with_parameter("loadbalance", FirstLoadBalance::NAME)
}

/// Invoker over `endpoints` whose `first` policy is `policy`.
pub fn invoker_with(
    kind: ClusterKind,
    config: ServiceConfig,
    endpoints: &[Arc<MockEndpoint>],
    policy: Arc<FirstLoadBalance>,
) -> ClusterInvoker {
    let directory = Arc::new(StaticDirectory::new(config, refs(endpoints)));
    let mut load_balances = LoadBalanceRegistry::default();
    load_balances.register(policy);
    ClusterInvoker::new(kind, directory).with_load_balances(load_balances)
}

pub fn invoker(
    kind: ClusterKind,
    config: ServiceConfig,
    endpoints: &[Arc<MockEndpoint>],
) -> ClusterInvoker {
    invoker_with(kind, config, endpoints, Arc::new(FirstLoadBalance::default()))
}

pub fn call(method: &str) -> Invocation {
    Invocation::new(method, json!({"id": 7}))
}

/// Installs a test log subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
