//! Service-level configuration for the cluster layer
//!
//! Every tunable of the cluster strategies is a string parameter on the
//! consumer-side [`ServiceConfig`]. Parameters can be overridden per method by
//! prefixing the key with the method name: `"find.retries"` wins over
//! `"retries"` for calls to `find`.
//!
//! # Example
//!
//! ```
//! use madrpc_cluster::config::{ServiceConfig, RETRIES_KEY};
//!
//! let config = ServiceConfig::new("UserService")
//!     .with_parameter("retries", "2")
//!     .with_parameter("find.retries", "5");
//!
//! assert_eq!(config.method_int("find", RETRIES_KEY, 0), 5);
//! assert_eq!(config.method_int("save", RETRIES_KEY, 0), 2);
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub const CLUSTER_KEY: &str = "cluster";
pub const LOADBALANCE_KEY: &str = "loadbalance";
pub const STICKY_KEY: &str = "sticky";
pub const AVAILABLE_CHECK_KEY: &str = "cluster.availablecheck";
pub const RETRIES_KEY: &str = "retries";
pub const FAILBACK_TASKS_KEY: &str = "failbacktasks";
pub const FAILBACK_PERIOD_KEY: &str = "failback.period";
pub const FAILBACK_TICK_KEY: &str = "failback.tick";
pub const FAILBACK_WHEEL_KEY: &str = "failback.wheel";
pub const FORKS_KEY: &str = "forks";
pub const TIMEOUT_KEY: &str = "timeout";
pub const MERGER_KEY: &str = "merger";
pub const BROADCAST_FAIL_PERCENT_KEY: &str = "broadcast.fail.percent";
pub const REGISTRY_DEFAULT_KEY: &str = "registry.default";

pub const DEFAULT_CLUSTER: &str = "failover";
pub const DEFAULT_LOADBALANCE: &str = "random";
pub const DEFAULT_STICKY: bool = false;
pub const DEFAULT_AVAILABLE_CHECK: bool = true;
pub const DEFAULT_FAILOVER_RETRIES: i64 = 2;
pub const DEFAULT_FAILBACK_RETRIES: i64 = 3;
pub const DEFAULT_FAILBACK_TASKS: i64 = 100;
pub const DEFAULT_FAILBACK_PERIOD_MS: u64 = 5000;
pub const DEFAULT_FAILBACK_TICK_MS: u64 = 1000;
pub const DEFAULT_FAILBACK_WHEEL: i64 = 32;
pub const DEFAULT_FORKS: i64 = 2;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_BROADCAST_FAIL_PERCENT: i64 = 100;

/// Consumer-side configuration of one remote service.
///
/// # Fields
///
/// - `interface`: Name of the remote service interface
/// - `group`: Optional service group
/// - `version`: Optional service version
/// - `registry`: Address of the registry the endpoint list comes from
/// - `parameters`: String parameters, optionally method-scoped
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub interface: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub registry: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl ServiceConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Service key in `group/interface:version` form, omitting empty parts.
    pub fn service_key(&self) -> String {
        let mut key = String::new();
        if let Some(group) = self.group.as_deref().filter(|g| !g.is_empty()) {
            key.push_str(group);
            key.push('/');
        }
        key.push_str(&self.interface);
        if let Some(version) = self.version.as_deref().filter(|v| !v.is_empty()) {
            key.push(':');
            key.push_str(version);
        }
        key
    }

    /// Raw service-level parameter.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Raw parameter for `method`, falling back to the service-level value.
    pub fn method_parameter_str(&self, method: &str, key: &str) -> Option<&str> {
        self.parameters
            .get(&format!("{}.{}", method, key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .or_else(|| self.parameter(key))
    }

    /// Typed parameter for `method`.
    ///
    /// Values that fail to parse are treated as absent.
    pub fn method_parameter<T: FromStr>(&self, method: &str, key: &str, default: T) -> T {
        self.method_parameter_str(method, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn method_bool(&self, method: &str, key: &str, default: bool) -> bool {
        self.method_parameter(method, key, default)
    }

    pub fn method_int(&self, method: &str, key: &str, default: i64) -> i64 {
        self.method_parameter(method, key, default)
    }

    /// Millisecond parameter for `method` as a [`Duration`].
    pub fn method_duration_ms(&self, method: &str, key: &str, default_ms: u64) -> Duration {
        Duration::from_millis(self.method_parameter(method, key, default_ms))
    }

    /// Typed service-level parameter.
    pub fn parameter_or<T: FromStr>(&self, key: &str, default: T) -> T {
        self.parameter(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}
