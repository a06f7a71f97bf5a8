//! MaDRPC Result Types
//!
//! This module defines the value an endpoint returns for a successful call.

use serde::{Deserialize, Serialize};

/// RPC method return value (JSON value)
pub type RpcValue = serde_json::Value;

/// The outcome of a successful invocation.
///
/// A result either carries a value or is empty. Empty results are what the
/// fault-suppressing cluster strategies (failback, failsafe) hand back to the
/// caller, and what a merge of zero partial results produces.
///
/// # Example
///
/// ```
/// use madrpc_common::protocol::RpcResult;
/// use serde_json::json;
///
/// let result = RpcResult::new(json!({"pi": 3.14159}));
/// assert!(!result.is_empty());
///
/// let nothing = RpcResult::empty();
/// assert!(nothing.is_empty());
/// assert_eq!(nothing.value(), None);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RpcResult {
    /// Returned value, absent for empty results
    pub value: Option<RpcValue>,
}

impl RpcResult {
    /// Creates a result carrying `value`.
    pub fn new(value: RpcValue) -> Self {
        RpcResult { value: Some(value) }
    }

    /// Creates an empty result.
    pub fn empty() -> Self {
        RpcResult { value: None }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&RpcValue> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<RpcValue> {
        self.value
    }
}

impl From<RpcValue> for RpcResult {
    fn from(value: RpcValue) -> Self {
        RpcResult::new(value)
    }
}
