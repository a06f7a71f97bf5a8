//! MaDRPC Invocation Types
//!
//! This module defines the call object that flows from the application layer
//! through the cluster layer down to a single endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

pub type InvocationId = u64;
pub type MethodName = String;
pub type RpcArgs = serde_json::Value;

static INVOCATION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Declared return type of an invoked method.
///
/// The cluster layer never inspects result values except when partial results
/// from several endpoints have to be merged; the merger for a call is resolved
/// from this descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    /// The method returns nothing
    Void,
    Bool,
    Integer,
    Float,
    String,
    /// Ordered JSON array
    List,
    /// JSON array whose elements are unique
    Set,
    /// JSON object
    Map,
    /// Arbitrary JSON, no merge semantics known
    #[default]
    Dynamic,
    /// Application-defined type, identified by name
    Named(String),
}

impl ReturnType {
    /// Returns `true` for [`ReturnType::Void`].
    pub fn is_void(&self) -> bool {
        matches!(self, ReturnType::Void)
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnType::Void => f.write_str("void"),
            ReturnType::Bool => f.write_str("bool"),
            ReturnType::Integer => f.write_str("integer"),
            ReturnType::Float => f.write_str("float"),
            ReturnType::String => f.write_str("string"),
            ReturnType::List => f.write_str("list"),
            ReturnType::Set => f.write_str("set"),
            ReturnType::Map => f.write_str("map"),
            ReturnType::Dynamic => f.write_str("dynamic"),
            ReturnType::Named(name) => f.write_str(name),
        }
    }
}

/// A single logical call issued by the application.
///
/// # Fields
///
/// - `id`: Unique identifier, used for invocation tracking
/// - `method`: Name of the remote method
/// - `parameter_types`: Declared argument type names (may be empty)
/// - `args`: Argument values
/// - `attachments`: Key/value metadata carried alongside the call
/// - `return_type`: Declared return type, consulted when merging results
///
/// The cluster layer may add attachments (for example the invocation id) but
/// never touches the method or arguments.
///
/// # Example
///
/// ```
/// use madrpc_common::protocol::{Invocation, ReturnType};
/// use serde_json::json;
///
/// let invocation = Invocation::new("listUsers", json!({"page": 1}))
///     .with_return_type(ReturnType::List)
///     .with_attachment("trace", "abc123");
///
/// assert_eq!(invocation.attachment("trace"), Some("abc123"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invocation {
    pub id: InvocationId,
    pub method: MethodName,
    #[serde(default)]
    pub parameter_types: Vec<String>,
    pub args: RpcArgs,
    #[serde(default)]
    pub attachments: HashMap<String, String>,
    #[serde(default)]
    pub return_type: ReturnType,
}

impl Invocation {
    pub fn new(method: impl Into<String>, args: RpcArgs) -> Self {
        Invocation {
            id: generate_invocation_id(),
            method: method.into(),
            parameter_types: Vec::new(),
            args,
            attachments: HashMap::new(),
            return_type: ReturnType::default(),
        }
    }

    pub fn with_parameter_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn with_return_type(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Looks up an attachment value.
    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    /// Sets an attachment, replacing any previous value.
    pub fn set_attachment(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attachments.insert(key.into(), value.into());
    }

    /// Sets an attachment only when the key is not present yet.
    ///
    /// # Returns
    ///
    /// `true` if the attachment was inserted
    pub fn set_attachment_if_absent(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> bool {
        let key = key.into();
        if self.attachments.contains_key(&key) {
            return false;
        }
        self.attachments.insert(key, value.into());
        true
    }
}

fn generate_invocation_id() -> InvocationId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let counter = INVOCATION_ID_COUNTER.fetch_add(1, Ordering::SeqCst);

    // Upper 32 bits from the clock, lower 32 bits from the counter
    (timestamp & 0xFFFFFFFF00000000) | (counter & 0xFFFFFFFF)
}
