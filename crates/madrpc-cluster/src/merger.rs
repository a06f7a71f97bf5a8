//! Result mergers for group aggregation
//!
//! When a method is configured with a `merger`, the mergeable strategy calls
//! every group and combines the partial results here. How they are combined is
//! decided by the configured value:
//!
//! - `"true"` or `"default"`: the default merger registered for the method's
//!   declared [`ReturnType`]
//! - `".name"`: the method merge `name` registered for the return type, folded
//!   left starting from the first result
//! - anything else: the merger registered under that name
//!
//! All lookups happen against a [`MergerRegistry`] filled at startup.

use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::{ReturnType, RpcValue};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Combines the partial results of several endpoints into one value.
pub trait Merger: Send + Sync {
    fn merge(&self, values: &[RpcValue]) -> Result<RpcValue>;
}

impl<F> Merger for F
where
    F: Fn(&[RpcValue]) -> Result<RpcValue> + Send + Sync,
{
    fn merge(&self, values: &[RpcValue]) -> Result<RpcValue> {
        self(values)
    }
}

/// Two-argument merge registered on a return type (`acc.name(next)`).
pub type MethodMerge = Arc<dyn Fn(RpcValue, &RpcValue) -> Result<RpcValue> + Send + Sync>;

fn expect_array<'a>(merger: &str, value: &'a RpcValue) -> Result<Option<&'a Vec<Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => Ok(Some(items)),
        other => Err(MadrpcError::Configuration(format!(
            "{} merger expects arrays, got {}",
            merger, other
        ))),
    }
}

/// Concatenates arrays in endpoint order. Null results are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListMerger;

impl Merger for ListMerger {
    fn merge(&self, values: &[RpcValue]) -> Result<RpcValue> {
        let mut merged = Vec::new();
        for value in values {
            if let Some(items) = expect_array("List", value)? {
                merged.extend(items.iter().cloned());
            }
        }
        Ok(Value::Array(merged))
    }
}

/// Concatenates arrays dropping duplicates; first occurrence wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetMerger;

impl Merger for SetMerger {
    fn merge(&self, values: &[RpcValue]) -> Result<RpcValue> {
        let mut merged: Vec<Value> = Vec::new();
        for value in values {
            if let Some(items) = expect_array("Set", value)? {
                for item in items {
                    if !merged.contains(item) {
                        merged.push(item.clone());
                    }
                }
            }
        }
        Ok(Value::Array(merged))
    }
}

/// Unions objects; later endpoints override earlier keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct MapMerger;

impl Merger for MapMerger {
    fn merge(&self, values: &[RpcValue]) -> Result<RpcValue> {
        let mut merged = Map::new();
        for value in values {
            match value {
                Value::Null => {}
                Value::Object(entries) => {
                    for (k, v) in entries {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                other => {
                    return Err(MadrpcError::Configuration(format!(
                        "Map merger expects objects, got {}",
                        other
                    )))
                }
            }
        }
        Ok(Value::Object(merged))
    }
}

/// Startup-populated lookup of mergers.
///
/// # Example
///
/// ```ignore
/// let mut mergers = MergerRegistry::default();
/// mergers.register_method(ReturnType::Integer, "add", Arc::new(|acc, next| {
///     Ok(json!(acc.as_i64().unwrap_or(0) + next.as_i64().unwrap_or(0)))
/// }));
/// let sum = mergers.merge(".add", &ReturnType::Integer, vec![json!(1), json!(2)])?;
/// ```
#[derive(Clone)]
pub struct MergerRegistry {
    by_type: HashMap<ReturnType, Arc<dyn Merger>>,
    by_name: HashMap<String, Arc<dyn Merger>>,
    methods: HashMap<(ReturnType, String), MethodMerge>,
}

impl Default for MergerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register_default(ReturnType::List, Arc::new(ListMerger))
            .register_default(ReturnType::Set, Arc::new(SetMerger))
            .register_default(ReturnType::Map, Arc::new(MapMerger))
            .register_named("list", Arc::new(ListMerger))
            .register_named("set", Arc::new(SetMerger))
            .register_named("map", Arc::new(MapMerger));
        registry
    }
}

impl MergerRegistry {
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
            by_name: HashMap::new(),
            methods: HashMap::new(),
        }
    }

    /// Sets the merger used for `return_type` when `merger` is `"true"` or `"default"`.
    pub fn register_default(
        &mut self,
        return_type: ReturnType,
        merger: Arc<dyn Merger>,
    ) -> &mut Self {
        self.by_type.insert(return_type, merger);
        self
    }

    pub fn register_named(
        &mut self,
        name: impl Into<String>,
        merger: Arc<dyn Merger>,
    ) -> &mut Self {
        self.by_name.insert(name.into(), merger);
        self
    }

    /// Registers a method merge selected with `merger = ".name"`.
    pub fn register_method(
        &mut self,
        return_type: ReturnType,
        name: impl Into<String>,
        merge: MethodMerge,
    ) -> &mut Self {
        self.methods.insert((return_type, name.into()), merge);
        self
    }

    /// Merges `values` as selected by `setting`.
    ///
    /// # Errors
    ///
    /// Returns `MadrpcError::Configuration` when `setting` resolves to nothing,
    /// and any error raised by the merger itself.
    pub fn merge(
        &self,
        setting: &str,
        return_type: &ReturnType,
        values: Vec<RpcValue>,
    ) -> Result<RpcValue> {
        if let Some(name) = setting.strip_prefix('.') {
            let method = self
                .methods
                .get(&(return_type.clone(), name.to_string()))
                .ok_or_else(|| {
                    MadrpcError::Configuration(format!(
                        "Can not merge result because missing method [{}] in type [{}]",
                        name, return_type
                    ))
                })?;

            let mut iter = values.into_iter();
            let Some(mut acc) = iter.next() else {
                return Ok(Value::Null);
            };
            for next in iter {
                acc = method(acc, &next)?;
            }
            return Ok(acc);
        }

        let use_default =
            setting.eq_ignore_ascii_case("true") || setting.eq_ignore_ascii_case("default");
        let merger = if use_default {
            self.by_type.get(return_type).ok_or_else(|| {
                MadrpcError::Configuration(format!(
                    "There is no merger to merge result of type [{}]",
                    return_type
                ))
            })?
        } else {
            self.by_name.get(setting).ok_or_else(|| {
                MadrpcError::Configuration(format!("There is no merger named [{}]", setting))
            })?
        };

        merger.merge(&values)
    }
}
