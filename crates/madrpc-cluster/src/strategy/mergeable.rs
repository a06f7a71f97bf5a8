use crate::config::{DEFAULT_TIMEOUT_MS, MERGER_KEY, TIMEOUT_KEY};
use crate::endpoint::EndpointRef;
use crate::invoker::InvokerCore;
use crate::merger::MergerRegistry;
use futures::future::join_all;
use madrpc_common::protocol::error::Result;
use madrpc_common::protocol::{Invocation, RpcResult, RpcValue};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Aggregates results across service groups.
///
/// Each endpoint usually stands for one group (often a nested
/// [`ClusterInvoker`](crate::ClusterInvoker)).
///
/// Without a `merger` for the method, the first available group that answers
/// wins. Groups reporting no endpoint are skipped; any other error is raised.
/// If no group answers, the first group is called again and its outcome
/// returned as is.
///
/// With a `merger`, all groups are called concurrently and the results that
/// arrive within `timeout` are merged in endpoint order. A group answering
/// with an empty result is merged as null. `merger = false` disables merging.
pub(crate) struct MergeableStrategy {
    mergers: MergerRegistry,
}

impl MergeableStrategy {
    pub(crate) fn new(mergers: MergerRegistry) -> Self {
        Self { mergers }
    }

    pub(crate) async fn invoke(
        &self,
        core: &InvokerCore,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
    ) -> Result<RpcResult> {
        core.check_endpoints(&endpoints, invocation)?;

        let method = &invocation.method;
        let Some(setting) = core
            .config()
            .method_parameter_str(method, MERGER_KEY)
            .filter(|setting| !is_disabled(setting))
        else {
            return first_success(invocation, &endpoints).await;
        };

        let timeout = core
            .config()
            .method_duration_ms(method, TIMEOUT_KEY, DEFAULT_TIMEOUT_MS);
        let deadline = tokio::time::Instant::now() + timeout;
        let shared = Arc::new(invocation.clone());

        // One call per service key, in endpoint order
        let mut calls: Vec<(String, JoinHandle<Result<RpcResult>>)> =
            Vec::with_capacity(endpoints.len());
        for target in &endpoints {
            let key = target.service_key().to_string();
            let target = target.clone();
            let call = shared.clone();
            let handle = tokio::spawn(async move { target.invoke(&call).await });

            match calls.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = handle,
                None => calls.push((key, handle)),
            }
        }

        let outcomes = join_all(calls.into_iter().map(|(key, handle)| async move {
            (key, tokio::time::timeout_at(deadline, handle).await)
        }))
        .await;

        let mut results: Vec<RpcResult> = Vec::with_capacity(outcomes.len());
        for (key, outcome) in outcomes {
            match outcome {
                Ok(Ok(Ok(result))) => results.push(result),
                Ok(Ok(Err(e))) => {
                    tracing::warn!(
                        method = %method,
                        service_key = %key,
                        "Invoke failed, result skipped from merge: {}",
                        e
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        method = %method,
                        service_key = %key,
                        "Invoke task aborted, result skipped from merge: {}",
                        e
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        method = %method,
                        service_key = %key,
                        timeout_ms = timeout.as_millis() as u64,
                        "Invoke timed out, result skipped from merge"
                    );
                }
            }
        }

        if results.is_empty() {
            return Ok(RpcResult::empty());
        }
        if results.len() == 1 {
            return Ok(results.remove(0));
        }
        if invocation.return_type.is_void() {
            return Ok(RpcResult::empty());
        }

        // Empty results take part as null so the merger sees every group
        let values: Vec<RpcValue> = results
            .into_iter()
            .map(|result| result.into_value().unwrap_or(RpcValue::Null))
            .collect();

        let merged = self.mergers.merge(setting, &invocation.return_type, values)?;
        Ok(RpcResult::new(merged))
    }
}

/// `merger = false` (or `0`) turns merging off like an unset key.
fn is_disabled(setting: &str) -> bool {
    let setting = setting.trim();
    setting.eq_ignore_ascii_case("false") || setting == "0"
}

async fn first_success(invocation: &Invocation, endpoints: &[EndpointRef]) -> Result<RpcResult> {
    for target in endpoints {
        if !target.is_available() {
            continue;
        }
        match target.invoke(invocation).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_no_endpoint_available() => {
                tracing::debug!(
                    method = %invocation.method,
                    service_key = %target.service_key(),
                    "No endpoint in group, trying next: {}",
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }

    // Nothing answered: surface the first group's own outcome
    endpoints[0].invoke(invocation).await
}
