use crate::config::{BROADCAST_FAIL_PERCENT_KEY, DEFAULT_BROADCAST_FAIL_PERCENT};
use crate::endpoint::{self, EndpointRef};
use crate::invoker::InvokerCore;
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::{Invocation, RpcResult};

/// Calls every endpoint, one after another.
///
/// Failures don't stop the loop unless `broadcast.fail.percent` is below
/// 100. If anything failed, the last failure is raised even when other
/// endpoints succeeded, tagged with the address that produced it.
pub(crate) struct BroadcastStrategy;

impl BroadcastStrategy {
    pub(crate) async fn invoke(
        &self,
        core: &InvokerCore,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
    ) -> Result<RpcResult> {
        core.check_endpoints(&endpoints, invocation)?;

        let percent = core
            .config()
            .method_int(
                &invocation.method,
                BROADCAST_FAIL_PERCENT_KEY,
                DEFAULT_BROADCAST_FAIL_PERCENT,
            )
            .clamp(0, 100) as usize;
        let threshold = endpoints.len() * percent / 100;

        let mut failures = 0usize;
        let mut last_error: Option<(String, MadrpcError)> = None;
        let mut last_result = RpcResult::empty();

        for target in &endpoints {
            match target.invoke(invocation).await {
                Ok(result) => last_result = result,
                Err(e) => {
                    tracing::warn!(
                        method = %invocation.method,
                        addr = %target.address(),
                        "Broadcast invoke failed: {}",
                        e
                    );
                    last_error = Some((target.address().to_string(), e));
                    if failures >= threshold {
                        break;
                    }
                    failures += 1;
                }
            }
        }

        match last_error {
            Some((addr, e)) => Err(MadrpcError::invocation(
                format!(
                    "Failed to broadcast invoke method {} in the service {} over providers {:?}, last failure from {}. Last error is: {}",
                    invocation.method,
                    core.service(),
                    endpoint::addresses(&endpoints),
                    addr,
                    e
                ),
                vec![addr],
                e,
            )),
            None => Ok(last_result),
        }
    }
}
