use crate::endpoint::EndpointRef;
use crate::invoker::InvokerCore;
use crate::load_balance::LoadBalance;
use madrpc_common::protocol::error::Result;
use madrpc_common::protocol::{Invocation, RpcResult};

/// Makes one attempt and swallows every failure, business errors included.
pub(crate) struct FailsafeStrategy;

impl FailsafeStrategy {
    pub(crate) async fn invoke(
        &self,
        core: &InvokerCore,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
        load_balance: &dyn LoadBalance,
    ) -> Result<RpcResult> {
        let outcome = match core
            .check_endpoints(&endpoints, invocation)
            .and_then(|_| core.select(load_balance, invocation, &endpoints, &[]))
        {
            Ok(chosen) => chosen.invoke(invocation).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(
                    method = %invocation.method,
                    service = %core.service(),
                    "Failsafe ignore exception: {}",
                    e
                );
                Ok(RpcResult::empty())
            }
        }
    }
}
