use crate::endpoint::{self, EndpointRef};
use crate::invoker::InvokerCore;
use crate::load_balance::LoadBalance;
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::{Invocation, RpcResult};

/// Makes exactly one attempt and raises its failure.
pub(crate) struct FailfastStrategy;

impl FailfastStrategy {
    pub(crate) async fn invoke(
        &self,
        core: &InvokerCore,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
        load_balance: &dyn LoadBalance,
    ) -> Result<RpcResult> {
        core.check_endpoints(&endpoints, invocation)?;
        let chosen = core.select(load_balance, invocation, &endpoints, &[])?;

        match chosen.invoke(invocation).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_business() => Err(e),
            Err(e) => {
                let providers = endpoint::addresses(&endpoints);
                Err(MadrpcError::invocation(
                    format!(
                        "Failfast invoke providers {} {} select from all providers {:?} for service {} method {}, but no luck to perform the invocation. Last error is: {}",
                        chosen.address(),
                        load_balance.name(),
                        providers,
                        core.service(),
                        invocation.method,
                        e
                    ),
                    providers,
                    e,
                ))
            }
        }
    }
}
