use crate::config::{DEFAULT_FAILOVER_RETRIES, RETRIES_KEY};
use crate::endpoint::{self, EndpointRef};
use crate::invoker::InvokerCore;
use crate::load_balance::LoadBalance;
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::{Invocation, RpcResult};

/// Retries another endpoint on failure.
///
/// Makes up to `retries + 1` attempts (at least one). Every attempt after the
/// first re-lists the endpoints and excludes the ones already tried. Business
/// errors stop the loop immediately.
pub(crate) struct FailoverStrategy;

impl FailoverStrategy {
    pub(crate) async fn invoke(
        &self,
        core: &InvokerCore,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
        load_balance: &dyn LoadBalance,
    ) -> Result<RpcResult> {
        core.check_endpoints(&endpoints, invocation)?;

        let method = &invocation.method;
        let retries = core
            .config()
            .method_int(method, RETRIES_KEY, DEFAULT_FAILOVER_RETRIES);
        let len = usize::try_from(retries)
            .unwrap_or(0)
            .saturating_add(1)
            .max(1);

        let mut endpoints = endpoints;
        let mut invoked: Vec<EndpointRef> = Vec::with_capacity(endpoints.len());
        let mut last_error: Option<MadrpcError> = None;

        for attempt in 0..len {
            if attempt > 0 {
                // Pick up registry changes between attempts
                core.check_destroyed()?;
                endpoints = core.list(invocation)?;
                core.check_endpoints(&endpoints, invocation)?;
            }

            let chosen = core.select(load_balance, invocation, &endpoints, &invoked)?;
            if !endpoint::contains(&invoked, &chosen) {
                invoked.push(chosen.clone());
            }

            match chosen.invoke(invocation).await {
                Ok(result) => {
                    if let Some(e) = &last_error {
                        tracing::warn!(
                            method = %method,
                            service = %core.service(),
                            addr = %chosen.address(),
                            attempt = attempt + 1,
                            providers = ?endpoint::addresses(&invoked),
                            "Invocation succeeded after earlier failure: {}",
                            e
                        );
                    }
                    return Ok(result);
                }
                Err(e) if e.is_business() => return Err(e),
                Err(e) => {
                    tracing::debug!(
                        method = %method,
                        addr = %chosen.address(),
                        attempt = attempt + 1,
                        max_attempts = len,
                        "Invocation failed: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        let providers = endpoint::addresses(&invoked);
        let cause = last_error.unwrap_or_else(|| {
            MadrpcError::network(format!("No attempt made for {}", method))
        });

        Err(MadrpcError::invocation(
            format!(
                "Failed to invoke the method {} in the service {}. Tried {} times of the providers {:?} ({}/{}) from the registry {}. Last error is: {}",
                method,
                core.service(),
                len,
                providers,
                providers.len(),
                endpoints.len(),
                core.registry(),
                cause
            ),
            providers,
            cause,
        ))
    }
}
