use crate::config::REGISTRY_DEFAULT_KEY;
use crate::endpoint::{self, EndpointRef};
use crate::invoker::InvokerCore;
use madrpc_common::protocol::error::{MadrpcError, Result};
use madrpc_common::protocol::{Invocation, RpcResult};

/// Prefers the endpoint of the default registry.
///
/// Calls the first available endpoint flagged with `registry.default=true`,
/// otherwise the first available endpoint. No retry, no load balancing.
pub(crate) struct RegistryAwareStrategy;

impl RegistryAwareStrategy {
    pub(crate) async fn invoke(
        &self,
        core: &InvokerCore,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
    ) -> Result<RpcResult> {
        let is_default = |ep: &&EndpointRef| {
            ep.parameter(REGISTRY_DEFAULT_KEY)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        };

        let target = endpoints
            .iter()
            .filter(|ep| ep.is_available())
            .find(is_default)
            .or_else(|| endpoints.iter().find(|ep| ep.is_available()));

        match target {
            Some(target) => target.invoke(invocation).await.map_err(|e| {
                MadrpcError::invocation(
                    format!(
                        "Failed to invoke method {} in the service {} on provider {}. Last error is: {}",
                        invocation.method,
                        core.service(),
                        target.address(),
                        e
                    ),
                    vec![target.address().to_string()],
                    e,
                )
            }),
            None => Err(core.no_endpoint(
                invocation,
                format!(
                    "No provider available in {:?}",
                    endpoint::addresses(&endpoints)
                ),
            )),
        }
    }
}
