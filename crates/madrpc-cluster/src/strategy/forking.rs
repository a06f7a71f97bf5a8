use crate::config::{DEFAULT_FORKS, DEFAULT_TIMEOUT_MS, FORKS_KEY, TIMEOUT_KEY};
use crate::endpoint::{self, EndpointRef};
use crate::invoker::InvokerCore;
use crate::load_balance::LoadBalance;
use madrpc_common::protocol::error::{FailureKind, MadrpcError, Result};
use madrpc_common::protocol::{Invocation, RpcResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Attachment marking a forked copy as a plain synchronous call.
pub(crate) const ASYNC_KEY: &str = "async";

/// Races up to `forks` endpoints and returns the first success.
///
/// Each selected endpoint is called on its own task. A failure is only
/// reported once every selected endpoint has failed, so a single success
/// always wins. The caller waits at most `timeout`; losing calls keep running
/// and their outcome is dropped.
pub(crate) struct ForkingStrategy;

impl ForkingStrategy {
    pub(crate) async fn invoke(
        &self,
        core: &InvokerCore,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
        load_balance: &dyn LoadBalance,
    ) -> Result<RpcResult> {
        core.check_endpoints(&endpoints, invocation)?;

        let method = &invocation.method;
        let forks = core.config().method_int(method, FORKS_KEY, DEFAULT_FORKS);
        let timeout = core
            .config()
            .method_duration_ms(method, TIMEOUT_KEY, DEFAULT_TIMEOUT_MS);

        let selected: Vec<EndpointRef> = if forks <= 0 || forks as usize >= endpoints.len() {
            endpoints.clone()
        } else {
            let mut selected = Vec::with_capacity(forks as usize);
            for _ in 0..forks {
                let chosen = core.select(load_balance, invocation, &endpoints, &selected)?;
                if !endpoint::contains(&selected, &chosen) {
                    selected.push(chosen);
                }
            }
            selected
        };

        let providers = endpoint::addresses(&selected);
        let mut forked = invocation.clone();
        forked.set_attachment(ASYNC_KEY, "false");
        let forked = Arc::new(forked);

        let (tx, mut rx) = mpsc::unbounded_channel::<Result<RpcResult>>();
        let failures = Arc::new(AtomicUsize::new(0));
        let total = selected.len();

        for target in selected {
            let tx = tx.clone();
            let failures = failures.clone();
            let forked = forked.clone();

            tokio::spawn(async move {
                match target.invoke(&forked).await {
                    Ok(result) => {
                        let _ = tx.send(Ok(result));
                    }
                    Err(e) => {
                        let failed = failures.fetch_add(1, Ordering::AcqRel) + 1;
                        // Only the last failure is reported
                        if failed >= total {
                            let _ = tx.send(Err(e));
                        }
                    }
                }
            });
        }
        drop(tx);

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(Ok(result))) => Ok(result),
            Ok(Some(Err(e))) => Err(MadrpcError::invocation(
                format!(
                    "Failed to forking invoke provider {:?}, but no luck to perform the invocation. Last error is: {}",
                    providers, e
                ),
                providers,
                e,
            )),
            Ok(None) | Err(_) => Err(MadrpcError::Invocation {
                kind: FailureKind::Timeout,
                message: format!(
                    "Failed to forking invoke provider {:?} within {}ms, but no luck to perform the invocation",
                    providers,
                    timeout.as_millis()
                ),
                endpoints: providers,
                source: None,
            }),
        }
    }
}
