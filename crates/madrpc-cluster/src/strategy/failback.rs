use crate::config::{
    ServiceConfig, DEFAULT_FAILBACK_PERIOD_MS, DEFAULT_FAILBACK_RETRIES, DEFAULT_FAILBACK_TASKS,
    DEFAULT_FAILBACK_TICK_MS, DEFAULT_FAILBACK_WHEEL, FAILBACK_PERIOD_KEY, FAILBACK_TASKS_KEY,
    FAILBACK_TICK_KEY, FAILBACK_WHEEL_KEY, RETRIES_KEY,
};
use crate::endpoint::EndpointRef;
use crate::invoker::InvokerCore;
use crate::load_balance::LoadBalance;
use crate::timer::{HashedWheelTimer, Timeout, TimerTask};
use async_trait::async_trait;
use madrpc_common::protocol::error::Result;
use madrpc_common::protocol::{Invocation, RpcResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct FailbackSettings {
    retries: u32,
    max_pending: usize,
    period: Duration,
    tick: Duration,
    wheel: usize,
}

impl FailbackSettings {
    fn from_config(config: &ServiceConfig) -> Self {
        let retries = config.parameter_or(RETRIES_KEY, DEFAULT_FAILBACK_RETRIES);
        let tasks = config.parameter_or(FAILBACK_TASKS_KEY, DEFAULT_FAILBACK_TASKS);
        let wheel = config.parameter_or(FAILBACK_WHEEL_KEY, DEFAULT_FAILBACK_WHEEL);

        Self {
            retries: if retries <= 0 {
                DEFAULT_FAILBACK_RETRIES as u32
            } else {
                u32::try_from(retries).unwrap_or(u32::MAX)
            },
            max_pending: (if tasks <= 0 { DEFAULT_FAILBACK_TASKS } else { tasks }) as usize,
            period: Duration::from_millis(
                config.parameter_or(FAILBACK_PERIOD_KEY, DEFAULT_FAILBACK_PERIOD_MS),
            ),
            tick: Duration::from_millis(
                config.parameter_or(FAILBACK_TICK_KEY, DEFAULT_FAILBACK_TICK_MS),
            ),
            wheel: (if wheel <= 0 { DEFAULT_FAILBACK_WHEEL } else { wheel }) as usize,
        }
    }
}

/// Returns an empty result on failure and retries in the background.
///
/// Failed calls are handed to a [`HashedWheelTimer`] created on the first
/// failure. Each retry excludes the endpoint tried last and re-arms itself
/// every `failback.period` until `retries` attempts have failed.
pub(crate) struct FailbackStrategy {
    timer: Mutex<Option<HashedWheelTimer>>,
    settings: FailbackSettings,
}

impl FailbackStrategy {
    pub(crate) fn new(config: &ServiceConfig) -> Self {
        Self {
            timer: Mutex::new(None),
            settings: FailbackSettings::from_config(config),
        }
    }

    pub(crate) async fn invoke(
        &self,
        core: &Arc<InvokerCore>,
        invocation: &Invocation,
        endpoints: Vec<EndpointRef>,
        load_balance: Arc<dyn LoadBalance>,
    ) -> Result<RpcResult> {
        let mut chosen: Option<EndpointRef> = None;

        let outcome = match core
            .check_endpoints(&endpoints, invocation)
            .and_then(|_| core.select(load_balance.as_ref(), invocation, &endpoints, &[]))
        {
            Ok(endpoint) => {
                chosen = Some(endpoint.clone());
                endpoint.invoke(invocation).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) if e.is_business() => Err(e),
            Err(e) => {
                tracing::warn!(
                    method = %invocation.method,
                    service = %core.service(),
                    "Failback to invoke method, wait for retry in background. Ignored exception: {}",
                    e
                );
                self.add_failed(core, load_balance, invocation.clone(), chosen);
                Ok(RpcResult::empty())
            }
        }
    }

    fn add_failed(
        &self,
        core: &Arc<InvokerCore>,
        load_balance: Arc<dyn LoadBalance>,
        invocation: Invocation,
        last: Option<EndpointRef>,
    ) {
        let timer = {
            let mut slot = self.timer.lock();
            // Checked under the lock so destroy() never misses a new timer
            if core.is_destroyed() {
                return;
            }
            slot.get_or_insert_with(|| {
                HashedWheelTimer::new(
                    format!("failback-{}", core.service()),
                    self.settings.tick,
                    self.settings.wheel,
                    self.settings.max_pending,
                )
            })
            .clone()
        };

        let method = invocation.method.clone();
        let task = Arc::new(RetryTask {
            core: core.clone(),
            load_balance,
            invocation,
            last: Mutex::new(last),
            retries: self.settings.retries,
            failures: AtomicU32::new(0),
            period: self.settings.period,
        });

        if let Err(e) = timer.new_timeout(task, self.settings.period) {
            tracing::error!(
                method = %method,
                service = %core.service(),
                "Failback background works error, invocation will not be retried: {}",
                e
            );
        }
    }

    /// Stops the retry timer, cancelling every pending retry.
    pub(crate) fn destroy(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.stop();
        }
    }
}

impl Drop for FailbackStrategy {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct RetryTask {
    core: Arc<InvokerCore>,
    load_balance: Arc<dyn LoadBalance>,
    invocation: Invocation,
    last: Mutex<Option<EndpointRef>>,
    retries: u32,
    failures: AtomicU32,
    period: Duration,
}

impl RetryTask {
    async fn retry(&self) -> Result<RpcResult> {
        let endpoints = self.core.list(&self.invocation)?;
        self.core.check_endpoints(&endpoints, &self.invocation)?;

        let excluded: Vec<EndpointRef> = self.last.lock().iter().cloned().collect();
        let chosen = self.core.select(
            self.load_balance.as_ref(),
            &self.invocation,
            &endpoints,
            &excluded,
        )?;
        *self.last.lock() = Some(chosen.clone());

        chosen.invoke(&self.invocation).await
    }
}

#[async_trait]
impl TimerTask for RetryTask {
    async fn run(&self, timeout: Timeout) {
        if timeout.is_cancelled() || self.core.is_destroyed() {
            return;
        }

        let error = match self.retry().await {
            Ok(_) => {
                tracing::debug!(
                    method = %self.invocation.method,
                    service = %self.core.service(),
                    "Failback retry succeeded"
                );
                return;
            }
            Err(e) => e,
        };

        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.retries {
            tracing::error!(
                method = %self.invocation.method,
                service = %self.core.service(),
                retries = self.retries,
                "Failed retry times exceed threshold, dropping the invocation: {}",
                error
            );
            return;
        }

        tracing::debug!(
            method = %self.invocation.method,
            failures = failures,
            "Failback retry failed, re-arming: {}",
            error
        );

        let Some(timer) = timeout.timer() else {
            return;
        };
        if let Err(e) = timer.new_timeout(timeout.task(), self.period) {
            tracing::warn!(
                method = %self.invocation.method,
                "Failed to re-arm failback retry: {}",
                e
            );
        }
    }
}
