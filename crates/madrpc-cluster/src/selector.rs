//! Sticky, exclusion-aware endpoint selection
//!
//! Every cluster strategy picks endpoints through a [`Selector`]. On top of the
//! configured [`LoadBalance`] policy the selector adds two behaviors:
//!
//! - **Stickiness**: when enabled for a method, the endpoint chosen last time is
//!   reused as long as it is still listed, available and not excluded. This is
//!   the only path that bypasses the policy.
//! - **Reselection**: when the policy picks an endpoint that was already tried
//!   in the current call (or is unavailable), the selector asks the policy
//!   again over the remaining candidates, then over the available excluded
//!   endpoints, and finally falls back to the endpoint next to the original pick.
//!
//! The result: an excluded endpoint is only returned when every available
//! endpoint has already been excluded, and a pick is always returned for a
//! non-empty list.

use crate::endpoint::{self, EndpointRef};
use crate::load_balance::LoadBalance;
use madrpc_common::protocol::Invocation;
use parking_lot::Mutex;

/// Stateful endpoint selector owned by one cluster invoker.
pub struct Selector {
    /// Endpoint remembered for sticky methods
    sticky: Mutex<Option<EndpointRef>>,
    /// Whether unavailable endpoints are skipped
    availability_check: bool,
}

impl Selector {
    pub fn new(availability_check: bool) -> Self {
        Self {
            sticky: Mutex::new(None),
            availability_check,
        }
    }

    pub fn availability_check(&self) -> bool {
        self.availability_check
    }

    /// The endpoint currently remembered for sticky calls.
    pub fn sticky_endpoint(&self) -> Option<EndpointRef> {
        self.sticky.lock().clone()
    }

    /// Selects an endpoint for `invocation`.
    ///
    /// # Arguments
    /// * `policy` - Load-balance policy to delegate to
    /// * `invocation` - The call being routed
    /// * `endpoints` - Current endpoint list
    /// * `excluded` - Endpoints already tried during this call
    /// * `sticky` - Whether the called method is sticky
    ///
    /// # Returns
    /// `None` only when `endpoints` is empty
    pub fn select(
        &self,
        policy: &dyn LoadBalance,
        invocation: &Invocation,
        endpoints: &[EndpointRef],
        excluded: &[EndpointRef],
        sticky: bool,
    ) -> Option<EndpointRef> {
        if endpoints.is_empty() {
            return None;
        }

        {
            let mut remembered = self.sticky.lock();

            // Forget an endpoint that left the list
            if let Some(ep) = remembered.as_ref() {
                if !endpoint::contains(endpoints, ep) {
                    *remembered = None;
                }
            }

            if sticky {
                if let Some(ep) = remembered.as_ref() {
                    if !endpoint::contains(excluded, ep)
                        && (!self.availability_check || ep.is_available())
                    {
                        return Some(ep.clone());
                    }
                }
            }
        }

        let chosen = self.do_select(policy, invocation, endpoints, excluded)?;

        if sticky {
            *self.sticky.lock() = Some(chosen.clone());
        }

        Some(chosen)
    }

    fn do_select(
        &self,
        policy: &dyn LoadBalance,
        invocation: &Invocation,
        endpoints: &[EndpointRef],
        excluded: &[EndpointRef],
    ) -> Option<EndpointRef> {
        if endpoints.len() == 1 {
            return Some(endpoints[0].clone());
        }

        let picked = policy.select(endpoints, invocation)?;

        let rejected = endpoint::contains(excluded, &picked)
            || (self.availability_check && !picked.is_available());
        if !rejected {
            return Some(picked);
        }

        if let Some(reselected) = self.reselect(policy, invocation, endpoints, excluded) {
            return Some(reselected);
        }

        // Last resort: the endpoint after the original pick, ignoring exclusion
        let index = endpoint::position(endpoints, &picked).unwrap_or(0);
        tracing::debug!(
            method = %invocation.method,
            addr = %picked.address(),
            "No reselect candidate, falling back to next endpoint"
        );
        Some(endpoints[(index + 1) % endpoints.len()].clone())
    }

    fn reselect(
        &self,
        policy: &dyn LoadBalance,
        invocation: &Invocation,
        endpoints: &[EndpointRef],
        excluded: &[EndpointRef],
    ) -> Option<EndpointRef> {
        let mut candidates: Vec<EndpointRef> = endpoints
            .iter()
            .filter(|ep| !self.availability_check || ep.is_available())
            .filter(|ep| !endpoint::contains(excluded, ep))
            .cloned()
            .collect();

        if !candidates.is_empty() {
            return policy.select(&candidates, invocation);
        }

        for ep in excluded {
            if ep.is_available() && !endpoint::contains(&candidates, ep) {
                candidates.push(ep.clone());
            }
        }

        if !candidates.is_empty() {
            return policy.select(&candidates, invocation);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use async_trait::async_trait;
    use madrpc_common::protocol::error::Result;
    use madrpc_common::protocol::RpcResult;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Node {
        addr: String,
        up: AtomicBool,
    }

    #[async_trait]
    impl Endpoint for Node {
        fn address(&self) -> &str {
            &self.addr
        }

        fn service_key(&self) -> &str {
            "Svc"
        }

        fn is_available(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }

        async fn invoke(&self, _invocation: &Invocation) -> Result<RpcResult> {
            Ok(RpcResult::empty())
        }
    }

    fn switchable(addr: &str, up: bool) -> Arc<Node> {
        Arc::new(Node {
            addr: addr.to_string(),
            up: AtomicBool::new(up),
        })
    }

    fn node(addr: &str, up: bool) -> EndpointRef {
        switchable(addr, up)
    }

    /// Always picks the first endpoint and counts how often it was asked.
    #[derive(Default)]
    struct First {
        calls: AtomicUsize,
    }

    impl LoadBalance for First {
        fn name(&self) -> &str {
            "first"
        }

        fn select(&self, endpoints: &[EndpointRef], _inv: &Invocation) -> Option<EndpointRef> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            endpoints.first().cloned()
        }
    }

    fn call() -> Invocation {
        Invocation::new("m", json!(null))
    }

    #[test]
    fn test_empty_list_returns_none() {
        let selector = Selector::new(true);
        assert!(selector
            .select(&First::default(), &call(), &[], &[], false)
            .is_none());
    }

    #[test]
    fn test_single_endpoint_skips_policy() {
        let selector = Selector::new(true);
        let policy = First::default();
        let only = node("a", false);
        let picked = selector
            .select(&policy, &call(), &[only.clone()], &[only], false)
            .unwrap();
        assert_eq!(picked.address(), "a");
        assert_eq!(policy.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_excluded_pick_is_reselected() {
        let selector = Selector::new(true);
        let a = node("a", true);
        let b = node("b", true);
        let picked = selector
            .select(&First::default(), &call(), &[a.clone(), b], &[a], false)
            .unwrap();
        assert_eq!(picked.address(), "b");
    }

    #[test]
    fn test_unavailable_pick_is_reselected() {
        let selector = Selector::new(true);
        let a = node("a", false);
        let b = node("b", true);
        let picked = selector
            .select(&First::default(), &call(), &[a, b], &[], false)
            .unwrap();
        assert_eq!(picked.address(), "b");
    }

    #[test]
    fn test_unavailable_pick_kept_without_availability_check() {
        let selector = Selector::new(false);
        let a = node("a", false);
        let b = node("b", true);
        let picked = selector
            .select(&First::default(), &call(), &[a, b], &[], false)
            .unwrap();
        assert_eq!(picked.address(), "a");
    }

    #[test]
    fn test_falls_back_to_available_excluded() {
        let selector = Selector::new(true);
        let a = node("a", true);
        let b = node("b", false);
        let c = node("c", true);
        let picked = selector
            .select(
                &First::default(),
                &call(),
                &[a.clone(), b, c.clone()],
                &[a, c],
                false,
            )
            .unwrap();
        // Second pool is the available excluded endpoints: [a, c]
        assert_eq!(picked.address(), "a");
    }

    #[test]
    fn test_last_resort_takes_next_endpoint() {
        let selector = Selector::new(true);
        let a = node("a", false);
        let b = node("b", false);
        let c = node("c", false);
        let picked = selector
            .select(&First::default(), &call(), &[a, b, c], &[], false)
            .unwrap();
        assert_eq!(picked.address(), "b");
    }

    #[test]
    fn test_sticky_reuses_endpoint_without_policy() {
        let selector = Selector::new(true);
        let policy = First::default();
        let list = vec![node("a", true), node("b", true)];

        let first = selector.select(&policy, &call(), &list, &[], true).unwrap();
        assert_eq!(policy.calls.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            let again = selector.select(&policy, &call(), &list, &[], true).unwrap();
            assert_eq!(again.address(), first.address());
        }
        assert_eq!(policy.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sticky_skipped_when_excluded() {
        let selector = Selector::new(true);
        let a = node("a", true);
        let b = node("b", true);
        let list = vec![a.clone(), b];

        selector.select(&First::default(), &call(), &list, &[], true);
        let picked = selector
            .select(&First::default(), &call(), &list, &[a], true)
            .unwrap();
        assert_eq!(picked.address(), "b");
        // the deliberate reselection becomes the new sticky endpoint
        assert_eq!(selector.sticky_endpoint().unwrap().address(), "b");
    }

    #[test]
    fn test_sticky_skipped_when_unavailable() {
        let selector = Selector::new(true);
        let a = switchable("a", true);
        let list = vec![a.clone() as EndpointRef, node("b", true)];

        selector.select(&First::default(), &call(), &list, &[], true);
        a.up.store(false, Ordering::SeqCst);
        let picked = selector
            .select(&First::default(), &call(), &list, &[], true)
            .unwrap();
        assert_eq!(picked.address(), "b");
    }

    #[test]
    fn test_sticky_cleared_when_endpoint_leaves_list() {
        let selector = Selector::new(true);
        let list = vec![node("a", true), node("b", true)];
        selector.select(&First::default(), &call(), &list, &[], true);
        assert!(selector.sticky_endpoint().is_some());

        let shrunk = vec![node("b", true), node("c", true)];
        selector.select(&First::default(), &call(), &shrunk, &[], false);
        assert!(selector.sticky_endpoint().is_none());
    }

    #[test]
    fn test_non_sticky_does_not_record() {
        let selector = Selector::new(true);
        let list = vec![node("a", true), node("b", true)];
        selector.select(&First::default(), &call(), &list, &[], false);
        assert!(selector.sticky_endpoint().is_none());
    }
}
