//! Selector Property Tests
//!
//! Exclusion correctness and total availability over random endpoint sets,
//! plus stickiness observed through a cluster invoker.

use madrpc_cluster::{ClusterKind, Endpoint, EndpointRef, LoadBalance, RandomLoadBalance, Selector};
use madrpc_common::protocol::Invocation;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

mod common;
use common::{call, config, invoker_with, FirstLoadBalance, MockEndpoint};

/// Builds endpoints from availability flags and an exclusion mask.
fn scenario(available: &[bool], excluded: &[bool]) -> (Vec<EndpointRef>, Vec<EndpointRef>) {
    let endpoints: Vec<EndpointRef> = available
        .iter()
        .enumerate()
        .map(|(i, up)| {
            let ep = MockEndpoint::new(&format!("10.0.0.{}:20880", i));
            let ep = if *up { ep } else { ep.unavailable() };
            ep.build() as EndpointRef
        })
        .collect();
    let excluded = endpoints
        .iter()
        .zip(excluded)
        .filter(|(_, x)| **x)
        .map(|(e, _)| e.clone())
        .collect();
    (endpoints, excluded)
}

fn is_excluded(excluded: &[EndpointRef], ep: &EndpointRef) -> bool {
    excluded.iter().any(|e| e.address() == ep.address())
}

proptest! {
    #[test]
    fn prop_never_returns_excluded_while_alternatives_exist(
        flags in prop::collection::vec((any::<bool>(), any::<bool>()), 2..12),
        sticky in any::<bool>(),
    ) {
        let available: Vec<bool> = flags.iter().map(|f| f.0).collect();
        let mask: Vec<bool> = flags.iter().map(|f| f.1).collect();
        let (endpoints, excluded) = scenario(&available, &mask);

        let has_alternative = endpoints
            .iter()
            .any(|e| e.is_available() && !is_excluded(&excluded, e));

        let selector = Selector::new(true);
        let invocation = Invocation::new("find", json!(null));
        let first = FirstLoadBalance::default();
        let policies: [&dyn LoadBalance; 2] = [&RandomLoadBalance, &first];
        for policy in policies {
            let picked = selector
                .select(policy, &invocation, &endpoints, &excluded, sticky)
                .unwrap();
            if has_alternative {
                prop_assert!(!is_excluded(&excluded, &picked));
                prop_assert!(picked.is_available());
            }
        }
    }

    #[test]
    fn prop_always_selects_from_non_empty_list(
        flags in prop::collection::vec((any::<bool>(), any::<bool>()), 1..12),
    ) {
        let available: Vec<bool> = flags.iter().map(|f| f.0).collect();
        let mask: Vec<bool> = flags.iter().map(|f| f.1).collect();
        let (endpoints, excluded) = scenario(&available, &mask);

        let selector = Selector::new(true);
        let picked = selector.select(
            &RandomLoadBalance,
            &Invocation::new("find", json!(null)),
            &endpoints,
            &excluded,
            false,
        );
        prop_assert!(picked.is_some());

        if endpoints.iter().any(|e| e.is_available()) {
            prop_assert!(picked.unwrap().is_available());
        }
    }
}

// ============================================================================
// Stickiness through the invoker
// ============================================================================

#[tokio::test]
async fn test_sticky_method_skips_policy() {
    let endpoints = [MockEndpoint::new("a").build(), MockEndpoint::new("b").build()];
    let policy = Arc::new(FirstLoadBalance::default());
    let invoker = invoker_with(
        ClusterKind::Failfast,
        config().with_parameter("find.sticky", "true"),
        &endpoints,
        policy.clone(),
    );

    for _ in 0..5 {
        invoker.invoke(&call("find")).await.unwrap();
    }

    assert_eq!(policy.calls(), 1);
    assert_eq!(endpoints[0].calls(), 5);
}

#[tokio::test]
async fn test_non_sticky_method_asks_policy_every_time() {
    let endpoints = [MockEndpoint::new("a").build(), MockEndpoint::new("b").build()];
    let policy = Arc::new(FirstLoadBalance::default());
    let invoker = invoker_with(
        ClusterKind::Failfast,
        config().with_parameter("find.sticky", "true"),
        &endpoints,
        policy.clone(),
    );

    for _ in 0..3 {
        invoker.invoke(&call("save")).await.unwrap();
    }
    assert_eq!(policy.calls(), 3);
}

#[tokio::test]
async fn test_sticky_endpoint_replaced_when_unavailable() {
    let endpoints = [MockEndpoint::new("a").build(), MockEndpoint::new("b").build()];
    let invoker = invoker_with(
        ClusterKind::Failfast,
        config().with_parameter("sticky", "true"),
        &endpoints,
        Arc::new(FirstLoadBalance::default()),
    );

    invoker.invoke(&call("find")).await.unwrap();
    endpoints[0].set_available(false);
    assert!(!invoker.is_available());

    let result = invoker.invoke(&call("find")).await.unwrap();
    assert_eq!(result.value(), Some(&json!("b")));
    assert!(invoker.is_available());
}
