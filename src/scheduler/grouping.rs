//! Candidate pre-filtering and batch grouping.
//!
//! Pending requests are grouped by network (each group gets its own chain
//! connection), then by target partition, then by fee ceiling: requests
//! sharing an identical ceiling share the same admission/no-admission
//! outcome, so one fee-window decision serves all of them. Group order is
//! first-appearance order, stable within a poll cycle.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::errors::Result;
use crate::logging::targets;
use crate::store::RequestStore;
use crate::types::{Network, RegistrationRequest};

fn stable_group_by<T, K: PartialEq + Copy>(
    items: Vec<T>,
    key: impl Fn(&T) -> K,
) -> Vec<(K, Vec<T>)> {
    let mut groups: Vec<(K, Vec<T>)> = Vec::new();
    for item in items {
        let k = key(&item);
        match groups.iter_mut().find(|(gk, _)| *gk == k) {
            Some((_, members)) => members.push(item),
            None => groups.push((k, vec![item])),
        }
    }
    groups
}

/// Group requests by target network, preserving first-appearance order.
pub fn group_by_network(
    requests: Vec<RegistrationRequest>,
) -> Vec<(Network, Vec<RegistrationRequest>)> {
    stable_group_by(requests, |r| r.network)
}

/// Group one network's requests by target partition.
pub fn group_by_partition(
    requests: Vec<RegistrationRequest>,
) -> Vec<(u32, Vec<RegistrationRequest>)> {
    stable_group_by(requests, |r| r.partition)
}

/// Group one partition's requests by fee ceiling.
pub fn group_by_fee(
    requests: Vec<RegistrationRequest>,
) -> Vec<(Decimal, Vec<RegistrationRequest>)> {
    stable_group_by(requests, |r| r.max_fee)
}

/// Pre-filter candidates before any grouping decision is made.
///
/// - blacklisted address: soft-delete the request, it never reaches the
///   estimator;
/// - already admitted: idempotent catch-up, record success without any
///   on-chain write (there is no submission receipt, so no identifier);
/// - account without a stored secret: skip with a logged reason, the
///   request stays unresolved for manual intervention;
/// - chain probe failure: skip this cycle, retry on the next one;
/// - stale eligibility (window crossed since the fetch): drop defensively.
///
/// Store write failures propagate; they are fatal to the process.
pub async fn prefilter_candidates(
    requests: Vec<RegistrationRequest>,
    chain: &dyn ChainClient,
    store: &dyn RequestStore,
    now: DateTime<Utc>,
    shutdown: &AtomicBool,
) -> Result<Vec<RegistrationRequest>> {
    let mut remaining = Vec::with_capacity(requests.len());

    for request in requests {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        if !request.is_eligible(now) {
            warn!(
                target: targets::GROUPING,
                id = request.id,
                "request no longer eligible, dropping from cycle"
            );
            continue;
        }

        if request.account.encrypted_secret.is_none() {
            warn!(
                target: targets::GROUPING,
                id = request.id,
                account = %request.account.name,
                "account has no stored secret, cannot auto-schedule"
            );
            continue;
        }

        let address = request.account.address.as_str();
        let partition = request.partition;

        match chain.is_blacklisted(address, partition).await {
            Ok(true) => {
                info!(
                    target: targets::GROUPING,
                    id = request.id,
                    account = %request.account.name,
                    partition,
                    "address is blacklisted, excluding request permanently"
                );
                store.mark_deleted(request.id).await?;
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(
                    target: targets::GROUPING,
                    id = request.id,
                    error = %err,
                    "blacklist probe failed, deferring to next cycle"
                );
                continue;
            }
        }

        match chain.is_already_admitted(address, partition).await {
            Ok(true) => {
                info!(
                    target: targets::GROUPING,
                    id = request.id,
                    account = %request.account.name,
                    partition,
                    "address already admitted, recording success"
                );
                store.mark_succeeded(request.id, None, now).await?;
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(
                    target: targets::GROUPING,
                    id = request.id,
                    error = %err,
                    "admission probe failed, deferring to next cycle"
                );
                continue;
            }
        }

        remaining.push(request);
    }

    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request_for, ScriptedChain, MemoryStore};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn network_groups_preserve_first_appearance_order() {
        let reqs = vec![
            request_for(1, Network::Testnet, 18, dec!(1)),
            request_for(2, Network::Mainnet, 18, dec!(1)),
            request_for(3, Network::Testnet, 22, dec!(1)),
        ];
        let groups = group_by_network(reqs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Network::Testnet);
        assert_eq!(groups[0].1.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 3]);
        assert_eq!(groups[1].0, Network::Mainnet);
    }

    #[test]
    fn identical_ceilings_are_decided_together() {
        let reqs = vec![
            request_for(1, Network::Testnet, 18, dec!(0.5)),
            request_for(2, Network::Testnet, 18, dec!(1.5)),
            request_for(3, Network::Testnet, 18, dec!(0.50)),
        ];
        let groups = group_by_fee(reqs);
        assert_eq!(groups.len(), 2);
        // 0.5 and 0.50 are the same ceiling.
        assert_eq!(groups[0].1.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 3]);
    }

    #[tokio::test]
    async fn blacklisted_request_is_deleted_before_estimation() {
        let chain = ScriptedChain::new(100, 360, 1);
        let store = MemoryStore::default();
        let req = request_for(1, Network::Testnet, 18, dec!(1));
        chain.blacklist.lock().unwrap().insert(req.account.address.clone());

        let remaining = prefilter_candidates(
            vec![req],
            &chain,
            &store,
            Utc::now(),
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        assert!(remaining.is_empty());
        assert_eq!(*store.deleted.lock().unwrap(), vec![1]);
        assert!(store.succeeded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_admitted_request_is_caught_up_without_submission() {
        let chain = ScriptedChain::new(100, 360, 1);
        let store = MemoryStore::default();
        let req = request_for(2, Network::Testnet, 18, dec!(1));
        chain.admitted.lock().unwrap().insert(req.account.address.clone());

        let remaining = prefilter_candidates(
            vec![req],
            &chain,
            &store,
            Utc::now(),
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        assert!(remaining.is_empty());
        assert_eq!(*store.succeeded.lock().unwrap(), vec![(2, None)]);
        assert!(chain.submit_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn account_without_secret_is_skipped() {
        let chain = ScriptedChain::new(100, 360, 1);
        let store = MemoryStore::default();
        let mut req = request_for(3, Network::Testnet, 18, dec!(1));
        req.account.encrypted_secret = None;

        let remaining = prefilter_candidates(
            vec![req],
            &chain,
            &store,
            Utc::now(),
            &AtomicBool::new(false),
        )
        .await
        .unwrap();

        assert!(remaining.is_empty());
        assert!(store.deleted.lock().unwrap().is_empty());
        assert!(store.failed.lock().unwrap().is_empty());
    }
}
