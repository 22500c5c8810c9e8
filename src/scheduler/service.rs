//! The long-lived poll loop.
//!
//! One cycle fetches the eligible set, groups it by network, and hands each
//! network group to its own worker task holding an independent chain
//! connection. Networks proceed concurrently; everything within a network
//! (partitions, fee tiers, accounts) is strictly sequential. The request
//! store is the only shared resource and every write is single-row, so
//! workers never contend on the same request id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::chain::{ChainClient, ChainConnector};
use crate::config::RegistrarConfig;
use crate::errors::Result;
use crate::logging::targets;
use crate::store::RequestStore;
use crate::types::{Network, RegistrationRequest};
use crate::vault::CredentialVault;

use super::{
    group_by_fee, group_by_network, group_by_partition, prefilter_candidates, sleep_cancellable,
    FeeWindowEstimator, SubmissionEngine, WindowDecision,
};

/// The registration scheduling service.
pub struct RegistrarService {
    config: Arc<RegistrarConfig>,
    store: Arc<dyn RequestStore>,
    connector: Arc<dyn ChainConnector>,
    vault: CredentialVault,
}

impl RegistrarService {
    /// Build the service; fails fast on invalid configuration.
    pub fn new(
        config: RegistrarConfig,
        store: Arc<dyn RequestStore>,
        connector: Arc<dyn ChainConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let vault = CredentialVault::new(config.master_key.clone(), config.kdf_iterations)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            connector,
            vault,
        })
    }

    /// Run the poll loop until shutdown or a fatal store failure.
    ///
    /// A store failure returns an error rather than retrying indefinitely:
    /// the process exits non-zero and the external supervisor restarts it.
    /// `Unresolved` is always a safe state to resume from.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        self.store.ping().await?;
        info!(
            target: targets::CORE,
            poll_interval_secs = self.config.poll_interval_secs,
            "registration scheduler started"
        );

        let poll_interval = Duration::from_secs(self.config.poll_interval_secs);
        while !shutdown.load(Ordering::SeqCst) {
            self.run_cycle(&shutdown).await?;
            if !sleep_cancellable(poll_interval, &shutdown).await {
                break;
            }
        }

        info!(target: targets::CORE, "registration scheduler stopped");
        Ok(())
    }

    /// Execute one poll cycle. Public so operational tooling and tests can
    /// drive single cycles.
    pub async fn run_cycle(&self, shutdown: &Arc<AtomicBool>) -> Result<()> {
        let now = Utc::now();
        let pending = self.store.fetch_eligible(now).await?;
        if pending.is_empty() {
            info!(target: targets::CORE, "no pending registration requests");
            return Ok(());
        }
        info!(
            target: targets::CORE,
            count = pending.len(),
            "found pending registration requests"
        );

        let mut workers = Vec::new();
        for (network, requests) in group_by_network(pending) {
            let chain = match self.connector.connect(network) {
                Ok(chain) => chain,
                Err(err) => {
                    warn!(
                        target: targets::CORE,
                        %network,
                        error = %err,
                        "cannot connect to network, skipping its requests this cycle"
                    );
                    continue;
                }
            };
            let worker = NetworkWorker {
                network,
                chain,
                store: Arc::clone(&self.store),
                config: Arc::clone(&self.config),
                vault: self.vault.clone(),
                shutdown: Arc::clone(shutdown),
            };
            workers.push((network, tokio::spawn(worker.process(requests))));
        }

        for (network, handle) in workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_fatal() => return Err(err),
                Ok(Err(err)) => {
                    warn!(
                        target: targets::CORE,
                        %network,
                        error = %err,
                        "network worker finished with error"
                    );
                }
                Err(join_err) => {
                    error!(
                        target: targets::CORE,
                        %network,
                        error = %join_err,
                        "network worker panicked"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Per-network unit of work for one poll cycle. Owns its chain connection;
/// no chain-client state is shared across workers.
struct NetworkWorker {
    network: Network,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn RequestStore>,
    config: Arc<RegistrarConfig>,
    vault: CredentialVault,
    shutdown: Arc<AtomicBool>,
}

impl NetworkWorker {
    async fn process(self, requests: Vec<RegistrationRequest>) -> Result<()> {
        info!(
            target: targets::CORE,
            network = %self.network,
            count = requests.len(),
            "processing network group"
        );

        let candidates = prefilter_candidates(
            requests,
            self.chain.as_ref(),
            self.store.as_ref(),
            Utc::now(),
            &self.shutdown,
        )
        .await?;
        if candidates.is_empty() {
            return Ok(());
        }

        for (partition, partition_requests) in group_by_partition(candidates) {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let estimator = match FeeWindowEstimator::for_partition(partition, &self.config) {
                Ok(estimator) => estimator,
                Err(err) => {
                    warn!(
                        target: targets::CORE,
                        network = %self.network,
                        partition,
                        error = %err,
                        "partition not eligible for auto-scheduling"
                    );
                    continue;
                }
            };

            for (max_fee, group) in group_by_fee(partition_requests) {
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                info!(
                    target: targets::CORE,
                    network = %self.network,
                    partition,
                    %max_fee,
                    accounts = group.len(),
                    "evaluating fee group"
                );

                let decision = match self
                    .estimate_window(&estimator, max_fee)
                    .await
                {
                    Ok(decision) => decision,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        warn!(
                            target: targets::CORE,
                            network = %self.network,
                            partition,
                            error = %err,
                            "window estimation failed, deferring group to next cycle"
                        );
                        continue;
                    }
                };

                match decision {
                    WindowDecision::SubmitNow => {
                        let engine = SubmissionEngine::new(
                            self.chain.as_ref(),
                            self.store.as_ref(),
                            &self.vault,
                            Duration::from_secs(self.config.submit_spacing_secs),
                        );
                        engine.submit_group(&group, &self.shutdown).await?;
                    }
                    WindowDecision::Defer => {
                        info!(
                            target: targets::CORE,
                            network = %self.network,
                            partition,
                            %max_fee,
                            "window unfavorable, deferring group"
                        );
                    }
                    WindowDecision::Cancelled => return Ok(()),
                }
            }
        }
        Ok(())
    }

    async fn estimate_window(
        &self,
        estimator: &FeeWindowEstimator,
        max_fee: rust_decimal::Decimal,
    ) -> Result<WindowDecision> {
        estimator
            .wait_for_window(self.chain.as_ref(), max_fee, &self.shutdown)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SubmitOutcome;
    use crate::errors::Error;
    use crate::testing::{
        request_for, test_config, test_vault_key, MemoryStore, ScriptedChain, SingleChainConnector,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn service(
        chain: Arc<ScriptedChain>,
        store: Arc<MemoryStore>,
    ) -> RegistrarService {
        RegistrarService::new(
            test_config(),
            store,
            Arc::new(SingleChainConnector(chain)),
        )
        .unwrap()
    }

    fn sealed(id: u64, partition: u32, max_fee: Decimal) -> RegistrationRequest {
        let vault = crate::vault::CredentialVault::new(test_vault_key(), 100_000).unwrap();
        let mut req = request_for(id, Network::Testnet, partition, max_fee);
        req.account.id = id;
        req.account.encrypted_secret = Some(vault.encrypt("passphrase", id).unwrap());
        req
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_submits_favorable_group() {
        // Zero fee, unsaturated interval: fast path fires and both
        // requests in the fee group are submitted sequentially.
        let chain = Arc::new(ScriptedChain::new(105, 10, 0));
        *chain.fee.lock().unwrap() = Decimal::ZERO;
        chain.push_submit_result(Ok(SubmitOutcome {
            admitted: true,
            assigned_uid: Some(11),
        }));
        chain.push_submit_result(Ok(SubmitOutcome {
            admitted: true,
            assigned_uid: Some(12),
        }));

        let store = Arc::new(MemoryStore::default());
        store.seed(vec![sealed(1, 18, dec!(1)), sealed(2, 18, dec!(1))]);

        let svc = service(chain.clone(), store.clone());
        svc.run_cycle(&Arc::new(AtomicBool::new(false))).await.unwrap();

        assert_eq!(chain.submit_calls.lock().unwrap().len(), 2);
        assert_eq!(
            *store.succeeded.lock().unwrap(),
            vec![(1, Some(11)), (2, Some(12))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_partition_is_skipped_with_no_submissions() {
        let chain = Arc::new(ScriptedChain::new(105, 10, 0));
        *chain.fee.lock().unwrap() = Decimal::ZERO;
        let store = Arc::new(MemoryStore::default());
        // Partition 999 has no epoch base block or rate table configured.
        store.seed(vec![sealed(1, 999, dec!(1))]);

        let svc = service(chain.clone(), store.clone());
        svc.run_cycle(&Arc::new(AtomicBool::new(false))).await.unwrap();

        assert!(chain.submit_calls.lock().unwrap().is_empty());
        assert!(store.succeeded.lock().unwrap().is_empty());
        assert!(store.failed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_submit_failure_is_retried_next_cycle() {
        let chain = Arc::new(ScriptedChain::new(105, 10, 0));
        *chain.fee.lock().unwrap() = Decimal::ZERO;
        chain.push_submit_result(Err(Error::chain_unavailable("socket closed")));
        chain.push_submit_result(Ok(SubmitOutcome {
            admitted: true,
            assigned_uid: Some(5),
        }));

        let store = Arc::new(MemoryStore::default());
        store.seed(vec![sealed(1, 18, dec!(1))]);
        let svc = service(chain.clone(), store.clone());
        let shutdown = Arc::new(AtomicBool::new(false));

        // First cycle: transport error, request stays unresolved.
        svc.run_cycle(&shutdown).await.unwrap();
        assert!(store.succeeded.lock().unwrap().is_empty());
        assert!(store.failed.lock().unwrap().is_empty());

        // Second cycle: same request fetched again and admitted.
        svc.run_cycle(&shutdown).await.unwrap();
        assert_eq!(*store.succeeded.lock().unwrap(), vec![(1, Some(5))]);
        assert_eq!(chain.submit_calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn store_outage_is_fatal() {
        let chain = Arc::new(ScriptedChain::new(105, 10, 0));
        let store = Arc::new(MemoryStore::default());
        store.fail_fetch.store(true, Ordering::SeqCst);

        let svc = service(chain, store);
        let err = svc
            .run_cycle(&Arc::new(AtomicBool::new(false)))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
