//! Shared test doubles: an in-memory request store and a scripted chain
//! client with deterministic block progression.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::chain::{ChainClient, ChainConnector, EpochParams, SubmitOutcome};
use crate::config::{PartitionConfig, RegistrarConfig};
use crate::errors::{Error, Result};
use crate::store::RequestStore;
use crate::types::{Account, Network, Outcome, RegistrationRequest, ValidityWindow};
use crate::vault::{CredentialVault, MIN_KDF_ITERATIONS};

pub(crate) fn test_vault_key() -> String {
    "0123456789abcdef0123456789abcdef".to_string()
}

pub(crate) fn test_vault() -> CredentialVault {
    match CredentialVault::new(test_vault_key(), MIN_KDF_ITERATIONS) {
        Ok(vault) => vault,
        Err(err) => panic!("test vault construction failed: {err}"),
    }
}

/// Config with one schedulable partition (18, base block 100).
pub(crate) fn test_config() -> RegistrarConfig {
    let mut partitions = HashMap::new();
    partitions.insert(
        18,
        PartitionConfig {
            epoch_base_block: Some(100),
            fee_rates: Some(vec![
                Decimal::ONE,
                Decimal::ONE,
                Decimal::new(15, 1),
                Decimal::new(2, 0),
            ]),
            min_estimated_fee: None,
        },
    );
    RegistrarConfig {
        master_key: test_vault_key(),
        partitions,
        ..RegistrarConfig::default()
    }
}

/// An unresolved request with an open window and a distinct address per id.
pub(crate) fn request_for(
    id: u64,
    network: Network,
    partition: u32,
    max_fee: Decimal,
) -> RegistrationRequest {
    RegistrationRequest {
        id,
        account: Account {
            id,
            name: format!("acct-{id}"),
            address: format!("addr-{id}"),
            encrypted_secret: Some("blob".into()),
        },
        network,
        partition,
        max_fee,
        window: ValidityWindow::open(),
        outcome: Outcome::Unresolved,
        resolved_at: None,
        assigned_uid: None,
        deleted: false,
    }
}

/// In-memory [`RequestStore`] recording every status write.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) eligible: Mutex<Vec<RegistrationRequest>>,
    pub(crate) succeeded: Mutex<Vec<(u64, Option<u64>)>>,
    pub(crate) failed: Mutex<Vec<u64>>,
    pub(crate) deleted: Mutex<Vec<u64>>,
    pub(crate) fail_fetch: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn seed(&self, requests: Vec<RegistrationRequest>) {
        *self.eligible.lock().unwrap() = requests;
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable("scripted outage"));
        }
        Ok(())
    }

    async fn fetch_eligible(&self, _now: DateTime<Utc>) -> Result<Vec<RegistrationRequest>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::store_unavailable("scripted outage"));
        }
        // Resolved and soft-deleted rows fall out of the eligible set, the
        // way the real store filters server-side. Failed rows stay in: they
        // return to unresolved and retry.
        let succeeded: HashSet<u64> = self
            .succeeded
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| *id)
            .collect();
        let deleted: HashSet<u64> = self.deleted.lock().unwrap().iter().copied().collect();
        Ok(self
            .eligible
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !succeeded.contains(&r.id) && !deleted.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn mark_succeeded(
        &self,
        id: u64,
        assigned_uid: Option<u64>,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        self.succeeded.lock().unwrap().push((id, assigned_uid));
        Ok(())
    }

    async fn mark_failed(&self, id: u64) -> Result<()> {
        self.failed.lock().unwrap().push(id);
        Ok(())
    }

    async fn mark_deleted(&self, id: u64) -> Result<()> {
        self.deleted.lock().unwrap().push(id);
        Ok(())
    }
}

/// Scripted [`ChainClient`] whose height advances a fixed amount per
/// `current_block` call.
pub(crate) struct ScriptedChain {
    block: AtomicU64,
    advance_per_call: u64,
    interval_length: u64,
    scripted_blocks: Mutex<VecDeque<u64>>,
    block_calls: AtomicU64,
    admission_count: AtomicU32,
    admission_probe_calls: AtomicU64,
    pub(crate) fee: Mutex<Decimal>,
    pub(crate) blacklist: Mutex<HashSet<String>>,
    pub(crate) admitted: Mutex<HashSet<String>>,
    pub(crate) submit_calls: Mutex<Vec<(String, u32)>>,
    submit_results: Mutex<VecDeque<Result<SubmitOutcome>>>,
    shutdown_on_submit: Mutex<Option<Arc<AtomicBool>>>,
}

impl ScriptedChain {
    pub(crate) fn new(start_block: u64, interval_length: u64, advance_per_call: u64) -> Self {
        Self {
            block: AtomicU64::new(start_block),
            advance_per_call,
            interval_length,
            scripted_blocks: Mutex::new(VecDeque::new()),
            block_calls: AtomicU64::new(0),
            admission_count: AtomicU32::new(0),
            admission_probe_calls: AtomicU64::new(0),
            fee: Mutex::new(Decimal::ONE),
            blacklist: Mutex::new(HashSet::new()),
            admitted: Mutex::new(HashSet::new()),
            submit_calls: Mutex::new(Vec::new()),
            submit_results: Mutex::new(VecDeque::new()),
            shutdown_on_submit: Mutex::new(None),
        }
    }

    /// Number of height probes made so far.
    pub(crate) fn block_calls(&self) -> u64 {
        self.block_calls.load(Ordering::SeqCst)
    }

    /// Queue explicit heights to return before the automatic progression
    /// resumes, e.g. to hold the chain at one block across several ticks.
    pub(crate) fn push_blocks(&self, blocks: impl IntoIterator<Item = u64>) {
        self.scripted_blocks.lock().unwrap().extend(blocks);
    }

    /// Number of admission-count probes made so far.
    pub(crate) fn admission_probe_calls(&self) -> u64 {
        self.admission_probe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn set_admission_count(&self, count: u32) {
        self.admission_count.store(count, Ordering::SeqCst);
    }

    /// Queue the outcome of the next submission. Unqueued submissions are
    /// admitted with uid 1.
    pub(crate) fn push_submit_result(&self, result: Result<SubmitOutcome>) {
        self.submit_results.lock().unwrap().push_back(result);
    }

    /// Make `submit` raise the shutdown flag, simulating a signal arriving
    /// while a submission is in flight.
    pub(crate) fn set_shutdown_on_submit(&self, flag: Arc<AtomicBool>) {
        *self.shutdown_on_submit.lock().unwrap() = Some(flag);
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn current_block(&self) -> Result<u64> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(block) = self.scripted_blocks.lock().unwrap().pop_front() {
            return Ok(block);
        }
        Ok(self.block.fetch_add(self.advance_per_call, Ordering::SeqCst))
    }

    async fn epoch_params(&self, _partition: u32, _at_block: u64) -> Result<EpochParams> {
        Ok(EpochParams {
            interval_length: self.interval_length,
            target_admissions: 10,
        })
    }

    async fn current_fee(&self, _partition: u32, _at_block: u64) -> Result<Decimal> {
        Ok(*self.fee.lock().unwrap())
    }

    async fn recent_admission_count(
        &self,
        _partition: u32,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<u32> {
        self.admission_probe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.admission_count.load(Ordering::SeqCst))
    }

    async fn is_blacklisted(&self, address: &str, _partition: u32) -> Result<bool> {
        Ok(self.blacklist.lock().unwrap().contains(address))
    }

    async fn is_already_admitted(&self, address: &str, _partition: u32) -> Result<bool> {
        Ok(self.admitted.lock().unwrap().contains(address))
    }

    async fn submit(&self, address: &str, _secret: &str, partition: u32) -> Result<SubmitOutcome> {
        self.submit_calls
            .lock()
            .unwrap()
            .push((address.to_string(), partition));
        if let Some(flag) = self.shutdown_on_submit.lock().unwrap().as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
        match self.submit_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(SubmitOutcome {
                admitted: true,
                assigned_uid: Some(1),
            }),
        }
    }
}

/// Connector handing every network the same scripted client.
pub(crate) struct SingleChainConnector(pub(crate) Arc<ScriptedChain>);

impl ChainConnector for SingleChainConnector {
    fn connect(&self, _network: Network) -> Result<Arc<dyn ChainClient>> {
        Ok(Arc::clone(&self.0) as Arc<dyn ChainClient>)
    }
}
