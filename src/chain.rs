//! Chain client adapter.
//!
//! The chain is an external collaborator reached through a JSON gateway.
//! The engine consumes the opaque [`ChainClient`] interface; a
//! [`ChainConnector`] hands each network worker its own independent
//! connection, replacing any notion of a process-global session. Transport
//! failures are classified [`Error::ChainUnavailable`] and simply defer the
//! affected requests to the next poll cycle.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Error, Result};
use crate::logging::targets;
use crate::req::JsonClient;
use crate::types::Network;

/// Epoch parameters of a partition at a given block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EpochParams {
    /// Number of blocks per fee adjustment interval.
    pub interval_length: u64,
    /// Target number of admissions per interval.
    pub target_admissions: u32,
}

/// Result of a registration submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SubmitOutcome {
    pub admitted: bool,
    /// Identifier assigned by the chain on admission.
    pub assigned_uid: Option<u64>,
}

/// Opaque per-network chain interface.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain height.
    async fn current_block(&self) -> Result<u64>;

    /// Epoch parameters for a partition as of `at_block`.
    async fn epoch_params(&self, partition: u32, at_block: u64) -> Result<EpochParams>;

    /// Current admission fee for a partition as of `at_block`.
    async fn current_fee(&self, partition: u32, at_block: u64) -> Result<Decimal>;

    /// Number of successful admissions in `[from_block, to_block]`.
    async fn recent_admission_count(
        &self,
        partition: u32,
        from_block: u64,
        to_block: u64,
    ) -> Result<u32>;

    /// Whether the address is barred from registering in the partition.
    async fn is_blacklisted(&self, address: &str, partition: u32) -> Result<bool>;

    /// Whether the address already holds a slot in the partition.
    async fn is_already_admitted(&self, address: &str, partition: u32) -> Result<bool>;

    /// Submit the registration transaction, signed with `secret`.
    ///
    /// `Ok` with `admitted == false` is an explicit on-chain rejection;
    /// `Err(ChainUnavailable)` means the outcome is unknown and the request
    /// must stay unresolved.
    async fn submit(&self, address: &str, secret: &str, partition: u32) -> Result<SubmitOutcome>;
}

/// Factory producing one independent chain connection per network worker.
pub trait ChainConnector: Send + Sync {
    fn connect(&self, network: Network) -> Result<Arc<dyn ChainClient>>;
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GatewayRequest<'a> {
    CurrentBlock,
    EpochParams {
        partition: u32,
        at_block: u64,
    },
    CurrentFee {
        partition: u32,
        at_block: u64,
    },
    AdmissionCount {
        partition: u32,
        from_block: u64,
        to_block: u64,
    },
    Blacklisted {
        address: &'a str,
        partition: u32,
    },
    AlreadyAdmitted {
        address: &'a str,
        partition: u32,
    },
    SubmitRegistration {
        address: &'a str,
        secret: &'a str,
        partition: u32,
    },
}

#[derive(Deserialize)]
struct BlockResponse {
    block: u64,
}

#[derive(Deserialize)]
struct FeeResponse {
    fee: Decimal,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u32,
}

#[derive(Deserialize)]
struct FlagResponse {
    value: bool,
}

/// A negative quote is a gateway fault, not a price; it is classified as
/// transient so the affected requests simply retry next cycle.
fn check_fee_sample(partition: u32, fee: Decimal) -> Result<Decimal> {
    if fee < Decimal::ZERO {
        return Err(Error::chain_unavailable(format!(
            "partition {partition}: negative fee sample"
        )));
    }
    Ok(fee)
}

/// JSON gateway implementation of [`ChainClient`].
#[derive(Debug, Clone)]
pub struct HttpChainClient {
    client: JsonClient,
    network: Network,
}

impl HttpChainClient {
    pub fn new(network: Network, gateway_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: JsonClient::new(gateway_url)?,
            network,
        })
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn current_block(&self) -> Result<u64> {
        let resp: BlockResponse = self
            .client
            .post("/chain", &GatewayRequest::CurrentBlock)
            .await?;
        Ok(resp.block)
    }

    async fn epoch_params(&self, partition: u32, at_block: u64) -> Result<EpochParams> {
        let params: EpochParams = self
            .client
            .post("/chain", &GatewayRequest::EpochParams { partition, at_block })
            .await?;
        if params.interval_length == 0 {
            return Err(Error::chain_unavailable(format!(
                "partition {partition}: zero interval length"
            )));
        }
        Ok(params)
    }

    async fn current_fee(&self, partition: u32, at_block: u64) -> Result<Decimal> {
        let resp: FeeResponse = self
            .client
            .post("/chain", &GatewayRequest::CurrentFee { partition, at_block })
            .await?;
        check_fee_sample(partition, resp.fee)
    }

    async fn recent_admission_count(
        &self,
        partition: u32,
        from_block: u64,
        to_block: u64,
    ) -> Result<u32> {
        let resp: CountResponse = self
            .client
            .post(
                "/chain",
                &GatewayRequest::AdmissionCount {
                    partition,
                    from_block,
                    to_block,
                },
            )
            .await?;
        Ok(resp.count)
    }

    async fn is_blacklisted(&self, address: &str, partition: u32) -> Result<bool> {
        let resp: FlagResponse = self
            .client
            .post("/chain", &GatewayRequest::Blacklisted { address, partition })
            .await?;
        Ok(resp.value)
    }

    async fn is_already_admitted(&self, address: &str, partition: u32) -> Result<bool> {
        let resp: FlagResponse = self
            .client
            .post(
                "/chain",
                &GatewayRequest::AlreadyAdmitted { address, partition },
            )
            .await?;
        Ok(resp.value)
    }

    async fn submit(&self, address: &str, secret: &str, partition: u32) -> Result<SubmitOutcome> {
        debug!(
            target: targets::CHAIN,
            network = %self.network,
            partition,
            address,
            "submitting registration"
        );
        // Submissions are not idempotent; never retried at this layer.
        self.client
            .post_once(
                "/chain",
                &GatewayRequest::SubmitRegistration {
                    address,
                    secret,
                    partition,
                },
            )
            .await
    }
}

/// [`ChainConnector`] backed by per-network gateway URLs from config.
pub struct GatewayConnector {
    gateway_urls: std::collections::HashMap<Network, String>,
}

impl GatewayConnector {
    pub fn new(gateway_urls: std::collections::HashMap<Network, String>) -> Self {
        Self { gateway_urls }
    }
}

impl ChainConnector for GatewayConnector {
    fn connect(&self, network: Network) -> Result<Arc<dyn ChainClient>> {
        let url = self.gateway_urls.get(&network).ok_or_else(|| {
            Error::config(format!("no gateway configured for network {network}"))
        })?;
        Ok(Arc::new(HttpChainClient::new(network, url.clone())?))
    }
}
