//! Fee-window estimation.
//!
//! The admission fee recalculates at fixed interval boundaries anchored to
//! an operator-configured epoch base block. For a fee-ceiling group the
//! estimator first checks an obviously favorable window (fee under the
//! ceiling, low saturation); otherwise it waits on a one-second cadence,
//! takes a single forecast sample shortly before the boundary, and decides
//! at the boundary whether to submit before the price adjusts upward or to
//! defer one interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use crate::chain::ChainClient;
use crate::config::RegistrarConfig;
use crate::errors::{Error, Result};
use crate::logging::targets;

/// Admission count below which a fee already under the ceiling is taken
/// immediately, with no boundary wait.
pub const LOW_SATURATION_COUNT: u32 = 3;

/// Blocks before the interval boundary at which the forecast sample is
/// taken.
pub const FORECAST_LOOKAHEAD_BLOCKS: u64 = 2;

/// Real-time cadence of the wait loop.
const WAIT_TICK: Duration = Duration::from_secs(1);

/// Outcome of one fee-window evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    /// Conditions are favorable; submit the group now.
    SubmitNow,
    /// The forecast exceeds the ceiling; retry on a later poll cycle.
    Defer,
    /// Shutdown was requested while waiting.
    Cancelled,
}

/// Extrapolate the next interval's fee from the current fee and the
/// saturation ratio `count / target`.
///
/// Tier selection: ratio `== 0` -> `rates[0]`, `<= 1/3` -> `rates[1]`,
/// `<= 2/3` -> `rates[2]`, `<= 1` -> `rates[3]`; ratios above 1 clamp to
/// the top tier. An optional floor bounds the estimate from below.
pub fn estimate_next_fee(
    rates: &[Decimal; 4],
    count: u32,
    target: u32,
    current_fee: Decimal,
    floor: Option<Decimal>,
) -> Decimal {
    let rate = if count == 0 {
        rates[0]
    } else if target == 0 {
        // Degenerate target with observed admissions: fully saturated.
        rates[3]
    } else if count * 3 <= target {
        rates[1]
    } else if count * 3 <= target * 2 {
        rates[2]
    } else {
        rates[3]
    };

    let estimate = current_fee * rate;
    match floor {
        Some(min) => estimate.max(min),
        None => estimate,
    }
}

/// Per-partition fee-window estimator.
///
/// Construction fails for partitions without a configured epoch base block
/// or fee rate table; such partitions are not eligible for auto-scheduling
/// and the caller logs the reason. Rates are never guessed.
#[derive(Debug, Clone)]
pub struct FeeWindowEstimator {
    partition: u32,
    epoch_base_block: u64,
    rates: [Decimal; 4],
    min_estimate: Option<Decimal>,
}

impl FeeWindowEstimator {
    pub fn for_partition(partition: u32, config: &RegistrarConfig) -> Result<Self> {
        let epoch_base_block = config.epoch_base_block(partition).ok_or_else(|| {
            Error::config(format!("partition {partition}: no epoch base block configured"))
        })?;
        let rates = config.fee_rates(partition).ok_or_else(|| {
            Error::config(format!("partition {partition}: no fee rate table configured"))
        })?;
        let min_estimate = config
            .partitions
            .get(&partition)
            .and_then(|p| p.min_estimated_fee);
        Ok(Self {
            partition,
            epoch_base_block,
            rates,
            min_estimate,
        })
    }

    /// Construct directly from parameters (used by tests and tooling).
    pub fn with_params(
        partition: u32,
        epoch_base_block: u64,
        rates: [Decimal; 4],
        min_estimate: Option<Decimal>,
    ) -> Self {
        Self {
            partition,
            epoch_base_block,
            rates,
            min_estimate,
        }
    }

    /// Offset of `block` into its current interval.
    fn round_block(&self, block: u64, interval_length: u64) -> Result<u64> {
        let since_base = block.checked_sub(self.epoch_base_block).ok_or_else(|| {
            Error::config(format!(
                "partition {}: epoch base block {} is ahead of chain head {}",
                self.partition, self.epoch_base_block, block
            ))
        })?;
        Ok(since_base % interval_length)
    }

    /// Decide whether the fee window for `max_fee` is favorable.
    ///
    /// Chain probe failures propagate as [`Error::ChainUnavailable`]; the
    /// caller defers the group to the next poll cycle. The wait loop has no
    /// hard timeout but checks `shutdown` at every tick.
    pub async fn wait_for_window(
        &self,
        chain: &dyn ChainClient,
        max_fee: Decimal,
        shutdown: &AtomicBool,
    ) -> Result<WindowDecision> {
        let mut block = chain.current_block().await?;
        let params = chain.epoch_params(self.partition, block).await?;
        // An interval shorter than the lookahead leaves no block to sample
        // from; the boundary would be decided blind, forever.
        if params.interval_length <= FORECAST_LOOKAHEAD_BLOCKS {
            return Err(Error::config(format!(
                "partition {}: interval length {} is too short to forecast",
                self.partition, params.interval_length
            )));
        }

        // Fast path: fee already acceptable and the closing interval is
        // barely saturated. Zero-fee windows land here too.
        let fee = chain.current_fee(self.partition, block).await?;
        if fee <= max_fee {
            let interval_start = block - self.round_block(block, params.interval_length)?;
            let count = chain
                .recent_admission_count(self.partition, interval_start, block)
                .await?;
            if count < LOW_SATURATION_COUNT {
                debug!(
                    target: targets::ESTIMATOR,
                    partition = self.partition,
                    %fee,
                    %max_fee,
                    count,
                    "favorable window, submitting immediately"
                );
                return Ok(WindowDecision::SubmitNow);
            }
        }

        let mut forecast: Option<Decimal> = None;
        let mut sampled_round: Option<u64> = None;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(WindowDecision::Cancelled);
            }
            tokio::time::sleep(WAIT_TICK).await;
            if shutdown.load(Ordering::SeqCst) {
                return Ok(WindowDecision::Cancelled);
            }

            block = chain.current_block().await?;
            let round_block = self.round_block(block, params.interval_length)?;
            let round_number = (block - self.epoch_base_block) / params.interval_length;

            // One forecast sample per interval, taken at the lookahead
            // point just before the boundary.
            if round_block == params.interval_length - FORECAST_LOOKAHEAD_BLOCKS
                && sampled_round != Some(round_number)
            {
                let interval_start = block - round_block;
                let count = chain
                    .recent_admission_count(self.partition, interval_start, block)
                    .await?;
                let fee = chain.current_fee(self.partition, block).await?;
                let estimate = estimate_next_fee(
                    &self.rates,
                    count,
                    params.target_admissions,
                    fee,
                    self.min_estimate,
                );
                debug!(
                    target: targets::ESTIMATOR,
                    partition = self.partition,
                    round_number,
                    count,
                    current_fee = %fee,
                    estimate = %estimate,
                    "forecast sample taken"
                );
                forecast = Some(estimate);
                sampled_round = Some(round_number);
            }

            if round_block == 0 {
                let fee = chain.current_fee(self.partition, block).await?;
                if fee > Decimal::ZERO {
                    match forecast {
                        Some(estimate) if estimate <= max_fee => {
                            debug!(
                                target: targets::ESTIMATOR,
                                partition = self.partition,
                                estimate = %estimate,
                                %max_fee,
                                "estimate within ceiling at boundary, submitting"
                            );
                            return Ok(WindowDecision::SubmitNow);
                        }
                        Some(estimate) => {
                            debug!(
                                target: targets::ESTIMATOR,
                                partition = self.partition,
                                estimate = %estimate,
                                %max_fee,
                                "estimate above ceiling, deferring one interval"
                            );
                            return Ok(WindowDecision::Defer);
                        }
                        // Entered mid-interval after the sample point: wait
                        // for the next boundary rather than decide blind.
                        None => {}
                    }
                }
            }
        }
    }
}
