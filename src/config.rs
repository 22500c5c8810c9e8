//! Operator configuration for the registrar daemon.
//!
//! Loaded from a TOML file, with CLI and environment overrides applied by
//! the binary. Per-partition scheduling data (epoch base blocks, fee
//! extrapolation tables) is injected configuration, not source constants,
//! so onboarding a new partition never requires a rebuild.

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::logging::LogConfig;
use crate::types::Network;
use crate::vault::{DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS, MIN_MASTER_KEY_LEN};

/// Default seconds between poll cycles.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Default seconds between sequential submissions within one group.
pub const DEFAULT_SUBMIT_SPACING_SECS: u64 = 5;

/// Per-partition scheduling parameters.
///
/// A partition missing `epoch_base_block` or `fee_rates` is not eligible
/// for auto-scheduling; the engine skips it with a logged reason rather
/// than guessing defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PartitionConfig {
    /// Reference block anchoring interval boundaries for this partition.
    #[serde(default)]
    pub epoch_base_block: Option<u64>,

    /// Fee extrapolation rates keyed by saturation tier:
    /// `[ratio == 0, ratio <= 1/3, ratio <= 2/3, ratio <= 1]`.
    #[serde(default)]
    pub fee_rates: Option<Vec<Decimal>>,

    /// Optional floor applied to the forecast fee.
    #[serde(default)]
    pub min_estimated_fee: Option<Decimal>,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrarConfig {
    /// Master secret for the credential vault. Normally supplied through
    /// the `REGISTRAR_MASTER_KEY` environment variable rather than the
    /// config file.
    #[serde(default, skip_serializing)]
    pub master_key: String,

    /// PBKDF2 iteration count for the vault KDF.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds between sequential submissions within one fee group.
    #[serde(default = "default_submit_spacing")]
    pub submit_spacing_secs: u64,

    /// Base URL of the request store's internal REST surface.
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Chain gateway base URL per network. Networks without a gateway are
    /// skipped with a logged reason.
    #[serde(default)]
    pub gateway_urls: HashMap<Network, String>,

    /// Per-partition scheduling parameters, keyed by partition id.
    /// TOML map keys are always strings, so the ids are converted on the
    /// wire.
    #[serde(default, with = "partition_keys")]
    pub partitions: HashMap<u32, PartitionConfig>,

    #[serde(default)]
    pub log: LogConfig,
}

/// Serde shim for `partitions`: TOML only permits string map keys, so
/// partition ids cross the wire as strings.
mod partition_keys {
    use std::collections::HashMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::PartitionConfig;

    pub(super) fn serialize<S: Serializer>(
        map: &HashMap<u32, PartitionConfig>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let by_string: HashMap<String, &PartitionConfig> =
            map.iter().map(|(k, v)| (k.to_string(), v)).collect();
        by_string.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<u32, PartitionConfig>, D::Error> {
        let by_string = HashMap::<String, PartitionConfig>::deserialize(deserializer)?;
        by_string
            .into_iter()
            .map(|(k, v)| k.parse::<u32>().map(|k| (k, v)).map_err(D::Error::custom))
            .collect()
    }
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_submit_spacing() -> u64 {
    DEFAULT_SUBMIT_SPACING_SECS
}

fn default_store_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            master_key: String::new(),
            kdf_iterations: default_kdf_iterations(),
            poll_interval_secs: default_poll_interval(),
            submit_spacing_secs: default_submit_spacing(),
            store_url: default_store_url(),
            gateway_urls: HashMap::new(),
            partitions: HashMap::new(),
            log: LogConfig::default(),
        }
    }
}

impl RegistrarConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| Error::config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Validate operator input before the service starts.
    ///
    /// Partition entries are allowed to be partial here (the engine skips
    /// them per-cycle with a logged reason); what is present must be
    /// well-formed.
    pub fn validate(&self) -> Result<()> {
        if self.master_key.len() < MIN_MASTER_KEY_LEN {
            return Err(Error::config(format!(
                "master key must be at least {MIN_MASTER_KEY_LEN} bytes \
                 (set REGISTRAR_MASTER_KEY)"
            )));
        }
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(Error::config(format!(
                "kdf_iterations must be at least {MIN_KDF_ITERATIONS}"
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::config("poll_interval_secs must be positive"));
        }
        if self.store_url.is_empty() {
            return Err(Error::config("store_url must be set"));
        }
        for (partition, pc) in &self.partitions {
            if let Some(rates) = &pc.fee_rates {
                if rates.len() != 4 {
                    return Err(Error::config(format!(
                        "partition {partition}: fee_rates must have exactly 4 entries, got {}",
                        rates.len()
                    )));
                }
                if rates.iter().any(|r| *r < Decimal::ZERO) {
                    return Err(Error::config(format!(
                        "partition {partition}: fee_rates must be non-negative"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up the epoch base block for a partition.
    pub fn epoch_base_block(&self, partition: u32) -> Option<u64> {
        self.partitions.get(&partition)?.epoch_base_block
    }

    /// Look up the 4-entry fee rate table for a partition.
    pub fn fee_rates(&self, partition: u32) -> Option<[Decimal; 4]> {
        let rates = self.partitions.get(&partition)?.fee_rates.as_ref()?;
        <[Decimal; 4]>::try_from(rates.as_slice()).ok()
    }

    /// Example config emitted by `registrard generate-config`.
    pub fn sample() -> Self {
        let mut partitions = HashMap::new();
        partitions.insert(
            18,
            PartitionConfig {
                epoch_base_block: Some(2_720_320),
                fee_rates: Some(vec![
                    Decimal::new(786, 3),
                    Decimal::ONE,
                    Decimal::new(1106, 3),
                    Decimal::new(1428571, 6),
                ]),
                min_estimated_fee: None,
            },
        );
        partitions.insert(
            41,
            PartitionConfig {
                epoch_base_block: Some(4_177_902),
                fee_rates: Some(vec![
                    Decimal::ONE,
                    Decimal::ONE,
                    Decimal::ONE,
                    Decimal::ONE,
                ]),
                min_estimated_fee: Some(Decimal::new(25, 2)),
            },
        );
        let mut gateway_urls = HashMap::new();
        gateway_urls.insert(Network::Mainnet, "http://127.0.0.1:9944".to_string());
        gateway_urls.insert(Network::Testnet, "http://127.0.0.1:9945".to_string());
        Self {
            partitions,
            gateway_urls,
            ..Default::default()
        }
    }
}
