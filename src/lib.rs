//! Registration scheduling engine.
//!
//! Watches a request store for pending registrations and submits each one
//! on-chain at a favorable point in the partition's fee cycle: admission
//! fees step up or down at fixed interval boundaries, so the engine
//! forecasts the next interval's fee shortly before each boundary and
//! submits only when the forecast fits the operator's ceiling.
//!
//! The crate exposes the engine as a library; the `registrard` binary wires
//! it to the HTTP store and chain gateway adapters.

#![deny(unreachable_pub)]

pub mod chain;
pub mod config;
pub mod errors;
pub mod logging;
pub mod req;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod vault;

#[cfg(test)]
mod testing;

pub use chain::{ChainClient, ChainConnector, EpochParams, GatewayConnector, SubmitOutcome};
pub use config::{PartitionConfig, RegistrarConfig};
pub use errors::{Error, Result};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use scheduler::{
    estimate_next_fee, FeeWindowEstimator, RegistrarService, SubmissionEngine, WindowDecision,
};
pub use store::{HttpRequestStore, RequestStore};
pub use types::{Account, Network, Outcome, RegistrationRequest, ValidityWindow};
pub use vault::CredentialVault;
