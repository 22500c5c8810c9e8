//! Core domain types for the registration scheduler.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Chain environment a request targets.
///
/// Each network gets its own gateway connection; requests are grouped by
/// network before any chain query is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Archive,
    Local,
}

impl Network {
    /// All supported networks, for config validation and CLI help.
    pub const ALL: [Network; 4] = [
        Network::Mainnet,
        Network::Testnet,
        Network::Archive,
        Network::Local,
    ];

    /// Canonical lowercase name used on the wire and in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Archive => "archive",
            Network::Local => "local",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "archive" => Ok(Network::Archive),
            "local" => Ok(Network::Local),
            other => Err(Error::InvalidInput(format!("unknown network: {other}"))),
        }
    }
}

/// Resolution state of a registration request.
///
/// `Unresolved` is both the initial state and the state re-entered after a
/// failed attempt, so a failed request is automatically retried. The store
/// persists this as a small integer; the explicit `Failed` variant replaces
/// an older scheme that overloaded a single nullable flag for both
/// "never attempted" and "attempted, failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Unresolved,
    Succeeded,
    Failed,
}

impl Outcome {
    /// Wire encoding: 0 = unresolved, 1 = succeeded, 2 = failed.
    pub fn as_int(&self) -> i16 {
        match self {
            Outcome::Unresolved => 0,
            Outcome::Succeeded => 1,
            Outcome::Failed => 2,
        }
    }

    /// Decode the wire integer; unknown values are rejected.
    pub fn from_int(v: i16) -> Result<Self, Error> {
        match v {
            0 => Ok(Outcome::Unresolved),
            1 => Ok(Outcome::Succeeded),
            2 => Ok(Outcome::Failed),
            other => Err(Error::parse(format!("unknown outcome code: {other}"))),
        }
    }
}

/// Optional time window during which a request may be scheduled.
///
/// Unset bounds are open: a request with no window is always eligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    /// Window covering all time.
    pub fn open() -> Self {
        Self::default()
    }

    /// Whether `now` falls inside the window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if now >= end {
                return false;
            }
        }
        true
    }
}

/// A managed account able to sign registration transactions.
///
/// `encrypted_secret` is the vault blob holding the signing secret;
/// accounts without one cannot be auto-scheduled and are skipped with a
/// logged reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u64,
    /// Operator-facing label, used only in logs.
    pub name: String,
    /// Public on-chain address.
    pub address: String,
    pub encrypted_secret: Option<String>,
}

/// One desired admission into a registry partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub id: u64,
    pub account: Account,
    pub network: Network,
    /// Target registry partition.
    pub partition: u32,
    /// Acceptable fee ceiling, in the chain's native unit.
    pub max_fee: Decimal,
    #[serde(default)]
    pub window: ValidityWindow,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// On-chain identifier assigned on success, set exactly once.
    #[serde(default)]
    pub assigned_uid: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
}

impl RegistrationRequest {
    /// Whether the engine may act on this request right now.
    ///
    /// The store already filters server-side; this re-check guards against
    /// a stale fetch crossing a window boundary.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.deleted
            && self.outcome == Outcome::Unresolved
            && self.max_fee >= Decimal::ZERO
            && self.window.contains(now)
    }
}
