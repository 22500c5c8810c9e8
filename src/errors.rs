use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the registration scheduler.
///
/// Each variant maps to a distinct recovery policy:
/// - [`Error::Config`] — skip the affected partition, log, continue others.
/// - [`Error::ChainUnavailable`] — leave the request unresolved, retry next
///   poll cycle.
/// - [`Error::CorruptOrTampered`] — skip the account; an operator must
///   re-set the stored secret.
/// - [`Error::OnChainRejection`] — mark the request failed; it becomes
///   eligible again on the next cycle.
/// - [`Error::StoreUnavailable`] — fatal; the process exits non-zero and an
///   external supervisor restarts it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Missing or invalid operator configuration (master key, epoch base
    /// block, fee rate table).
    #[error("Configuration error: {0}")]
    Config(String),

    /// RPC or transport failure talking to a chain gateway.
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    /// A stored secret blob failed to decrypt. Deliberately carries no
    /// detail: wrong-account use and corruption are indistinguishable.
    #[error("Stored secret is corrupt or tampered")]
    CorruptOrTampered,

    /// Caller-supplied input rejected before any work was done.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The chain explicitly rejected the registration submission.
    #[error("On-chain rejection: {0}")]
    OnChainRejection(String),

    /// The request store cannot be reached or a write failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A wire payload could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),
}

// Convenience constructors for common error patterns
impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a chain transport error.
    pub fn chain_unavailable(msg: impl Into<String>) -> Self {
        Error::ChainUnavailable(msg.into())
    }

    /// Create a store error.
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Error::StoreUnavailable(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Whether this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }

    /// Whether the affected request should stay unresolved and be retried
    /// on the next poll cycle without any status write.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ChainUnavailable(_))
    }
}
