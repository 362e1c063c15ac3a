//! Error types for the metering ledger

use crate::types::{Address, Amount, StreamId};
use thiserror::Error;

/// Result type for metering operations
pub type Result<T> = std::result::Result<T, Error>;

/// Metering errors
#[derive(Error, Debug)]
pub enum Error {
    /// Caller is not permitted to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Stream ID has no registered configuration
    #[error("Stream not registered: {0}")]
    StreamNotRegistered(StreamId),

    /// Stream ID was already registered
    #[error("Stream already registered: {0}")]
    StreamAlreadyRegistered(StreamId),

    /// Stream exists but does not accept metering
    #[error("Stream inactive: {0}")]
    StreamInactive(StreamId),

    /// No allowance record for the (stream, participant) pair
    #[error("No allowance for participant {participant} on stream {stream_id}")]
    AllowanceNotFound {
        /// Stream ID
        stream_id: StreamId,
        /// Participant identity
        participant: Address,
    },

    /// Amount is zero or otherwise malformed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Address is empty or otherwise malformed
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Authorization would exceed the global allowance cap
    #[error("Allowance cap exceeded: requested {requested}, cap {cap}")]
    AllowanceCapExceeded {
        /// Requested total
        requested: Amount,
        /// Configured maximum
        cap: Amount,
    },

    /// Supplied payment does not cover the requested authorization
    #[error("Insufficient payment: required {required}, supplied {supplied}")]
    InsufficientPayment {
        /// Amount being authorized
        required: Amount,
        /// Payment that accompanied the call
        supplied: Amount,
    },

    /// Participant is already accruing charges on this stream
    #[error("Participant {0} already active")]
    AlreadyActive(Address),

    /// Participant is not accruing charges on this stream
    #[error("Participant {0} not active")]
    NotActive(Address),

    /// Remaining allowance cannot cover one billing unit
    #[error("Insufficient allowance: remaining {remaining}, required {required}")]
    InsufficientAllowance {
        /// Unspent authorized funds
        remaining: Amount,
        /// Minimum required to proceed
        required: Amount,
    },

    /// Funds could not be delivered to any sink; no state was committed
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Excess payment could not be returned to the payer
    #[error("Refund failed: {0}")]
    RefundFailed(String),

    /// Engine pause switch is engaged
    #[error("Metering ledger is paused")]
    Paused,

    /// Nested settlement entry rejected
    #[error("Reentrant settlement rejected")]
    ReentrantSettlement,

    /// Fee percentage outside 0..=100
    #[error("Invalid fee percent: {0}")]
    InvalidFeePercent(u8),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Snapshot serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
