//! Core types for the metering ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode snapshots)
//! - Exact arithmetic (wei-equivalent `u128` amounts, floor division)
//! - Memory safety (no unsafe code)

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stream identifier, assigned by the external stream registry
pub type StreamId = u64;

/// Wei-equivalent integer amount
pub type Amount = u128;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Payment-capable identity (participant, creator or treasury sink)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create new address
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the zeroed/empty address
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-stream billing configuration and accumulators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream ID from the registry
    pub stream_id: StreamId,

    /// Payment sink for earned revenue
    pub creator: Address,

    /// Price per billing unit (wei per minute, > 0)
    pub rate_per_minute: Amount,

    /// Whether the stream accepts metering (never cleared by the engine)
    pub active: bool,

    /// Currently active participant count
    pub participant_count: u64,

    /// Sum of all charges ever settled for this stream (monotone)
    pub total_revenue: Amount,
}

/// Per-(stream, participant) spending allowance record
///
/// Created on first authorization and never deleted; a returning participant
/// extends the same record across join/leave cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantAllowance {
    /// Stream this allowance is scoped to
    pub stream_id: StreamId,

    /// Participant identity
    pub participant: Address,

    /// Cumulative funds earmarked for this stream
    pub authorized: Amount,

    /// Cumulative amount actually charged
    pub spent: Amount,

    /// Rate snapshot taken at first authorization
    pub rate_per_minute: Amount,

    /// Timestamp of the most recent join (0 while inactive)
    pub joined_at: Timestamp,

    /// Timestamp of the last applied charge (0 until first join)
    pub last_settled_at: Timestamp,

    /// Whether time-based charges are currently accruing
    pub active: bool,

    /// Creator sink snapshot taken at first authorization
    pub creator: Address,
}

impl ParticipantAllowance {
    /// Unspent authorized funds
    pub fn remaining(&self) -> Amount {
        self.authorized - self.spent
    }
}

/// Which sinks received funds during a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferRoute {
    /// Creator received its share and the treasury received the fee
    Split,
    /// Creator received its share; the fee leg was zero or refused
    CreatorOnly,
    /// Only a treasury leg existed (creator share was zero)
    TreasuryOnly,
    /// Creator refused; the full charge was rerouted to the treasury
    TreasuryFallback,
}

/// Outcome of one settlement attempt
///
/// Lets callers distinguish "nothing was owed" from "charged" from "charged
/// and the session was terminated because the allowance ran out". A fatal
/// delivery failure is surfaced as an error instead, with no state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Amount charged against the allowance (0 for a no-op)
    pub charged: Amount,

    /// Amount delivered to the creator sink
    pub creator_amount: Amount,

    /// Amount delivered to the treasury sink
    pub treasury_amount: Amount,

    /// Route taken, `None` when nothing was charged
    pub route: Option<TransferRoute>,

    /// Whether the participant was force-deactivated by exhaustion
    pub exhausted: bool,
}

impl Settlement {
    /// A settlement that charged nothing and changed nothing
    pub fn none() -> Self {
        Self {
            charged: 0,
            creator_amount: 0,
            treasury_amount: 0,
            route: None,
            exhausted: false,
        }
    }

    /// Whether any charge was applied
    pub fn is_charge(&self) -> bool {
        self.charged > 0
    }
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringEvent {
    /// Unique event ID (UUIDv7 for time-ordering)
    pub event_id: Uuid,

    /// Ledger clock timestamp at which the event was recorded
    pub timestamp: Timestamp,

    /// What happened
    pub kind: MeteringEventKind,
}

/// Audit log entry payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeteringEventKind {
    /// Stream registered by the registry
    StreamRegistered {
        /// Stream ID
        stream_id: StreamId,
        /// Revenue sink
        creator: Address,
        /// Wei per billing unit
        rate_per_minute: Amount,
    },
    /// First or repeated spending authorization
    SpendingAuthorized {
        /// Stream ID
        stream_id: StreamId,
        /// Funded participant
        participant: Address,
        /// Newly earmarked amount
        amount: Amount,
        /// Cumulative authorized total after this call
        total_authorized: Amount,
    },
    /// Allowance top-up on an existing record
    AllowanceIncreased {
        /// Stream ID
        stream_id: StreamId,
        /// Funded participant
        participant: Address,
        /// Newly earmarked amount
        amount: Amount,
        /// Cumulative authorized total after this call
        total_authorized: Amount,
    },
    /// Overpayment returned to the payer
    ExcessRefunded {
        /// Stream ID
        stream_id: StreamId,
        /// Refund recipient
        payer: Address,
        /// Refunded amount
        amount: Amount,
    },
    /// Participant started accruing charges
    ParticipantJoined {
        /// Stream ID
        stream_id: StreamId,
        /// Joining participant
        participant: Address,
    },
    /// Participant stopped accruing charges voluntarily
    ParticipantLeft {
        /// Stream ID
        stream_id: StreamId,
        /// Leaving participant
        participant: Address,
    },
    /// A non-zero charge was settled and delivered
    PaymentProcessed {
        /// Stream ID
        stream_id: StreamId,
        /// Charged participant
        participant: Address,
        /// Total charge
        charged: Amount,
        /// Amount delivered to the creator
        creator_amount: Amount,
        /// Amount delivered to the treasury
        treasury_amount: Amount,
        /// Delivery route
        route: TransferRoute,
    },
    /// Remaining allowance could not cover a full accrual; session terminated
    AllowanceExhausted {
        /// Stream ID
        stream_id: StreamId,
        /// Terminated participant
        participant: Address,
        /// Remaining funds at termination (charged in full)
        remaining: Amount,
        /// Full accrued amount that could not be covered
        owed: Amount,
    },
    /// Session terminated by creator, participant or admin
    EmergencyStopped {
        /// Stream ID
        stream_id: StreamId,
        /// Targeted participant
        participant: Address,
        /// Caller-supplied reason
        reason: String,
        /// Whether the participant was active when stopped
        was_active: bool,
    },
    /// Admin drained the escrow to the treasury
    EscrowWithdrawn {
        /// Withdrawn amount
        amount: Amount,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        let addr = Address::new("0xabc123");
        assert_eq!(addr.to_string(), "0xabc123");
        assert!(!addr.is_empty());
        assert!(Address::new("").is_empty());
    }

    #[test]
    fn test_allowance_remaining() {
        let allowance = ParticipantAllowance {
            stream_id: 1,
            participant: Address::new("alice"),
            authorized: 1000,
            spent: 250,
            rate_per_minute: 50,
            joined_at: 0,
            last_settled_at: 0,
            active: false,
            creator: Address::new("creator"),
        };
        assert_eq!(allowance.remaining(), 750);
    }

    #[test]
    fn test_settlement_none() {
        let settlement = Settlement::none();
        assert!(!settlement.is_charge());
        assert_eq!(settlement.route, None);
        assert!(!settlement.exhausted);
    }

    #[test]
    fn test_event_json_round_trip() {
        let event = MeteringEvent {
            event_id: Uuid::now_v7(),
            timestamp: 1_700_000_000,
            kind: MeteringEventKind::PaymentProcessed {
                stream_id: 7,
                participant: Address::new("alice"),
                charged: 50,
                creator_amount: 40,
                treasury_amount: 10,
                route: TransferRoute::Split,
            },
        };

        let json = serde_json::to_string(&event).unwrap();
        let decoded: MeteringEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.kind, event.kind);
    }
}
