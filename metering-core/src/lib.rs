//! Vibestream Metering Core
//!
//! Pay-per-minute metering and settlement engine for live group sessions.
//! Tracks per-participant spending allowances scoped to a stream, accrues
//! time-based charges in whole billing units, and settles each charge as a
//! creator/treasury split with a treasury fallback when the creator cannot
//! receive funds.
//!
//! # Architecture
//!
//! - **Single writer**: one serialized engine owns all state; every operation
//!   commits fully or not at all
//! - **Commit before transfer**: ledger state is updated before any external
//!   delivery, so a reentrant recipient observes final balances
//! - **Exhaustion is an outcome**: running out of allowance terminates the
//!   session and clamps the final charge, it never fails the call
//!
//! # Invariants
//!
//! - `spent <= authorized` for every allowance record, at all times
//! - `total_revenue` equals the sum of all charges ever settled per stream
//! - A participant is in the active set iff its record's `active` flag is set
//! - Funds reach at least one sink per settlement, or no state changes

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod roster;
pub mod settlement;
pub mod sink;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::MeteringLedger;
pub use metrics::Metrics;
pub use roster::ActiveRoster;
pub use sink::{MemorySink, PaymentSink};
pub use types::{
    Address, Amount, MeteringEvent, MeteringEventKind, ParticipantAllowance, Settlement,
    StreamConfig, StreamId, Timestamp, TransferRoute,
};
