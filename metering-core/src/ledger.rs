//! Metering ledger orchestration layer
//!
//! The [`MeteringLedger`] owns all allowance, stream and roster state and is
//! the only component allowed to mutate it. Every operation runs to
//! completion or not at all: preconditions are checked before any write, and
//! the settlement path restores prior state when funds cannot be delivered to
//! any sink.
//!
//! # Example
//!
//! ```
//! use metering_core::{Address, Config, MeteringLedger};
//!
//! fn main() -> metering_core::Result<()> {
//!     let config = Config::default();
//!     let registry = Address::new(&config.accounts.registry);
//!     let mut ledger = MeteringLedger::new(&config)?;
//!
//!     ledger.register_stream(&registry, 1, &Address::new("creator"), 50)?;
//!
//!     let alice = Address::new("alice");
//!     ledger.authorize_spending(&alice, 1, &alice, 1000, 1000)?;
//!     ledger.join_stream(&alice, 1)?;
//!     Ok(())
//! }
//! ```

use crate::{
    clock::{Clock, SystemClock},
    metrics::Metrics,
    roster::ActiveRoster,
    sink::{MemorySink, PaymentSink},
    types::{
        Address, Amount, MeteringEvent, MeteringEventKind, ParticipantAllowance, Settlement,
        StreamConfig, StreamId, Timestamp,
    },
    Config, Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// The metering and settlement engine
pub struct MeteringLedger {
    /// Registered stream configurations
    pub(crate) streams: HashMap<StreamId, StreamConfig>,

    /// Allowance records, never deleted once created
    pub(crate) allowances: HashMap<(StreamId, Address), ParticipantAllowance>,

    /// Per-stream active participant sets
    pub(crate) rosters: HashMap<StreamId, ActiveRoster>,

    /// Only caller allowed to register streams
    pub(crate) registry: Address,

    /// Platform fee sink and settlement fallback target
    pub(crate) treasury: Address,

    /// Privileged administrator
    pub(crate) admin: Address,

    /// Treasury share of every charge (0..=100)
    pub(crate) fee_percent: u8,

    /// Minimum billing granularity in seconds
    pub(crate) billing_interval: i64,

    /// Global cap on a single authorization
    pub(crate) max_allowance: Amount,

    /// Funds held on behalf of participants (plus any stranded fees)
    pub(crate) escrow: Amount,

    /// Global pause switch
    pub(crate) paused: bool,

    /// Reentrancy guard around fund delivery
    pub(crate) settling: bool,

    /// Audit trail
    pub(crate) events: Vec<MeteringEvent>,

    /// Time source
    pub(crate) clock: Arc<dyn Clock>,

    /// Value-transfer boundary
    pub(crate) sink: Box<dyn PaymentSink>,

    /// Optional Prometheus metrics
    pub(crate) metrics: Option<Metrics>,
}

/// Serializable ledger state for snapshots
#[derive(Serialize, Deserialize)]
struct LedgerState {
    streams: HashMap<StreamId, StreamConfig>,
    allowances: HashMap<(StreamId, Address), ParticipantAllowance>,
    rosters: HashMap<StreamId, ActiveRoster>,
    registry: Address,
    treasury: Address,
    admin: Address,
    fee_percent: u8,
    paused: bool,
    escrow: Amount,
    events: Vec<MeteringEvent>,
}

impl MeteringLedger {
    /// Create a ledger from configuration, with the system clock and an
    /// in-memory payment sink
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            streams: HashMap::new(),
            allowances: HashMap::new(),
            rosters: HashMap::new(),
            registry: Address::new(&config.accounts.registry),
            treasury: Address::new(&config.accounts.treasury),
            admin: Address::new(&config.accounts.admin),
            fee_percent: config.billing.fee_percent,
            billing_interval: config.billing.interval_secs as i64,
            max_allowance: config.billing.max_allowance_wei as Amount,
            escrow: 0,
            paused: false,
            settling: false,
            events: Vec::new(),
            clock: Arc::new(SystemClock),
            sink: Box::new(MemorySink::new()),
            metrics: None,
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the payment sink
    pub fn with_sink(mut self, sink: Box<dyn PaymentSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    // ---- registration ----

    /// Register a stream for metering. Only the configured registry address
    /// may call this; registration is idempotent in the failing sense (a
    /// second call for the same ID is rejected).
    pub fn register_stream(
        &mut self,
        caller: &Address,
        stream_id: StreamId,
        creator: &Address,
        rate_per_minute: Amount,
    ) -> Result<()> {
        self.require_unpaused()?;

        if *caller != self.registry {
            return Err(Error::Unauthorized(format!(
                "{} is not the stream registry",
                caller
            )));
        }

        if creator.is_empty() {
            return Err(Error::InvalidAddress(
                "creator address must not be empty".to_string(),
            ));
        }

        if rate_per_minute == 0 {
            return Err(Error::InvalidAmount(
                "rate per minute must be positive".to_string(),
            ));
        }

        if self.streams.contains_key(&stream_id) {
            return Err(Error::StreamAlreadyRegistered(stream_id));
        }

        self.streams.insert(
            stream_id,
            StreamConfig {
                stream_id,
                creator: creator.clone(),
                rate_per_minute,
                active: true,
                participant_count: 0,
                total_revenue: 0,
            },
        );

        self.record(MeteringEventKind::StreamRegistered {
            stream_id,
            creator: creator.clone(),
            rate_per_minute,
        });
        tracing::info!(stream_id, creator = %creator, rate_per_minute, "stream registered");

        Ok(())
    }

    // ---- allowance management ----

    /// Earmark `amount` of the supplied payment for `participant` on a
    /// stream, creating the allowance record on first call. If the
    /// participant is currently active, accrued time is settled first so the
    /// top-up cannot paper over a shortfall window. Excess payment is
    /// refunded to the caller; a failed refund aborts the call.
    pub fn authorize_spending(
        &mut self,
        caller: &Address,
        stream_id: StreamId,
        participant: &Address,
        amount: Amount,
        payment: Amount,
    ) -> Result<()> {
        self.require_unpaused()?;

        let (rate, creator) = {
            let stream = self
                .streams
                .get(&stream_id)
                .ok_or(Error::StreamNotRegistered(stream_id))?;
            if !stream.active {
                return Err(Error::StreamInactive(stream_id));
            }
            (stream.rate_per_minute, stream.creator.clone())
        };

        if amount == 0 {
            return Err(Error::InvalidAmount(
                "authorization amount must be positive".to_string(),
            ));
        }

        let key = (stream_id, participant.clone());

        // The cap bounds the cumulative total, so re-authorizations cannot
        // creep past it
        let authorized = self
            .allowances
            .get(&key)
            .map(|a| a.authorized)
            .unwrap_or(0);
        let new_total = authorized
            .checked_add(amount)
            .ok_or(Error::AllowanceCapExceeded {
                requested: Amount::MAX,
                cap: self.max_allowance,
            })?;
        if new_total > self.max_allowance {
            return Err(Error::AllowanceCapExceeded {
                requested: new_total,
                cap: self.max_allowance,
            });
        }

        if payment < amount {
            return Err(Error::InsufficientPayment {
                required: amount,
                supplied: payment,
            });
        }

        // Charge accrued time at the old allowance boundary before new funds land
        if self.allowances.get(&key).map(|a| a.active).unwrap_or(false) {
            self.settle(stream_id, participant)?;
        }

        self.refund_excess(caller, stream_id, payment - amount)?;

        let record = self
            .allowances
            .entry(key)
            .or_insert_with(|| ParticipantAllowance {
                stream_id,
                participant: participant.clone(),
                authorized: 0,
                spent: 0,
                rate_per_minute: rate,
                joined_at: 0,
                last_settled_at: 0,
                active: false,
                creator,
            });
        record.authorized += amount;
        let total_authorized = record.authorized;
        self.escrow += amount;

        self.record(MeteringEventKind::SpendingAuthorized {
            stream_id,
            participant: participant.clone(),
            amount,
            total_authorized,
        });
        tracing::info!(
            stream_id,
            participant = %participant,
            amount,
            total_authorized,
            "spending authorized"
        );

        Ok(())
    }

    /// Top up an existing allowance record. The resulting cumulative total
    /// must stay within the global cap; accrued time is settled first when
    /// the participant is active.
    pub fn increase_allowance(
        &mut self,
        caller: &Address,
        stream_id: StreamId,
        participant: &Address,
        amount: Amount,
        payment: Amount,
    ) -> Result<()> {
        self.require_unpaused()?;

        if amount == 0 {
            return Err(Error::InvalidAmount(
                "increase amount must be positive".to_string(),
            ));
        }

        let key = (stream_id, participant.clone());
        let (authorized, active) = {
            let record = self
                .allowances
                .get(&key)
                .ok_or_else(|| Error::AllowanceNotFound {
                    stream_id,
                    participant: participant.clone(),
                })?;
            (record.authorized, record.active)
        };

        let new_total = authorized
            .checked_add(amount)
            .ok_or(Error::AllowanceCapExceeded {
                requested: Amount::MAX,
                cap: self.max_allowance,
            })?;
        if new_total > self.max_allowance {
            return Err(Error::AllowanceCapExceeded {
                requested: new_total,
                cap: self.max_allowance,
            });
        }

        if payment < amount {
            return Err(Error::InsufficientPayment {
                required: amount,
                supplied: payment,
            });
        }

        if active {
            self.settle(stream_id, participant)?;
        }

        self.refund_excess(caller, stream_id, payment - amount)?;

        let record = self
            .allowances
            .get_mut(&key)
            .ok_or_else(|| Error::AllowanceNotFound {
                stream_id,
                participant: participant.clone(),
            })?;
        record.authorized += amount;
        let total_authorized = record.authorized;
        self.escrow += amount;

        self.record(MeteringEventKind::AllowanceIncreased {
            stream_id,
            participant: participant.clone(),
            amount,
            total_authorized,
        });
        tracing::info!(
            stream_id,
            participant = %participant,
            amount,
            total_authorized,
            "allowance increased"
        );

        Ok(())
    }

    // ---- session lifecycle ----

    /// Start accruing time-based charges for the caller. Requires enough
    /// unspent allowance to cover at least one billing unit.
    pub fn join_stream(&mut self, caller: &Address, stream_id: StreamId) -> Result<()> {
        self.require_unpaused()?;

        let now = self.clock.now();
        let key = (stream_id, caller.clone());
        let record = self
            .allowances
            .get_mut(&key)
            .ok_or_else(|| Error::AllowanceNotFound {
                stream_id,
                participant: caller.clone(),
            })?;

        if record.active {
            return Err(Error::AlreadyActive(caller.clone()));
        }

        if record.remaining() < record.rate_per_minute {
            return Err(Error::InsufficientAllowance {
                remaining: record.remaining(),
                required: record.rate_per_minute,
            });
        }

        record.active = true;
        record.joined_at = now;
        record.last_settled_at = now;

        let inserted = self
            .rosters
            .entry(stream_id)
            .or_default()
            .insert(caller.clone());
        if inserted {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.participant_count += 1;
            }
            if let Some(metrics) = &self.metrics {
                metrics.active_participants.inc();
            }
        }

        self.record(MeteringEventKind::ParticipantJoined {
            stream_id,
            participant: caller.clone(),
        });
        tracing::info!(stream_id, participant = %caller, "participant joined");

        Ok(())
    }

    /// Stop accruing charges for the caller, settling the elapsed time
    /// first. The final settlement may itself exhaust the allowance.
    pub fn leave_stream(&mut self, caller: &Address, stream_id: StreamId) -> Result<Settlement> {
        self.require_unpaused()?;

        let key = (stream_id, caller.clone());
        if !self.allowances.get(&key).map(|r| r.active).unwrap_or(false) {
            return Err(Error::NotActive(caller.clone()));
        }

        let settlement = self.settle(stream_id, caller)?;

        // Exhaustion inside the final settlement already deactivated
        if self.allowances.get(&key).map(|r| r.active).unwrap_or(false) {
            self.deactivate(stream_id, caller);
        }

        self.record(MeteringEventKind::ParticipantLeft {
            stream_id,
            participant: caller.clone(),
        });
        tracing::info!(
            stream_id,
            participant = %caller,
            charged = settlement.charged,
            "participant left"
        );

        Ok(settlement)
    }

    /// Terminate a participant's session. Permitted to the stream creator,
    /// the participant themself, or the administrator. The audit event is
    /// recorded even when the participant was not active.
    pub fn emergency_stop(
        &mut self,
        caller: &Address,
        stream_id: StreamId,
        participant: &Address,
        reason: &str,
    ) -> Result<Settlement> {
        self.require_unpaused()?;

        let stream = self
            .streams
            .get(&stream_id)
            .ok_or(Error::StreamNotRegistered(stream_id))?;
        let permitted =
            *caller == stream.creator || caller == participant || *caller == self.admin;
        if !permitted {
            return Err(Error::Unauthorized(format!(
                "{} may not emergency-stop {} on stream {}",
                caller, participant, stream_id
            )));
        }

        let key = (stream_id, participant.clone());
        let was_active = self.allowances.get(&key).map(|r| r.active).unwrap_or(false);

        let settlement = if was_active {
            let settlement = self.settle(stream_id, participant)?;
            if self.allowances.get(&key).map(|r| r.active).unwrap_or(false) {
                self.deactivate(stream_id, participant);
            }
            settlement
        } else {
            Settlement::none()
        };

        self.record(MeteringEventKind::EmergencyStopped {
            stream_id,
            participant: participant.clone(),
            reason: reason.to_string(),
            was_active,
        });
        tracing::warn!(
            stream_id,
            participant = %participant,
            reason,
            was_active,
            "emergency stop"
        );

        Ok(settlement)
    }

    // ---- admin surface ----

    /// Update the stream registry address (admin only)
    pub fn set_registry(&mut self, caller: &Address, registry: Address) -> Result<()> {
        self.require_admin(caller)?;
        if registry.is_empty() {
            return Err(Error::InvalidAddress(
                "registry address must not be empty".to_string(),
            ));
        }
        tracing::info!(old = %self.registry, new = %registry, "registry updated");
        self.registry = registry;
        Ok(())
    }

    /// Update the treasury sink address (admin only)
    pub fn set_treasury(&mut self, caller: &Address, treasury: Address) -> Result<()> {
        self.require_admin(caller)?;
        if treasury.is_empty() {
            return Err(Error::InvalidAddress(
                "treasury address must not be empty".to_string(),
            ));
        }
        tracing::info!(old = %self.treasury, new = %treasury, "treasury updated");
        self.treasury = treasury;
        Ok(())
    }

    /// Update the treasury fee percentage, 0..=100 (admin only)
    pub fn set_fee_percent(&mut self, caller: &Address, fee_percent: u8) -> Result<()> {
        self.require_admin(caller)?;
        if fee_percent > 100 {
            return Err(Error::InvalidFeePercent(fee_percent));
        }
        tracing::info!(old = self.fee_percent, new = fee_percent, "fee percent updated");
        self.fee_percent = fee_percent;
        Ok(())
    }

    /// Drain the full escrow balance to the treasury (admin only). Either
    /// the treasury accepts the whole amount or nothing changes.
    pub fn emergency_withdraw(&mut self, caller: &Address) -> Result<Amount> {
        self.require_admin(caller)?;

        let amount = self.escrow;
        if amount == 0 {
            return Ok(0);
        }

        let treasury = self.treasury.clone();
        if !self.sink.deliver(&treasury, amount) {
            if let Some(metrics) = &self.metrics {
                metrics.transfer_failures_total.inc();
            }
            return Err(Error::TransferFailed(format!(
                "treasury {} refused emergency withdrawal of {} wei",
                treasury, amount
            )));
        }

        self.escrow = 0;
        self.record(MeteringEventKind::EscrowWithdrawn { amount });
        tracing::warn!(amount, "escrow withdrawn to treasury");

        Ok(amount)
    }

    /// Engage the global pause switch (admin only)
    pub fn pause(&mut self, caller: &Address) -> Result<()> {
        self.require_admin(caller)?;
        self.paused = true;
        tracing::warn!("metering ledger paused");
        Ok(())
    }

    /// Release the global pause switch (admin only)
    pub fn unpause(&mut self, caller: &Address) -> Result<()> {
        self.require_admin(caller)?;
        self.paused = false;
        tracing::info!("metering ledger unpaused");
        Ok(())
    }

    // ---- views ----

    /// Allowance record for a (stream, participant) pair
    pub fn allowance(
        &self,
        stream_id: StreamId,
        participant: &Address,
    ) -> Option<&ParticipantAllowance> {
        self.allowances.get(&(stream_id, participant.clone()))
    }

    /// Stream configuration
    pub fn stream_config(&self, stream_id: StreamId) -> Option<&StreamConfig> {
        self.streams.get(&stream_id)
    }

    /// Whether a stream ID is registered
    pub fn is_registered(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Unspent authorized funds, 0 when no record exists
    pub fn remaining_allowance(&self, stream_id: StreamId, participant: &Address) -> Amount {
        self.allowance(stream_id, participant)
            .map(|r| r.remaining())
            .unwrap_or(0)
    }

    /// Whether the participant is currently accruing charges
    pub fn is_participant_active(&self, stream_id: StreamId, participant: &Address) -> bool {
        self.allowance(stream_id, participant)
            .map(|r| r.active)
            .unwrap_or(false)
    }

    /// Seconds of the current active session, 0 when inactive
    pub fn elapsed_active_time(&self, stream_id: StreamId, participant: &Address) -> i64 {
        match self.allowance(stream_id, participant) {
            Some(record) if record.active && record.joined_at > 0 => {
                (self.clock.now() - record.joined_at).max(0)
            }
            _ => 0,
        }
    }

    /// Snapshot of the currently active participants
    pub fn active_participants(&self, stream_id: StreamId) -> Vec<Address> {
        self.rosters
            .get(&stream_id)
            .map(|r| r.snapshot())
            .unwrap_or_default()
    }

    /// Total revenue ever settled for a stream
    pub fn total_revenue(&self, stream_id: StreamId) -> Amount {
        self.streams
            .get(&stream_id)
            .map(|s| s.total_revenue)
            .unwrap_or(0)
    }

    /// Funds currently held by the engine
    pub fn escrow_balance(&self) -> Amount {
        self.escrow
    }

    /// Current treasury fee percentage
    pub fn fee_percent(&self) -> u8 {
        self.fee_percent
    }

    /// Whether the pause switch is engaged
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Audit trail, oldest first
    pub fn events(&self) -> &[MeteringEvent] {
        &self.events
    }

    // ---- snapshots ----

    /// Serialize the full ledger state
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let state = LedgerState {
            streams: self.streams.clone(),
            allowances: self.allowances.clone(),
            rosters: self.rosters.clone(),
            registry: self.registry.clone(),
            treasury: self.treasury.clone(),
            admin: self.admin.clone(),
            fee_percent: self.fee_percent,
            paused: self.paused,
            escrow: self.escrow,
            events: self.events.clone(),
        };
        Ok(bincode::serialize(&state)?)
    }

    /// Replace the ledger state with a previously taken snapshot
    pub fn restore(&mut self, bytes: &[u8]) -> Result<()> {
        let state: LedgerState = bincode::deserialize(bytes)?;
        self.streams = state.streams;
        self.allowances = state.allowances;
        self.rosters = state.rosters;
        self.registry = state.registry;
        self.treasury = state.treasury;
        self.admin = state.admin;
        self.fee_percent = state.fee_percent;
        self.paused = state.paused;
        self.escrow = state.escrow;
        self.events = state.events;
        self.settling = false;
        Ok(())
    }

    // ---- internals ----

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn record(&mut self, kind: MeteringEventKind) {
        self.events.push(MeteringEvent {
            event_id: Uuid::now_v7(),
            timestamp: self.clock.now(),
            kind,
        });
    }

    pub(crate) fn require_unpaused(&self) -> Result<()> {
        if self.paused {
            return Err(Error::Paused);
        }
        Ok(())
    }

    fn require_admin(&self, caller: &Address) -> Result<()> {
        if *caller != self.admin {
            return Err(Error::Unauthorized(format!(
                "{} is not the administrator",
                caller
            )));
        }
        Ok(())
    }

    /// Deactivate a participant: clear flags, remove from the roster and
    /// decrement the active count iff the roster actually changed.
    pub(crate) fn deactivate(&mut self, stream_id: StreamId, participant: &Address) {
        if let Some(record) = self.allowances.get_mut(&(stream_id, participant.clone())) {
            record.active = false;
            record.joined_at = 0;
        }

        let removed = self
            .rosters
            .get_mut(&stream_id)
            .map(|r| r.remove(participant))
            .unwrap_or(false);
        if removed {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.participant_count = stream.participant_count.saturating_sub(1);
            }
            if let Some(metrics) = &self.metrics {
                metrics.active_participants.dec();
            }
        }
    }

    /// Return overpayment to the payer. A refused refund is a hard failure
    /// so the caller aborts before committing the allowance change.
    fn refund_excess(&mut self, payer: &Address, stream_id: StreamId, excess: Amount) -> Result<()> {
        if excess == 0 {
            return Ok(());
        }

        if !self.sink.deliver(payer, excess) {
            if let Some(metrics) = &self.metrics {
                metrics.transfer_failures_total.inc();
            }
            return Err(Error::RefundFailed(format!(
                "payer {} refused refund of {} wei",
                payer, excess
            )));
        }

        self.record(MeteringEventKind::ExcessRefunded {
            stream_id,
            payer: payer.clone(),
            amount: excess,
        });

        Ok(())
    }
}

impl fmt::Debug for MeteringLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeteringLedger")
            .field("streams", &self.streams.len())
            .field("allowances", &self.allowances.len())
            .field("escrow", &self.escrow)
            .field("fee_percent", &self.fee_percent)
            .field("paused", &self.paused)
            .finish()
    }
}
