//! Settlement: accrual, fee split, delivery and fallback
//!
//! Converts elapsed active time into charges in whole billing units and moves
//! the funds to the creator and treasury sinks.
//!
//! # Algorithm
//!
//! 1. Accrue `elapsed / interval` whole units since the last settlement;
//!    sub-unit time is never billed and never lost (the settlement timestamp
//!    only advances when a charge is applied).
//! 2. Clamp the charge to the remaining allowance; a shortfall terminates
//!    the session (exhaustion is a business outcome, not an error).
//! 3. Commit the charge to the ledger, then deliver `owed - fee` to the
//!    creator and `fee` to the treasury.
//! 4. A refused creator leg reroutes the full charge to the treasury. When
//!    no sink accepts anything, every state change from this settlement is
//!    rolled back and the call fails.
//!
//! # Example
//!
//! ```text
//! rate 50 wei/min, interval 60s, fee 20%
//! join at t=0, settle at t=65  → 1 unit, charge 50: creator 40, treasury 10
//! settle again at t=90         → elapsed 25s, no charge
//! ```

use crate::{
    types::{Address, Amount, MeteringEventKind, Settlement, StreamId, TransferRoute},
    Error, MeteringLedger, Result,
};

impl MeteringLedger {
    /// Run settlement for every member of the stream's active set, each
    /// independently, in slot order at the time of the call.
    pub fn process_payments(
        &mut self,
        _caller: &Address,
        stream_id: StreamId,
    ) -> Result<Vec<(Address, Settlement)>> {
        self.require_unpaused()?;

        let stream = self
            .streams
            .get(&stream_id)
            .ok_or(Error::StreamNotRegistered(stream_id))?;
        if !stream.active {
            return Err(Error::StreamInactive(stream_id));
        }

        let members = self
            .rosters
            .get(&stream_id)
            .map(|r| r.snapshot())
            .unwrap_or_default();

        let mut outcomes = Vec::with_capacity(members.len());
        for participant in members {
            if participant.is_empty() {
                continue;
            }
            let settlement = self.settle(stream_id, &participant)?;
            outcomes.push((participant, settlement));
        }

        tracing::info!(stream_id, participants = outcomes.len(), "processed payments");
        Ok(outcomes)
    }

    /// Run settlement for a single participant. Inactive or never-settled
    /// participants yield a no-op outcome, not an error.
    pub fn process_participant_payment(
        &mut self,
        _caller: &Address,
        stream_id: StreamId,
        participant: &Address,
    ) -> Result<Settlement> {
        self.require_unpaused()?;

        if !self.streams.contains_key(&stream_id) {
            return Err(Error::StreamNotRegistered(stream_id));
        }

        self.settle(stream_id, participant)
    }

    /// Charge the engine would apply right now, computed without mutating
    /// state and clamped to the remaining allowance
    pub fn pending_owed(&self, stream_id: StreamId, participant: &Address) -> Amount {
        let Some(record) = self.allowances.get(&(stream_id, participant.clone())) else {
            return 0;
        };
        if !record.active || record.last_settled_at == 0 {
            return 0;
        }

        let elapsed = self.now() - record.last_settled_at;
        if elapsed < self.billing_interval {
            return 0;
        }

        let units = (elapsed / self.billing_interval) as u128;
        units
            .saturating_mul(record.rate_per_minute)
            .min(record.remaining())
    }

    /// The settlement state machine. Called by allowance top-ups, leave,
    /// emergency stop and the payment-processing entry points.
    pub(crate) fn settle(
        &mut self,
        stream_id: StreamId,
        participant: &Address,
    ) -> Result<Settlement> {
        if self.settling {
            return Err(Error::ReentrantSettlement);
        }

        let key = (stream_id, participant.clone());
        let Some(record) = self.allowances.get(&key) else {
            return Ok(Settlement::none());
        };
        if !record.active || record.last_settled_at == 0 {
            return Ok(Settlement::none());
        }

        let now = self.now();
        let elapsed = now - record.last_settled_at;
        if elapsed < self.billing_interval {
            return Ok(Settlement::none());
        }

        let units = (elapsed / self.billing_interval) as u128;
        let full_owed = units.saturating_mul(record.rate_per_minute);
        if full_owed == 0 {
            return Ok(Settlement::none());
        }

        // Exhaustion is decided by the full accrual, not the collectible part
        let remaining = record.remaining();
        let exhausted = remaining < full_owed;
        let owed = if exhausted { remaining } else { full_owed };
        let creator = record.creator.clone();

        // Captured so a failed delivery commits nothing
        let prior_record = record.clone();
        let prior_revenue = self.streams.get(&stream_id).map(|s| s.total_revenue);
        let prior_events_len = self.events.len();
        let was_rostered = self
            .rosters
            .get(&stream_id)
            .map(|r| r.contains(participant))
            .unwrap_or(false);

        // Commit ledger state before any external delivery, so a reentrant
        // recipient observes updated balances
        if owed > 0 {
            let record = self
                .allowances
                .get_mut(&key)
                .ok_or_else(|| Error::AllowanceNotFound {
                    stream_id,
                    participant: participant.clone(),
                })?;
            record.spent += owed;
            record.last_settled_at = now;
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.total_revenue += owed;
            }
        }

        if exhausted {
            self.record(MeteringEventKind::AllowanceExhausted {
                stream_id,
                participant: participant.clone(),
                remaining: owed,
                owed: full_owed,
            });
            self.deactivate(stream_id, participant);
            tracing::warn!(
                stream_id,
                participant = %participant,
                remaining = owed,
                owed = full_owed,
                "allowance exhausted, session terminated"
            );
        }

        if owed == 0 {
            // Exhaustion with nothing left to collect still terminates
            if let Some(metrics) = &self.metrics {
                metrics.exhaustions_total.inc();
            }
            return Ok(Settlement {
                charged: 0,
                creator_amount: 0,
                treasury_amount: 0,
                route: None,
                exhausted,
            });
        }

        let fee = owed * self.fee_percent as u128 / 100;
        let creator_amount = owed - fee;
        let treasury = self.treasury.clone();

        self.settling = true;
        let delivery = self.deliver_split(&creator, creator_amount, &treasury, fee, owed);
        self.settling = false;

        let (route, delivered_creator, delivered_treasury) = match delivery {
            Ok(outcome) => outcome,
            Err(err) => {
                // Nobody was paid: restore record, revenue, roster and events
                self.allowances.insert(key, prior_record);
                if let (Some(stream), Some(revenue)) =
                    (self.streams.get_mut(&stream_id), prior_revenue)
                {
                    stream.total_revenue = revenue;
                }
                self.events.truncate(prior_events_len);
                if was_rostered {
                    let reinserted = self
                        .rosters
                        .entry(stream_id)
                        .or_default()
                        .insert(participant.clone());
                    if reinserted {
                        if let Some(stream) = self.streams.get_mut(&stream_id) {
                            stream.participant_count += 1;
                        }
                        if let Some(metrics) = &self.metrics {
                            metrics.active_participants.inc();
                        }
                    }
                }
                tracing::error!(
                    stream_id,
                    participant = %participant,
                    owed,
                    "settlement aborted, funds undeliverable"
                );
                return Err(err);
            }
        };

        self.escrow = self
            .escrow
            .saturating_sub(delivered_creator + delivered_treasury);

        if let Some(metrics) = &self.metrics {
            metrics.record_charge(owed);
            if exhausted {
                metrics.exhaustions_total.inc();
            }
        }

        self.record(MeteringEventKind::PaymentProcessed {
            stream_id,
            participant: participant.clone(),
            charged: owed,
            creator_amount: delivered_creator,
            treasury_amount: delivered_treasury,
            route,
        });
        tracing::info!(
            stream_id,
            participant = %participant,
            charged = owed,
            creator_amount = delivered_creator,
            treasury_amount = delivered_treasury,
            ?route,
            "payment settled"
        );

        Ok(Settlement {
            charged: owed,
            creator_amount: delivered_creator,
            treasury_amount: delivered_treasury,
            route: Some(route),
            exhausted,
        })
    }

    /// Deliver the split: creator leg first, treasury fee best-effort once
    /// the creator is paid, full-amount treasury fallback when the creator
    /// refuses. Returns the route taken and the amounts actually delivered.
    fn deliver_split(
        &mut self,
        creator: &Address,
        creator_amount: Amount,
        treasury: &Address,
        fee: Amount,
        owed: Amount,
    ) -> Result<(TransferRoute, Amount, Amount)> {
        if creator_amount > 0 {
            if self.sink.deliver(creator, creator_amount) {
                if fee == 0 {
                    return Ok((TransferRoute::CreatorOnly, creator_amount, 0));
                }
                if self.sink.deliver(treasury, fee) {
                    return Ok((TransferRoute::Split, creator_amount, fee));
                }
                if let Some(metrics) = &self.metrics {
                    metrics.transfer_failures_total.inc();
                }
                tracing::warn!(
                    %treasury,
                    fee,
                    "treasury refused fee, creator already paid"
                );
                return Ok((TransferRoute::CreatorOnly, creator_amount, 0));
            }

            if let Some(metrics) = &self.metrics {
                metrics.transfer_failures_total.inc();
            }

            if self.sink.deliver(treasury, owed) {
                if let Some(metrics) = &self.metrics {
                    metrics.fallback_reroutes_total.inc();
                }
                tracing::warn!(
                    %creator,
                    owed,
                    "creator refused payment, full charge rerouted to treasury"
                );
                return Ok((TransferRoute::TreasuryFallback, 0, owed));
            }

            if let Some(metrics) = &self.metrics {
                metrics.transfer_failures_total.inc();
            }
            return Err(Error::TransferFailed(format!(
                "creator {} and treasury {} both refused delivery of {} wei",
                creator, treasury, owed
            )));
        }

        // Creator share is zero (fee takes the whole charge); the treasury
        // leg is the only recipient and must accept
        if self.sink.deliver(treasury, fee) {
            return Ok((TransferRoute::TreasuryOnly, 0, fee));
        }

        if let Some(metrics) = &self.metrics {
            metrics.transfer_failures_total.inc();
        }
        Err(Error::TransferFailed(format!(
            "treasury {} refused sole delivery of {} wei",
            treasury, fee
        )))
    }
}
