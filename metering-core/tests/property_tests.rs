//! Property-based tests for metering invariants
//!
//! These tests use proptest to verify critical invariants under arbitrary
//! operation sequences:
//! - Allowance bound: spent <= authorized, always
//! - Revenue conservation: total_revenue == Σ(settled charges)
//! - Escrow conservation: escrow == Σ(authorized) - Σ(delivered)
//! - Active-set consistency: roster membership iff the active flag is set

use metering_core::{
    Address, Config, ManualClock, MemorySink, MeteringEventKind, MeteringLedger,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

const STREAM: u64 = 1;
const RATE: u128 = 50;
const INTERVAL: i64 = 60;

fn registry() -> Address {
    Address::new("vibestream-registry")
}

fn creator() -> Address {
    Address::new("creator-1")
}

fn participant(index: usize) -> Address {
    Address::new(format!("participant-{}", index))
}

#[allow(clippy::type_complexity)]
fn build_ledger() -> (MeteringLedger, Arc<ManualClock>, Arc<Mutex<MemorySink>>) {
    let config = Config::default();
    let clock = Arc::new(ManualClock::new(1_000));
    let sink = Arc::new(Mutex::new(MemorySink::new()));
    let mut ledger = MeteringLedger::new(&config)
        .unwrap()
        .with_clock(clock.clone())
        .with_sink(Box::new(sink.clone()));
    ledger
        .register_stream(&registry(), STREAM, &creator(), RATE)
        .unwrap();
    (ledger, clock, sink)
}

/// One step of a randomized session workload
#[derive(Debug, Clone)]
enum Op {
    Authorize { who: usize, amount: u128 },
    Increase { who: usize, amount: u128 },
    Join(usize),
    Leave(usize),
    Advance(i64),
    ProcessAll,
    ProcessOne(usize),
    Stop(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, 1u128..500).prop_map(|(who, amount)| Op::Authorize { who, amount }),
        (0usize..3, 1u128..500).prop_map(|(who, amount)| Op::Increase { who, amount }),
        (0usize..3).prop_map(Op::Join),
        (0usize..3).prop_map(Op::Leave),
        (1i64..200).prop_map(Op::Advance),
        Just(Op::ProcessAll),
        (0usize..3).prop_map(Op::ProcessOne),
        (0usize..3).prop_map(Op::Stop),
    ]
}

/// Apply an op, ignoring precondition rejections (they are part of the
/// workload, not failures)
fn apply(ledger: &mut MeteringLedger, clock: &ManualClock, op: &Op) {
    match op {
        Op::Authorize { who, amount } => {
            let addr = participant(*who);
            let _ = ledger.authorize_spending(&addr, STREAM, &addr, *amount, *amount);
        }
        Op::Increase { who, amount } => {
            let addr = participant(*who);
            let _ = ledger.increase_allowance(&addr, STREAM, &addr, *amount, *amount);
        }
        Op::Join(who) => {
            let _ = ledger.join_stream(&participant(*who), STREAM);
        }
        Op::Leave(who) => {
            let _ = ledger.leave_stream(&participant(*who), STREAM);
        }
        Op::Advance(secs) => clock.advance(*secs),
        Op::ProcessAll => {
            let _ = ledger.process_payments(&participant(0), STREAM);
        }
        Op::ProcessOne(who) => {
            let addr = participant(*who);
            let _ = ledger.process_participant_payment(&addr, STREAM, &addr);
        }
        Op::Stop(who) => {
            let addr = participant(*who);
            let _ = ledger.emergency_stop(&addr, STREAM, &addr, "test stop");
        }
    }
}

/// Sum of charges and deliveries recorded in the audit trail
fn settled_totals(ledger: &MeteringLedger) -> (u128, u128) {
    let mut charged = 0u128;
    let mut delivered = 0u128;
    for event in ledger.events() {
        if let MeteringEventKind::PaymentProcessed {
            charged: c,
            creator_amount,
            treasury_amount,
            ..
        } = &event.kind
        {
            charged += c;
            delivered += creator_amount + treasury_amount;
        }
    }
    (charged, delivered)
}

/// Sum of authorized amounts recorded in the audit trail
fn authorized_total(ledger: &MeteringLedger) -> u128 {
    ledger
        .events()
        .iter()
        .map(|event| match &event.kind {
            MeteringEventKind::SpendingAuthorized { amount, .. } => *amount,
            MeteringEventKind::AllowanceIncreased { amount, .. } => *amount,
            _ => 0,
        })
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: spent never exceeds authorized, for any operation sequence
    #[test]
    fn prop_spent_bounded_by_authorized(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (mut ledger, clock, _) = build_ledger();

        for op in &ops {
            apply(&mut ledger, &clock, op);

            for who in 0..3 {
                if let Some(record) = ledger.allowance(STREAM, &participant(who)) {
                    prop_assert!(record.spent <= record.authorized);
                }
            }
        }
    }

    /// Property: the roster lists a participant iff its record is active,
    /// and the participant count matches the roster size
    #[test]
    fn prop_active_set_consistency(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (mut ledger, clock, _) = build_ledger();

        for op in &ops {
            apply(&mut ledger, &clock, op);

            let active = ledger.active_participants(STREAM);
            for who in 0..3 {
                let addr = participant(who);
                let flagged = ledger.is_participant_active(STREAM, &addr);
                prop_assert_eq!(active.contains(&addr), flagged);
            }
            prop_assert_eq!(
                ledger.stream_config(STREAM).unwrap().participant_count,
                active.len() as u64
            );
        }
    }

    /// Property: stream revenue equals the sum of all settled charges
    #[test]
    fn prop_revenue_conservation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (mut ledger, clock, _) = build_ledger();

        for op in &ops {
            apply(&mut ledger, &clock, op);
        }

        let (charged, _) = settled_totals(&ledger);
        prop_assert_eq!(ledger.total_revenue(STREAM), charged);
    }

    /// Property: escrow equals everything paid in minus everything paid out
    #[test]
    fn prop_escrow_conservation(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (mut ledger, clock, _) = build_ledger();

        for op in &ops {
            apply(&mut ledger, &clock, op);
        }

        let (_, delivered) = settled_totals(&ledger);
        prop_assert_eq!(ledger.escrow_balance(), authorized_total(&ledger) - delivered);
    }

    /// Property: a snapshot restores to an equivalent ledger
    #[test]
    fn prop_snapshot_restore_equivalence(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut ledger, clock, sink) = build_ledger();

        for op in &ops {
            apply(&mut ledger, &clock, op);
        }

        let bytes = ledger.snapshot().unwrap();
        let config = Config::default();
        let mut restored = MeteringLedger::new(&config)
            .unwrap()
            .with_clock(clock.clone())
            .with_sink(Box::new(sink.clone()));
        restored.restore(&bytes).unwrap();

        prop_assert_eq!(restored.total_revenue(STREAM), ledger.total_revenue(STREAM));
        prop_assert_eq!(restored.escrow_balance(), ledger.escrow_balance());
        prop_assert_eq!(restored.events().len(), ledger.events().len());
        let mut a = restored.active_participants(STREAM);
        let mut b = ledger.active_participants(STREAM);
        a.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        b.sort_by(|x, y| x.as_str().cmp(y.as_str()));
        prop_assert_eq!(a, b);
        for who in 0..3 {
            let addr = participant(who);
            prop_assert_eq!(
                restored.remaining_allowance(STREAM, &addr),
                ledger.remaining_allowance(STREAM, &addr)
            );
        }
    }
}

mod integration_tests {
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("metering_core=debug")
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_exact_interval_round_trip() {
        init_tracing();
        let (mut ledger, clock, _) = build_ledger();
        let alice = participant(0);

        ledger
            .authorize_spending(&alice, STREAM, &alice, 1_000, 1_000)
            .unwrap();
        ledger.join_stream(&alice, STREAM).unwrap();

        clock.advance(INTERVAL);
        let settlement = ledger.leave_stream(&alice, STREAM).unwrap();

        // Exactly one billing unit, charged exactly once
        assert_eq!(settlement.charged, RATE);
        assert_eq!(ledger.allowance(STREAM, &alice).unwrap().spent, RATE);
        assert_eq!(ledger.total_revenue(STREAM), RATE);
    }

    #[test]
    fn test_second_settlement_within_interval_is_free() {
        init_tracing();
        let (mut ledger, clock, _) = build_ledger();
        let alice = participant(0);

        ledger
            .authorize_spending(&alice, STREAM, &alice, 1_000, 1_000)
            .unwrap();
        ledger.join_stream(&alice, STREAM).unwrap();

        clock.advance(INTERVAL + 30);
        let first = ledger
            .process_participant_payment(&alice, STREAM, &alice)
            .unwrap();
        let second = ledger
            .process_participant_payment(&alice, STREAM, &alice)
            .unwrap();

        assert_eq!(first.charged, RATE);
        assert_eq!(second.charged, 0);
    }

    #[test]
    fn test_multi_participant_lifecycle() {
        init_tracing();
        let (mut ledger, clock, sink) = build_ledger();

        for who in 0..3 {
            let addr = participant(who);
            ledger
                .authorize_spending(&addr, STREAM, &addr, 1_000, 1_000)
                .unwrap();
            ledger.join_stream(&addr, STREAM).unwrap();
        }
        assert_eq!(ledger.stream_config(STREAM).unwrap().participant_count, 3);

        clock.advance(INTERVAL + 5);
        let outcomes = ledger.process_payments(&participant(0), STREAM).unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(ledger.total_revenue(STREAM), 3 * RATE);

        // 3 charges of 50 wei at 80/20: creator 120, treasury 30
        assert_eq!(sink.lock().balance_of(&creator()), 120);
        assert_eq!(
            sink.lock().balance_of(&Address::new("vibestream-treasury")),
            30
        );

        for who in 0..3 {
            ledger.leave_stream(&participant(who), STREAM).unwrap();
        }
        assert_eq!(ledger.stream_config(STREAM).unwrap().participant_count, 0);
        assert!(ledger.active_participants(STREAM).is_empty());
    }
}
