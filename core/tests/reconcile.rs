//! Remote ledger reconciliation: when the ledger knows an account, its
//! balance replaces the locally derived one.

mod common;

use balance_timer_core::error::TimerError;
use chrono::Duration;
use common::{build, MockLedger};

#[test]
fn reconcile_without_ledger_is_a_no_op() {
    let (mut engine, _clock) = build();
    engine.provision_balance("alice", 100.0, 1.0).unwrap();
    assert!(engine.reconcile("alice").unwrap().is_none());
    assert_eq!(engine.record("alice").unwrap().balance, 100.0);
}

#[test]
fn remote_balance_replaces_local_and_reprojects() {
    let (engine, clock) = build();
    let ledger = MockLedger::default();
    let mut engine = engine.with_ledger(Box::new(ledger.clone()));
    engine.provision_balance("bob", 1_000.0, 2.0).unwrap();
    clock.advance_minutes(50);

    ledger.set_balance(Some(1_500.0));
    let record = engine.reconcile("bob").unwrap().expect("ledger knows bob");
    assert_eq!(record.balance, 1_500.0);
    assert_eq!(record.deadline, Some(engine.now() + Duration::minutes(750)));
    assert_eq!(engine.store().event_count("bob", "balance_reconciled").unwrap(), 1);
}

#[test]
fn unknown_remote_account_changes_nothing() {
    let (engine, _clock) = build();
    let ledger = MockLedger::default();
    let mut engine = engine.with_ledger(Box::new(ledger.clone()));
    engine.provision_balance("carol", 100.0, 1.0).unwrap();
    let before = engine.record("carol").unwrap();

    assert!(engine.reconcile("carol").unwrap().is_none());
    assert_eq!(engine.record("carol").unwrap(), before);
}

#[test]
fn unusable_remote_balance_is_rejected() {
    let (engine, _clock) = build();
    let ledger = MockLedger::default();
    let mut engine = engine.with_ledger(Box::new(ledger.clone()));
    engine.provision_balance("dave", 100.0, 1.0).unwrap();
    let before = engine.record("dave").unwrap();

    ledger.set_balance(Some(-5.0));
    assert!(matches!(engine.reconcile("dave"), Err(TimerError::RemoteLedger(_))));
    assert_eq!(engine.record("dave").unwrap(), before);
}

#[test]
fn unreachable_ledger_surfaces_an_error() {
    let (engine, _clock) = build();
    let mut engine = engine.with_ledger(Box::new(MockLedger::down()));
    assert!(matches!(engine.reconcile("erin"), Err(TimerError::RemoteLedger(_))));
}
