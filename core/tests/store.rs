//! Store tests: persistence round-trips, atomic commits and the
//! append-only top-up ledger.

use balance_timer_core::{
    clock::ManualClock,
    config::TimerConfig,
    engine::TimerEngine,
    event::TimerEvent,
    record::{AccountContact, AccountTimerRecord, TopupEntry},
    store::TimerStore,
};
use chrono::{Duration, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;

fn temp_db() -> PathBuf {
    std::env::temp_dir().join(format!("balance-timer-{}.db", uuid::Uuid::new_v4()))
}

fn cleanup(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
    }
}

fn migrated() -> TimerStore {
    let store = TimerStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

#[test]
fn migrate_is_idempotent() {
    let store = migrated();
    store.migrate().expect("second migrate must be a no-op");
    assert_eq!(store.account_count().unwrap(), 0);
}

#[test]
fn record_round_trips_with_millisecond_deadline() {
    let store = migrated();
    let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap() + Duration::milliseconds(891);
    store.ensure_account("alice", "Alice", 1.0, now).unwrap();

    let mut record = AccountTimerRecord::new("alice", 2.5, now);
    record.balance = 1234.5678;
    record.deadline = Some(now + Duration::milliseconds(29_629_627));
    record.notification_sent = true;
    record.last_tick_at = Some(now);
    store.put(&record).unwrap();

    assert_eq!(store.get("alice").unwrap(), Some(record));
    assert_eq!(store.get("nobody").unwrap(), None);
}

#[test]
fn put_keeps_contact_columns() {
    let store = migrated();
    let now = Utc::now();
    store.ensure_account("bob", "Bob", 1.0, now).unwrap();
    let contact = AccountContact {
        username: "Bob".into(),
        email:    Some("bob@example.com".into()),
        phone:    None,
    };
    assert!(store.set_contact("bob", &contact).unwrap());
    assert!(!store.set_contact("nobody", &contact).unwrap());

    let mut record = store.get("bob").unwrap().unwrap();
    record.balance = 42.0;
    store.put(&record).unwrap();
    assert_eq!(store.contact("bob").unwrap(), Some(contact));
}

#[test]
fn failed_commit_leaves_nothing_behind() {
    let store = migrated();
    let now = Utc::now();
    let record = AccountTimerRecord::new("carol", 1.0, now);
    let entry = TopupEntry::new("carol", 10.0, "ops", now);
    store.commit(&record, Some(&entry), &[], now).unwrap();

    // Same entry id again violates the ledger's unique key.
    let mut changed = record.clone();
    changed.balance = 999.0;
    let event = TimerEvent::TimerExpired { account_id: "carol".into() };
    assert!(store.commit(&changed, Some(&entry), &[event], now).is_err());

    assert_eq!(store.get("carol").unwrap().unwrap().balance, 0.0, "record rolled back");
    assert_eq!(store.topup_history("carol").unwrap().len(), 1);
    assert_eq!(store.event_count("carol", "timer_expired").unwrap(), 0);
}

#[test]
fn contact_updates_through_the_engine() {
    let (engine, _clock) = TimerEngine::build_test().unwrap();
    assert!(engine.set_contact("dave", Some("d@example.com".into()), None).is_err());

    engine.ensure_account("dave", "Dave").unwrap();
    let contact = engine
        .set_contact("dave", Some("d@example.com".into()), Some("  ".into()))
        .unwrap();
    assert_eq!(contact.username, "Dave");
    assert_eq!(contact.email.as_deref(), Some("d@example.com"));
    assert_eq!(contact.phone, None, "blank phone is cleared");
}

#[test]
fn ensure_account_is_idempotent() {
    let (engine, _clock) = TimerEngine::build_test().unwrap();
    engine.ensure_account("erin", "Erin").unwrap();
    engine.ensure_account("erin", "Someone Else").unwrap();
    assert_eq!(engine.store().account_count().unwrap(), 1);
    assert_eq!(engine.store().event_count("erin", "account_created").unwrap(), 1);
    assert_eq!(engine.store().contact("erin").unwrap().unwrap().username, "Erin");
}

#[test]
fn state_survives_reopening_the_file() {
    let path = temp_db();
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);

    {
        let store = TimerStore::open(path.to_str().unwrap()).unwrap();
        store.migrate().unwrap();
        let mut engine = TimerEngine::new(store, Arc::new(clock.clone()), TimerConfig::default_test());
        engine.provision_balance("fay", 600.0, 2.0).unwrap();
        engine.apply_topup("fay", 100.0, Some("ops")).unwrap();
    }

    // Downtime: the deadline keeps counting while nothing runs.
    clock.advance_minutes(50);

    let store = TimerStore::open(path.to_str().unwrap()).unwrap();
    store.migrate().unwrap();
    let mut engine = TimerEngine::new(store, Arc::new(clock.clone()), TimerConfig::default_test());
    let report = engine.tick_account("fay").unwrap();
    assert!((report.balance - 600.0).abs() < 1e-9, "700 minus 50 min at 2/min, got {}", report.balance);
    assert_eq!(engine.topup_history("fay").unwrap().len(), 1);

    drop(engine);
    cleanup(&path);
}

#[test]
fn two_connections_see_the_same_ticks() {
    let path = temp_db();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    let store = TimerStore::open(path.to_str().unwrap()).unwrap();
    store.migrate().unwrap();
    let other = store.reopen().unwrap();

    let mut admin = TimerEngine::new(store, Arc::new(clock.clone()), TimerConfig::default_test());
    let mut user = TimerEngine::new(other, Arc::new(clock.clone()), TimerConfig::default_test());
    admin.provision_balance("gus", 300.0, 1.0).unwrap();

    clock.advance_minutes(10);
    admin.tick_all().unwrap();
    let from_user = user.tick_account("gus").unwrap();
    assert!((from_user.balance - 290.0).abs() < 1e-9);
    assert_eq!(admin.record("gus").unwrap(), user.record("gus").unwrap());

    drop(admin);
    drop(user);
    cleanup(&path);
}

#[test]
fn events_are_logged_in_order() {
    let (mut engine, clock) = TimerEngine::build_test().unwrap();
    engine.apply_topup("hal", 50.0, None).unwrap();
    clock.advance_minutes(60);
    engine.tick_account("hal").unwrap();

    let types: Vec<String> = engine
        .events_for_account("hal")
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, vec!["account_created", "topup_applied", "timer_expired"]);
}
