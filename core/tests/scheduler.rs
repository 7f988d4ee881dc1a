//! Tick loop tests, on tokio's paused clock.

mod common;

use balance_timer_core::{
    engine::{TickScope, TimerEngine},
    scheduler::TickLoop,
};
use common::{assert_close, build};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn loop_ticks_until_stopped() {
    let (mut engine, clock) = build();
    engine.provision_balance("alice", 600.0, 1.0).unwrap();
    clock.advance_minutes(30);

    let tick_loop = TickLoop::spawn(engine, TickScope::Account("alice".into()));
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(!tick_loop.is_finished());

    let engine = tick_loop.stop().await.unwrap();
    assert!(engine.ticks_run() >= 3, "expected ~4 ticks, ran {}", engine.ticks_run());
    assert_close(engine.record("alice").unwrap().balance, 570.0, 1e-9);
}

#[tokio::test(start_paused = true)]
async fn failing_iterations_do_not_end_the_loop() {
    let (engine, _clock) = build();
    let tick_loop = TickLoop::spawn_with_period(
        engine,
        TickScope::Account("nobody".into()),
        Duration::from_millis(100),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!tick_loop.is_finished(), "loop must survive failing ticks");

    let engine: TimerEngine = tick_loop.stop().await.unwrap();
    assert_eq!(engine.ticks_run(), 0);
}

#[tokio::test(start_paused = true)]
async fn admin_loop_expires_accounts_as_time_passes() {
    let (mut engine, clock) = build();
    engine.provision_balance("short", 5.0, 1.0).unwrap();
    engine.provision_balance("long", 500.0, 1.0).unwrap();

    let tick_loop = TickLoop::spawn(engine, TickScope::All);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    clock.advance_minutes(10);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let engine = tick_loop.stop().await.unwrap();
    let short = engine.record("short").unwrap();
    assert_eq!(short.balance, 0.0);
    assert_eq!(short.deadline, None);
    assert_close(engine.record("long").unwrap().balance, 490.0, 1e-9);
    assert_eq!(engine.store().event_count("short", "timer_expired").unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_before_first_period_returns_engine() {
    let (engine, _clock) = build();
    let tick_loop = TickLoop::spawn_with_period(engine, TickScope::All, Duration::from_secs(60));
    let engine = tick_loop.stop().await.unwrap();
    assert_eq!(engine.store().account_count().unwrap(), 0);
}
