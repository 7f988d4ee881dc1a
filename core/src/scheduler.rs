//! Tick loop — the periodic driver of the engine.
//!
//! One loop per active view: a user's cabinet ticks its own account,
//! the admin overview ticks all of them. Each loop owns its engine; two
//! loops over the same database file converge within one period because
//! every tick is an absolute recomputation.
//!
//! Missed periods are skipped rather than replayed in a burst; a late
//! tick already lands on the right balance.

use crate::{
    engine::{TickScope, TimerEngine},
    error::{TimerError, TimerResult},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct TickLoop {
    shutdown: Arc<Notify>,
    handle:   JoinHandle<TimerEngine>,
}

impl TickLoop {
    /// Start ticking `scope` every `tick_interval_ms` from the engine's
    /// config. Must be called from inside a tokio runtime.
    pub fn spawn(engine: TimerEngine, scope: TickScope) -> Self {
        let period = engine.config().tick_interval();
        Self::spawn_with_period(engine, scope, period)
    }

    pub fn spawn_with_period(engine: TimerEngine, scope: TickScope, period: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run(engine, scope, period, shutdown.clone()));
        Self { shutdown, handle }
    }

    /// Cancel the loop and take the engine back.
    pub async fn stop(self) -> TimerResult<TimerEngine> {
        self.shutdown.notify_one();
        self.handle
            .await
            .map_err(|e| TimerError::Other(anyhow::anyhow!("tick loop task failed: {e}")))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(
    mut engine: TimerEngine,
    scope: TickScope,
    period: Duration,
    shutdown: Arc<Notify>,
) -> TimerEngine {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    log::info!("tick loop started: {scope:?} every {period:?}");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = interval.tick() => {
                // One bad iteration never ends the loop.
                if let Err(e) = engine.tick_scope(&scope) {
                    log::error!("tick iteration failed ({scope:?}): {e}");
                }
            }
        }
    }

    log::info!("tick loop stopped: {scope:?} after {} ticks", engine.ticks_run());
    engine
}
