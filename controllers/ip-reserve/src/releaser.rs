//! Periodic release task.
//!
//! Calls `RetentionStore::release` every release period. A failed cycle is
//! logged and the task waits for the next tick; nothing is retried early.
//! With leader election on, ticks are skipped while this replica does not
//! hold the lease.

use crate::retention::RetentionStore;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

pub struct Releaser {
    engine: Arc<RetentionStore>,
    period: Duration,
    leading: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for Releaser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Releaser").field("period", &self.period).finish_non_exhaustive()
    }
}

impl Releaser {
    pub fn new(engine: Arc<RetentionStore>, period: Duration) -> Self {
        Self {
            engine,
            period,
            leading: None,
        }
    }

    /// Only release while `leading` reads `true`.
    #[must_use]
    pub fn with_leader_gate(mut self, leading: watch::Receiver<bool>) -> Self {
        self.leading = Some(leading);
        self
    }

    fn is_leader(&self) -> bool {
        self.leading.as_ref().is_none_or(|leading| *leading.borrow())
    }

    /// Ticks forever. The first cycle runs immediately.
    pub async fn run(self) {
        info!(period = ?self.period, "Release task started");
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.is_leader() {
                debug!("Not the leader, skipping release cycle");
                continue;
            }
            self.tick().await;
        }
    }

    /// One cycle; returns whether it succeeded.
    pub async fn tick(&self) -> bool {
        match self.engine.release(Local::now()).await {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Release cycle failed, waiting for next tick");
                false
            }
        }
    }
}
