//! Round timers.
//!
//! Each scheduled timeout is a tokio task that sleeps and then feeds
//! `Event::LocalTimeout` back into the event channel. Timers are never
//! cancelled: the state machine ignores fired timeouts whose (epoch, round)
//! is no longer current, so letting stale timers fire is harmless and
//! cheaper than tracking cancellation.

use keystone_core::{Event, ScheduledTimeout};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

pub struct TimerManager {
    timers: HashMap<ScheduledTimeout, JoinHandle<()>>,
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        TimerManager {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Arrange for `Event::LocalTimeout(timeout)` after `delay`. Scheduling
    /// the same timeout twice is a no-op.
    pub fn schedule(&mut self, timeout: ScheduledTimeout, delay: Duration) {
        self.timers.retain(|_, handle| !handle.is_finished());
        if self.timers.contains_key(&timeout) {
            return;
        }

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(round = %timeout.round, count = timeout.count, "Round timer fired");
            let _ = event_tx.send(Event::LocalTimeout(timeout)).await;
        });
        self.timers.insert(timeout, handle);
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    fn abort_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.abort_all();
    }
}
