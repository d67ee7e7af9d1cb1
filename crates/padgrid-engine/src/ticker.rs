//! Ticker for scheduling repeated actions with cancellation support.
//!
//! Runs a callback after an initial delay and then on regular intervals,
//! keyed by pad control id. Supports immediate cancellation and bounded
//! waits for task completion.

use tokio::{
    runtime::Handle,
    time::{self, Duration, MissedTickBehavior},
};

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Maximum time to wait for a cancelled ticker task to finish.
pub const STOP_WAIT_TIMEOUT_MS: u64 = 50;

struct TickerEntry {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Minimal ticker core: one cancellable interval task per pad id.
#[derive(Clone)]
pub struct Ticker {
    rt: Handle,
    entries: Arc<Mutex<HashMap<u8, TickerEntry>>>,
}

impl Ticker {
    /// A ticker spawning its tasks on the given runtime handle.
    pub fn new(rt: Handle) -> Self {
        Self {
            rt,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of active tickers.
    pub fn active_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Start a ticker for `note` with the given timings, unless one is
    /// already running (idempotent).
    pub fn start<F>(&self, note: u8, initial: Duration, interval: Duration, mut on_tick: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut entries = self.entries.lock();
        if entries.contains_key(&note) {
            trace!(note, "ticker_start_already_active");
            return;
        }

        let token = CancellationToken::new();
        let cancel = token.clone();

        let fut = async move {
            trace!(
                note,
                init_ms = initial.as_millis(),
                int_ms = interval.as_millis(),
                "ticker_start"
            );

            // Initial delay with cancellation
            tokio::select! {
                _ = time::sleep(initial) => {}
                _ = cancel.cancelled() => {
                    trace!(note, "ticker_cancelled_initial");
                    return;
                }
            }

            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        trace!(note, "ticker_cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        on_tick();
                    }
                }
            }
        };

        let handle = self.rt.spawn(fut);
        entries.insert(note, TickerEntry { token, handle });
    }

    /// Stop a ticker if present (non-blocking; absent is a safe no-op).
    pub fn stop(&self, note: u8) {
        if let Some(entry) = self.entries.lock().remove(&note) {
            entry.token.cancel();
            // Let the task observe the token rather than aborting it.
            trace!(note, "ticker_stop");
        }
    }

    /// Cancel all tickers and wait (bounded) for each to finish.
    pub async fn clear_async(&self) {
        let entries: Vec<TickerEntry> = {
            let mut map = self.entries.lock();
            map.drain().map(|(_, e)| e).collect()
        };

        // Cancel all tokens first
        for e in &entries {
            e.token.cancel();
        }

        for e in entries {
            let _ = time::timeout(Duration::from_millis(STOP_WAIT_TIMEOUT_MS), e.handle).await;
        }
        trace!("ticker_clear_async");
    }
}
