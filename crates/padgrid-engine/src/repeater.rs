//! Repeat-while-held: one software repeat loop per held pad.
//!
//! Each loop injects the pad's combo on every tick and emits a repeat
//! notification. Start is idempotent per pad; stop of an absent loop is a
//! safe no-op. Injection failures are logged and the loop keeps ticking.

use std::sync::Arc;

use config::Repeat;
use padgrid_protocol::Event;
use tokio::{runtime::Handle, time::Duration};
use tracing::warn;

use crate::{deps::KeyInjector, notification::EventBroadcaster, ticker::Ticker};

/// Smallest accepted initial delay before the first repeat.
pub const REPEAT_MIN_INITIAL_DELAY_MS: u64 = 50;
/// Largest accepted initial delay before the first repeat.
pub const REPEAT_MAX_INITIAL_DELAY_MS: u64 = 2000;
/// Smallest accepted interval between repeats.
pub const REPEAT_MIN_INTERVAL_MS: u64 = 20;
/// Largest accepted interval between repeats.
pub const REPEAT_MAX_INTERVAL_MS: u64 = 2000;

/// Drives per-pad repeat loops over the shared ticker.
#[derive(Clone)]
pub struct Repeater {
    ticker: Ticker,
    injector: Arc<dyn KeyInjector>,
    events: EventBroadcaster,
}

impl Repeater {
    /// A repeater spawning its loops on the given runtime handle.
    pub fn new(rt: Handle, injector: Arc<dyn KeyInjector>, events: EventBroadcaster) -> Self {
        Self {
            ticker: Ticker::new(rt),
            injector,
            events,
        }
    }

    fn effective_timings(repeat: &Repeat) -> (Duration, Duration) {
        let initial = repeat
            .initial_delay_ms
            .clamp(REPEAT_MIN_INITIAL_DELAY_MS, REPEAT_MAX_INITIAL_DELAY_MS);
        let interval = repeat
            .interval_ms
            .clamp(REPEAT_MIN_INTERVAL_MS, REPEAT_MAX_INTERVAL_MS);
        (
            Duration::from_millis(initial),
            Duration::from_millis(interval),
        )
    }

    /// Start a repeat loop for `note`. If one is already running for the
    /// pad this is a no-op: exactly one loop exists per held pad.
    pub fn start(&self, note: u8, combo: String, repeat: &Repeat) {
        let (initial, interval) = Self::effective_timings(repeat);
        let injector = self.injector.clone();
        let events = self.events.clone();
        self.ticker.start(note, initial, interval, move || {
            if let Err(e) = injector.inject(&combo) {
                warn!(note, combo = %combo, error = %e, "repeat injection failed");
            }
            events.publish(Event::KeyRepeat {
                note,
                combo: combo.clone(),
            });
        });
    }

    /// Stop the repeat loop for `note`; absent is a safe no-op.
    pub fn stop(&self, note: u8) {
        self.ticker.stop(note);
    }

    /// Number of active repeat loops.
    pub fn active_count(&self) -> usize {
        self.ticker.active_count()
    }

    /// Cancel all repeat loops and wait (bounded) for them to finish.
    pub async fn clear_async(&self) {
        self.ticker.clear_async().await;
    }
}
