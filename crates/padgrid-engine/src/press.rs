//! Per-pad press state: timestamps, deferred short actions, long-press
//! arbitration.
//!
//! Entries live from press to release and are never persisted. The map is
//! only touched from dispatch and from long-press timer tasks, both of
//! which go through the small mutex here.

use std::{collections::HashMap, sync::Arc};

use config::{LongPress, MacroStep};
use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

/// Action deferred until release while a long-press timer is armed.
#[derive(Debug, Clone)]
pub enum ShortAction {
    /// Inject a single key combo.
    Inject(String),
    /// Run a macro sequence.
    Macro(Vec<MacroStep>),
}

struct PressEntry {
    pressed_at: Instant,
    long: Option<LongPress>,
    short: Option<ShortAction>,
    long_fired: bool,
    long_token: Option<CancellationToken>,
    long_task: Option<JoinHandle<()>>,
}

/// Snapshot of a press handed back at release time.
pub struct ReleasedPress {
    /// How long the pad was held.
    pub held: Duration,
    /// The long-press config that was armed, if any.
    pub long: Option<LongPress>,
    /// The deferred short-press action, if any.
    pub short: Option<ShortAction>,
    /// Whether the long-press timer already fired during the hold.
    pub long_fired: bool,
}

/// Tracks which pads are currently held.
#[derive(Clone, Default)]
pub struct PressTracker {
    held: Arc<Mutex<HashMap<u8, PressEntry>>>,
}

impl PressTracker {
    /// Create a new press tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a press. Returns false (and changes nothing) if the pad is
    /// already held; duplicate press events are ignored.
    pub fn begin(&self, note: u8) -> bool {
        self.begin_armed(note, None, None, None)
    }

    /// Record a press with a long-press timer armed and a short action
    /// deferred to release.
    pub fn begin_armed(
        &self,
        note: u8,
        long: Option<LongPress>,
        short: Option<ShortAction>,
        long_token: Option<CancellationToken>,
    ) -> bool {
        let mut held = self.held.lock();
        if held.contains_key(&note) {
            return false;
        }
        held.insert(
            note,
            PressEntry {
                pressed_at: Instant::now(),
                long,
                short,
                long_fired: false,
                long_token,
                long_task: None,
            },
        );
        true
    }

    /// Attach the spawned long-press timer task to its press entry so a
    /// teardown can join it. Dropped if the press has already ended (the
    /// entry's token was cancelled, so the task exits on its own).
    pub fn attach_long_task(&self, note: u8, handle: JoinHandle<()>) {
        if let Some(entry) = self.held.lock().get_mut(&note) {
            entry.long_task = Some(handle);
        }
    }

    /// Number of pads currently held.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Mark the long press as fired, if the press still exists and has not
    /// fired yet. The check-and-set is atomic under the map lock, so the
    /// timer and a racing release agree on exactly one winner.
    pub fn mark_long_fired(&self, note: u8) -> bool {
        let mut held = self.held.lock();
        match held.get_mut(&note) {
            Some(entry) if !entry.long_fired => {
                entry.long_fired = true;
                true
            }
            _ => false,
        }
    }

    /// Remove the press entry, cancelling its long-press timer. Returns
    /// `None` for a release without a matching press.
    pub fn finish(&self, note: u8) -> Option<ReleasedPress> {
        let entry = self.held.lock().remove(&note)?;
        if let Some(token) = &entry.long_token {
            token.cancel();
        }
        Some(ReleasedPress {
            held: entry.pressed_at.elapsed(),
            long: entry.long,
            short: entry.short,
            long_fired: entry.long_fired,
        })
    }

    /// Drop all press state, cancelling every armed long-press timer.
    pub fn clear_all(&self) {
        let _ = self.drain_all();
    }

    /// Drop all press state, cancelling every armed long-press timer and
    /// returning the timer task handles so the caller can join them.
    pub fn drain_all(&self) -> Vec<JoinHandle<()>> {
        let mut held = self.held.lock();
        let mut handles = Vec::new();
        for (_, entry) in held.drain() {
            if let Some(token) = &entry.long_token {
                token.cancel();
            }
            if let Some(handle) = entry.long_task {
                handles.push(handle);
            }
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_press_is_ignored() {
        let tracker = PressTracker::new();
        assert!(tracker.begin(81));
        assert!(!tracker.begin(81));
        assert_eq!(tracker.held_count(), 1);
    }

    #[tokio::test]
    async fn release_without_press_is_none() {
        let tracker = PressTracker::new();
        assert!(tracker.finish(81).is_none());
    }

    #[tokio::test]
    async fn long_fired_wins_exactly_once() {
        let tracker = PressTracker::new();
        tracker.begin(81);
        assert!(tracker.mark_long_fired(81));
        assert!(!tracker.mark_long_fired(81));
        let released = tracker.finish(81).unwrap();
        assert!(released.long_fired);
    }

    #[tokio::test]
    async fn clear_all_cancels_timers() {
        let tracker = PressTracker::new();
        let token = CancellationToken::new();
        tracker.begin_armed(81, None, None, Some(token.clone()));
        tracker.clear_all();
        assert!(token.is_cancelled());
        assert_eq!(tracker.held_count(), 0);
    }

    #[tokio::test]
    async fn drain_hands_back_timer_tasks_for_joining() {
        let tracker = PressTracker::new();
        let token = CancellationToken::new();
        tracker.begin_armed(81, None, None, Some(token.clone()));
        let t = token.clone();
        tracker.attach_long_task(81, tokio::spawn(async move { t.cancelled().await }));

        let handles = tracker.drain_all();
        assert!(token.is_cancelled());
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tracker.held_count(), 0);
    }
}
