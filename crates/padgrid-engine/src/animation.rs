//! Cancellable, named LED animations.
//!
//! Each animation is a tokio task registered under a string id with its own
//! cancellation token. Starting an animation whose id is already running is
//! a no-op (idempotent); stopping waits (bounded) for the task to observe
//! cancellation. The token is checked at every sleep point, so a stop is
//! observed within one step period.

use std::{collections::HashMap, sync::Arc};

use config::PALETTE;
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    time::{Duration, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    surface::{Surface, grid_notes},
    ticker::STOP_WAIT_TIMEOUT_MS,
};

/// Animation id of the idle face sequence.
pub const IDLE_ANIMATION_ID: &str = "idle";

/// Duration of the pad pulse played on layer changes.
pub const PULSE_TOTAL_MS: u64 = 300;

/// One named face for the idle sequence: an 8-row bitmask (bit 7 is the
/// leftmost column) and the palette velocity used for lit pads.
#[derive(Debug, Clone, Copy)]
pub struct Face {
    /// Face name, e.g. `"happy"`.
    pub name: &'static str,
    /// Row bitmasks, top to bottom.
    pub rows: [u8; 8],
    /// Palette velocity for lit pads.
    pub velocity: u8,
}

const fn face(name: &'static str, velocity: u8, rows: [u8; 8]) -> Face {
    Face {
        name,
        rows,
        velocity,
    }
}

/// The face library used by the idle sequence.
pub const FACES: &[Face] = &[
    face(
        "happy",
        13,
        [
            0b0000_0000,
            0b0110_0110,
            0b0110_0110,
            0b0000_0000,
            0b1000_0001,
            0b0100_0010,
            0b0011_1100,
            0b0000_0000,
        ],
    ),
    face(
        "big_happy",
        13,
        [
            0b0000_0000,
            0b0110_0110,
            0b0110_0110,
            0b0000_0000,
            0b0111_1110,
            0b0111_1110,
            0b0011_1100,
            0b0000_0000,
        ],
    ),
    face(
        "wink",
        13,
        [
            0b0000_0000,
            0b0110_0000,
            0b0110_0110,
            0b0000_0000,
            0b1000_0001,
            0b0100_0010,
            0b0011_1100,
            0b0000_0000,
        ],
    ),
    face(
        "blink",
        13,
        [
            0b0000_0000,
            0b0000_0000,
            0b0110_0110,
            0b0000_0000,
            0b1000_0001,
            0b0100_0010,
            0b0011_1100,
            0b0000_0000,
        ],
    ),
    face(
        "heart_eyes",
        57,
        [
            0b0110_0110,
            0b1111_1111,
            0b0110_0110,
            0b0000_0000,
            0b1000_0001,
            0b0100_0010,
            0b0011_1100,
            0b0000_0000,
        ],
    ),
    face(
        "cool",
        45,
        [
            0b0000_0000,
            0b1111_1111,
            0b0110_0110,
            0b0000_0000,
            0b1000_0001,
            0b0100_0010,
            0b0011_1100,
            0b0000_0000,
        ],
    ),
    face(
        "star_eyes",
        13,
        [
            0b0010_0100,
            0b0111_1110,
            0b0010_0100,
            0b0000_0000,
            0b1000_0001,
            0b0100_0010,
            0b0011_1100,
            0b0000_0000,
        ],
    ),
    face(
        "surprised",
        9,
        [
            0b0000_0000,
            0b0110_0110,
            0b0110_0110,
            0b0000_0000,
            0b0001_1000,
            0b0010_0100,
            0b0010_0100,
            0b0001_1000,
        ],
    ),
    face(
        "tongue",
        5,
        [
            0b0000_0000,
            0b0110_0110,
            0b0110_0110,
            0b0000_0000,
            0b0111_1110,
            0b0001_1000,
            0b0001_1000,
            0b0000_0000,
        ],
    ),
    face(
        "blush",
        57,
        [
            0b0000_0000,
            0b0110_0110,
            0b0110_0110,
            0b1000_0001,
            0b1000_0001,
            0b0100_0010,
            0b0011_1100,
            0b0000_0000,
        ],
    ),
    face(
        "neutral",
        3,
        [
            0b0000_0000,
            0b0110_0110,
            0b0110_0110,
            0b0000_0000,
            0b0000_0000,
            0b0111_1110,
            0b0000_0000,
            0b0000_0000,
        ],
    ),
    face(
        "sleepy",
        43,
        [
            0b0000_0000,
            0b0000_0000,
            0b0111_0111,
            0b0000_0000,
            0b0000_0000,
            0b0011_1100,
            0b0000_0000,
            0b0000_0011,
        ],
    ),
];

/// Look up a face by name.
pub fn face_lookup(name: &str) -> Option<&'static Face> {
    FACES.iter().find(|f| f.name == name)
}

/// The scripted idle show: (face name, milliseconds) pairs, cycled forever
/// until cancelled.
pub const IDLE_SEQUENCE: &[(&str, u64)] = &[
    ("happy", 2000),
    ("wink", 500),
    ("happy", 1500),
    ("blink", 300),
    ("big_happy", 2000),
    ("heart_eyes", 1500),
    ("cool", 2000),
    ("star_eyes", 1200),
    ("tongue", 800),
    ("surprised", 700),
    ("blush", 1200),
    ("neutral", 1000),
    ("sleepy", 2500),
    ("blink", 300),
];

fn paint_face(surface: &Surface, face: &Face, cancel: &CancellationToken) -> crate::Result<()> {
    let rows = grid_notes();
    for (i, row) in rows.iter().enumerate() {
        for (j, note) in row.iter().enumerate() {
            // Checked per pad so a stop interrupts a frame mid-paint and
            // the frame cannot overwrite a repaint that follows the stop.
            if cancel.is_cancelled() {
                return Ok(());
            }
            let lit = face.rows[i] & (0x80 >> j) != 0;
            // The surface shadow makes this a delta paint: unchanged pads
            // between consecutive frames send nothing.
            surface.light(*note, if lit { face.velocity } else { 0 })?;
        }
    }
    Ok(())
}

struct AnimEntry {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Registry of running animation tasks.
#[derive(Clone)]
pub struct AnimationEngine {
    rt: Handle,
    surface: Surface,
    tasks: Arc<Mutex<HashMap<String, AnimEntry>>>,
}

impl AnimationEngine {
    /// An engine painting through the given surface.
    pub fn new(rt: Handle, surface: Surface) -> Self {
        Self {
            rt,
            surface,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// True if the animation is still running.
    pub fn is_running(&self, id: &str) -> bool {
        self.tasks
            .lock()
            .get(id)
            .is_some_and(|e| !e.handle.is_finished())
    }

    /// Number of animations still running.
    pub fn active_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, e| !e.handle.is_finished());
        tasks.len()
    }

    fn spawn<F, Fut>(&self, id: &str, body: F) -> bool
    where
        F: FnOnce(Surface, CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        if let Some(entry) = tasks.get(id) {
            if !entry.handle.is_finished() {
                trace!(id, "animation_already_running");
                return false;
            }
        }
        let token = CancellationToken::new();
        let handle = self.rt.spawn(body(self.surface.clone(), token.clone()));
        tasks.insert(id.to_string(), AnimEntry { token, handle });
        true
    }

    /// Signal cancellation without waiting.
    pub fn cancel(&self, id: &str) {
        if let Some(entry) = self.tasks.lock().remove(id) {
            entry.token.cancel();
            trace!(id, "animation_cancel");
        }
    }

    /// Cancel and wait (bounded) for the animation to finish.
    pub async fn stop(&self, id: &str) {
        let entry = self.tasks.lock().remove(id);
        if let Some(entry) = entry {
            entry.token.cancel();
            let _ = timeout(Duration::from_millis(STOP_WAIT_TIMEOUT_MS), entry.handle).await;
            trace!(id, "animation_stop");
        }
    }

    /// Cancel and wait (bounded) for every animation to finish.
    pub async fn stop_all(&self) {
        let entries: Vec<AnimEntry> = {
            let mut tasks = self.tasks.lock();
            tasks.drain().map(|(_, e)| e).collect()
        };
        for e in &entries {
            e.token.cancel();
        }
        for e in entries {
            let _ = timeout(Duration::from_millis(STOP_WAIT_TIMEOUT_MS), e.handle).await;
        }
        trace!("animation_stop_all");
    }

    /// Briefly pulse one pad between its bright and dim color, then
    /// restore it to `restore_velocity`.
    pub fn pulse_pad(&self, note: u8, velocity: u8, dim_velocity: u8, restore_velocity: u8) {
        let id = format!("pulse-{note}");
        self.spawn(&id, move |surface, token| async move {
            let step = Duration::from_millis(PULSE_TOTAL_MS / 6);
            for i in 0..6u8 {
                let v = if i % 2 == 0 { velocity } else { dim_velocity };
                if surface.light(note, v).is_err() {
                    return;
                }
                tokio::select! {
                    _ = sleep(step) => {}
                    _ = token.cancelled() => break,
                }
            }
            let _ = surface.light(note, restore_velocity);
        });
    }

    /// Sweep a proportional fill across a grid row: the leftmost
    /// `percent`% of pads light up one by one, then the task ends.
    pub fn start_progress(&self, row: usize, percent: u8, velocity: u8) {
        let row = row.min(7);
        let lit = (usize::from(percent.min(100)) * 8).div_ceil(100);
        self.spawn("progress", move |surface, token| async move {
            let notes = grid_notes()[row];
            for note in &notes {
                if surface.light(*note, 0).is_err() {
                    return;
                }
            }
            for note in notes.iter().take(lit) {
                if surface.light(*note, velocity).is_err() {
                    return;
                }
                tokio::select! {
                    _ = sleep(Duration::from_millis(60)) => {}
                    _ = token.cancelled() => return,
                }
            }
        });
    }

    /// Cycle the palette across the whole grid until stopped.
    pub fn start_rainbow(&self) {
        self.spawn("rainbow", |surface, token| async move {
            let colors: Vec<u8> = PALETTE
                .iter()
                .filter(|e| e.name != "off" && !e.name.ends_with("_dim"))
                .map(|e| e.velocity)
                .collect();
            let rows = grid_notes();
            let mut offset = 0usize;
            loop {
                for (i, row) in rows.iter().enumerate() {
                    let v = colors[(offset + i) % colors.len()];
                    for note in row {
                        if surface.light(*note, v).is_err() {
                            return;
                        }
                    }
                }
                offset = (offset + 1) % colors.len();
                tokio::select! {
                    _ = sleep(Duration::from_millis(120)) => {}
                    _ = token.cancelled() => return,
                }
            }
        });
    }

    /// Start the idle face show, cancelling any previous idle run first.
    pub fn start_idle_faces(&self) {
        self.cancel(IDLE_ANIMATION_ID);
        debug!("starting idle animation");
        self.spawn(IDLE_ANIMATION_ID, |surface, token| async move {
            loop {
                for (name, ms) in IDLE_SEQUENCE {
                    if token.is_cancelled() {
                        return;
                    }
                    let Some(face) = face_lookup(name) else {
                        continue;
                    };
                    if paint_face(&surface, face, &token).is_err() {
                        return;
                    }
                    tokio::select! {
                        _ = sleep(Duration::from_millis(*ms)) => {}
                        _ = token.cancelled() => return,
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::deps::{MockTransport, Transport};

    use super::*;

    fn engine() -> (AnimationEngine, MockTransport) {
        let transport = MockTransport::new();
        let surface = Surface::new();
        surface.set_output(Some(transport.open_output("Pad Grid").unwrap()));
        (AnimationEngine::new(Handle::current(), surface), transport)
    }

    #[test]
    fn every_sequence_entry_names_a_face() {
        for (name, _) in IDLE_SEQUENCE {
            assert!(face_lookup(name).is_some(), "unknown face {name}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_restart_replaces_previous_run() {
        let (anim, _transport) = engine();
        anim.start_idle_faces();
        tokio::task::yield_now().await;
        assert!(anim.is_running(IDLE_ANIMATION_ID));
        anim.start_idle_faces();
        tokio::task::yield_now().await;
        assert_eq!(anim.active_count(), 1);
        anim.stop_all().await;
        assert_eq!(anim.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_idle_frame_paints_nothing_more() {
        let (anim, transport) = engine();
        anim.start_idle_faces();
        tokio::task::yield_now().await;
        anim.stop(IDLE_ANIMATION_ID).await;
        transport.clear_sent();
        tokio::time::advance(Duration::from_millis(3000)).await;
        tokio::task::yield_now().await;
        assert!(transport.sent().is_empty());
        assert_eq!(anim.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_restores_mapping_color() {
        let (anim, transport) = engine();
        anim.pulse_pad(81, 21, 23, 45);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(PULSE_TOTAL_MS + 100)).await;
        tokio::task::yield_now().await;
        let sent = transport.sent();
        assert_eq!(sent.last().unwrap(), &vec![crate::surface::NOTE_ON, 81, 45]);
        assert_eq!(anim.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rainbow_runs_until_stopped() {
        let (anim, transport) = engine();
        anim.start_rainbow();
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert!(anim.is_running("rainbow"));
        assert!(!transport.sent().is_empty());
        anim.stop("rainbow").await;
        assert!(!anim.is_running("rainbow"));
    }
}
