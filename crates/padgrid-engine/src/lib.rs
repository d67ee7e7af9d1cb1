//! Padgrid Engine
//!
//! The engine coordinates everything between the pad hardware and the OS:
//! - dispatches raw press/release events against the active layer's mappings
//! - resolves velocity tables, long presses, macros, and layer switches
//! - drives cancellable background tasks (repeat loops, long-press timers,
//!   LED animations, auto-reconnect, idle detection)
//! - owns the connection lifecycle and paints the LED surface
//!
//! It exposes a minimal, documented API:
//! - [`Engine`]: the primary type you construct and drive
//! - [`Transport`] / [`KeyInjector`]: the collaborator seams, with
//!   [`MockTransport`] / [`MockInjector`] for tests and loopback tooling
//!
//! All other modules are crate-private implementation details. The engine
//! must be constructed inside a Tokio runtime; it spawns its background
//! tasks on the runtime it was created on.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use config::{LongPress, Mapping, Profile};
use padgrid_protocol::{ActionKind, ActionSummary, ConnectOutcome, Event};
use tokio::{
    runtime::Handle,
    sync::mpsc::{self, Receiver, UnboundedReceiver},
    time::{Duration, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

mod animation;
mod deps;
mod error;
mod macros;
mod notification;
mod press;
mod repeater;
mod resolver;
mod services;
mod session;
mod stack;
mod store;
mod surface;
mod ticker;

pub use deps::{
    EventCallback, InputPort, KeyInjector, MockInjector, MockTransport, OutputPort, Transport,
};
pub use error::{Error, Result};
pub use notification::EVENT_QUEUE_DEPTH;

use animation::{AnimationEngine, IDLE_ANIMATION_ID};
use macros::MacroRunner;
use notification::EventBroadcaster;
use press::{PressTracker, ShortAction};
use repeater::Repeater;
use resolver::PressPlan;
use services::Services;
use session::SessionController;
use store::ProfileCell;
use surface::{CONTROL_CHANGE, NOTE_OFF, NOTE_ON, Surface};
use ticker::STOP_WAIT_TIMEOUT_MS;

/// Tunable engine timings and limits.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Per-subscriber event queue depth.
    pub event_queue_depth: usize,
    /// Hard timeout on each port open call.
    pub connect_timeout: Duration,
    /// Interval between auto-reconnect cycles.
    pub reconnect_interval: Duration,
    /// Inactivity span after which the idle animation starts.
    pub idle_timeout: Duration,
    /// Interval between idle checks.
    pub idle_check_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_queue_depth: notification::EVENT_QUEUE_DEPTH,
            connect_timeout: Duration::from_millis(2500),
            reconnect_interval: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(120),
            idle_check_interval: Duration::from_secs(5),
        }
    }
}

/// The dispatch engine: owns mapping state, resolves events, and manages
/// every background behavior tied to a session.
///
/// `Engine` is cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    profile: Arc<ProfileCell>,
    presses: PressTracker,
    services: Services,
    session: SessionController,
    running: Arc<AtomicBool>,
    long_timers: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    rt: Handle,
    cfg: EngineConfig,
}

impl Engine {
    /// An engine over the given collaborators with a default (empty)
    /// profile and default timings.
    pub fn new(transport: Arc<dyn Transport>, injector: Arc<dyn KeyInjector>) -> Self {
        Self::with_config(transport, injector, Profile::default(), EngineConfig::default())
    }

    /// An engine with an explicit starting profile and timings.
    pub fn with_config(
        transport: Arc<dyn Transport>,
        injector: Arc<dyn KeyInjector>,
        profile: Profile,
        cfg: EngineConfig,
    ) -> Self {
        let rt = Handle::current();
        let surface = Surface::new();
        let events = EventBroadcaster::new(cfg.event_queue_depth);
        let services = Services {
            injector: injector.clone(),
            events: events.clone(),
            repeater: Repeater::new(rt.clone(), injector.clone(), events),
            macros: MacroRunner::new(rt.clone(), injector),
            animations: AnimationEngine::new(rt.clone(), surface.clone()),
            surface: surface.clone(),
        };
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let session = SessionController::new(transport, surface, raw_tx, cfg);
        let engine = Self {
            profile: Arc::new(ProfileCell::new(profile)),
            presses: PressTracker::new(),
            services,
            session,
            running: Arc::new(AtomicBool::new(false)),
            long_timers: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
            rt,
            cfg,
        };
        engine.spawn_background(raw_rx);
        engine
    }

    fn spawn_background(&self, mut raw_rx: UnboundedReceiver<Vec<u8>>) {
        // Raw event pump: transport callbacks land here.
        let eng = self.clone();
        let shutdown = self.shutdown.clone();
        self.rt.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = raw_rx.recv() => match msg {
                        Some(bytes) => eng.on_raw(&bytes),
                        None => break,
                    },
                }
            }
        });

        // Idle monitor: fires the idle animation exactly once per idle span.
        let eng = self.clone();
        let shutdown = self.shutdown.clone();
        self.rt.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(eng.cfg.idle_check_interval) => {}
                }
                if !eng.session.output_connected() {
                    continue;
                }
                if eng.session.idle.idle_for() >= eng.cfg.idle_timeout
                    && eng.session.idle.mark_fired()
                {
                    info!("idle threshold crossed, starting idle animation");
                    eng.services.animations.start_idle_faces();
                }
            }
        });

        // Auto-reconnect loop. The interval is re-read every cycle and the
        // notify wakes the loop early when it is changed at runtime.
        let eng = self.clone();
        let shutdown = self.shutdown.clone();
        self.rt.spawn(async move {
            let notify = eng.session.reconnect_notify();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(eng.session.reconnect_interval()) => {}
                    _ = notify.notified() => continue,
                }
                if let Some(outcome) = eng.session.try_reconnect_cycle().await {
                    if outcome.output_connected {
                        eng.services.animations.stop_all().await;
                        eng.repaint();
                    }
                }
            }
        });
    }

    // ---- session lifecycle ----

    /// Connect to the hardware, retrying up to `retries` extra attempts.
    pub async fn connect(
        &self,
        input: Option<&str>,
        output: Option<&str>,
        retries: u32,
        retry_delay: Duration,
    ) -> ConnectOutcome {
        let outcome = self.session.connect(input, output, retries, retry_delay).await;
        if outcome.output_connected {
            // A running animation would paint over the fresh mapping state.
            self.services.animations.stop_all().await;
            self.repaint();
        }
        if outcome.success {
            self.session.idle.touch();
        }
        outcome
    }

    /// Tear the session down: stop dispatch, cancel and join every
    /// background behavior, clear the LEDs, and close both ports. No task
    /// can inject or paint after this returns.
    pub async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.services.repeater.clear_async().await;
        self.services.macros.clear_async().await;
        self.services.animations.stop_all().await;
        for handle in self.presses.drain_all() {
            let _ = timeout(Duration::from_millis(STOP_WAIT_TIMEOUT_MS), handle).await;
        }
        let _ = self.session.idle.clear_fired();
        self.session.disconnect().await;
    }

    /// Enable dispatch. Returns false when no input is connected.
    pub fn start(&self) -> bool {
        if !self.session.input_connected() {
            return false;
        }
        self.running.store(true, Ordering::SeqCst);
        debug!("dispatch started");
        true
    }

    /// Pause dispatch and clear held state. Returns false when no input
    /// is connected.
    pub async fn stop(&self) -> bool {
        if !self.session.input_connected() {
            return false;
        }
        self.running.store(false, Ordering::SeqCst);
        self.services.repeater.clear_async().await;
        self.presses.clear_all();
        debug!("dispatch stopped");
        true
    }

    /// True when either side of the transport is open.
    pub fn connected(&self) -> bool {
        self.session.input_connected() || self.session.output_connected()
    }

    /// Toggle the auto-reconnect loop and set its cycle interval. Takes
    /// effect immediately, including for a cycle already waiting.
    pub fn set_auto_reconnect(&self, enabled: bool, interval: Duration) {
        self.session.set_auto_reconnect(enabled, interval);
    }

    /// Cancel the engine's own monitors (event pump, idle, reconnect) and
    /// tear down the session. Call once when shutting the process down.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.shutdown.cancel();
    }

    // ---- event dispatch ----

    /// Feed one raw transport message (note-on/off or CC) into dispatch.
    pub fn on_raw(&self, bytes: &[u8]) {
        if !self.running.load(Ordering::SeqCst) {
            trace!("dispatch paused, dropping raw event");
            return;
        }
        if bytes.len() < 3 {
            trace!(len = bytes.len(), "short raw message ignored");
            return;
        }
        let (status, note, value) = (bytes[0] & 0xF0, bytes[1], bytes[2]);
        match status {
            NOTE_ON if value > 0 => self.on_press(note, value),
            NOTE_ON | NOTE_OFF => self.on_release(note),
            CONTROL_CHANGE if value > 0 => self.on_press(note, value),
            CONTROL_CHANGE => self.on_release(note),
            _ => trace!(status, "unhandled raw message"),
        }
    }

    /// Handle a pad press.
    pub fn on_press(&self, note: u8, velocity: u8) {
        self.reset_activity();
        self.services.events.publish(Event::PadPress { note, velocity });

        let (mapping, layer) = self.active_mapping(note);
        let Some(mapping) = mapping else {
            trace!(note, layer = %layer, "press on unmapped pad");
            return;
        };
        match resolver::resolve_press(&mapping, velocity) {
            PressPlan::Disabled => trace!(note, "mapping disabled"),
            PressPlan::LayerPop => {
                if self.presses.begin(note) {
                    self.pop_layer();
                    self.pulse_feedback(note, &mapping);
                }
            }
            PressPlan::LayerPush { target } => {
                if self.presses.begin(note) {
                    self.push_layer(&target);
                    self.pulse_feedback(note, &mapping);
                }
            }
            PressPlan::Macro { steps } => {
                if self.presses.begin(note) {
                    self.services.macros.run(note, steps);
                }
            }
            PressPlan::Key { combo, repeat } => {
                if self.presses.begin(note) {
                    self.inject_logged(note, &combo);
                    if let Some(repeat) = repeat {
                        self.services.repeater.start(note, combo, &repeat);
                    }
                }
            }
            PressPlan::ArmLongPress { long, short } => self.arm_long_press(note, long, short),
        }
    }

    /// Handle a pad release.
    pub fn on_release(&self, note: u8) {
        self.reset_activity();
        self.services.events.publish(Event::PadRelease { note });

        // Repeats never outlive the hold, whatever path the press took.
        self.services.repeater.stop(note);

        let Some(released) = self.presses.finish(note) else {
            return;
        };
        if released.long_fired {
            return;
        }
        if let Some(long) = &released.long {
            if released.held >= Duration::from_millis(long.threshold_ms) {
                // The hold crossed the threshold but the timer lost the
                // race to a concurrent release: the long action still wins.
                self.inject_logged(note, &long.combo);
                self.services.events.publish(Event::LongPress {
                    note,
                    combo: long.combo.clone(),
                });
                return;
            }
        }
        match released.short {
            Some(ShortAction::Inject(combo)) => self.inject_logged(note, &combo),
            Some(ShortAction::Macro(steps)) => self.services.macros.run(note, steps),
            None => {}
        }
    }

    fn arm_long_press(&self, note: u8, long: LongPress, short: ShortAction) {
        let token = CancellationToken::new();
        if !self
            .presses
            .begin_armed(note, Some(long.clone()), Some(short), Some(token.clone()))
        {
            return;
        }
        let threshold = Duration::from_millis(long.threshold_ms);
        let eng = self.clone();
        self.long_timers.fetch_add(1, Ordering::SeqCst);
        let handle = self.rt.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(threshold) => {
                    // Re-check under the press map lock: the press must
                    // still exist and not have fired.
                    if eng.presses.mark_long_fired(note) {
                        eng.inject_logged(note, &long.combo);
                        eng.services.events.publish(Event::LongPress {
                            note,
                            combo: long.combo.clone(),
                        });
                    }
                }
            }
            eng.long_timers.fetch_sub(1, Ordering::SeqCst);
        });
        self.presses.attach_long_task(note, handle);
    }

    fn inject_logged(&self, note: u8, combo: &str) {
        if let Err(e) = self.services.injector.inject(combo) {
            warn!(note, combo = %combo, error = %e, "key injection failed");
        }
    }

    fn active_mapping(&self, note: u8) -> (Option<Mapping>, String) {
        self.profile.with(|st| {
            let layer = st.stack.current().to_string();
            (st.profile.get_mapping(note, Some(&layer)).cloned(), layer)
        })
    }

    fn pulse_feedback(&self, note: u8, mapping: &Mapping) {
        let restore = self.profile.with(|st| {
            st.profile
                .get_mapping(note, Some(st.stack.current()))
                .filter(|m| m.enabled)
                .map_or(0, |m| m.color.velocity())
        });
        self.services.animations.pulse_pad(
            note,
            mapping.color.velocity(),
            mapping.color.dim().velocity(),
            restore,
        );
    }

    // ---- activity / idle ----

    /// Record activity: refreshes the idle clock and, when the idle
    /// animation is showing, stops it and repaints the mapping state.
    /// The repaint waits for the idle task to finish so an in-flight
    /// frame can never overwrite it.
    pub fn reset_activity(&self) {
        self.session.idle.touch();
        if self.session.idle.clear_fired() {
            debug!("activity resumed, stopping idle animation");
            let eng = self.clone();
            self.rt.spawn(async move {
                eng.services.animations.stop(IDLE_ANIMATION_ID).await;
                eng.repaint();
            });
        }
    }

    // ---- layer operations ----

    /// Push a layer (created if absent) and return the new active layer.
    pub fn push_layer(&self, name: &str) -> String {
        let current = self.profile.locked(|| {
            let current = self.profile.with_mut(|st| {
                st.profile.ensure_layer(name);
                st.stack.push(name);
                st.stack.current().to_string()
            });
            self.repaint();
            current
        });
        self.services.events.publish(Event::LayerChange {
            layer: current.clone(),
        });
        current
    }

    /// Pop the top layer (safe no-op at depth 1) and return the active
    /// layer.
    pub fn pop_layer(&self) -> String {
        let (current, changed) = self.profile.locked(|| {
            let (current, changed) = self.profile.with_mut(|st| {
                let changed = st.stack.pop();
                (st.stack.current().to_string(), changed)
            });
            if changed {
                self.repaint();
            }
            (current, changed)
        });
        if changed {
            self.services.events.publish(Event::LayerChange {
                layer: current.clone(),
            });
        }
        current
    }

    /// Replace the whole stack with the named layer (created if absent)
    /// and return it.
    pub fn set_layer(&self, name: &str) -> String {
        let current = self.profile.locked(|| {
            let current = self.profile.with_mut(|st| {
                st.profile.ensure_layer(name);
                st.stack.set(name);
                st.stack.current().to_string()
            });
            self.repaint();
            current
        });
        self.services.events.publish(Event::LayerChange {
            layer: current.clone(),
        });
        current
    }

    /// Name of the active layer.
    pub fn current_layer(&self) -> String {
        self.profile.with(|st| st.stack.current().to_string())
    }

    /// Depth of the layer stack (always >= 1).
    pub fn stack_depth(&self) -> usize {
        self.profile.with(|st| st.stack.depth())
    }

    /// Repaint the surface from the active layer's enabled mappings.
    /// A no-op while no output is connected.
    pub fn repaint(&self) {
        if !self.services.surface.is_connected() {
            return;
        }
        let result = self.profile.with(|st| {
            self.services
                .surface
                .paint_mappings(st.profile.layer_mappings(Some(st.stack.current())))
        });
        if let Err(e) = result {
            debug!(error = %e, "repaint failed");
        }
    }

    // ---- mapping CRUD ----

    /// Insert or replace a mapping (base layer when `layer` is `None`),
    /// repainting if the affected layer is active.
    pub fn add_mapping(&self, mapping: Mapping, layer: Option<&str>) {
        self.profile.locked(|| {
            let affects_active = self.profile.with_mut(|st| {
                let target = layer.unwrap_or(&st.profile.base_layer).to_string();
                st.profile.add_mapping(mapping, Some(&target));
                target == st.stack.current()
            });
            if affects_active {
                self.repaint();
            }
        });
    }

    /// Remove a mapping; absent notes or layers are a safe no-op.
    pub fn remove_mapping(&self, note: u8, layer: Option<&str>) {
        self.profile.locked(|| {
            let affects_active = self.profile.with_mut(|st| {
                let target = layer.unwrap_or(&st.profile.base_layer).to_string();
                st.profile.remove_mapping(note, Some(&target));
                target == st.stack.current()
            });
            if affects_active {
                self.repaint();
            }
        });
    }

    /// Look up a mapping (base layer when `layer` is `None`).
    pub fn get_mapping(&self, note: u8, layer: Option<&str>) -> Option<Mapping> {
        self.profile
            .with(|st| st.profile.get_mapping(note, layer).cloned())
    }

    // ---- profile import/export ----

    /// Validate and atomically swap in a profile from JSON. On any
    /// validation failure the live profile is untouched. The layer stack
    /// is rebased to the new profile's base layer.
    pub fn import_profile(&self, json: &str) -> Result<()> {
        let incoming = Profile::from_json(json)?;
        let layer = self.profile.locked(|| {
            let layer = self.profile.with_mut(|st| {
                st.stack.rebase(incoming.base_layer.clone());
                st.profile = incoming;
                st.stack.current().to_string()
            });
            self.repaint();
            layer
        });
        info!(layer = %layer, "profile imported");
        self.services
            .events
            .publish(Event::LayerChange { layer });
        Ok(())
    }

    /// Serialize the active profile to JSON.
    pub fn export_profile(&self) -> Result<String> {
        Ok(self.profile.with(|st| st.profile.to_json())?)
    }

    // ---- emulation / observation ----

    /// Resolve and perform a press without hardware, as a zero-length
    /// press-and-release. Long-press mappings run their short action. No
    /// repeat loop is started (there is no hold to end it).
    pub fn emulate_press(
        &self,
        note: u8,
        velocity: u8,
        skip_animation: bool,
    ) -> Result<ActionSummary> {
        self.reset_activity();
        let (mapping, layer) = self.active_mapping(note);
        let Some(mapping) = mapping else {
            return Err(Error::NoMapping { note, layer });
        };
        self.services.events.publish(Event::PadPress { note, velocity });

        let plan = resolver::resolve_press(&mapping, velocity);
        let summary = match plan {
            PressPlan::Disabled => return Err(Error::NoMapping { note, layer }),
            PressPlan::LayerPop => {
                let layer = self.pop_layer();
                if !skip_animation {
                    self.pulse_feedback(note, &mapping);
                }
                self.summary(&mapping, ActionKind::LayerPop, None, layer)
            }
            PressPlan::LayerPush { target } => {
                let layer = self.push_layer(&target);
                if !skip_animation {
                    self.pulse_feedback(note, &mapping);
                }
                self.summary(&mapping, ActionKind::LayerPush, None, layer)
            }
            PressPlan::Macro { steps } => {
                self.services.macros.run(note, steps);
                if !skip_animation {
                    self.pulse_feedback(note, &mapping);
                }
                self.summary(&mapping, ActionKind::Macro, None, layer)
            }
            PressPlan::Key { combo, .. } => {
                self.inject_logged(note, &combo);
                if !skip_animation {
                    self.pulse_feedback(note, &mapping);
                }
                self.summary(&mapping, ActionKind::Key, Some(combo), layer)
            }
            PressPlan::ArmLongPress { short, .. } => {
                let combo = match short {
                    ShortAction::Inject(combo) => {
                        self.inject_logged(note, &combo);
                        Some(combo)
                    }
                    ShortAction::Macro(steps) => {
                        self.services.macros.run(note, steps);
                        None
                    }
                };
                if !skip_animation {
                    self.pulse_feedback(note, &mapping);
                }
                self.summary(&mapping, ActionKind::LongPressArmed, combo, layer)
            }
        };
        self.services.events.publish(Event::PadRelease { note });
        Ok(summary)
    }

    fn summary(
        &self,
        mapping: &Mapping,
        kind: ActionKind,
        combo: Option<String>,
        layer: String,
    ) -> ActionSummary {
        ActionSummary {
            note: mapping.note,
            label: mapping.label.clone(),
            kind,
            combo,
            layer,
        }
    }

    /// Register an event subscriber. Each subscriber has a bounded queue;
    /// when it is full the newest events are dropped for that subscriber.
    pub fn subscribe(&self) -> Receiver<Event> {
        self.services.events.subscribe()
    }

    // ---- decorative animations ----

    /// Start the rainbow cycle across the grid (idempotent while running).
    pub fn start_rainbow(&self) {
        self.services.animations.start_rainbow();
    }

    /// Sweep a proportional fill across a grid row (0 = top).
    pub fn start_progress(&self, row: usize, percent: u8, color: &config::PadColor) {
        self.services
            .animations
            .start_progress(row, percent, color.velocity());
    }

    /// Cancel all decorative animations and repaint the mapping state.
    pub async fn stop_animations(&self) {
        self.services.animations.stop_all().await;
        self.repaint();
    }

    // ---- diagnostics ----

    /// Number of pads currently held.
    pub fn held_count(&self) -> usize {
        self.presses.held_count()
    }

    /// Number of active software repeat loops.
    pub fn active_repeat_count(&self) -> usize {
        self.services.repeater.active_count()
    }

    /// Total background tasks tied to the session (repeats, animations,
    /// macros, long-press timers). Zero after a clean `disconnect`.
    pub fn background_task_count(&self) -> usize {
        self.services.repeater.active_count()
            + self.services.animations.active_count()
            + self.services.macros.active_count()
            + self.long_timers.load(Ordering::SeqCst)
    }
}
