//! Connection lifecycle: open/close, retry, auto-reconnect, idle tracking.
//!
//! All port handles live behind one async connection mutex, deliberately
//! separate from the profile lock so connecting never blocks mapping
//! edits. The auto-reconnect loop uses `try_lock` and skips its cycle when
//! an explicit connect holds the lock, so the two can never race to open
//! the same port twice.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use padgrid_protocol::ConnectOutcome;
use parking_lot::Mutex as SyncMutex;
use tokio::{
    sync::{Mutex, MutexGuard, Notify, mpsc::UnboundedSender},
    task::spawn_blocking,
    time::{Duration, Instant, sleep, timeout},
};
use tracing::{debug, info, trace, warn};

use crate::{
    EngineConfig, Error, Result,
    deps::{InputPort, Transport},
    surface::Surface,
};

/// Keywords tried, in order, when auto-discovering a port by name.
const PORT_KEYWORDS: &[&str] = &["launchpad", "pad"];

struct ConnInner {
    input: Option<Box<dyn InputPort>>,
    last_input: Option<String>,
    last_output: Option<String>,
}

/// Tracks the last pad activity and whether the idle show is on screen.
#[derive(Clone)]
pub struct IdleState {
    last_activity: Arc<SyncMutex<Instant>>,
    fired: Arc<AtomicBool>,
}

impl Default for IdleState {
    fn default() -> Self {
        Self {
            last_activity: Arc::new(SyncMutex::new(Instant::now())),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl IdleState {
    /// Record activity now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Mark the idle animation as started; returns false if it already was.
    pub fn mark_fired(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }

    /// Clear the idle flag; returns true if the animation had been started.
    pub fn clear_fired(&self) -> bool {
        self.fired.swap(false, Ordering::SeqCst)
    }

    /// True while the idle animation is showing.
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Owns the transport connection and its lifecycle.
#[derive(Clone)]
pub struct SessionController {
    transport: Arc<dyn Transport>,
    surface: Surface,
    conn: Arc<Mutex<ConnInner>>,
    input_open: Arc<AtomicBool>,
    auto_reconnect: Arc<AtomicBool>,
    reconnect_interval: Arc<SyncMutex<Duration>>,
    reconnect_notify: Arc<Notify>,
    raw_tx: UnboundedSender<Vec<u8>>,
    cfg: EngineConfig,
    /// Idle bookkeeping lives with the session: activity and connection
    /// share a lifetime.
    pub idle: IdleState,
}

impl SessionController {
    /// Create a controller over the given transport. Incoming raw messages
    /// are forwarded to `raw_tx` from the transport callback.
    pub fn new(
        transport: Arc<dyn Transport>,
        surface: Surface,
        raw_tx: UnboundedSender<Vec<u8>>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            transport,
            surface,
            conn: Arc::new(Mutex::new(ConnInner {
                input: None,
                last_input: None,
                last_output: None,
            })),
            input_open: Arc::new(AtomicBool::new(false)),
            auto_reconnect: Arc::new(AtomicBool::new(false)),
            reconnect_interval: Arc::new(SyncMutex::new(cfg.reconnect_interval)),
            reconnect_notify: Arc::new(Notify::new()),
            raw_tx,
            cfg,
            idle: IdleState::default(),
        }
    }

    /// True when the input side is open (presses can arrive).
    pub fn input_connected(&self) -> bool {
        self.input_open.load(Ordering::SeqCst)
    }

    /// True when the output side is open (LEDs can be painted).
    pub fn output_connected(&self) -> bool {
        self.surface.is_connected()
    }

    /// Toggle the auto-reconnect loop and set its cycle interval. The
    /// notify wakes a waiting cycle so the change takes effect at once.
    pub fn set_auto_reconnect(&self, enabled: bool, interval: Duration) {
        *self.reconnect_interval.lock() = interval;
        self.auto_reconnect.store(enabled, Ordering::SeqCst);
        self.reconnect_notify.notify_one();
        debug!(enabled, ?interval, "auto_reconnect");
    }

    /// Current auto-reconnect cycle interval.
    pub fn reconnect_interval(&self) -> Duration {
        *self.reconnect_interval.lock()
    }

    /// Handle used by the reconnect loop to observe interval changes.
    pub fn reconnect_notify(&self) -> Arc<Notify> {
        self.reconnect_notify.clone()
    }

    fn find_port(&self, ports: &[String], wanted: Option<&str>) -> Option<String> {
        if let Some(wanted) = wanted {
            let lower = wanted.to_lowercase();
            return ports
                .iter()
                .find(|p| p.to_lowercase().contains(&lower))
                .cloned();
        }
        for kw in PORT_KEYWORDS {
            if let Some(p) = ports.iter().find(|p| p.to_lowercase().contains(kw)) {
                return Some(p.clone());
            }
        }
        ports.first().cloned()
    }

    async fn open_input_guarded(&self, port: &str) -> Result<Box<dyn InputPort>> {
        let transport = self.transport.clone();
        let tx = self.raw_tx.clone();
        let port = port.to_string();
        let open = spawn_blocking(move || {
            let callback: crate::deps::EventCallback = Box::new(move |bytes: &[u8]| {
                let _ = tx.send(bytes.to_vec());
            });
            transport.open_input(&port, callback)
        });
        match timeout(self.cfg.connect_timeout, open).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Msg(format!("input open task failed: {join}"))),
            Err(_) => Err(Error::OpenTimeout("input")),
        }
    }

    async fn open_output_guarded(&self, port: &str) -> Result<Box<dyn crate::deps::OutputPort>> {
        let transport = self.transport.clone();
        let port = port.to_string();
        let open = spawn_blocking(move || transport.open_output(&port));
        match timeout(self.cfg.connect_timeout, open).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::Msg(format!("output open task failed: {join}"))),
            Err(_) => Err(Error::OpenTimeout("output")),
        }
    }

    /// Connect, retrying up to `retries` extra attempts with `retry_delay`
    /// between them. Partial success (one side open) is still a success,
    /// with the missing side flagged in the outcome.
    pub async fn connect(
        &self,
        input: Option<&str>,
        output: Option<&str>,
        retries: u32,
        retry_delay: Duration,
    ) -> ConnectOutcome {
        let mut guard = self.conn.lock().await;
        self.connect_locked(&mut guard, input, output, retries, retry_delay)
            .await
    }

    async fn connect_locked(
        &self,
        guard: &mut MutexGuard<'_, ConnInner>,
        input: Option<&str>,
        output: Option<&str>,
        retries: u32,
        retry_delay: Duration,
    ) -> ConnectOutcome {
        let mut errors: Vec<String> = Vec::new();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = self
                .attempt_once(guard, input, output, attempt, &mut errors)
                .await;
            if outcome.success || attempt > retries {
                return outcome;
            }
            debug!(attempt, "connect attempt failed, retrying");
            sleep(retry_delay).await;
        }
    }

    async fn attempt_once(
        &self,
        guard: &mut MutexGuard<'_, ConnInner>,
        input: Option<&str>,
        output: Option<&str>,
        attempt: u32,
        errors: &mut Vec<String>,
    ) -> ConnectOutcome {
        let mut input_connected = false;
        let mut output_connected = false;

        match self.find_port(&self.transport.input_ports(), input) {
            Some(port) => match self.open_input_guarded(&port).await {
                Ok(handle) => {
                    guard.input = Some(handle);
                    guard.last_input = Some(port.clone());
                    self.input_open.store(true, Ordering::SeqCst);
                    input_connected = true;
                    info!(port = %port, "input connected");
                }
                Err(e) => errors.push(format!("input {port}: {e}")),
            },
            None => errors.push(format!(
                "no input port matching {}",
                input.unwrap_or("<auto>")
            )),
        }

        match self.find_port(&self.transport.output_ports(), output) {
            Some(port) => match self.open_output_guarded(&port).await {
                Ok(handle) => {
                    self.surface.set_output(Some(handle));
                    guard.last_output = Some(port.clone());
                    output_connected = true;
                    info!(port = %port, "output connected");
                    if let Err(e) = self.surface.init_device() {
                        warn!(error = %e, "device init failed");
                    }
                }
                Err(e) => errors.push(format!("output {port}: {e}")),
            },
            None => errors.push(format!(
                "no output port matching {}",
                output.unwrap_or("<auto>")
            )),
        }

        let success = input_connected || output_connected;
        let message = match (input_connected, output_connected) {
            (true, true) => "connected".to_string(),
            (true, false) => "connected (input only, no LED feedback)".to_string(),
            (false, true) => "connected (output only, no presses)".to_string(),
            (false, false) => format!("connect failed after {attempt} attempt(s)"),
        };
        ConnectOutcome {
            success,
            message,
            input_connected,
            output_connected,
            attempt,
            errors: errors.clone(),
        }
    }

    /// Close both sides, clearing LEDs best-effort first.
    pub async fn disconnect(&self) {
        let mut guard = self.conn.lock().await;
        if self.surface.is_connected() {
            let _ = self.surface.clear_all();
        }
        self.surface.set_output(None);
        guard.input = None;
        self.input_open.store(false, Ordering::SeqCst);
        info!("disconnected");
    }

    /// One auto-reconnect cycle. Returns `None` when the cycle is skipped:
    /// reconnect disabled, both sides already open, no last-known ids, or
    /// an explicit connect currently holding the connection lock (the
    /// `try_lock` keeps the two from racing to open the same port).
    pub async fn try_reconnect_cycle(&self) -> Option<ConnectOutcome> {
        if !self.auto_reconnect.load(Ordering::SeqCst) {
            return None;
        }
        if self.input_connected() && self.output_connected() {
            return None;
        }
        let Ok(mut guard) = self.conn.try_lock() else {
            trace!("reconnect skipped: connect in progress");
            return None;
        };
        let (last_in, last_out) = (guard.last_input.clone(), guard.last_output.clone());
        if last_in.is_none() && last_out.is_none() {
            return None;
        }
        debug!("attempting auto-reconnect");
        let outcome = self
            .connect_locked(
                &mut guard,
                last_in.as_deref(),
                last_out.as_deref(),
                1,
                Duration::from_millis(250),
            )
            .await;
        if outcome.success {
            info!(message = %outcome.message, "auto-reconnect succeeded");
        } else {
            debug!(errors = ?outcome.errors, "auto-reconnect failed");
        }
        Some(outcome)
    }
}
