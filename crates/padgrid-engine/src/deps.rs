//! Trait seams for the engine's external collaborators.
//!
//! The engine never talks to hardware or the OS directly; it goes through
//! [`Transport`] (port enumeration, open, raw byte send) and [`KeyInjector`]
//! (textual key-combo injection). The mock implementations here back the
//! test suite and the CLI's loopback mode.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Callback invoked by the transport for every incoming raw message.
pub type EventCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// An open input port. Dropping it closes the port.
pub trait InputPort: Send {}

/// An open output port. Dropping it closes the port.
pub trait OutputPort: Send {
    /// Send a raw message to the device.
    fn send(&mut self, message: &[u8]) -> Result<()>;
}

/// Minimal hardware transport used by the session controller.
///
/// Open calls may block; the session controller runs them on a blocking
/// task under a hard timeout.
pub trait Transport: Send + Sync {
    /// Names of the available input ports.
    fn input_ports(&self) -> Vec<String>;
    /// Names of the available output ports.
    fn output_ports(&self) -> Vec<String>;
    /// Open the named input port; `callback` is invoked per incoming message.
    fn open_input(&self, port: &str, callback: EventCallback) -> Result<Box<dyn InputPort>>;
    /// Open the named output port.
    fn open_output(&self, port: &str) -> Result<Box<dyn OutputPort>>;
}

/// Sends a textual key combo to the OS foreground target.
///
/// Fire-and-forget: failures are logged by callers and never end a session.
pub trait KeyInjector: Send + Sync {
    /// Inject the combo, e.g. `"ctrl+shift+t"`.
    fn inject(&self, combo: &str) -> Result<()>;
}

// ---- Mock implementations (tests and loopback tooling) ----

/// Shared recorder behind [`MockTransport`], kept alive by port handles.
#[derive(Default)]
struct MockTransportState {
    callback: Mutex<Option<EventCallback>>,
    sent: Mutex<Vec<Vec<u8>>>,
    inputs_opened: AtomicUsize,
    outputs_opened: AtomicUsize,
    opens_in_flight: AtomicUsize,
    max_opens_in_flight: AtomicUsize,
    fail_input: AtomicBool,
    fail_output: AtomicBool,
}

/// In-memory transport double: records opens and sends, and lets tests
/// feed incoming messages through the registered callback.
#[derive(Clone)]
pub struct MockTransport {
    input_names: Vec<String>,
    output_names: Vec<String>,
    open_delay: Duration,
    state: Arc<MockTransportState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport with one input and one output port named "Pad Grid".
    pub fn new() -> Self {
        Self {
            input_names: vec!["Pad Grid".to_string()],
            output_names: vec!["Pad Grid".to_string()],
            open_delay: Duration::ZERO,
            state: Arc::new(MockTransportState::default()),
        }
    }

    /// A transport advertising the given port names.
    pub fn with_ports(inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            input_names: inputs.iter().map(|s| s.to_string()).collect(),
            output_names: outputs.iter().map(|s| s.to_string()).collect(),
            open_delay: Duration::ZERO,
            state: Arc::new(MockTransportState::default()),
        }
    }

    /// Make every open call block for `delay` (to widen race windows).
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Make input opens fail with a transport error.
    pub fn set_fail_input(&self, fail: bool) {
        self.state.fail_input.store(fail, Ordering::SeqCst);
    }

    /// Make output opens fail with a transport error.
    pub fn set_fail_output(&self, fail: bool) {
        self.state.fail_output.store(fail, Ordering::SeqCst);
    }

    /// Feed an incoming raw message through the registered input callback.
    pub fn emit(&self, message: &[u8]) {
        if let Some(cb) = self.state.callback.lock().as_mut() {
            cb(message);
        }
    }

    /// Messages sent to the output side so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.sent.lock().clone()
    }

    /// Clear the recorded output messages.
    pub fn clear_sent(&self) {
        self.state.sent.lock().clear();
    }

    /// Total number of successful input opens.
    pub fn inputs_opened(&self) -> usize {
        self.state.inputs_opened.load(Ordering::SeqCst)
    }

    /// Total number of successful output opens.
    pub fn outputs_opened(&self) -> usize {
        self.state.outputs_opened.load(Ordering::SeqCst)
    }

    /// Highest number of open calls observed in flight at once.
    pub fn max_opens_in_flight(&self) -> usize {
        self.state.max_opens_in_flight.load(Ordering::SeqCst)
    }

    fn enter_open(&self) {
        let now = self.state.opens_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_opens_in_flight
            .fetch_max(now, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            thread::sleep(self.open_delay);
        }
    }

    fn leave_open(&self) {
        self.state.opens_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockInput;

impl InputPort for MockInput {}

struct MockOutput {
    state: Arc<MockTransportState>,
}

impl OutputPort for MockOutput {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.state.sent.lock().push(message.to_vec());
        Ok(())
    }
}

impl Transport for MockTransport {
    fn input_ports(&self) -> Vec<String> {
        self.input_names.clone()
    }

    fn output_ports(&self) -> Vec<String> {
        self.output_names.clone()
    }

    fn open_input(&self, port: &str, callback: EventCallback) -> Result<Box<dyn InputPort>> {
        self.enter_open();
        let result = if self.state.fail_input.load(Ordering::SeqCst) {
            Err(Error::Transport(format!("input {port} busy")))
        } else if !self.input_names.iter().any(|n| n == port) {
            Err(Error::PortNotFound {
                direction: "input",
                wanted: port.to_string(),
            })
        } else {
            *self.state.callback.lock() = Some(callback);
            self.state.inputs_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockInput) as Box<dyn InputPort>)
        };
        self.leave_open();
        result
    }

    fn open_output(&self, port: &str) -> Result<Box<dyn OutputPort>> {
        self.enter_open();
        let result = if self.state.fail_output.load(Ordering::SeqCst) {
            Err(Error::Transport(format!("output {port} busy")))
        } else if !self.output_names.iter().any(|n| n == port) {
            Err(Error::PortNotFound {
                direction: "output",
                wanted: port.to_string(),
            })
        } else {
            self.state.outputs_opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockOutput {
                state: self.state.clone(),
            }) as Box<dyn OutputPort>)
        };
        self.leave_open();
        result
    }
}

/// Injector double that records every combo it is asked to send.
#[derive(Clone, Default)]
pub struct MockInjector {
    injected: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
}

impl MockInjector {
    /// A fresh recording injector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Combos injected so far, in order.
    pub fn injected(&self) -> Vec<String> {
        self.injected.lock().clone()
    }

    /// Make every injection fail (still recorded).
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl KeyInjector for MockInjector {
    fn inject(&self, combo: &str) -> Result<()> {
        self.injected.lock().push(combo.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Msg(format!("injection refused: {combo}")));
        }
        Ok(())
    }
}
