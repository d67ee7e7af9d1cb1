//! Macro dispatch: ordered combo sequences run off the event path.
//!
//! A macro runs as its own task so a long sequence never blocks the
//! hardware callback. Steps execute strictly in order; a failed injection
//! is logged and the sequence continues. All running macros share a
//! session-scoped cancellation root so disconnect tears them down.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use config::MacroStep;
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{Duration, sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::{deps::KeyInjector, ticker::STOP_WAIT_TIMEOUT_MS};

/// Spawns and tracks macro sequence tasks.
#[derive(Clone)]
pub struct MacroRunner {
    rt: Handle,
    injector: Arc<dyn KeyInjector>,
    root: Arc<Mutex<CancellationToken>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    active: Arc<AtomicUsize>,
}

impl MacroRunner {
    /// A runner spawning on the given handle and injecting through `injector`.
    pub fn new(rt: Handle, injector: Arc<dyn KeyInjector>) -> Self {
        Self {
            rt,
            injector,
            root: Arc::new(Mutex::new(CancellationToken::new())),
            tasks: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of macro sequences currently running.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run the steps as a background task.
    pub fn run(&self, note: u8, steps: Vec<MacroStep>) {
        let token = self.root.lock().child_token();
        let injector = self.injector.clone();
        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);
        let handle = self.rt.spawn(async move {
            trace!(note, steps = steps.len(), "macro_start");
            for (i, step) in steps.iter().enumerate() {
                if token.is_cancelled() {
                    break;
                }
                if !step.combo.is_empty() {
                    // Injection failures never abort the sequence.
                    if let Err(e) = injector.inject(&step.combo) {
                        warn!(note, step = i, combo = %step.combo, error = %e,
                            "macro step injection failed");
                    }
                }
                if step.delay_after_ms > 0 {
                    tokio::select! {
                        _ = sleep(Duration::from_millis(step.delay_after_ms)) => {}
                        _ = token.cancelled() => break,
                    }
                }
            }
            trace!(note, "macro_done");
            active.fetch_sub(1, Ordering::SeqCst);
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Cancel every running macro and wait (bounded) for each task to
    /// finish. Macros started afterwards are unaffected.
    pub async fn clear_async(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut root = self.root.lock();
            root.cancel();
            *root = CancellationToken::new();
            self.tasks.lock().drain(..).collect()
        };
        for handle in handles {
            let _ = timeout(Duration::from_millis(STOP_WAIT_TIMEOUT_MS), handle).await;
        }
        trace!("macro_clear_async");
    }
}

#[cfg(test)]
mod tests {
    use tokio::time;

    use crate::deps::MockInjector;

    use super::*;

    fn steps(combos: &[(&str, u64)]) -> Vec<MacroStep> {
        combos
            .iter()
            .map(|(c, d)| MacroStep {
                combo: c.to_string(),
                delay_after_ms: *d,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn steps_run_in_order_with_delays() {
        let injector = MockInjector::new();
        let runner = MacroRunner::new(Handle::current(), Arc::new(injector.clone()));
        runner.run(81, steps(&[("a", 100), ("b", 0), ("c", 0)]));

        tokio::task::yield_now().await;
        assert_eq!(injector.injected(), vec!["a"]);

        time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(injector.injected(), vec!["a", "b", "c"]);
        assert_eq!(runner.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_does_not_stop_sequence() {
        let injector = MockInjector::new();
        injector.set_fail(true);
        let runner = MacroRunner::new(Handle::current(), Arc::new(injector.clone()));
        runner.run(81, steps(&[("a", 0), ("b", 0)]));
        tokio::task::yield_now().await;
        assert_eq!(injector.injected(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stops_mid_sequence() {
        let injector = MockInjector::new();
        let runner = MacroRunner::new(Handle::current(), Arc::new(injector.clone()));
        runner.run(81, steps(&[("a", 500), ("b", 0)]));
        tokio::task::yield_now().await;
        runner.clear_async().await;
        time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert_eq!(injector.injected(), vec!["a"]);
        assert_eq!(runner.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_joins_running_tasks() {
        let injector = MockInjector::new();
        let runner = MacroRunner::new(Handle::current(), Arc::new(injector.clone()));
        runner.run(81, steps(&[("a", 500), ("b", 0)]));
        tokio::task::yield_now().await;
        runner.clear_async().await;
        // The task has been joined: no step can run after the clear
        // returns, however long we wait.
        assert_eq!(runner.active_count(), 0);
        time::advance(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;
        assert_eq!(injector.injected(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_combo_is_a_pure_delay() {
        let injector = MockInjector::new();
        let runner = MacroRunner::new(Handle::current(), Arc::new(injector.clone()));
        runner.run(81, steps(&[("", 100), ("b", 0)]));
        tokio::task::yield_now().await;
        time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(injector.injected(), vec!["b"]);
    }
}
