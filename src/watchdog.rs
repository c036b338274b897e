//! Wall-clock deadline enforcement via a watchdog thread.
//!
//! A watchdog is armed immediately before a supervised execution and
//! disarmed (dropped) immediately after it, on every exit path.
//!
//! ## How it works
//!
//! 1. `Watchdog::arm` spawns a thread with the deadline
//! 2. The thread sleeps until the deadline or cancellation
//! 3. On deadline: calls `terminate_execution()` on the isolate handle
//! 4. On drop: sends the cancellation signal and joins the thread
//!
//! The `IsolateHandle` is the only thing the thread touches. It is
//! thread-safe, unlike every other V8 object.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// RAII guard that terminates V8 execution once a deadline passes.
///
/// ```ignore
/// let watchdog = Watchdog::arm(isolate.thread_safe_handle(), 1.5)?;
/// // run script
/// let timed_out = watchdog.disarm();
/// ```
pub struct Watchdog {
    cancel_tx: Option<mpsc::Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    /// Arm a watchdog for `timeout` seconds.
    ///
    /// A timeout that is not strictly positive (including NaN) disables
    /// supervision and no thread is started. Fails only if the thread
    /// cannot be spawned, in which case the execution must not start.
    pub fn arm(handle: v8::IsolateHandle, timeout: f64) -> io::Result<Self> {
        let fired = Arc::new(AtomicBool::new(false));

        let Some(deadline) = deadline(timeout) else {
            return Ok(Self::disabled(fired));
        };

        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let fired_clone = fired.clone();

        let thread_handle = thread::Builder::new()
            .name("bridge-watchdog".into())
            .spawn(move || match cancel_rx.recv_timeout(deadline) {
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Execution exceeded {:.3}s, terminating isolate",
                        deadline.as_secs_f64()
                    );
                    fired_clone.store(true, Ordering::SeqCst);
                    handle.terminate_execution();
                }
                // Cancelled, or the guard went away without sending
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {}
            })?;

        Ok(Self {
            cancel_tx: Some(cancel_tx),
            thread_handle: Some(thread_handle),
            fired,
        })
    }

    fn disabled(fired: Arc<AtomicBool>) -> Self {
        Self {
            cancel_tx: None,
            thread_handle: None,
            fired,
        }
    }

    /// True once the deadline passed and termination was requested.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// True when a thread is supervising the execution.
    pub fn is_armed(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// Cancel and join the thread. Returns whether it fired.
    pub fn disarm(mut self) -> bool {
        self.stop();
        self.fired()
    }

    fn stop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            // The thread may already have exited
            let _ = cancel_tx.send(());
        }

        if let Some(handle) = self.thread_handle.take()
            && let Err(e) = handle.join()
        {
            log::error!("Watchdog thread panicked: {:?}", e);
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn deadline(timeout: f64) -> Option<Duration> {
    if timeout.is_nan() || timeout <= 0.0 {
        return None;
    }

    Duration::try_from_secs_f64(timeout).ok()
}
