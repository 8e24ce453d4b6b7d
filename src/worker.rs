//! Cooperative-cancellation background workers.
//!
//! Every background loop in the crate (sensor capture, cache sweep, scan loop,
//! overlay rendering) runs on a `Worker`: an OS thread that checks a shared
//! running flag once per iteration. Stopping clears the flag and waits a bounded
//! time for the thread to finish. An iteration that is already inside a sensor
//! read or a model call is never interrupted.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Flag {
    running: Mutex<bool>,
    wake: Condvar,
}

/// Shared handle to a worker's running flag.
#[derive(Clone, Debug)]
pub struct StopToken {
    flag: Arc<Flag>,
}

impl StopToken {
    fn new() -> Self {
        Self {
            flag: Arc::new(Flag {
                running: Mutex::new(true),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        match self.flag.running.lock() {
            Ok(running) => *running,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Clear the running flag and wake any sleeper.
    pub fn cancel(&self) {
        match self.flag.running.lock() {
            Ok(mut running) => *running = false,
            Err(poisoned) => *poisoned.into_inner() = false,
        }
        self.flag.wake.notify_all();
    }

    /// Sleep for `duration` unless cancelled first. Returns whether the worker
    /// is still running afterwards.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut running = match self.flag.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Past the end of the clock: wait for cancellation only.
        let Some(deadline) = Instant::now().checked_add(duration) else {
            while *running {
                running = match self.flag.wake.wait(running) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
            return false;
        };
        while *running {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            running = match self.flag.wake.wait_timeout(running, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *running
    }
}

/// A named background thread with a cancellation token.
pub struct Worker {
    name: String,
    token: StopToken,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a new thread. The body receives the token and must
    /// return once `is_running()` turns false.
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let token = StopToken::new();
        let thread_token = token.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_token))?;
        Ok(Self {
            name: name.to_string(),
            token,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the flag is set and the thread has not exited on its own.
    pub fn is_running(&self) -> bool {
        self.token.is_running()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel and wait up to `timeout` for the thread to exit.
    ///
    /// Returns `true` when the thread was joined. On timeout the thread is
    /// detached; it exits by itself after its current iteration.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.token.cancel();
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now().checked_add(timeout);
        while !handle.is_finished() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                log::warn!(
                    "{}: worker did not stop within {:?}; detaching",
                    self.name,
                    timeout
                );
                return false;
            }
            std::thread::sleep(JOIN_POLL);
        }
        if handle.join().is_err() {
            log::error!("{}: worker thread panicked", self.name);
        }
        true
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
