use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct SignalBackend {
    fired: Mutex<bool>,
    waiters: Condvar,
}

/// One-shot latch. Once fired it stays fired.
#[derive(Clone)]
pub struct Signal {
    ptr: Arc<SignalBackend>,
}

impl Signal {
    pub fn new() -> Self {
        Self { ptr: Arc::new(SignalBackend { fired: Mutex::new(false), waiters: Condvar::new() }) }
    }

    pub fn signal(&self) {
        *self.ptr.fired.lock() = true;
        self.ptr.waiters.notify_all();
    }

    /// Returns `true` if the signal fired before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut fired = self.ptr.fired.lock();
        if !*fired {
            self.ptr.waiters.wait_while_for(&mut fired, |fired| !*fired, timeout);
        }

        *fired
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
