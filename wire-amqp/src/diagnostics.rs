use std::sync::atomic::{AtomicBool, Ordering};

use log::Level;

/// Decides which diagnostics a connection and its sessions emit.
///
/// Trace level 0 keeps warnings and errors, 1 adds lifecycle events, 2 adds every frame and
/// anything above 2 adds state machine transitions. A silent connection emits nothing.
#[derive(Debug)]
pub(crate) struct Diagnostics {
    silent: AtomicBool,
    trace: u8,
}

impl Diagnostics {
    pub fn new(trace: u8, silent: bool) -> Self {
        Self { silent: AtomicBool::new(silent), trace }
    }

    pub fn enabled(&self, level: Level) -> bool {
        if self.is_silent() {
            return false;
        }

        match level {
            Level::Error | Level::Warn => true,
            Level::Info => self.trace >= 1,
            Level::Debug => self.trace >= 2,
            Level::Trace => self.trace > 2,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.silent.load(Ordering::Relaxed)
    }

    pub fn set_silent(&self, value: bool) {
        self.silent.store(value, Ordering::Relaxed);
    }

    pub fn trace(&self) -> u8 {
        self.trace
    }
}
