use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    #[error("Receive timed out")]
    Timeout,
    #[error("Channel closed")]
    Closed,
}

pub struct ChannelRx<T> {
    backend: Arc<ChannelBackend<T>>,
}

impl<T> Clone for ChannelRx<T> {
    fn clone(&self) -> Self {
        ChannelRx { backend: self.backend.clone() }
    }
}

pub struct ChannelTx<T> {
    backend: Arc<ChannelBackend<T>>,
}

impl<T> Clone for ChannelTx<T> {
    fn clone(&self) -> Self {
        ChannelTx { backend: self.backend.clone() }
    }
}

struct ChannelState<T> {
    messages: VecDeque<T>,
    closed: bool,
}

struct ChannelBackend<T> {
    state: Mutex<ChannelState<T>>,
    ready: Condvar,
}

impl<T> ChannelRx<T> {
    /// Blocks until a value is available, the channel is closed, or `timeout` elapses.
    /// Queued values are still handed out after `close`.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<T, ReceiveError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.backend.state.lock();

        loop {
            if let Some(value) = state.messages.pop_front() {
                return Ok(value);
            }

            if state.closed {
                return Err(ReceiveError::Closed);
            }

            if self.backend.ready.wait_until(&mut state, deadline).timed_out() {
                return state.messages.pop_front().ok_or(ReceiveError::Timeout);
            }
        }
    }

    pub fn try_receive(&self) -> Option<T> {
        self.backend.state.lock().messages.pop_front()
    }

}

impl<T> ChannelTx<T> {
    /// Returns `false` when the channel has been closed and the value was dropped.
    pub fn send(&self, value: T) -> bool {
        let mut state = self.backend.state.lock();
        if state.closed {
            return false;
        }

        state.messages.push_back(value);
        self.backend.ready.notify_one();
        true
    }

    pub fn close(&self) {
        self.backend.state.lock().closed = true;
        self.backend.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.backend.state.lock().closed
    }
}

pub fn channel_create<T>() -> (ChannelRx<T>, ChannelTx<T>) {
    let backend = Arc::new(ChannelBackend {
        state: Mutex::new(ChannelState { messages: VecDeque::new(), closed: false }),
        ready: Condvar::new(),
    });

    (
        ChannelRx {
            backend: backend.clone(),
        },
        ChannelTx {
            backend,
        },
    )
}
