use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct PipeState {
    bytes: VecDeque<u8>,
    closed: bool,
}

struct PipeBuffer {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl PipeBuffer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PipeState { bytes: VecDeque::new(), closed: false }),
            readable: Condvar::new(),
        })
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.readable.notify_all();
    }
}

/// Reading half of one pipe direction.
pub struct PipeReader {
    buffer: Arc<PipeBuffer>,
}

/// Writing half of one pipe direction. Dropping it closes the direction.
pub struct PipeWriter {
    buffer: Arc<PipeBuffer>,
}

impl PipeReader {
    /// Reads at least one byte. `Ok(0)` means the writer is gone and all data was consumed;
    /// `ErrorKind::TimedOut` means nothing arrived within `timeout`.
    pub fn read(&mut self, target: &mut [u8], timeout: Option<Duration>) -> Result<usize, Error> {
        if target.is_empty() {
            return Ok(0);
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.buffer.state.lock();

        while state.bytes.is_empty() {
            if state.closed {
                return Ok(0);
            }

            match deadline {
                None => self.buffer.readable.wait(&mut state),
                Some(deadline) => {
                    if self.buffer.readable.wait_until(&mut state, deadline).timed_out() && state.bytes.is_empty() {
                        if state.closed {
                            return Ok(0);
                        }

                        return Err(Error::new(ErrorKind::TimedOut, "pipe read timed out"));
                    }
                },
            }
        }

        let count = target.len().min(state.bytes.len());
        for (slot, byte) in target.iter_mut().zip(state.bytes.drain(..count)) {
            *slot = byte;
        }

        Ok(count)
    }

    pub fn available(&self) -> usize {
        self.buffer.state.lock().bytes.len()
    }

    /// Handle able to close this direction from another thread, waking a blocked reader.
    pub fn closer(&self) -> PipeCloser {
        PipeCloser { buffer: self.buffer.clone() }
    }
}

#[derive(Clone)]
pub struct PipeCloser {
    buffer: Arc<PipeBuffer>,
}

impl PipeCloser {
    pub fn close(&self) {
        self.buffer.close();
    }
}

impl PipeWriter {
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut state = self.buffer.state.lock();
        if state.closed {
            return Err(Error::new(ErrorKind::BrokenPipe, "pipe closed"));
        }

        state.bytes.extend(data.iter().copied());
        self.buffer.readable.notify_all();
        Ok(())
    }

    pub fn close(&mut self) {
        self.buffer.close();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.buffer.close();
    }
}

/// One end of an in-memory duplex byte stream.
pub struct PipeStream {
    pub reader: PipeReader,
    pub writer: PipeWriter,
}

impl PipeStream {
    pub fn split(self) -> (PipeReader, PipeWriter) {
        (self.reader, self.writer)
    }
}

/// Creates two connected ends: bytes written to one end are read from the other.
pub fn pipe_pair() -> (PipeStream, PipeStream) {
    let forward = PipeBuffer::new();
    let backward = PipeBuffer::new();

    (
        PipeStream {
            reader: PipeReader { buffer: backward.clone() },
            writer: PipeWriter { buffer: forward.clone() },
        },
        PipeStream {
            reader: PipeReader { buffer: forward },
            writer: PipeWriter { buffer: backward },
        },
    )
}
