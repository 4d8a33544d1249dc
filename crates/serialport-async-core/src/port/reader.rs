//! Background reader
//!
//! Owns the transport's read half on a dedicated thread, pushing every chunk
//! into the shared receive buffer after notifying the observer.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use super::Shared;
use crate::observer::Direction;
use crate::READ_CHUNK_SIZE;

/// Pause after a failed read so a dead line does not spin the CPU
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Errors that only mean "nothing arrived within the timeout"
fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Handle to the reader thread: Running -> Stopping -> Stopped
pub(crate) struct ReaderLoop {
    stop: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReaderLoop {
    pub(crate) fn spawn(reader: Box<dyn Read + Send>, shared: Arc<Shared>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = Arc::clone(&stop);
            let stopped = Arc::clone(&stopped);
            thread::Builder::new()
                .name("serial-reader".to_string())
                .spawn(move || {
                    run(reader, &shared, &stop);
                    stopped.store(true, Ordering::Release);
                    tracing::debug!("reader thread exiting");
                })?
        };

        Ok(Self {
            stop,
            stopped,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Enter Stopping. The loop exits after its current read returns.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Wait for Stopped. A no-op when called from the reader thread itself.
    pub(crate) fn join(&self) {
        if thread::current().id() == self.thread_id {
            return;
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("reader thread panicked");
            }
        }
    }
}

fn run(mut reader: Box<dyn Read + Send>, shared: &Shared, stop: &AtomicBool) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    tracing::debug!("reader thread started");

    while !stop.load(Ordering::Acquire) {
        match reader.read(&mut buf) {
            Ok(0) => {
                // No data yet
                thread::yield_now();
            }
            Ok(n) => {
                let chunk = &buf[..n];
                if let Some(observer) = shared.observer() {
                    observer.on_read(chunk);
                }
                shared.buffer.write_all(chunk);
                shared.readable.notify_waiters();
            }
            Err(ref e) if is_idle(e) => {}
            Err(e) => {
                if stop.load(Ordering::Acquire) {
                    // Transport closed under us by shutdown
                    tracing::debug!("read interrupted by shutdown: {}", e);
                    break;
                }
                tracing::warn!("serial read failed: {}", e);
                if let Some(observer) = shared.observer() {
                    observer.on_exception(Direction::Read, &e);
                }
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}
