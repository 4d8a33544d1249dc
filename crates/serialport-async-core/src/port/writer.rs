//! Background writer
//!
//! A single worker thread drains a FIFO backlog of write requests. Because
//! only this thread touches the transport's write half, concurrent
//! [`AsyncPort::write`](crate::AsyncPort::write) callers need no locking of
//! their own and their requests are never reordered or coalesced.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;

use super::Shared;
use crate::error::{PortError, Result};
use crate::observer::Direction;

/// One queued write: an owned copy of the caller's bytes plus the flush flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteRequest {
    pub(crate) data: Vec<u8>,
    pub(crate) flush: bool,
}

/// Work handed to the writer thread to run after its backlog drains
pub(crate) type DrainedHook = Box<dyn FnOnce() + Send>;

pub(crate) struct WriterQueue {
    /// None once shutdown has begun
    tx: Mutex<Option<mpsc::UnboundedSender<WriteRequest>>>,
    pending: Arc<AtomicUsize>,
    on_drained: Arc<Mutex<Option<DrainedHook>>>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WriterQueue {
    pub(crate) fn spawn(writer: Box<dyn Write + Send>, shared: Arc<Shared>) -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let on_drained: Arc<Mutex<Option<DrainedHook>>> = Arc::new(Mutex::new(None));

        let handle = {
            let pending = Arc::clone(&pending);
            let on_drained = Arc::clone(&on_drained);
            thread::Builder::new()
                .name("serial-writer".to_string())
                .spawn(move || {
                    run(writer, rx, &shared, &pending);
                    let hook = on_drained.lock().unwrap_or_else(|e| e.into_inner()).take();
                    if let Some(hook) = hook {
                        hook();
                    }
                    tracing::debug!("writer thread exiting");
                })?
        };

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            pending,
            on_drained,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<WriteRequest>>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a request and return without waiting for it to be applied
    pub(crate) fn submit(&self, request: WriteRequest) -> Result<()> {
        // Holding the lock across send orders every accepted request before close()
        let guard = self.sender();
        let tx = guard.as_ref().ok_or(PortError::PortClosed)?;
        self.pending.fetch_add(1, Ordering::AcqRel);
        if tx.send(request).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(PortError::PortClosed);
        }
        Ok(())
    }

    /// Requests accepted but not yet applied
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Refuse new requests. Already-accepted ones are still drained.
    pub(crate) fn close(&self) {
        self.sender().take();
    }

    /// True when running on the writer thread (i.e. inside an observer callback)
    pub(crate) fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `hook` on the writer thread once the backlog is drained.
    /// Only meaningful after [`close`](Self::close).
    pub(crate) fn finish_when_drained(&self, hook: DrainedHook) {
        *self.on_drained.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// Wait for the backlog to drain and the thread to exit.
    /// A no-op when called from the writer thread itself.
    pub(crate) fn join(&self) {
        if self.is_current_thread() {
            return;
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("writer thread panicked");
            }
        }
    }
}

fn apply(writer: &mut dyn Write, request: &WriteRequest) -> io::Result<()> {
    writer.write_all(&request.data)?;
    if request.flush {
        writer.flush()?;
    }
    Ok(())
}

fn run(
    mut writer: Box<dyn Write + Send>,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    shared: &Shared,
    pending: &AtomicUsize,
) {
    tracing::debug!("writer thread started");

    while let Some(request) = rx.blocking_recv() {
        match apply(writer.as_mut(), &request) {
            Ok(()) => {
                tracing::trace!(len = request.data.len(), flush = request.flush, "write applied");
                if let Some(observer) = shared.observer() {
                    observer.on_write(&request.data);
                }
            }
            Err(e) => {
                // Dropped, not retried
                tracing::warn!("serial write of {} bytes failed: {}", request.data.len(), e);
                if let Some(observer) = shared.observer() {
                    observer.on_exception(Direction::Write, &e);
                }
            }
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyWriter {
        out: Vec<u8>,
        flushes: usize,
        fail_flush: bool,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.out.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.fail_flush {
                return Err(io::Error::other("flush failed"));
            }
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_apply_flushes_only_when_asked() {
        let mut writer = FlakyWriter {
            out: Vec::new(),
            flushes: 0,
            fail_flush: false,
        };
        let plain = WriteRequest {
            data: b"ab".to_vec(),
            flush: false,
        };
        let flushed = WriteRequest {
            data: b"cd".to_vec(),
            flush: true,
        };
        apply(&mut writer, &plain).unwrap();
        assert_eq!(writer.flushes, 0);
        apply(&mut writer, &flushed).unwrap();
        assert_eq!(writer.flushes, 1);
        assert_eq!(writer.out, b"abcd".to_vec());
    }

    #[test]
    fn test_apply_reports_flush_failure() {
        let mut writer = FlakyWriter {
            out: Vec::new(),
            flushes: 0,
            fail_flush: true,
        };
        let request = WriteRequest {
            data: b"x".to_vec(),
            flush: true,
        };
        assert!(apply(&mut writer, &request).is_err());
    }
}
