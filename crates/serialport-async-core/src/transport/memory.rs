//! In-memory transport
//!
//! Simulates a serial line without hardware. The [`MemoryLine`] is the
//! "device side": it feeds bytes and failures to the port and records what
//! the port wrote. Used for demo mode and throughout the test suite.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{RawTransport, TransportCloser, TransportParts};
use crate::config::LineConfig;
use crate::error::{PortError, Result};

enum Inbound {
    Data(Vec<u8>),
    /// One read that returns `Ok(0)`
    Empty,
    Error(io::ErrorKind, String),
}

#[derive(Default)]
struct LineInner {
    inbound: VecDeque<Inbound>,
    written: Vec<u8>,
    write_calls: Vec<Vec<u8>>,
    flushes: usize,
    failing_writes: usize,
    open_error: Option<(io::ErrorKind, String)>,
    last_line: Option<LineConfig>,
    opened: usize,
    closed: bool,
    close_calls: usize,
}

#[derive(Default)]
struct LineState {
    inner: Mutex<LineInner>,
    changed: Condvar,
}

impl LineState {
    fn lock(&self) -> MutexGuard<'_, LineInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Device side of an in-memory serial line
#[derive(Clone, Default)]
pub struct MemoryLine {
    state: Arc<LineState>,
}

impl std::fmt::Debug for MemoryLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.state.lock();
        f.debug_struct("MemoryLine")
            .field("pending_inbound", &inner.inbound.len())
            .field("written", &inner.written.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl MemoryLine {
    /// Fresh line: nothing queued, not yet opened
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that opens this line
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { line: self.clone() }
    }

    fn update<R>(&self, f: impl FnOnce(&mut LineInner) -> R) -> R {
        let result = f(&mut self.state.lock());
        self.state.changed.notify_all();
        result
    }

    /// Queue bytes for the port to read. Each call is delivered by one or
    /// more reads, never merged with the next call.
    pub fn inject(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.update(|inner| inner.inbound.push_back(Inbound::Data(data.to_vec())));
    }

    /// Make the next pending read return zero bytes without an error
    pub fn inject_empty_read(&self) {
        self.update(|inner| inner.inbound.push_back(Inbound::Empty));
    }

    /// Make the next pending read fail with the given error
    pub fn inject_read_error(&self, kind: io::ErrorKind, message: &str) {
        self.update(|inner| {
            inner
                .inbound
                .push_back(Inbound::Error(kind, message.to_string()))
        });
    }

    /// Make the next `count` write calls fail
    pub fn fail_next_writes(&self, count: usize) {
        self.update(|inner| inner.failing_writes += count);
    }

    /// Make the next open attempt fail
    pub fn fail_open(&self, kind: io::ErrorKind, message: &str) {
        self.update(|inner| inner.open_error = Some((kind, message.to_string())));
    }

    /// Everything the port has written, concatenated
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Individual non-empty write calls, in order
    pub fn write_calls(&self) -> Vec<Vec<u8>> {
        self.state.lock().write_calls.clone()
    }

    /// Successful flushes so far
    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    /// Inbound chunks and errors not yet consumed by a read
    pub fn pending_inbound(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Line settings passed to the most recent open
    pub fn last_line_config(&self) -> Option<LineConfig> {
        self.state.lock().last_line
    }

    /// Successful opens so far
    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    /// True once the port has closed the line
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of times the port asked for the line to be closed
    pub fn close_count(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Block until at least `len` bytes have been written or `timeout` elapses
    pub fn wait_for_written(&self, len: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |inner| inner.written.len() >= len)
    }

    /// Block until every injected chunk and error has been read
    pub fn wait_for_drained(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |inner| inner.inbound.is_empty())
    }

    fn wait_until(&self, timeout: Duration, mut done: impl FnMut(&LineInner) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.state.lock();
        while !done(&inner) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = self
                .state
                .changed
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }
}

/// [`RawTransport`] that opens a [`MemoryLine`]; the path is ignored
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    line: MemoryLine,
}

impl MemoryTransport {
    /// Create a transport and the device side of its line
    pub fn new() -> (Self, MemoryLine) {
        let line = MemoryLine::new();
        (line.transport(), line)
    }

    /// Device side of the line this transport opens
    pub fn line(&self) -> &MemoryLine {
        &self.line
    }
}

impl RawTransport for MemoryTransport {
    fn open(&self, path: &str, line: &LineConfig) -> Result<TransportParts> {
        let failure = self.line.update(|inner| {
            if let Some((kind, message)) = inner.open_error.take() {
                return Some(PortError::from_open_io(path, &io::Error::new(kind, message)));
            }
            inner.opened += 1;
            inner.closed = false;
            inner.last_line = Some(*line);
            None
        });
        if let Some(err) = failure {
            return Err(err);
        }

        let state = Arc::clone(&self.line.state);
        Ok(TransportParts {
            reader: Box::new(MemoryHalf {
                state: Arc::clone(&state),
            }),
            writer: Box::new(MemoryHalf {
                state: Arc::clone(&state),
            }),
            closer: Arc::new(MemoryHalf { state }),
        })
    }
}

struct MemoryHalf {
    state: Arc<LineState>,
}

impl Read for MemoryHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.state.lock();
        loop {
            if inner.closed {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "memory line closed",
                ));
            }
            match inner.inbound.front_mut() {
                Some(Inbound::Data(chunk)) => {
                    let n = buf.len().min(chunk.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    chunk.drain(..n);
                    if chunk.is_empty() {
                        inner.inbound.pop_front();
                    }
                    drop(inner);
                    self.state.changed.notify_all();
                    return Ok(n);
                }
                Some(Inbound::Empty) => {
                    inner.inbound.pop_front();
                    drop(inner);
                    self.state.changed.notify_all();
                    return Ok(0);
                }
                Some(Inbound::Error(..)) => {
                    let err = match inner.inbound.pop_front() {
                        Some(Inbound::Error(kind, message)) => io::Error::new(kind, message),
                        _ => io::Error::other("memory line inbound queue changed"),
                    };
                    drop(inner);
                    self.state.changed.notify_all();
                    return Err(err);
                }
                None => {
                    inner = self
                        .state
                        .changed
                        .wait(inner)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
        }
    }
}

impl Write for MemoryHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.state.lock();
        if inner.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory line closed",
            ));
        }
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            ));
        }
        inner.written.extend_from_slice(buf);
        if !buf.is_empty() {
            inner.write_calls.push(buf.to_vec());
        }
        drop(inner);
        self.state.changed.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.state.lock();
        if inner.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory line closed",
            ));
        }
        inner.flushes += 1;
        drop(inner);
        self.state.changed.notify_all();
        Ok(())
    }
}

impl TransportCloser for MemoryHalf {
    fn close(&self) -> io::Result<()> {
        let mut inner = self.state.lock();
        inner.closed = true;
        inner.close_calls += 1;
        drop(inner);
        // Wakes a reader blocked on an empty line
        self.state.changed.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.state.lock().closed
    }
}
