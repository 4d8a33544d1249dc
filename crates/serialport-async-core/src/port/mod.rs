//! Asynchronous port
//!
//! [`AsyncPort`] composes the receive buffer, the background reader and the
//! background writer into a non-blocking façade over a blocking transport.
//!
//! ## Lifecycle
//!
//! `Open` -> `ShuttingDown` -> `Closed`. Shutdown is terminal and idempotent:
//! new writes are refused the moment it begins, writes accepted before that
//! are drained to the line, and the transport is then closed exactly once.

mod reader;
mod writer;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;

use crate::buffer::BoundedByteQueue;
use crate::config::PortConfig;
use crate::error::{PortError, Result};
use crate::io_adapters::{PortReader, PortWriter};
use crate::observer::PortObserver;
use crate::transport::{RawTransport, SerialTransport, TransportCloser};
use reader::ReaderLoop;
use writer::{WriteRequest, WriterQueue};

/// Port lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortState {
    /// Reading and accepting writes
    Open,
    /// Shutdown in progress; reads and writes are refused
    ShuttingDown,
    /// Terminal
    Closed,
}

impl PortState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PortState::Open,
            1 => PortState::ShuttingDown,
            _ => PortState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PortState::Open => 0,
            PortState::ShuttingDown => 1,
            PortState::Closed => 2,
        }
    }
}

/// State shared with the background threads
pub(crate) struct Shared {
    pub(crate) buffer: BoundedByteQueue,
    observer: RwLock<Option<Arc<dyn PortObserver>>>,
    /// Woken when bytes are buffered or the port stops
    pub(crate) readable: Notify,
    state: AtomicU8,
}

impl Shared {
    /// Snapshot of the current observer for one dispatch
    pub(crate) fn observer(&self) -> Option<Arc<dyn PortObserver>> {
        self.observer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_observer(&self, observer: Option<Arc<dyn PortObserver>>) {
        *self.observer.write().unwrap_or_else(|e| e.into_inner()) = observer;
    }

    fn state(&self) -> PortState {
        PortState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Last shutdown steps, run once the write backlog has drained: close the
/// transport exactly once (unblocking the reader), wait for the reader, mark
/// the port closed.
fn finish_shutdown(
    shared: &Shared,
    closer: &dyn TransportCloser,
    reader: &ReaderLoop,
    path: &str,
) {
    if let Err(e) = closer.close() {
        tracing::debug!("error closing {}: {}", path, e);
    }
    reader.join();

    shared
        .state
        .store(PortState::Closed.as_u8(), Ordering::Release);
    shared.readable.notify_waiters();
    tracing::info!("closed {}", path);
}

/// Buffered, non-blocking serial port
///
/// ```rust,ignore
/// use serialport_async_core::prelude::*;
///
/// let config = PortConfig::builder("/dev/ttyUSB0")
///     .baud_rate(115200)
///     .buffer_capacity(4096)
///     .build()?;
/// let port = AsyncPort::open(config)?;
///
/// port.write(b"Q", true)?;
/// let mut buf = [0u8; 64];
/// let n = port.read(&mut buf)?; // whatever has arrived so far, possibly 0
/// port.shutdown();
/// ```
pub struct AsyncPort {
    config: PortConfig,
    shared: Arc<Shared>,
    reader: Arc<ReaderLoop>,
    writer: WriterQueue,
    closer: Arc<dyn TransportCloser>,
}

impl AsyncPort {
    /// Open a hardware serial port
    pub fn open(config: PortConfig) -> Result<Self> {
        let transport =
            SerialTransport::new(std::time::Duration::from_millis(config.read_timeout_ms));
        Self::open_with(config, &transport)
    }

    /// Open using any [`RawTransport`]
    pub fn open_with(config: PortConfig, transport: &dyn RawTransport) -> Result<Self> {
        config.validate()?;
        let parts = transport.open(&config.path, &config.line)?;

        let shared = Arc::new(Shared {
            buffer: BoundedByteQueue::new(config.buffer_capacity),
            observer: RwLock::new(None),
            readable: Notify::new(),
            state: AtomicU8::new(PortState::Open.as_u8()),
        });

        let writer = match WriterQueue::spawn(parts.writer, Arc::clone(&shared)) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = parts.closer.close();
                return Err(PortError::Open(format!("failed to start writer thread: {}", e)));
            }
        };
        let reader = match ReaderLoop::spawn(parts.reader, Arc::clone(&shared)) {
            Ok(reader) => reader,
            Err(e) => {
                writer.close();
                writer.join();
                let _ = parts.closer.close();
                return Err(PortError::Open(format!("failed to start reader thread: {}", e)));
            }
        };

        tracing::info!(
            "opened {} ({}, buffer capacity {:?})",
            config.path,
            config.line,
            config.buffer_capacity
        );

        Ok(Self {
            config,
            shared,
            reader: Arc::new(reader),
            writer,
            closer: parts.closer,
        })
    }

    /// Configuration the port was opened with
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> PortState {
        self.shared.state()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == PortState::Open {
            Ok(())
        } else {
            Err(PortError::PortClosed)
        }
    }

    /// True while the transport is open and the reader is still running
    pub fn is_open(&self) -> bool {
        self.state() == PortState::Open && self.closer.is_open() && !self.reader.is_stopped()
    }

    /// Drain up to `dst.len()` buffered bytes. Never waits; returns 0 when
    /// nothing has arrived.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.shared.buffer.read(dst))
    }

    /// Queue `data` for transmission, flushing the line afterwards if `flush`
    /// is set. Returns as soon as the request is queued.
    pub fn write(&self, data: &[u8], flush: bool) -> Result<()> {
        self.ensure_open()?;
        self.writer.submit(WriteRequest {
            data: data.to_vec(),
            flush,
        })
    }

    /// Queue a flush of the line behind any pending writes
    pub fn flush(&self) -> Result<()> {
        self.write(&[], true)
    }

    /// Bytes currently buffered
    pub fn available(&self) -> usize {
        self.shared.buffer.size()
    }

    /// Write requests queued but not yet applied
    pub fn pending_writes(&self) -> usize {
        self.writer.pending()
    }

    /// Replace the observer. Affects events dispatched after this call.
    pub fn set_observer(&self, observer: Arc<dyn PortObserver>) {
        self.shared.set_observer(Some(observer));
    }

    /// Remove the observer; later events are not delivered anywhere
    pub fn clear_observer(&self) {
        self.shared.set_observer(None);
    }

    /// Wait until bytes are buffered; resolves to the buffered count.
    /// Fails with [`PortError::PortClosed`] once shutdown begins.
    pub async fn readable(&self) -> Result<usize> {
        loop {
            let mut notified = std::pin::pin!(self.shared.readable.notified());
            // Register before checking so a notify in between is not lost
            notified.as_mut().enable();

            self.ensure_open()?;
            let available = self.shared.buffer.size();
            if available > 0 {
                return Ok(available);
            }
            notified.await;
        }
    }

    /// `std::io::Read` view of the receive buffer
    pub fn reader(&self) -> PortReader<'_> {
        PortReader::new(self)
    }

    /// `std::io::Write` view of the write queue
    pub fn writer(&self) -> PortWriter<'_> {
        PortWriter::new(self)
    }

    /// Stop both background threads and release the transport.
    ///
    /// Safe to call from any thread and any number of times; only the first
    /// call does anything. When called from the writer thread (inside an
    /// observer callback) it returns at once and the writer finishes the
    /// shutdown after draining its backlog.
    pub fn shutdown(&self) {
        if self
            .shared
            .state
            .compare_exchange(
                PortState::Open.as_u8(),
                PortState::ShuttingDown.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        tracing::info!("shutting down {}", self.config.path);
        self.shared.readable.notify_waiters();

        self.reader.request_stop();

        // Drain accepted writes before the line goes away
        self.writer.close();
        if self.writer.is_current_thread() {
            let shared = Arc::clone(&self.shared);
            let closer = Arc::clone(&self.closer);
            let reader = Arc::clone(&self.reader);
            let path = self.config.path.clone();
            self.writer.finish_when_drained(Box::new(move || {
                finish_shutdown(&shared, closer.as_ref(), &reader, &path)
            }));
            return;
        }
        self.writer.join();

        finish_shutdown(&self.shared, self.closer.as_ref(), &self.reader, &self.config.path);
    }
}

impl Drop for AsyncPort {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AsyncPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPort")
            .field("path", &self.config.path)
            .field("state", &self.state())
            .field("available", &self.available())
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}
