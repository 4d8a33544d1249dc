//! Raw transport
//!
//! The blocking, byte-oriented channel an [`AsyncPort`](crate::AsyncPort)
//! sits on top of. A transport is opened once and split into a read half,
//! a write half and a closer so the background reader and writer never
//! contend for the same handle.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::config::LineConfig;
use crate::error::Result;

pub mod memory;
pub mod serial;

pub use memory::{MemoryLine, MemoryTransport};
pub use serial::{list_ports, PortInfo, SerialTransport};

/// Releases the underlying device
///
/// Closing must unblock (or bound) a read in flight on the read half, either
/// by failing it or by letting its timeout elapse.
pub trait TransportCloser: Send + Sync {
    /// Release the device. Called at most once per open port.
    fn close(&self) -> std::io::Result<()>;

    /// True until [`close`](TransportCloser::close) has been called
    fn is_open(&self) -> bool;
}

/// An opened transport, split into independently owned halves
pub struct TransportParts {
    /// Blocking read half, owned by the reader thread
    pub reader: Box<dyn Read + Send>,
    /// Write half, owned by the writer thread
    pub writer: Box<dyn Write + Send>,
    /// Shared handle that releases the device
    pub closer: Arc<dyn TransportCloser>,
}

impl std::fmt::Debug for TransportParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportParts")
            .field("open", &self.closer.is_open())
            .finish_non_exhaustive()
    }
}

/// Something that can open a device path with the given line settings
pub trait RawTransport: Send + Sync {
    /// Open `path`. Fails with [`PortError::Open`](crate::PortError::Open) or
    /// [`PortError::Permission`](crate::PortError::Permission).
    fn open(&self, path: &str, line: &LineConfig) -> Result<TransportParts>;
}
