//! # Async Serial Port Core
//!
//! Buffered, event-driven access to a blocking serial line.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A bounded receive buffer that drops the oldest bytes on overflow
//! - A background reader thread feeding that buffer from the line
//! - A serialized background writer applying writes in submission order
//! - Observer callbacks for read, write and I/O failure events
//! - Hardware (`serialport`) and in-memory transports
//!
//! ## Example
//!
//! ```rust,ignore
//! use serialport_async_core::prelude::*;
//!
//! let config = PortConfig::builder("/dev/ttyACM0").baud_rate(115200).build()?;
//! let port = AsyncPort::open(config)?;
//! port.set_observer(
//!     CallbackObserver::new()
//!         .on_exception(|dir, err| eprintln!("{} error: {}", dir, err))
//!         .into_shared(),
//! );
//!
//! port.write(b"S", true)?;
//! let mut buf = [0u8; 64];
//! let n = port.read(&mut buf)?;
//! port.shutdown();
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod io_adapters;
pub mod observer;
pub mod port;
pub mod transport;

pub use buffer::{capacity_from_signed, BoundedByteQueue};
pub use config::{DataBits, LineConfig, Parity, PortConfig, PortConfigBuilder, StopBits};
pub use error::{PortError, Result};
pub use observer::{CallbackObserver, Direction, PortObserver};
pub use port::{AsyncPort, PortState};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DataBits, LineConfig, Parity, PortConfig, StopBits};
    pub use crate::error::PortError;
    pub use crate::observer::{CallbackObserver, Direction, PortObserver};
    pub use crate::port::{AsyncPort, PortState};
    pub use crate::transport::{MemoryTransport, RawTransport, SerialTransport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default baud rate for new configurations
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Read timeout of the hardware transport in milliseconds.
/// Bounds how long shutdown waits on a silent line.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Bytes requested per blocking read on the line
pub const READ_CHUNK_SIZE: usize = 64;
