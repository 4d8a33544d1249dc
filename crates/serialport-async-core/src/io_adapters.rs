//! `std::io` adapters
//!
//! Lets an [`AsyncPort`] be handed to code written against `Read`/`Write`.
//! Neither adapter blocks: reads return what is buffered (0 when empty) and
//! writes only enqueue.

use std::io::{self, Read, Write};

use crate::error::PortError;
use crate::port::AsyncPort;

fn to_io_error(err: PortError) -> io::Error {
    match err {
        PortError::PortClosed => io::Error::new(io::ErrorKind::NotConnected, err),
        PortError::InvalidArgument(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
        PortError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// `Read` over the receive buffer of a port
#[derive(Debug)]
pub struct PortReader<'a> {
    port: &'a AsyncPort,
}

impl<'a> PortReader<'a> {
    /// Borrow `port` for reading
    pub fn new(port: &'a AsyncPort) -> Self {
        Self { port }
    }
}

impl Read for PortReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf).map_err(to_io_error)
    }
}

/// `Write` into the write queue of a port
#[derive(Debug)]
pub struct PortWriter<'a> {
    port: &'a AsyncPort,
}

impl<'a> PortWriter<'a> {
    /// Borrow `port` for writing
    pub fn new(port: &'a AsyncPort) -> Self {
        Self { port }
    }
}

impl Write for PortWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf, false).map_err(to_io_error)?;
        Ok(buf.len())
    }

    /// Queues a flush; does not wait for it to reach the line
    fn flush(&mut self) -> io::Result<()> {
        self.port.flush().map_err(to_io_error)
    }
}
