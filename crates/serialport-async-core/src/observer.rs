//! Port event observers
//!
//! Observers are invoked on whichever background thread detected the event:
//! `on_read` and read exceptions arrive on the reader thread, `on_write` and
//! write exceptions on the writer thread. Calls from the two threads are not
//! serialized against each other.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Which side of the port an exception came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Reader thread
    Read,
    /// Writer thread
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// Receiver for read, write and exception events
pub trait PortObserver: Send + Sync {
    /// Bytes arrived from the line. Fires before the bytes become visible to
    /// [`AsyncPort::read`](crate::AsyncPort::read).
    fn on_read(&self, data: &[u8]);

    /// A queued write request was applied to the line
    fn on_write(&self, data: &[u8]);

    /// A steady-state I/O operation failed. The background worker keeps running.
    fn on_exception(&self, direction: Direction, cause: &io::Error);
}

type DataCallback = Box<dyn Fn(&[u8]) + Send + Sync>;
type ExceptionCallback = Box<dyn Fn(Direction, &io::Error) + Send + Sync>;

/// Observer assembled from optional closures; unset events are ignored
///
/// ```rust,ignore
/// let observer = CallbackObserver::new()
///     .on_read(|data| println!("rx {:02x?}", data))
///     .on_exception(|dir, err| eprintln!("{} failed: {}", dir, err));
/// port.set_observer(observer.into_shared());
/// ```
#[derive(Default)]
pub struct CallbackObserver {
    read: Option<DataCallback>,
    write: Option<DataCallback>,
    exception: Option<ExceptionCallback>,
}

impl CallbackObserver {
    /// Observer with no callbacks set
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `f` with each chunk read from the line
    pub fn on_read(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.read = Some(Box::new(f));
        self
    }

    /// Call `f` with each payload written to the line
    pub fn on_write(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.write = Some(Box::new(f));
        self
    }

    /// Call `f` for each failed read or write
    pub fn on_exception(
        mut self,
        f: impl Fn(Direction, &io::Error) + Send + Sync + 'static,
    ) -> Self {
        self.exception = Some(Box::new(f));
        self
    }

    /// Wrap for registration with [`AsyncPort::set_observer`](crate::AsyncPort::set_observer)
    pub fn into_shared(self) -> Arc<dyn PortObserver> {
        Arc::new(self)
    }
}

impl PortObserver for CallbackObserver {
    fn on_read(&self, data: &[u8]) {
        if let Some(f) = &self.read {
            f(data);
        }
    }

    fn on_write(&self, data: &[u8]) {
        if let Some(f) = &self.write {
            f(data);
        }
    }

    fn on_exception(&self, direction: Direction, cause: &io::Error) {
        if let Some(f) = &self.exception {
            f(direction, cause);
        }
    }
}

impl fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackObserver")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("exception", &self.exception.is_some())
            .finish()
    }
}
