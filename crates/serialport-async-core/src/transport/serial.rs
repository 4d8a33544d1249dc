//! Serial port transport
//!
//! Hardware transport backed by the `serialport` crate. Reads use a short
//! timeout so the reader thread notices shutdown promptly even when the line
//! is silent.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{RawTransport, TransportCloser, TransportParts};
use crate::config::LineConfig;
use crate::error::{PortError, Result};
use crate::DEFAULT_READ_TIMEOUT_MS;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,
    /// USB product ID (if USB device)
    pub pid: Option<u16>,
    /// USB manufacturer string, if reported
    pub manufacturer: Option<String>,
    /// USB product string, if reported
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key: ttyACM* first, then ttyUSB* (both numerically), then the rest by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyACM"), (1u8, "ttyUSB")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a deterministic order
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let port = PortInfo::from(info);
                map.entry(port.name.clone()).or_insert(port);
            }
        }
        Err(e) => tracing::debug!("serial port enumeration failed: {}", e),
    }

    // Enumeration misses some CDC/FTDI nodes on Linux
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

fn open_error(path: &str, err: serialport::Error) -> PortError {
    match err.kind() {
        serialport::ErrorKind::Io(kind) => {
            PortError::from_open_io(path, &io::Error::new(kind, err.description))
        }
        serialport::ErrorKind::NoDevice => {
            PortError::Open(format!("{}: no such device ({})", path, err.description))
        }
        _ => PortError::Open(format!("{}: {}", path, err.description)),
    }
}

/// Hardware transport using the `serialport` crate
#[derive(Debug, Clone)]
pub struct SerialTransport {
    read_timeout: Duration,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS))
    }
}

impl SerialTransport {
    /// `read_timeout` bounds how long shutdown can wait on a silent line
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl RawTransport for SerialTransport {
    fn open(&self, path: &str, line: &LineConfig) -> Result<TransportParts> {
        let port = serialport::new(path, line.baud_rate)
            .data_bits(line.data_bits.into())
            .stop_bits(line.stop_bits.into())
            .parity(line.parity.into())
            .flow_control(serialport::FlowControl::None)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| open_error(path, e))?;

        let reader = port.try_clone().map_err(|e| open_error(path, e))?;
        let writer = port.try_clone().map_err(|e| open_error(path, e))?;
        let closed = Arc::new(AtomicBool::new(false));

        tracing::debug!("opened {} at {}", path, line);

        Ok(TransportParts {
            reader: Box::new(SerialHalf {
                port: reader,
                closed: Arc::clone(&closed),
            }),
            writer: Box::new(SerialHalf {
                port: writer,
                closed: Arc::clone(&closed),
            }),
            closer: Arc::new(SerialCloser {
                path: path.to_string(),
                port: Mutex::new(Some(port)),
                closed,
            }),
        })
    }
}

/// One cloned handle of the device; refuses I/O once the port is closed
struct SerialHalf {
    port: Box<dyn SerialPort>,
    closed: Arc<AtomicBool>,
}

impl SerialHalf {
    fn check_open(&self) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
        } else {
            Ok(())
        }
    }
}

impl Read for SerialHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        self.port.read(buf)
    }
}

impl Write for SerialHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.port.flush()
    }
}

struct SerialCloser {
    path: String,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    closed: Arc<AtomicBool>,
}

impl TransportCloser for SerialCloser {
    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        let port = self
            .port
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(port) = port {
            // The reader/writer clones are released when their threads exit
            drop(port);
            tracing::debug!("closed {}", self.path);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
