//! Serial Monitor
//!
//! Opens a port through `AsyncPort`, prints everything received, optionally
//! sends a line of text, then shuts down cleanly.
//!
//! Usage:
//!   cargo run --example serial_monitor -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyACM0)
//!   --baud RATE       Baud rate (default: 9600)
//!   --capacity BYTES  Receive buffer capacity (default: unbounded)
//!   --config FILE     Load port settings from a JSON file
//!   --send TEXT       Send TEXT followed by CR after opening
//!   --seconds N       How long to monitor (default: 5)
//!   --demo            Use a simulated line that echoes whatever is sent
//!   --list            List available ports and exit

use anyhow::Context;
use serialport_async_core::prelude::*;
use serialport_async_core::transport::{list_ports, MemoryLine};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name = "/dev/ttyACM0".to_string();
    let mut baud_rate = 9600u32;
    let mut capacity: Option<usize> = None;
    let mut config_file: Option<PathBuf> = None;
    let mut send: Option<String> = None;
    let mut seconds = 5u64;
    let mut demo = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    port_name = args[i].clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    baud_rate = args[i].parse().context("invalid baud rate")?;
                }
            }
            "--capacity" => {
                i += 1;
                if i < args.len() {
                    capacity = Some(args[i].parse().context("invalid capacity")?);
                }
            }
            "--config" => {
                i += 1;
                if i < args.len() {
                    config_file = Some(PathBuf::from(&args[i]));
                }
            }
            "--send" => {
                i += 1;
                if i < args.len() {
                    send = Some(args[i].clone());
                }
            }
            "--seconds" => {
                i += 1;
                if i < args.len() {
                    seconds = args[i].parse().unwrap_or(5);
                }
            }
            "--demo" => demo = true,
            "--list" => {
                for port in list_ports() {
                    println!(
                        "{}  {}",
                        port.name,
                        port.product.as_deref().unwrap_or("")
                    );
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                port_name = arg.to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
            }
        }
        i += 1;
    }

    let config = match config_file {
        Some(path) => PortConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => {
            let mut builder = PortConfig::builder(port_name).baud_rate(baud_rate);
            if let Some(capacity) = capacity {
                builder = builder.buffer_capacity(capacity);
            }
            builder.build()?
        }
    };

    println!("Port:     {}", config.path);
    println!("Line:     {}", config.line);
    println!("Buffer:   {:?}", config.buffer_capacity);
    println!();

    let stop_echo = Arc::new(AtomicBool::new(false));
    let port = if demo {
        let (transport, line) = MemoryTransport::new();
        let port = AsyncPort::open_with(config, &transport)?;
        spawn_echo(line, Arc::clone(&stop_echo));
        port
    } else {
        AsyncPort::open(config).context("failed to open serial port")?
    };

    port.set_observer(
        CallbackObserver::new()
            .on_write(|data| println!(">> {:02x?}", data))
            .on_exception(|direction, err| eprintln!("!! {} error: {}", direction, err))
            .into_shared(),
    );

    if let Some(text) = send {
        let mut frame = text.into_bytes();
        frame.push(b'\r');
        port.write(&frame, true)?;
    }

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut buf = [0u8; 256];
    while Instant::now() < deadline {
        let n = port.read(&mut buf)?;
        if n > 0 {
            println!("<< {:02x?}  {}", &buf[..n], String::from_utf8_lossy(&buf[..n]));
        } else {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    stop_echo.store(true, Ordering::Relaxed);
    port.shutdown();
    println!("Closed.");
    Ok(())
}

/// Simulated device: echoes every byte the port writes back to it
fn spawn_echo(line: MemoryLine, stop: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let mut echoed = 0;
        while !stop.load(Ordering::Relaxed) && !line.is_closed() {
            if line.wait_for_written(echoed + 1, Duration::from_millis(100)) {
                let written = line.written();
                line.inject(&written[echoed..]);
                echoed = written.len();
            }
        }
    });
}

fn print_help() {
    println!("Serial Monitor");
    println!();
    println!("Usage: serial_monitor [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port PORT       Serial port (default: /dev/ttyACM0)");
    println!("  --baud RATE       Baud rate (default: 9600)");
    println!("  --capacity BYTES  Receive buffer capacity (default: unbounded)");
    println!("  --config FILE     Load port settings from a JSON file");
    println!("  --send TEXT       Send TEXT followed by CR after opening");
    println!("  --seconds N       How long to monitor (default: 5)");
    println!("  --demo            Use a simulated line that echoes whatever is sent");
    println!("  --list            List available ports and exit");
}
