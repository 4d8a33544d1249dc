use pretty_assertions::assert_eq;
use serialport_async_core::prelude::*;
use serialport_async_core::transport::MemoryLine;
use std::io;
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Event captured by [`Recorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Read(Vec<u8>),
    Write(Vec<u8>),
    Exception(Direction, io::ErrorKind),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn exceptions(&self) -> Vec<(Direction, io::ErrorKind)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Exception(dir, kind) => Some((dir, kind)),
                _ => None,
            })
            .collect()
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(data) => Some(data),
                _ => None,
            })
            .collect()
    }
}

impl PortObserver for Recorder {
    fn on_read(&self, data: &[u8]) {
        self.events.lock().unwrap().push(Event::Read(data.to_vec()));
    }

    fn on_write(&self, data: &[u8]) {
        self.events.lock().unwrap().push(Event::Write(data.to_vec()));
    }

    fn on_exception(&self, direction: Direction, cause: &io::Error) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Exception(direction, cause.kind()));
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn open(capacity: Option<usize>) -> (AsyncPort, MemoryLine) {
    init_tracing();
    let (transport, line) = MemoryTransport::new();
    let mut builder = PortConfig::builder("/dev/ttyMEM0");
    if let Some(capacity) = capacity {
        builder = builder.buffer_capacity(capacity);
    }
    let port = AsyncPort::open_with(builder.build().unwrap(), &transport).unwrap();
    (port, line)
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

fn read_all(port: &AsyncPort) -> Vec<u8> {
    let mut dst = vec![0u8; port.available() + 16];
    let n = port.read(&mut dst).unwrap();
    dst.truncate(n);
    dst
}

#[test]
fn test_reads_preserve_arrival_order() {
    let (port, line) = open(Some(64));
    line.inject(b"hello ");
    line.inject(b"serial ");
    line.inject(b"world");

    assert!(wait_for(|| port.available() == 18));
    assert_eq!(read_all(&port), b"hello serial world".to_vec());
    assert_eq!(port.available(), 0);
}

#[test]
fn test_read_on_empty_buffer_returns_zero() {
    let (port, _line) = open(None);
    let mut dst = [0u8; 8];
    assert_eq!(port.read(&mut dst).unwrap(), 0);
}

#[test]
fn test_overflow_keeps_newest_bytes() {
    let (port, line) = open(Some(4));
    line.inject(b"AB");
    line.inject(b"CDE");

    assert!(wait_for(|| line.pending_inbound() == 0 && port.available() == 4));
    let mut dst = [0u8; 8];
    let n = port.read(&mut dst).unwrap();
    assert_eq!(n, 4);
    assert_eq!(&dst[..n], b"BCDE");
}

#[test]
fn test_unbounded_buffer_holds_everything() {
    let (port, line) = open(serialport_async_core::capacity_from_signed(-1));
    let expected: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
    for chunk in expected.chunks(100) {
        line.inject(chunk);
    }

    assert!(wait_for(|| port.available() == 1000));
    let mut dst = vec![0u8; 1000];
    assert_eq!(port.read(&mut dst).unwrap(), 1000);
    assert_eq!(dst, expected);
    assert_eq!(port.available(), 0);
}

#[test]
fn test_read_failure_is_reported_and_loop_recovers() {
    let (port, line) = open(None);
    let recorder = Arc::new(Recorder::default());
    port.set_observer(recorder.clone());

    line.inject_read_error(io::ErrorKind::InvalidData, "parity error");
    line.inject(b"ok");

    assert!(wait_for(|| port.available() == 2));
    assert_eq!(
        recorder.exceptions(),
        vec![(Direction::Read, io::ErrorKind::InvalidData)]
    );
    assert_eq!(read_all(&port), b"ok".to_vec());
    assert!(port.is_open());
}

#[test]
fn test_zero_length_reads_are_ignored() {
    let (port, line) = open(None);
    let recorder = Arc::new(Recorder::default());
    port.set_observer(recorder.clone());

    for _ in 0..3 {
        line.inject_empty_read();
    }
    line.inject(b"after");

    assert!(wait_for(|| port.available() == 5));
    assert!(recorder.exceptions().is_empty());
    assert_eq!(recorder.events(), vec![Event::Read(b"after".to_vec())]);
    assert!(port.is_open());
    assert_eq!(read_all(&port), b"after".to_vec());
}

#[test]
fn test_each_failed_read_reported_once() {
    let (port, line) = open(None);
    let recorder = Arc::new(Recorder::default());
    port.set_observer(recorder.clone());

    for _ in 0..3 {
        line.inject_read_error(io::ErrorKind::Other, "line noise");
    }
    line.inject(b"z");

    assert!(wait_for(|| port.available() == 1));
    assert_eq!(recorder.exceptions().len(), 3);
}

#[test]
fn test_on_read_fires_before_bytes_are_visible() {
    let (transport, line) = MemoryTransport::new();
    let config = PortConfig::builder("/dev/ttyMEM0").build().unwrap();
    let port = Arc::new(AsyncPort::open_with(config, &transport).unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let weak: Weak<AsyncPort> = Arc::downgrade(&port);
    let sink = Arc::clone(&seen);
    port.set_observer(
        CallbackObserver::new()
            .on_read(move |data| {
                if let Some(port) = weak.upgrade() {
                    sink.lock().unwrap().push((data.len(), port.available()));
                }
            })
            .into_shared(),
    );

    line.inject(b"abc");
    assert!(wait_for(|| port.available() == 3));
    assert_eq!(*seen.lock().unwrap(), vec![(3, 0)]);
}

#[test]
fn test_writes_applied_in_order_and_observed() {
    let (port, line) = open(None);
    let recorder = Arc::new(Recorder::default());
    port.set_observer(recorder.clone());

    port.write(b"one", false).unwrap();
    port.write(b"two", false).unwrap();
    port.write(b"three", true).unwrap();

    assert!(line.wait_for_written(11, WAIT));
    assert!(wait_for(|| port.pending_writes() == 0));
    assert_eq!(
        line.write_calls(),
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
    assert_eq!(line.flush_count(), 1);
    assert_eq!(
        recorder.writes(),
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
}

#[test]
fn test_write_copies_caller_buffer() {
    let (port, line) = open(None);
    let mut data = b"frame".to_vec();
    port.write(&data, false).unwrap();
    data.fill(0);

    assert!(line.wait_for_written(5, WAIT));
    assert_eq!(line.written(), b"frame".to_vec());
}

#[test]
fn test_failed_write_is_dropped_and_queue_continues() {
    let (port, line) = open(None);
    let recorder = Arc::new(Recorder::default());
    port.set_observer(recorder.clone());
    line.fail_next_writes(1);

    port.write(b"lost", false).unwrap();
    port.write(b"sent", false).unwrap();

    assert!(line.wait_for_written(4, WAIT));
    assert!(wait_for(|| port.pending_writes() == 0));
    assert_eq!(line.written(), b"sent".to_vec());
    assert_eq!(
        recorder.exceptions(),
        vec![(Direction::Write, io::ErrorKind::BrokenPipe)]
    );
    assert_eq!(recorder.writes(), vec![b"sent".to_vec()]);
}

#[test]
fn test_concurrent_writers_keep_per_thread_order() {
    let (port, line) = open(None);
    let port = Arc::new(port);
    let recorder = Arc::new(Recorder::default());
    port.set_observer(recorder.clone());

    const THREADS: u8 = 4;
    const PER_THREAD: u8 = 50;

    let workers: Vec<_> = (0..THREADS)
        .map(|tag| {
            let port = Arc::clone(&port);
            thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    port.write(&[tag, seq], false).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    port.shutdown();

    let applied = recorder.writes();
    assert_eq!(applied.len(), (THREADS as usize) * (PER_THREAD as usize));
    assert_eq!(applied, line.write_calls());

    for tag in 0..THREADS {
        let seqs: Vec<u8> = applied
            .iter()
            .filter(|payload| payload[0] == tag)
            .map(|payload| payload[1])
            .collect();
        assert_eq!(seqs, (0..PER_THREAD).collect::<Vec<u8>>());
    }
}

#[test]
fn test_replaced_observer_only_sees_later_events() {
    let (port, line) = open(None);
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    port.set_observer(first.clone());
    line.inject(b"a");
    assert!(wait_for(|| port.available() == 1));

    port.set_observer(second.clone());
    line.inject(b"b");
    assert!(wait_for(|| port.available() == 2));

    port.clear_observer();
    line.inject(b"c");
    assert!(wait_for(|| port.available() == 3));

    assert_eq!(first.events(), vec![Event::Read(b"a".to_vec())]);
    assert_eq!(second.events(), vec![Event::Read(b"b".to_vec())]);
}

#[test]
fn test_shutdown_is_idempotent() {
    let (port, line) = open(Some(16));
    port.shutdown();
    let after_first = (port.state(), port.is_open(), line.close_count());
    port.shutdown();
    let after_second = (port.state(), port.is_open(), line.close_count());

    assert_eq!(after_first, (PortState::Closed, false, 1));
    assert_eq!(after_first, after_second);
}

#[test]
fn test_operations_after_shutdown_fail_with_port_closed() {
    let (port, line) = open(None);
    line.inject(b"unread");
    assert!(wait_for(|| port.available() == 6));
    port.shutdown();

    let mut dst = [0u8; 8];
    for _ in 0..3 {
        assert!(matches!(port.read(&mut dst), Err(PortError::PortClosed)));
        assert!(matches!(port.write(b"x", false), Err(PortError::PortClosed)));
        assert!(matches!(port.flush(), Err(PortError::PortClosed)));
    }
    assert!(line.written().is_empty());
}

#[test]
fn test_shutdown_drains_accepted_writes() {
    let (port, line) = open(None);
    let payloads: Vec<Vec<u8>> = (0..100u8).map(|i| vec![i; 8]).collect();
    for payload in &payloads {
        port.write(payload, false).unwrap();
    }
    port.shutdown();

    assert_eq!(line.write_calls(), payloads);
    assert_eq!(port.pending_writes(), 0);
    assert!(line.is_closed());
}

#[test]
fn test_shutdown_with_read_in_flight_is_prompt_and_silent() {
    let (port, line) = open(None);
    let recorder = Arc::new(Recorder::default());
    port.set_observer(recorder.clone());
    // Give the reader time to block on the empty line
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    port.shutdown();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(line.is_closed());
    assert!(recorder.exceptions().is_empty());
}

#[test]
fn test_shutdown_from_observer_callback() {
    let (transport, line) = MemoryTransport::new();
    let config = PortConfig::builder("/dev/ttyMEM0").build().unwrap();
    let port = Arc::new(AsyncPort::open_with(config, &transport).unwrap());

    let weak = Arc::downgrade(&port);
    port.set_observer(
        CallbackObserver::new()
            .on_read(move |_| {
                if let Some(port) = weak.upgrade() {
                    port.shutdown();
                }
            })
            .into_shared(),
    );

    line.inject(b"bye");
    assert!(wait_for(|| port.state() == PortState::Closed));
    assert_eq!(line.close_count(), 1);
    assert!(!port.is_open());
}

#[test]
fn test_shutdown_from_write_callback_drains_queue() {
    init_tracing();
    let (transport, line) = MemoryTransport::new();
    let config = PortConfig::builder("/dev/ttyMEM0").build().unwrap();
    let port = Arc::new(AsyncPort::open_with(config, &transport).unwrap());
    let recorder = Arc::new(Recorder::default());
    // Holds the writer inside the first on_write until the rest are queued
    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);

    let weak = Arc::downgrade(&port);
    let writes = Arc::clone(&recorder);
    let exceptions = Arc::clone(&recorder);
    port.set_observer(
        CallbackObserver::new()
            .on_write(move |data| {
                writes.on_write(data);
                if data == b"first" {
                    let _ = gate.lock().unwrap().recv_timeout(WAIT);
                    if let Some(port) = weak.upgrade() {
                        port.shutdown();
                    }
                }
            })
            .on_exception(move |direction, err| exceptions.on_exception(direction, err))
            .into_shared(),
    );

    let payloads: Vec<Vec<u8>> = std::iter::once(b"first".to_vec())
        .chain((0..5u8).map(|i| vec![b'0' + i; 4]))
        .collect();
    for payload in &payloads {
        port.write(payload, false).unwrap();
    }
    release.send(()).unwrap();

    assert!(wait_for(|| port.state() == PortState::Closed));
    assert_eq!(line.write_calls(), payloads);
    assert_eq!(recorder.writes(), payloads);
    assert!(recorder.exceptions().is_empty());
    assert_eq!(line.close_count(), 1);
    assert_eq!(port.pending_writes(), 0);
    assert!(matches!(port.write(b"late", false), Err(PortError::PortClosed)));
}

#[test]
fn test_open_failures_propagate() {
    init_tracing();
    let (transport, line) = MemoryTransport::new();
    let config = PortConfig::builder("/dev/ttyS7").build().unwrap();

    line.fail_open(io::ErrorKind::NotFound, "no such device");
    assert!(matches!(
        AsyncPort::open_with(config.clone(), &transport),
        Err(PortError::Open(_))
    ));

    line.fail_open(io::ErrorKind::PermissionDenied, "permission denied");
    assert!(matches!(
        AsyncPort::open_with(config.clone(), &transport),
        Err(PortError::Permission(_))
    ));

    assert_eq!(line.open_count(), 0);
    assert!(AsyncPort::open_with(config, &transport).is_ok());
}

#[test]
fn test_invalid_config_rejected_before_open() {
    let (transport, line) = MemoryTransport::new();
    let mut config = PortConfig::builder("/dev/ttyS0").build().unwrap();
    config.line.baud_rate = 0;

    assert!(matches!(
        AsyncPort::open_with(config, &transport),
        Err(PortError::InvalidArgument(_))
    ));
    assert_eq!(line.open_count(), 0);
}

#[test]
fn test_open_real_device_missing() {
    let config = PortConfig::builder("/dev/this-serial-port-does-not-exist")
        .build()
        .unwrap();
    assert!(matches!(
        AsyncPort::open(config),
        Err(PortError::Open(_)) | Err(PortError::Permission(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readable_resolves_when_bytes_arrive() {
    let (port, line) = open(None);

    let injector = {
        let line = line.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            line.inject(b"ping");
        })
    };

    let available = tokio::time::timeout(WAIT, async {
        loop {
            let n = port.readable().await.unwrap();
            if n == 4 {
                break n;
            }
        }
    })
    .await
    .unwrap();
    injector.await.unwrap();

    assert_eq!(available, 4);
    assert_eq!(read_all(&port), b"ping".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readable_fails_after_shutdown() {
    let (port, _line) = open(None);
    let port = Arc::new(port);

    let waiter = {
        let port = Arc::clone(&port);
        tokio::spawn(async move { port.readable().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let closer = Arc::clone(&port);
    tokio::task::spawn_blocking(move || closer.shutdown())
        .await
        .unwrap();

    let result = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
    assert!(matches!(result, Err(PortError::PortClosed)));
}
