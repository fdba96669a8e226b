use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slsim::device::{DeviceError, DeviceServer, TelemetryReader};
use slsim::events::EventSink;
use slsim::ring::TelemetryRing;

static SOCKET_COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_socket_path() -> PathBuf {
    let id = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("sls_telemetry_test_{}_{id}", std::process::id()))
}

#[test]
fn open_fails_with_device_unavailable_when_endpoint_is_missing() {
    let result = TelemetryReader::open(Path::new("/tmp/sls_no_such_device_endpoint"));
    assert!(matches!(result, Err(DeviceError::Unavailable(_))));
}

#[test]
fn bind_fails_with_device_unavailable_on_a_bad_path() {
    let ring = Arc::new(TelemetryRing::new());
    let sink = Arc::new(EventSink::with_capture());
    let shutdown = Arc::new(AtomicBool::new(false));
    let result = DeviceServer::serve(
        Path::new("/nonexistent-dir/sls_telemetry"),
        ring,
        sink,
        shutdown,
    );
    assert!(matches!(result, Err(DeviceError::Unavailable(_))));
}

#[test]
fn reader_streams_appended_records_to_eof() {
    let path = unique_socket_path();
    let ring = Arc::new(TelemetryRing::new());
    let sink = Arc::new(EventSink::with_capture());
    let shutdown = Arc::new(AtomicBool::new(false));

    let server = DeviceServer::serve(&path, Arc::clone(&ring), sink, Arc::clone(&shutdown))
        .expect("device binds");

    let mut reader = TelemetryReader::open(&path).expect("device opens");

    let writer_ring = Arc::clone(&ring);
    let writer = thread::spawn(move || {
        for i in 0..100 {
            let record = format!("{i:04},alt=1.00,vel=0.10,thr=0,go=0\n");
            writer_ring.append(record.as_bytes()).unwrap();
            if i % 25 == 0 {
                thread::sleep(Duration::from_millis(5));
            }
        }
        writer_ring.close();
    });

    let mut collected = Vec::new();
    reader
        .read_to_end(&mut collected)
        .expect("stream drains to EOF");
    writer.join().unwrap();

    let text = String::from_utf8(collected).unwrap();
    let lines: Vec<&str> = text.split_terminator('\n').collect();
    assert!(!lines.is_empty());
    assert!(lines.last().unwrap().starts_with("0099,"));
    for line in &lines {
        assert!(line.contains(",alt="), "partial record leaked: {line:?}");
    }

    shutdown.store(true, Ordering::Release);
    server.stop();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn reader_sees_eof_after_shutdown() {
    let path = unique_socket_path();
    let ring = Arc::new(TelemetryRing::new());
    let sink = Arc::new(EventSink::with_capture());
    let shutdown = Arc::new(AtomicBool::new(false));

    let server = DeviceServer::serve(&path, Arc::clone(&ring), sink, Arc::clone(&shutdown))
        .expect("device binds");
    let mut reader = TelemetryReader::open(&path).expect("device opens");

    ring.append(b"final,alt=0.00,vel=0.00,thr=0,go=0\n").unwrap();
    ring.close();

    let mut collected = Vec::new();
    reader.read_to_end(&mut collected).unwrap();
    assert!(collected.ends_with(b"go=0\n"));

    // Further reads are a clean EOF, not an error.
    let mut buf = [0u8; 16];
    assert_eq!(reader.read(&mut buf).unwrap(), 0);

    shutdown.store(true, Ordering::Release);
    server.stop();
    let _ = std::fs::remove_file(&path);
}
