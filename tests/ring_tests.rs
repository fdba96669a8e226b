use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slsim::ring::{RingError, TelemetryRing};

/// Fixed-width numbered record, ~40 bytes like the real telemetry lines.
fn record(index: u32) -> Vec<u8> {
    format!("{index:06},alt=00012.34,vel=0003.21,thr=060\n").into_bytes()
}

fn parse_indices(bytes: &[u8]) -> Vec<u32> {
    let text = std::str::from_utf8(bytes).expect("records are ASCII");
    text.split_terminator('\n')
        .map(|line| {
            line.split(',')
                .next()
                .and_then(|field| field.parse().ok())
                .unwrap_or_else(|| panic!("malformed record: {line:?}"))
        })
        .collect()
}

fn drain(ring: &TelemetryRing) -> Vec<u8> {
    let mut all = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match ring.read_nonblocking(&mut buf) {
            Ok(0) => break,
            Ok(n) => all.extend_from_slice(&buf[..n]),
            Err(RingError::WouldBlock) => break,
            Err(e) => panic!("unexpected ring error: {e}"),
        }
    }
    all
}

#[test]
fn single_reader_sees_records_in_append_order() {
    let ring = TelemetryRing::new();
    let mut expected = Vec::new();
    for i in 0..10 {
        let rec = record(i);
        expected.extend_from_slice(&rec);
        ring.append(&rec).unwrap();
    }
    assert_eq!(drain(&ring), expected);
}

#[test]
fn reads_concatenate_to_a_prefix_of_the_written_stream() {
    let ring = TelemetryRing::new();
    let mut written = Vec::new();
    for i in 0..20 {
        let rec = record(i);
        written.extend_from_slice(&rec);
        ring.append(&rec).unwrap();
    }

    // Many small reads; b1 ++ b2 ++ ... must be a prefix of the writer's
    // total emitted stream.
    let mut collected = Vec::new();
    let mut buf = [0u8; 97];
    for _ in 0..5 {
        if let Ok(n) = ring.read_nonblocking(&mut buf) {
            collected.extend_from_slice(&buf[..n]);
        }
    }
    assert!(written.starts_with(&collected));
}

#[test]
fn nonblocking_read_reports_eagain_when_empty() {
    let ring = TelemetryRing::new();
    let mut buf = [0u8; 64];
    assert_eq!(ring.read_nonblocking(&mut buf), Err(RingError::WouldBlock));
}

#[test]
fn read_returns_zero_after_close() {
    let ring = TelemetryRing::new();
    ring.append(b"last\n").unwrap();
    ring.close();

    let mut buf = [0u8; 64];
    // Buffered data drains first, then EOF.
    assert_eq!(ring.read_nonblocking(&mut buf), Ok(5));
    assert_eq!(ring.read_nonblocking(&mut buf), Ok(0));
    assert_eq!(ring.read_blocking(&mut buf), 0);
}

#[test]
fn blocking_read_wakes_on_append() {
    let ring = Arc::new(TelemetryRing::new());
    let reader_ring = Arc::clone(&ring);
    let reader = thread::spawn(move || {
        let mut buf = [0u8; 64];
        let n = reader_ring.read_blocking(&mut buf);
        buf[..n].to_vec()
    });

    thread::sleep(Duration::from_millis(50));
    ring.append(b"wake\n").unwrap();
    let got = reader.join().unwrap();
    assert_eq!(got, b"wake\n");
}

#[test]
fn overwrite_drops_oldest_and_keeps_records_whole() {
    let capacity = 256;
    let ring = TelemetryRing::with_capacity(capacity);
    let total = 50u32;
    for i in 0..total {
        ring.append(&record(i)).unwrap();
    }
    assert!(ring.records_dropped() > 0);

    let bytes = drain(&ring);
    // Every byte belongs to a complete, newline-terminated record.
    assert_eq!(bytes.last(), Some(&b'\n'));
    let indices = parse_indices(&bytes);
    assert!(!indices.is_empty());

    // A contiguous suffix of the written sequence, ending at the last
    // record written.
    assert_eq!(*indices.last().unwrap(), total - 1);
    for pair in indices.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }
}

#[test]
fn late_reader_receives_contiguous_suffix_of_complete_records() {
    let total = 10_000u32;
    let ring = TelemetryRing::new();

    // Writer emits R1..R5000 before any reader shows up.
    for i in 0..5_000 {
        ring.append(&record(i)).unwrap();
    }

    // Reader opens late and drains concurrently with the rest of the
    // writes.
    let mut collected = drain(&ring);
    for i in 5_000..total {
        ring.append(&record(i)).unwrap();
        if i % 64 == 0 {
            collected.extend_from_slice(&drain(&ring));
        }
    }
    collected.extend_from_slice(&drain(&ring));

    let indices = parse_indices(&collected);
    assert!(!indices.is_empty());
    assert_eq!(*indices.last().unwrap(), total - 1, "stream must end at the last record");
    for pair in indices.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "record sequence must be contiguous");
    }
}

#[test]
fn wrap_point_may_split_a_read_but_never_a_record() {
    let ring = TelemetryRing::with_capacity(128);
    // Fill past the wrap point several times.
    for i in 0..12 {
        ring.append(&record(i)).unwrap();
    }
    let bytes = drain(&ring);
    assert_eq!(bytes.last(), Some(&b'\n'));
    let indices = parse_indices(&bytes);
    for pair in indices.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }
}

#[test]
fn concurrent_writer_and_reader_preserve_record_integrity() {
    let ring = Arc::new(TelemetryRing::with_capacity(512));
    let writer_ring = Arc::clone(&ring);
    let writer = thread::spawn(move || {
        for i in 0..2_000 {
            writer_ring.append(&record(i)).unwrap();
            if i % 128 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        writer_ring.close();
    });

    let mut collected = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = ring.read_blocking(&mut buf);
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buf[..n]);
    }
    writer.join().unwrap();

    let indices = parse_indices(&collected);
    assert_eq!(*indices.last().unwrap(), 1_999);
    for pair in indices.windows(2) {
        assert!(pair[1] > pair[0], "records out of order: {} then {}", pair[0], pair[1]);
    }
}
