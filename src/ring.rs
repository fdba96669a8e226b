use parking_lot::{Condvar, Mutex};
use thiserror::Error;

pub const DEFAULT_RING_CAPACITY: usize = 8192;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    /// Non-blocking read with no data available (EAGAIN).
    #[error("no telemetry available")]
    WouldBlock,
    #[error("record of {0} bytes exceeds ring capacity")]
    RecordTooLarge(usize),
    #[error("record is not newline-terminated")]
    UnterminatedRecord,
}

struct RingInner {
    buf: Box<[u8]>,
    /// Next write position.
    head: usize,
    /// Next read position; shared by all readers.
    tail: usize,
    used: usize,
    closed: bool,
    records_dropped: u64,
}

impl RingInner {
    fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Drop the oldest record: advance the tail past its newline so a
    /// reader never lands mid-record after an overwrite.
    fn drop_oldest_record(&mut self) {
        while self.used > 0 {
            let byte = self.buf[self.tail];
            self.tail = (self.tail + 1) % self.capacity();
            self.used -= 1;
            if byte == b'\n' {
                break;
            }
        }
        self.records_dropped += 1;
    }

    fn write_bytes(&mut self, record: &[u8]) {
        let cap = self.capacity();
        let first = record.len().min(cap - self.head);
        self.buf[self.head..self.head + first].copy_from_slice(&record[..first]);
        if first < record.len() {
            let rest = record.len() - first;
            self.buf[..rest].copy_from_slice(&record[first..]);
        }
        self.head = (self.head + record.len()) % cap;
        self.used += record.len();
    }

    /// Copy out up to `out.len()` bytes without crossing the wrap point.
    /// The copy is trimmed back to the last newline in the window when one
    /// exists, so readers consume whole records wherever possible.
    fn read_bytes(&mut self, out: &mut [u8]) -> usize {
        let cap = self.capacity();
        let window = self.used.min(out.len()).min(cap - self.tail);
        if window == 0 {
            return 0;
        }
        let slice = &self.buf[self.tail..self.tail + window];
        let take = match slice.iter().rposition(|&b| b == b'\n') {
            Some(last_newline) => last_newline + 1,
            // No record boundary in the window (record longer than the
            // window, or a record wrapping the buffer end): hand out raw
            // bytes and let the next call finish the record.
            None => window,
        };
        out[..take].copy_from_slice(&slice[..take]);
        self.tail = (self.tail + take) % cap;
        self.used -= take;
        take
    }
}

/// Fixed-size circular byte buffer behind the telemetry device.
///
/// Single producer, any number of readers sharing one read head. Appends
/// are atomic per record; when the buffer is full the oldest complete
/// records are overwritten (drop-oldest) and the read head advances past
/// the clobbered newline, preserving record alignment.
pub struct TelemetryRing {
    inner: Mutex<RingInner>,
    readable: Condvar,
    /// Serializes blocking readers so head advancement stays ordered.
    reader_gate: Mutex<()>,
}

impl TelemetryRing {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                buf: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                used: 0,
                closed: false,
                records_dropped: 0,
            }),
            readable: Condvar::new(),
            reader_gate: Mutex::new(()),
        }
    }

    /// Append one newline-terminated record. Never blocks on readers.
    pub fn append(&self, record: &[u8]) -> Result<(), RingError> {
        if record.last() != Some(&b'\n') {
            return Err(RingError::UnterminatedRecord);
        }
        let mut inner = self.inner.lock();
        if record.len() > inner.capacity() {
            return Err(RingError::RecordTooLarge(record.len()));
        }
        while inner.used + record.len() > inner.capacity() {
            inner.drop_oldest_record();
        }
        inner.write_bytes(record);
        drop(inner);
        self.readable.notify_all();
        Ok(())
    }

    /// Non-blocking read: `Err(WouldBlock)` when empty and open, `Ok(0)`
    /// at end of stream after close.
    pub fn read_nonblocking(&self, out: &mut [u8]) -> Result<usize, RingError> {
        let mut inner = self.inner.lock();
        if inner.used == 0 {
            return if inner.closed { Ok(0) } else { Err(RingError::WouldBlock) };
        }
        Ok(inner.read_bytes(out))
    }

    /// Blocking read: suspends until at least one byte is available or the
    /// ring is closed. Returns 0 only at end of stream.
    pub fn read_blocking(&self, out: &mut [u8]) -> usize {
        let _gate = self.reader_gate.lock();
        let mut inner = self.inner.lock();
        loop {
            if inner.used > 0 {
                return inner.read_bytes(out);
            }
            if inner.closed {
                return 0;
            }
            self.readable.wait(&mut inner);
        }
    }

    /// Close the stream: blocked readers wake and drain to EOF.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.readable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn available(&self) -> usize {
        self.inner.lock().used
    }

    /// Records discarded by drop-oldest overwrite since creation.
    pub fn records_dropped(&self) -> u64 {
        self.inner.lock().records_dropped
    }
}

impl Default for TelemetryRing {
    fn default() -> Self {
        Self::new()
    }
}
