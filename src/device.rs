use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::events::{EventLevel, EventSink};
use crate::ring::TelemetryRing;

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const CLIENT_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("telemetry device unavailable: {0}")]
    Unavailable(#[source] io::Error),
}

/// Serves a telemetry ring as a read-only byte stream at a path-like
/// endpoint. Each connected client drains the shared read head; bytes are
/// delivered in strict append order.
pub struct DeviceServer {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    clients_served: Arc<AtomicU32>,
}

impl DeviceServer {
    pub fn serve(
        path: &Path,
        ring: Arc<TelemetryRing>,
        sink: Arc<EventSink>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, DeviceError> {
        // A stale socket file from a previous run blocks the bind.
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).map_err(DeviceError::Unavailable)?;
        listener
            .set_nonblocking(true)
            .map_err(DeviceError::Unavailable)?;

        sink.emit(
            EventLevel::Info,
            "RMGR",
            &format!("telemetry available at {}", path.display()),
        );

        let clients_served = Arc::new(AtomicU32::new(0));
        let accept_shutdown = Arc::clone(&shutdown);
        let accept_clients = Arc::clone(&clients_served);
        let accept_handle = thread::Builder::new()
            .name("telemetry-device".into())
            .spawn(move || {
                accept_loop(listener, ring, sink, accept_shutdown, accept_clients);
            })
            .map_err(DeviceError::Unavailable)?;

        Ok(Self {
            path: path.to_path_buf(),
            shutdown,
            accept_handle: Some(accept_handle),
            clients_served,
        })
    }

    pub fn clients_served(&self) -> u32 {
        self.clients_served.load(Ordering::Relaxed)
    }

    /// Stop accepting, unlink the endpoint and join the accept thread.
    /// Client threads exit on their own once the ring reports EOF.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

fn accept_loop(
    listener: UnixListener,
    ring: Arc<TelemetryRing>,
    sink: Arc<EventSink>,
    shutdown: Arc<AtomicBool>,
    clients: Arc<AtomicU32>,
) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match listener.accept() {
            Ok((stream, _addr)) => {
                clients.fetch_add(1, Ordering::Relaxed);
                let client_ring = Arc::clone(&ring);
                let client_sink = Arc::clone(&sink);
                let spawned = thread::Builder::new()
                    .name("telemetry-reader".into())
                    .spawn(move || serve_client(stream, &client_ring, &client_sink));
                if spawned.is_err() {
                    sink.emit(EventLevel::Warn, "RMGR", "failed to spawn reader thread");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                sink.emit(EventLevel::Warn, "RMGR", &format!("accept failed: {e}"));
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve_client(mut stream: UnixStream, ring: &TelemetryRing, sink: &EventSink) {
    let mut chunk = [0u8; CLIENT_CHUNK];
    loop {
        let n = ring.read_blocking(&mut chunk);
        if n == 0 {
            // End of stream after shutdown; client sees a clean EOF.
            let _ = stream.shutdown(std::net::Shutdown::Write);
            return;
        }
        if let Err(e) = stream.write_all(&chunk[..n]) {
            if e.kind() != io::ErrorKind::BrokenPipe {
                sink.emit(EventLevel::Debug, "RMGR", &format!("reader dropped: {e}"));
            }
            return;
        }
    }
}

/// Client helper for the telemetry endpoint: open, then `Read` the record
/// stream until EOF.
pub struct TelemetryReader {
    stream: UnixStream,
}

impl TelemetryReader {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let stream = UnixStream::connect(path).map_err(DeviceError::Unavailable)?;
        Ok(Self { stream })
    }
}

impl Read for TelemetryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
