use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::PULSE_TICK;
use crate::events::{EventLevel, EventSink};
use crate::state::VehicleShared;

/// Well-known endpoint identifier the flight control computer answers on.
pub const ENDPOINT_NAME: &str = "sls_fcc";

pub const CMD_STATUS: i32 = 1;
pub const CMD_GO: i32 = 2;
pub const CMD_NOGO: i32 = 3;
pub const CMD_ABORT: i32 = 4;
pub const CMD_SET_THROTTLE: i32 = 5;

pub const REQUEST_SIZE: usize = 8;
pub const REPLY_SIZE: usize = 12;

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const CLIENT_READ_POLL: Duration = Duration::from_millis(50);
const CLIENT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command transport failed: {0}")]
    Failed(#[from] io::Error),
    #[error("command service shut down")]
    Shutdown,
}

/// Operator commands accepted by the command service.
///
/// `Throttle` carries the raw wire value; the service clamps it to
/// `[0, 100]` before it reaches the shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorCommand {
    Status,
    Go,
    NoGo,
    Abort,
    Throttle(i32),
}

impl OperatorCommand {
    pub fn type_code(self) -> i32 {
        match self {
            OperatorCommand::Status => CMD_STATUS,
            OperatorCommand::Go => CMD_GO,
            OperatorCommand::NoGo => CMD_NOGO,
            OperatorCommand::Abort => CMD_ABORT,
            OperatorCommand::Throttle(_) => CMD_SET_THROTTLE,
        }
    }

    fn value(self) -> i32 {
        match self {
            OperatorCommand::Throttle(v) => v,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub ok: bool,
    pub mission_go: bool,
    pub throttle: u8,
}

/// Encode a request as packed little-endian `type: i32, value: i32`.
pub fn encode_request(msg_type: i32, value: i32) -> [u8; REQUEST_SIZE] {
    let mut out = [0u8; REQUEST_SIZE];
    out[..4].copy_from_slice(&msg_type.to_le_bytes());
    out[4..].copy_from_slice(&value.to_le_bytes());
    out
}

pub fn decode_request(bytes: &[u8; REQUEST_SIZE]) -> (i32, i32) {
    let msg_type = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let value = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (msg_type, value)
}

/// Encode a reply as packed little-endian `ok, mission_go, throttle: i32`.
pub fn encode_reply(reply: CommandReply) -> [u8; REPLY_SIZE] {
    let mut out = [0u8; REPLY_SIZE];
    out[..4].copy_from_slice(&i32::from(reply.ok).to_le_bytes());
    out[4..8].copy_from_slice(&i32::from(reply.mission_go).to_le_bytes());
    out[8..].copy_from_slice(&i32::from(reply.throttle).to_le_bytes());
    out
}

pub fn decode_reply(bytes: &[u8; REPLY_SIZE]) -> CommandReply {
    let ok = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let mission_go = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let throttle = i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    CommandReply {
        ok: ok != 0,
        mission_go: mission_go != 0,
        throttle: throttle.clamp(0, 100) as u8,
    }
}

/// Endpoint path for a named command channel.
pub fn endpoint_path(socket_dir: &Path, name: &str) -> PathBuf {
    socket_dir.join(name)
}

/// Named synchronous request/reply endpoint owning the operator-controlled
/// state fields.
///
/// One command is applied at a time; the reply always reflects the state
/// after the mutation. Timer pulses (code 100) are consumed without a
/// reply. On shutdown the listener closes and in-flight clients observe a
/// transport failure.
pub struct CommandService {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    commands_served: Arc<AtomicU64>,
    pulses_seen: Arc<AtomicU64>,
}

impl CommandService {
    pub fn spawn(
        path: &Path,
        shared: Arc<VehicleShared>,
        sink: Arc<EventSink>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, CommandError> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;

        sink.emit(
            EventLevel::Info,
            "CMD",
            &format!("command endpoint listening at {}", path.display()),
        );

        let commands_served = Arc::new(AtomicU64::new(0));
        let pulses_seen = Arc::new(AtomicU64::new(0));
        let ctx = Arc::new(ServiceCtx {
            shared,
            sink,
            shutdown: Arc::clone(&shutdown),
            apply_lock: Mutex::new(()),
            commands_served: Arc::clone(&commands_served),
            pulses_seen: Arc::clone(&pulses_seen),
        });

        let accept_handle = thread::Builder::new()
            .name("command-service".into())
            .spawn(move || accept_loop(listener, ctx))?;

        Ok(Self {
            path: path.to_path_buf(),
            shutdown,
            accept_handle: Some(accept_handle),
            commands_served,
            pulses_seen,
        })
    }

    pub fn commands_served(&self) -> u64 {
        self.commands_served.load(Ordering::Relaxed)
    }

    pub fn pulses_seen(&self) -> u64 {
        self.pulses_seen.load(Ordering::Relaxed)
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

struct ServiceCtx {
    shared: Arc<VehicleShared>,
    sink: Arc<EventSink>,
    shutdown: Arc<AtomicBool>,
    /// Serializes command application across client connections.
    apply_lock: Mutex<()>,
    commands_served: Arc<AtomicU64>,
    pulses_seen: Arc<AtomicU64>,
}

fn accept_loop(listener: UnixListener, ctx: Arc<ServiceCtx>) {
    loop {
        if ctx.shutdown.load(Ordering::Acquire) {
            break;
        }
        match listener.accept() {
            Ok((stream, _addr)) => {
                let client_ctx = Arc::clone(&ctx);
                let spawned = thread::Builder::new()
                    .name("command-client".into())
                    .spawn(move || serve_client(stream, &client_ctx));
                if spawned.is_err() {
                    ctx.sink
                        .emit(EventLevel::Warn, "CMD", "failed to spawn client thread");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                ctx.sink
                    .emit(EventLevel::Warn, "CMD", &format!("accept failed: {e}"));
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve_client(mut stream: UnixStream, ctx: &ServiceCtx) {
    if stream.set_read_timeout(Some(CLIENT_READ_POLL)).is_err() {
        return;
    }
    let mut frame = [0u8; REQUEST_SIZE];
    loop {
        match read_frame(&mut stream, &mut frame, &ctx.shutdown) {
            Ok(true) => {}
            Ok(false) => return, // client disconnected
            Err(_) => return,    // shutdown or transport failure
        }

        let (msg_type, value) = decode_request(&frame);
        if msg_type == PULSE_TICK {
            // Scheduler tick multiplexed on the endpoint; no reply.
            ctx.pulses_seen.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        // One command at a time, reply written before the lock is
        // released so the next receive observes a completed exchange.
        let applying = ctx.apply_lock.lock();
        let reply = apply_command(ctx, msg_type, value);
        ctx.commands_served.fetch_add(1, Ordering::Relaxed);
        let write_ok = stream.write_all(&encode_reply(reply)).is_ok();
        drop(applying);
        if !write_ok {
            return;
        }
    }
}

/// Read one full frame, polling the shutdown flag between short waits.
fn read_frame(
    stream: &mut UnixStream,
    frame: &mut [u8; REQUEST_SIZE],
    shutdown: &AtomicBool,
) -> Result<bool, CommandError> {
    let mut filled = 0;
    while filled < REQUEST_SIZE {
        if shutdown.load(Ordering::Acquire) {
            return Err(CommandError::Shutdown);
        }
        match stream.read(&mut frame[filled..]) {
            Ok(0) => {
                return if filled == 0 {
                    Ok(false)
                } else {
                    Err(CommandError::Failed(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated command frame",
                    )))
                };
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => return Err(CommandError::Failed(e)),
        }
    }
    Ok(true)
}

fn apply_command(ctx: &ServiceCtx, msg_type: i32, value: i32) -> CommandReply {
    let shared = &ctx.shared;
    let mut ok = true;

    match msg_type {
        CMD_STATUS => {}
        CMD_GO => {
            shared.set_mission_go(true);
            shared.set_abort_requested(false);
            ctx.sink.emit(EventLevel::Info, "CMD", "mission GO");
        }
        CMD_NOGO => {
            shared.set_mission_go(false);
            ctx.sink.emit(EventLevel::Info, "CMD", "mission NO-GO");
        }
        CMD_ABORT => {
            shared.set_abort_requested(true);
            shared.set_mission_go(false);
            ctx.sink.emit(EventLevel::Critical, "CMD", "abort requested by operator");
        }
        CMD_SET_THROTTLE => {
            let clamped = value.clamp(0, 100) as u8;
            shared.set_throttle_pct(clamped);
            ctx.sink
                .emit(EventLevel::Info, "CMD", &format!("throttle set to {clamped}%"));
        }
        _ => ok = false,
    }

    CommandReply {
        ok,
        mission_go: shared.mission_go(),
        throttle: shared.throttle_pct(),
    }
}

/// Connected command client. Most callers want the one-shot
/// [`send_command`] helper instead.
pub struct CommandClient {
    stream: UnixStream,
}

impl CommandClient {
    pub fn connect(path: &Path) -> Result<Self, CommandError> {
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(Some(CLIENT_REPLY_TIMEOUT))?;
        Ok(Self { stream })
    }

    pub fn send(&mut self, command: OperatorCommand) -> Result<CommandReply, CommandError> {
        self.stream
            .write_all(&encode_request(command.type_code(), command.value()))?;
        let mut reply = [0u8; REPLY_SIZE];
        match self.stream.read_exact(&mut reply) {
            Ok(()) => Ok(decode_reply(&reply)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(CommandError::Shutdown),
            Err(e) => Err(CommandError::Failed(e)),
        }
    }
}

/// Connect, send one command, receive the reply, disconnect.
pub fn send_command(path: &Path, command: OperatorCommand) -> Result<CommandReply, CommandError> {
    let mut client = CommandClient::connect(path)?;
    client.send(command)
}
