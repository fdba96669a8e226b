use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use slsim::clock::{self, PULSE_TICK};
use slsim::command::CommandService;
use slsim::config::SimConfig;
use slsim::device::DeviceServer;
use slsim::events::EventSink;
use slsim::ring::TelemetryRing;
use slsim::scheduler::{priority, Scheduler, SubsystemSpec};
use slsim::state::{MissionPhase, SystemState, VehicleShared};
use slsim::subsystems::{EngineControl, FlightControl, SafetyMonitor, TelemetrySampler};

const MAIN_POLL: Duration = Duration::from_millis(200);

static SIGNAL_SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signum: libc::c_int) {
    SIGNAL_SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    // SAFETY: the handler only touches a static atomic, which is
    // async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

#[derive(Parser, Debug)]
#[command(name = "slsim-simulator", version, about = "Space launch vehicle simulator")]
struct Args {
    /// Optional JSON configuration file; defaults apply otherwise.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };

    println!("Space Launch Vehicle Simulator");
    println!("==============================");

    install_signal_handlers();

    let shutdown = Arc::new(AtomicBool::new(false));
    let sink = Arc::new(EventSink::new());
    let shared = Arc::new(VehicleShared::new(
        config.vehicle.initial_mass_kg(),
        config.vehicle.mission_start_time_s,
    ));
    let ring = Arc::new(TelemetryRing::with_capacity(config.telemetry.ring_capacity));

    // Telemetry device endpoint.
    let device = DeviceServer::serve(
        &config.telemetry.device_path,
        Arc::clone(&ring),
        Arc::clone(&sink),
        Arc::clone(&shutdown),
    )?;
    info!("telemetry device at {}", config.telemetry.device_path.display());

    // Operator command endpoint.
    let endpoint = config.command.endpoint_path();
    let command_service = CommandService::spawn(
        &endpoint,
        Arc::clone(&shared),
        Arc::clone(&sink),
        Arc::clone(&shutdown),
    )?;
    info!("command endpoint `{}` at {}", config.command.endpoint, endpoint.display());

    // Periodic pulse multiplexed onto the command endpoint. A timer that
    // cannot be armed is not fatal; the service just runs untick'd.
    let pulse = match clock::PulseSource::start(
        Duration::from_millis(config.timing.pulse_period_ms),
        PULSE_TICK,
        0,
    ) {
        Ok((source, rx)) => Some((source, rx)),
        Err(e) => {
            sink.emit(
                slsim::events::EventLevel::Critical,
                "CLOCK",
                &format!("failed to arm pulse timer: {e}"),
            );
            None
        }
    };
    let pulse_forwarder = match pulse {
        Some((source, pulse_rx)) => {
            let endpoint = endpoint.clone();
            let shutdown = Arc::clone(&shutdown);
            let handle = thread::Builder::new().name("pulse-forwarder".into()).spawn(move || {
                use std::io::Write;
                let mut stream: Option<std::os::unix::net::UnixStream> = None;
                loop {
                    match pulse_rx.recv_timeout(MAIN_POLL) {
                        Ok(pulse) => {
                            if shutdown.load(Ordering::Acquire) {
                                break;
                            }
                            if stream.is_none() {
                                stream = std::os::unix::net::UnixStream::connect(&endpoint).ok();
                            }
                            let frame = slsim::command::encode_request(pulse.code, pulse.value);
                            if let Some(s) = stream.as_mut() {
                                if s.write_all(&frame).is_err() {
                                    stream = None;
                                }
                            }
                        }
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                            if shutdown.load(Ordering::Acquire) {
                                break;
                            }
                        }
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
            Some((source, handle))
        }
        None => None,
    };

    // Periodic subsystems, fixed priorities.
    let mut scheduler = Scheduler::new(
        Arc::clone(&sink),
        Arc::clone(&shutdown),
        config.timing.restart_limit,
    );
    let epoch = scheduler.epoch();

    let fcc = FlightControl::new(
        config.vehicle.clone(),
        Arc::clone(&shared),
        Arc::clone(&sink),
    );
    let fcc_stats = scheduler.spawn(
        SubsystemSpec::new(
            "FlightControl",
            "FCC",
            hz_period(config.timing.flight_control_hz),
            priority::FLIGHT_CONTROL,
        ),
        Box::new(fcc),
    )?;

    let ecs = EngineControl::new(
        config.engines.clone(),
        Arc::clone(&shared),
        Arc::clone(&sink),
    );
    let ecs_stats = scheduler.spawn(
        SubsystemSpec::new(
            "EngineControl",
            "ECS",
            hz_period(config.timing.engine_control_hz),
            priority::ENGINE_CONTROL,
        ),
        Box::new(ecs),
    )?;

    let sampler = TelemetrySampler::new(
        Arc::clone(&shared),
        Arc::clone(&ring),
        Arc::clone(&sink),
    );
    let telem_stats = scheduler.spawn(
        SubsystemSpec::new(
            "Telemetry",
            "TELEM",
            hz_period(config.timing.telemetry_hz),
            priority::TELEMETRY,
        ),
        Box::new(sampler),
    )?;

    let monitor = SafetyMonitor::new(
        Arc::clone(&shared),
        Arc::clone(&sink),
        vec![
            ("FlightControl", fcc_stats),
            ("EngineControl", ecs_stats),
            ("Telemetry", telem_stats),
        ],
        config.timing.watchdog_timeout_ms,
        epoch,
    );
    scheduler.spawn(
        SubsystemSpec::new(
            "SafetyMonitor",
            "SAFETY",
            hz_period(config.timing.safety_monitor_hz),
            priority::SAFETY_MONITOR,
        ),
        Box::new(monitor),
    )?;

    shared.set_system_state(SystemState::Active);
    info!("all subsystems running");

    // Supervise until a signal, a fatal subsystem cascade, or the vehicle
    // reaches a terminal state at rest.
    loop {
        thread::sleep(MAIN_POLL);
        if SIGNAL_SHUTDOWN.load(Ordering::SeqCst) {
            info!("shutdown signal received");
            break;
        }
        if shutdown.load(Ordering::Acquire) {
            error!("scheduler requested shutdown");
            break;
        }
        let phase = shared.phase();
        if phase == MissionPhase::MissionComplete {
            info!("mission complete");
            break;
        }
        if phase == MissionPhase::Abort
            && shared.altitude_m() <= 0.0
            && shared.velocity_ms().abs() < 0.01
            && shared.engines_running() == 0
        {
            info!("abort sequence complete, vehicle safed");
            break;
        }
    }

    shared.set_system_state(SystemState::Shutdown);
    shutdown.store(true, Ordering::Release);

    scheduler.shutdown_and_join();
    if let Some((source, forwarder)) = pulse_forwarder {
        source.stop();
        let _ = forwarder.join();
    }
    command_service.stop();
    ring.close();
    device.stop();

    println!("simulator stopped");
    Ok(())
}

fn hz_period(rate_hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1)))
}
