use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Top-level state of the vehicle's mission lifecycle.
///
/// Transitions are monotone in declaration order, except `Abort`, which
/// may be entered from any non-terminal phase and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MissionPhase {
    PreLaunch = 0,
    Countdown = 1,
    Ignition = 2,
    Liftoff = 3,
    Ascent = 4,
    StageSeparation = 5,
    OrbitInsertion = 6,
    MissionComplete = 7,
    Abort = 8,
}

impl MissionPhase {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MissionPhase::PreLaunch,
            1 => MissionPhase::Countdown,
            2 => MissionPhase::Ignition,
            3 => MissionPhase::Liftoff,
            4 => MissionPhase::Ascent,
            5 => MissionPhase::StageSeparation,
            6 => MissionPhase::OrbitInsertion,
            7 => MissionPhase::MissionComplete,
            _ => MissionPhase::Abort,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MissionPhase::MissionComplete | MissionPhase::Abort)
    }

    /// Liftoff through orbit insertion: thrust and guidance are active.
    pub fn in_flight(self) -> bool {
        matches!(
            self,
            MissionPhase::Liftoff
                | MissionPhase::Ascent
                | MissionPhase::StageSeparation
                | MissionPhase::OrbitInsertion
        )
    }

    /// Ground support holds the vehicle at zero velocity and altitude.
    pub fn ground_held(self) -> bool {
        matches!(
            self,
            MissionPhase::PreLaunch | MissionPhase::Countdown | MissionPhase::Ignition
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MissionPhase::PreLaunch => "PRELAUNCH",
            MissionPhase::Countdown => "COUNTDOWN",
            MissionPhase::Ignition => "IGNITION",
            MissionPhase::Liftoff => "LIFTOFF",
            MissionPhase::Ascent => "ASCENT",
            MissionPhase::StageSeparation => "STAGE_SEPARATION",
            MissionPhase::OrbitInsertion => "ORBIT_INSERTION",
            MissionPhase::MissionComplete => "MISSION_COMPLETE",
            MissionPhase::Abort => "ABORT",
        }
    }
}

impl std::fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SystemState {
    Offline = 0,
    Initializing = 1,
    Standby = 2,
    Active = 3,
    Fault = 4,
    Emergency = 5,
    Shutdown = 6,
}

impl SystemState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SystemState::Offline,
            1 => SystemState::Initializing,
            2 => SystemState::Standby,
            3 => SystemState::Active,
            4 => SystemState::Fault,
            5 => SystemState::Emergency,
            _ => SystemState::Shutdown,
        }
    }
}

/// f64 scalar with release stores and acquire loads.
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Process-global vehicle state: lock-free scalars, one designated writer
/// per field.
///
/// Writer map:
/// - command service: `mission_go`, `throttle_pct`, `abort_requested`
/// - flight control: all physics scalars, `mission_time_s`, `phase`,
///   `system_state`
/// - engine control: `engines_running`, `engine_thrust_pct`, `engine_faults`
///
/// Readers may observe a tick of skew across fields; composite snapshots
/// are not atomic.
#[derive(Debug)]
pub struct VehicleShared {
    mission_time_s: AtomicF64,
    altitude_m: AtomicF64,
    velocity_ms: AtomicF64,
    acceleration_ms2: AtomicF64,
    fuel_pct: AtomicF64,
    mass_kg: AtomicF64,
    dynamic_pressure_pa: AtomicF64,
    mach: AtomicF64,
    phase: AtomicU8,
    system_state: AtomicU8,

    mission_go: AtomicBool,
    abort_requested: AtomicBool,
    throttle_pct: AtomicU8,

    engines_running: AtomicU8,
    engine_thrust_pct: AtomicF64,
    engine_faults: AtomicU8,
}

/// Non-atomic copy of the shared scalars, for sampling and logging.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleSnapshot {
    pub mission_time_s: f64,
    pub altitude_m: f64,
    pub velocity_ms: f64,
    pub acceleration_ms2: f64,
    pub fuel_pct: f64,
    pub mass_kg: f64,
    pub dynamic_pressure_pa: f64,
    pub mach: f64,
    pub phase: MissionPhase,
    pub system_state: SystemState,
    pub mission_go: bool,
    pub abort_requested: bool,
    pub throttle_pct: u8,
    pub engines_running: u8,
    pub engine_thrust_pct: f64,
    pub engine_faults: u8,
}

impl VehicleShared {
    pub fn new(initial_mass_kg: f64, mission_start_time_s: f64) -> Self {
        Self {
            mission_time_s: AtomicF64::new(mission_start_time_s),
            altitude_m: AtomicF64::new(0.0),
            velocity_ms: AtomicF64::new(0.0),
            acceleration_ms2: AtomicF64::new(0.0),
            fuel_pct: AtomicF64::new(100.0),
            mass_kg: AtomicF64::new(initial_mass_kg),
            dynamic_pressure_pa: AtomicF64::new(0.0),
            mach: AtomicF64::new(0.0),
            phase: AtomicU8::new(MissionPhase::PreLaunch as u8),
            system_state: AtomicU8::new(SystemState::Initializing as u8),
            mission_go: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
            throttle_pct: AtomicU8::new(0),
            engines_running: AtomicU8::new(0),
            engine_thrust_pct: AtomicF64::new(0.0),
            engine_faults: AtomicU8::new(0),
        }
    }

    pub fn mission_time_s(&self) -> f64 {
        self.mission_time_s.load()
    }

    pub fn set_mission_time_s(&self, value: f64) {
        self.mission_time_s.store(value);
    }

    pub fn altitude_m(&self) -> f64 {
        self.altitude_m.load()
    }

    pub fn set_altitude_m(&self, value: f64) {
        self.altitude_m.store(value);
    }

    pub fn velocity_ms(&self) -> f64 {
        self.velocity_ms.load()
    }

    pub fn set_velocity_ms(&self, value: f64) {
        self.velocity_ms.store(value);
    }

    pub fn acceleration_ms2(&self) -> f64 {
        self.acceleration_ms2.load()
    }

    pub fn set_acceleration_ms2(&self, value: f64) {
        self.acceleration_ms2.store(value);
    }

    pub fn fuel_pct(&self) -> f64 {
        self.fuel_pct.load()
    }

    pub fn set_fuel_pct(&self, value: f64) {
        self.fuel_pct.store(value);
    }

    pub fn mass_kg(&self) -> f64 {
        self.mass_kg.load()
    }

    pub fn set_mass_kg(&self, value: f64) {
        self.mass_kg.store(value);
    }

    pub fn dynamic_pressure_pa(&self) -> f64 {
        self.dynamic_pressure_pa.load()
    }

    pub fn set_dynamic_pressure_pa(&self, value: f64) {
        self.dynamic_pressure_pa.store(value);
    }

    pub fn mach(&self) -> f64 {
        self.mach.load()
    }

    pub fn set_mach(&self, value: f64) {
        self.mach.store(value);
    }

    pub fn phase(&self) -> MissionPhase {
        MissionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: MissionPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn system_state(&self) -> SystemState {
        SystemState::from_u8(self.system_state.load(Ordering::Acquire))
    }

    pub fn set_system_state(&self, state: SystemState) {
        self.system_state.store(state as u8, Ordering::Release);
    }

    pub fn mission_go(&self) -> bool {
        self.mission_go.load(Ordering::Acquire)
    }

    pub fn set_mission_go(&self, value: bool) {
        self.mission_go.store(value, Ordering::Release);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }

    pub fn set_abort_requested(&self, value: bool) {
        self.abort_requested.store(value, Ordering::Release);
    }

    pub fn throttle_pct(&self) -> u8 {
        self.throttle_pct.load(Ordering::Acquire)
    }

    pub fn set_throttle_pct(&self, value: u8) {
        self.throttle_pct.store(value.min(100), Ordering::Release);
    }

    pub fn engines_running(&self) -> u8 {
        self.engines_running.load(Ordering::Acquire)
    }

    pub fn set_engines_running(&self, value: u8) {
        self.engines_running.store(value, Ordering::Release);
    }

    pub fn engine_thrust_pct(&self) -> f64 {
        self.engine_thrust_pct.load()
    }

    pub fn set_engine_thrust_pct(&self, value: f64) {
        self.engine_thrust_pct.store(value);
    }

    pub fn engine_faults(&self) -> u8 {
        self.engine_faults.load(Ordering::Acquire)
    }

    pub fn set_engine_faults(&self, value: u8) {
        self.engine_faults.store(value, Ordering::Release);
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            mission_time_s: self.mission_time_s(),
            altitude_m: self.altitude_m(),
            velocity_ms: self.velocity_ms(),
            acceleration_ms2: self.acceleration_ms2(),
            fuel_pct: self.fuel_pct(),
            mass_kg: self.mass_kg(),
            dynamic_pressure_pa: self.dynamic_pressure_pa(),
            mach: self.mach(),
            phase: self.phase(),
            system_state: self.system_state(),
            mission_go: self.mission_go(),
            abort_requested: self.abort_requested(),
            throttle_pct: self.throttle_pct(),
            engines_running: self.engines_running(),
            engine_thrust_pct: self.engine_thrust_pct(),
            engine_faults: self.engine_faults(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_scalars_round_trip() {
        let shared = VehicleShared::new(2_000_000.0, -630.0);
        shared.set_altitude_m(1234.5678);
        assert_eq!(shared.altitude_m(), 1234.5678);
        shared.set_velocity_ms(-3.25);
        assert_eq!(shared.velocity_ms(), -3.25);
        assert_eq!(shared.mission_time_s(), -630.0);
    }

    #[test]
    fn phase_encoding_round_trips() {
        let shared = VehicleShared::new(1.0, 0.0);
        for phase in [
            MissionPhase::PreLaunch,
            MissionPhase::Countdown,
            MissionPhase::Ignition,
            MissionPhase::Liftoff,
            MissionPhase::Ascent,
            MissionPhase::StageSeparation,
            MissionPhase::OrbitInsertion,
            MissionPhase::MissionComplete,
            MissionPhase::Abort,
        ] {
            shared.set_phase(phase);
            assert_eq!(shared.phase(), phase);
        }
    }

    #[test]
    fn phase_order_matches_mission_sequence() {
        assert!(MissionPhase::PreLaunch < MissionPhase::Countdown);
        assert!(MissionPhase::Countdown < MissionPhase::Ignition);
        assert!(MissionPhase::OrbitInsertion < MissionPhase::MissionComplete);
        assert!(MissionPhase::Abort.is_terminal());
        assert!(MissionPhase::MissionComplete.is_terminal());
        assert!(MissionPhase::Ignition.ground_held());
        assert!(MissionPhase::Liftoff.in_flight());
    }

    #[test]
    fn throttle_is_clamped_at_the_store() {
        let shared = VehicleShared::new(1.0, 0.0);
        shared.set_throttle_pct(250);
        assert_eq!(shared.throttle_pct(), 100);
    }
}
