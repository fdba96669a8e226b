use std::sync::Arc;

use crate::config::VehicleConfig;
use crate::events::{EventLevel, EventSink};
use crate::scheduler::{BodyFailure, Subsystem};
use crate::state::{MissionPhase, SystemState, VehicleShared};
use crate::subsystems::engines::NUM_ENGINES;

const GRAVITY_MS2: f64 = 9.81;
const SEA_LEVEL_DENSITY: f64 = 1.225;
const ATMOSPHERE_SCALE_HEIGHT_M: f64 = 8_000.0;
const ATMOSPHERE_CEILING_M: f64 = 100_000.0;
const DRAG_COEFFICIENT: f64 = 0.3;
const REFERENCE_AREA_M2: f64 = 50.0;
const SPEED_OF_SOUND_MS: f64 = 343.0;
const FUEL_BURN_RATE_KGS: f64 = 1_000.0;

const IGNITION_THRUST_FRACTION: f64 = 0.5;
const ASCENT_THROTTLE_FRACTION: f64 = 0.75;
const STAGE_SEPARATION_MASS_FRACTION: f64 = 0.3;

// Phase transition times against the mission clock, seconds from T-0.
const COUNTDOWN_START_S: f64 = -600.0;
const IGNITION_START_S: f64 = -6.0;
const ASCENT_START_S: f64 = 10.0;
const STAGE_SEPARATION_S: f64 = 120.0;
const ORBIT_INSERTION_S: f64 = 125.0;
const MISSION_COMPLETE_S: f64 = 480.0;

// Velocity-loop PID, per axis.
const PID_KP: f64 = 0.1;
const PID_KI: f64 = 0.01;
const PID_KD: f64 = 0.05;
const PID_OUTPUT_LIMIT_MS2: f64 = 10.0;

// Safety check thresholds.
const LOW_FUEL_PCT: f64 = 5.0;
const MAX_DYNAMIC_PRESSURE_PA: f64 = 50_000.0;
const MAX_ACCELERATION_MS2: f64 = 5.0 * GRAVITY_MS2;

const AXIS_DOWNRANGE: usize = 0;
const AXIS_VERTICAL: usize = 2;

const STATE_LOG_INTERVAL_S: f64 = 1.0;

#[derive(Debug, Default, Clone, Copy)]
struct AxisPid {
    integral: f64,
    last_error: f64,
    primed: bool,
}

impl AxisPid {
    fn update(&mut self, error: f64, dt_s: f64) -> f64 {
        if !self.primed {
            // Avoid a derivative kick on the first sample after activation.
            self.last_error = error;
            self.primed = true;
        }
        self.integral += error * dt_s;
        let derivative = if dt_s > 0.0 {
            (error - self.last_error) / dt_s
        } else {
            0.0
        };
        self.last_error = error;
        let output = PID_KP * error + PID_KI * self.integral + PID_KD * derivative;
        output.clamp(-PID_OUTPUT_LIMIT_MS2, PID_OUTPUT_LIMIT_MS2)
    }

    fn reset(&mut self) {
        *self = AxisPid::default();
    }
}

/// Flight control computer: dynamics integration, mission phase policy
/// and the velocity autopilot. Designated writer for every physics field
/// of the shared vehicle state and for the mission clock.
pub struct FlightControl {
    cfg: VehicleConfig,
    shared: Arc<VehicleShared>,
    sink: Arc<EventSink>,

    mission_time_s: f64,
    phase: MissionPhase,
    position_m: [f64; 3],
    velocity_ms: [f64; 3],
    acceleration_ms2: [f64; 3],
    mass_kg: f64,
    thrust_n: f64,

    autopilot_enabled: bool,
    guidance_active: bool,
    target_velocity_ms: [f64; 3],
    pid: [AxisPid; 3],

    last_state_log_s: f64,
    started: bool,
}

impl FlightControl {
    pub fn new(cfg: VehicleConfig, shared: Arc<VehicleShared>, sink: Arc<EventSink>) -> Self {
        let mass = cfg.initial_mass_kg();
        let mission_time = cfg.mission_start_time_s;
        sink.emit(
            EventLevel::Info,
            "FCC",
            &format!("flight control initialized, vehicle mass {mass:.0} kg"),
        );
        Self {
            cfg,
            shared,
            sink,
            mission_time_s: mission_time,
            phase: MissionPhase::PreLaunch,
            position_m: [0.0; 3],
            velocity_ms: [0.0; 3],
            acceleration_ms2: [0.0; 3],
            mass_kg: mass,
            thrust_n: 0.0,
            autopilot_enabled: true,
            guidance_active: false,
            target_velocity_ms: [0.0; 3],
            pid: [AxisPid::default(); 3],
            last_state_log_s: f64::NEG_INFINITY,
            started: false,
        }
    }

    pub fn phase(&self) -> MissionPhase {
        self.phase
    }

    pub fn autopilot_enabled(&self) -> bool {
        self.autopilot_enabled
    }

    pub fn mission_time_s(&self) -> f64 {
        self.mission_time_s
    }

    /// Total thrust currently commanded by the phase policy.
    pub fn thrust_n(&self) -> f64 {
        self.thrust_n
    }

    fn transition(&mut self, next: MissionPhase) {
        if next == self.phase {
            return;
        }
        let previous = self.phase;
        self.phase = next;
        self.sink.emit(
            EventLevel::Info,
            "FCC",
            &format!("mission phase {previous} -> {next} at T{:+.1}", self.mission_time_s),
        );

        match next {
            MissionPhase::Liftoff => {
                self.guidance_active = true;
                for pid in &mut self.pid {
                    pid.reset();
                }
                self.sink
                    .emit(EventLevel::Info, "FCC", "LIFTOFF, vehicle departing pad");
            }
            MissionPhase::StageSeparation => {
                self.mass_kg *= STAGE_SEPARATION_MASS_FRACTION;
                self.sink.emit(
                    EventLevel::Info,
                    "FCC",
                    &format!("stage separation, mass now {:.0} kg", self.mass_kg),
                );
            }
            MissionPhase::MissionComplete => {
                self.guidance_active = false;
                self.sink.emit(EventLevel::Info, "FCC", "mission complete");
            }
            MissionPhase::Abort => {
                self.autopilot_enabled = false;
                self.guidance_active = false;
                self.shared.set_system_state(SystemState::Emergency);
                self.sink.emit(
                    EventLevel::Critical,
                    "FCC",
                    "MISSION ABORT, emergency procedures active",
                );
            }
            _ => {}
        }
    }

    fn update_phase(&mut self) {
        if self.shared.abort_requested() && !self.phase.is_terminal() {
            self.transition(MissionPhase::Abort);
            return;
        }

        let mt = self.mission_time_s;
        let next = match self.phase {
            MissionPhase::PreLaunch if mt >= COUNTDOWN_START_S => Some(MissionPhase::Countdown),
            MissionPhase::Countdown if mt >= IGNITION_START_S => Some(MissionPhase::Ignition),
            MissionPhase::Ignition
                if self.shared.engines_running() as usize == NUM_ENGINES =>
            {
                Some(MissionPhase::Liftoff)
            }
            MissionPhase::Liftoff if mt >= ASCENT_START_S => Some(MissionPhase::Ascent),
            MissionPhase::Ascent if mt >= STAGE_SEPARATION_S => Some(MissionPhase::StageSeparation),
            MissionPhase::StageSeparation if mt >= ORBIT_INSERTION_S => {
                Some(MissionPhase::OrbitInsertion)
            }
            MissionPhase::OrbitInsertion if mt >= MISSION_COMPLETE_S => {
                Some(MissionPhase::MissionComplete)
            }
            _ => None,
        };
        if let Some(next) = next {
            self.transition(next);
        }
    }

    fn apply_forces(&mut self, dt_s: f64) {
        if self.phase.in_flight() {
            let throttle_fraction = if self.phase == MissionPhase::Ascent {
                // Max-Q throttle down.
                ASCENT_THROTTLE_FRACTION
            } else {
                1.0
            };
            self.thrust_n = self.cfg.max_thrust_n * throttle_fraction;

            let thrust_accel = self.thrust_n / self.mass_kg;
            self.acceleration_ms2 = [0.0, 0.0, thrust_accel - GRAVITY_MS2];

            self.mass_kg -= FUEL_BURN_RATE_KGS * dt_s;
            self.mass_kg = self.mass_kg.max(self.cfg.dry_mass_kg);
        } else if self.phase == MissionPhase::Ignition {
            // Engines coming up, ground support still holds the vehicle.
            self.thrust_n = self.cfg.max_thrust_n * IGNITION_THRUST_FRACTION;
            self.hold_on_ground();
        } else {
            self.thrust_n = 0.0;
            if self.phase.ground_held() {
                self.hold_on_ground();
            } else {
                // Terminal phases: unpowered, gravity only.
                self.acceleration_ms2 = [0.0, 0.0, -GRAVITY_MS2];
            }
        }
    }

    fn hold_on_ground(&mut self) {
        self.acceleration_ms2 = [0.0; 3];
        self.velocity_ms = [0.0; 3];
        self.position_m[AXIS_VERTICAL] = 0.0;
    }

    fn update_guidance(&mut self) {
        match self.phase {
            MissionPhase::Liftoff => {
                // Vertical ascent off the pad.
                self.target_velocity_ms = [0.0, 0.0, 50.0];
            }
            MissionPhase::Ascent | MissionPhase::StageSeparation => {
                let altitude = self.position_m[AXIS_VERTICAL];
                if altitude > 1_000.0 {
                    // Gradual gravity turn, capped at 60 degrees.
                    let pitch = ((altitude - 1_000.0) / 10_000.0)
                        .atan()
                        .min(std::f64::consts::FRAC_PI_3);
                    let target_speed = 200.0 + altitude * 0.01;
                    self.target_velocity_ms[AXIS_DOWNRANGE] = target_speed * pitch.sin();
                    self.target_velocity_ms[AXIS_VERTICAL] = target_speed * pitch.cos();
                }
            }
            MissionPhase::OrbitInsertion => {
                self.target_velocity_ms = [7_800.0, 0.0, 0.0];
            }
            _ => return,
        }
        self.guidance_active = true;
    }

    fn update_autopilot(&mut self, dt_s: f64) {
        if !self.guidance_active {
            return;
        }
        for axis in 0..3 {
            let error = self.target_velocity_ms[axis] - self.velocity_ms[axis];
            self.acceleration_ms2[axis] += self.pid[axis].update(error, dt_s);
        }
    }

    fn apply_drag(&mut self) {
        let altitude = self.position_m[AXIS_VERTICAL];
        if altitude >= ATMOSPHERE_CEILING_M {
            return;
        }
        let speed = vector_norm(&self.velocity_ms);
        if speed <= 0.0 {
            return;
        }
        let density = air_density(altitude);
        let drag_force =
            0.5 * density * speed * speed * DRAG_COEFFICIENT * REFERENCE_AREA_M2;
        for axis in 0..3 {
            self.acceleration_ms2[axis] -=
                (drag_force / self.mass_kg) * (self.velocity_ms[axis] / speed);
        }
    }

    fn integrate(&mut self, dt_s: f64) {
        for axis in 0..3 {
            self.velocity_ms[axis] += self.acceleration_ms2[axis] * dt_s;
            self.position_m[axis] += self.velocity_ms[axis] * dt_s;
        }

        if self.position_m[AXIS_VERTICAL] < 0.0 {
            if self.phase.in_flight() {
                self.sink.emit(
                    EventLevel::Warn,
                    "FCC",
                    &format!(
                        "vehicle below ground level during flight: {:.1} m",
                        self.position_m[AXIS_VERTICAL]
                    ),
                );
            }
            self.position_m[AXIS_VERTICAL] = 0.0;
            if self.velocity_ms[AXIS_VERTICAL] < 0.0 {
                self.velocity_ms[AXIS_VERTICAL] = 0.0;
            }
        }
    }

    fn check_constraints(&mut self, dynamic_pressure: f64) {
        let fuel_pct = self.fuel_pct();
        if fuel_pct < LOW_FUEL_PCT && self.phase.in_flight() && self.phase < MissionPhase::OrbitInsertion {
            self.sink.emit(
                EventLevel::Warn,
                "FCC",
                &format!("low fuel warning: {fuel_pct:.1}% remaining"),
            );
        }
        if dynamic_pressure > MAX_DYNAMIC_PRESSURE_PA {
            self.sink.emit(
                EventLevel::Warn,
                "FCC",
                &format!("high dynamic pressure: {dynamic_pressure:.0} Pa"),
            );
        }
        let accel = vector_norm(&self.acceleration_ms2);
        if accel > MAX_ACCELERATION_MS2 {
            self.sink.emit(
                EventLevel::Warn,
                "FCC",
                &format!("high acceleration: {accel:.1} m/s^2"),
            );
        }
    }

    fn fuel_pct(&self) -> f64 {
        ((self.mass_kg - self.cfg.dry_mass_kg) / self.cfg.fuel_mass_kg * 100.0).clamp(0.0, 100.0)
    }

    fn publish(&mut self, dynamic_pressure: f64, mach: f64) {
        let shared = &self.shared;
        shared.set_mission_time_s(self.mission_time_s);
        shared.set_altitude_m(self.position_m[AXIS_VERTICAL]);
        shared.set_velocity_ms(self.velocity_ms[AXIS_VERTICAL]);
        shared.set_acceleration_ms2(vector_norm(&self.acceleration_ms2));
        shared.set_fuel_pct(self.fuel_pct());
        shared.set_mass_kg(self.mass_kg);
        shared.set_dynamic_pressure_pa(dynamic_pressure);
        shared.set_mach(mach);
        shared.set_phase(self.phase);

        if self.mission_time_s - self.last_state_log_s >= STATE_LOG_INTERVAL_S {
            self.last_state_log_s = self.mission_time_s;
            self.sink.emit(
                EventLevel::Info,
                "FCC",
                &format!(
                    "T{:+.1} Alt={:.0}m Vel={:.1}m/s Fuel={:.1}%",
                    self.mission_time_s,
                    self.position_m[AXIS_VERTICAL],
                    self.velocity_ms[AXIS_VERTICAL],
                    self.fuel_pct()
                ),
            );
        }
    }
}

impl Subsystem for FlightControl {
    fn step(&mut self, dt_s: f64) -> Result<(), BodyFailure> {
        if dt_s <= 0.0 || dt_s > 1.0 {
            return Ok(());
        }
        if !self.started {
            self.started = true;
            self.shared.set_system_state(SystemState::Active);
        }

        self.mission_time_s += dt_s;
        self.update_phase();
        self.apply_forces(dt_s);

        if self.phase.in_flight() {
            self.update_guidance();
            if self.autopilot_enabled {
                self.update_autopilot(dt_s);
            }
        }
        // Drag applies whenever the vehicle moves through atmosphere,
        // powered or not; it gates itself on altitude and speed.
        self.apply_drag();

        self.integrate(dt_s);

        let altitude = self.position_m[AXIS_VERTICAL];
        let speed = vector_norm(&self.velocity_ms);
        let dynamic_pressure = 0.5 * air_density(altitude) * speed * speed;
        let mach = speed / SPEED_OF_SOUND_MS;

        self.check_constraints(dynamic_pressure);
        self.publish(dynamic_pressure, mach);
        Ok(())
    }
}

fn air_density(altitude_m: f64) -> f64 {
    SEA_LEVEL_DENSITY * (-altitude_m / ATMOSPHERE_SCALE_HEIGHT_M).exp()
}

fn vector_norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
