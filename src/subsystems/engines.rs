use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::FaultKind;
use crate::config::EngineConfig;
use crate::events::{EventLevel, EventSink};
use crate::scheduler::{BodyFailure, Subsystem};
use crate::state::{MissionPhase, VehicleShared};

pub const NUM_ENGINES: usize = 4;

const AMBIENT_PRESSURE_PA: f64 = 101_325.0;
const MIN_CHAMBER_PA: f64 = 1_000_000.0;
const MAX_NOZZLE_TEMP_K: f64 = 3_000.0;
const MIN_TURBOPUMP_RPM: f64 = 8_000.0;
const TURBOPUMP_FULL_RPM: f64 = 12_000.0;
const AMBIENT_NOZZLE_K: f64 = 300.0;
const RUNNING_NOZZLE_K: f64 = 2_500.0;
const FUEL_FLOW_FULL_KGS: f64 = 200.0;
const OX_FLOW_FULL_KGS: f64 = 400.0;
const THRUST_RAMP_PCT_PER_S: f64 = 20.0;
const PER_ENGINE_IGNITION_DELAY_S: f64 = 1.0;

// Coordinated ignition sequence stage boundaries, seconds from start.
const SEQ_PRESTART_END_S: f64 = 1.0;
const SEQ_SPINUP_END_S: f64 = 3.0;
const SEQ_IGNITE_END_S: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineFsm {
    Offline,
    PreStart,
    Ignition,
    Running,
    Shutdown,
    Fault,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineState {
    pub id: u8,
    pub state: EngineFsm,
    pub thrust_pct: f64,
    pub chamber_pa: f64,
    pub fuel_flow_kgs: f64,
    pub ox_flow_kgs: f64,
    pub nozzle_k: f64,
    pub turbopump_rpm: f64,
    pub ignition_elapsed_s: f64,
    pub shutdown_elapsed_s: f64,
    pub fault: Option<FaultKind>,
}

impl EngineState {
    fn new(id: u8) -> Self {
        Self {
            id,
            state: EngineFsm::Offline,
            thrust_pct: 0.0,
            chamber_pa: AMBIENT_PRESSURE_PA,
            fuel_flow_kgs: 0.0,
            ox_flow_kgs: 0.0,
            nozzle_k: AMBIENT_NOZZLE_K,
            turbopump_rpm: 0.0,
            ignition_elapsed_s: 0.0,
            shutdown_elapsed_s: 0.0,
            fault: None,
        }
    }
}

struct Engine {
    state: EngineState,
    ignition_enabled: bool,
}

/// Engine control system: four independent engines driven through
/// coordinated ignition and shutdown sequences.
///
/// Faults are sticky: a faulted engine stays in `Fault` at zero thrust
/// until [`EngineControl::reset_faults`].
pub struct EngineControl {
    engines: [Engine; NUM_ENGINES],
    cfg: EngineConfig,
    shared: Arc<VehicleShared>,
    sink: Arc<EventSink>,
    rng: SmallRng,
    prev_phase: MissionPhase,
    ignition_active: bool,
    ignition_timer_s: f64,
    shutdown_active: bool,
    shutdown_timer_s: f64,
}

impl EngineControl {
    pub fn new(cfg: EngineConfig, shared: Arc<VehicleShared>, sink: Arc<EventSink>) -> Self {
        let rng = SmallRng::seed_from_u64(cfg.rng_seed);
        sink.emit(
            EventLevel::Info,
            "ECS",
            &format!("engine control initialized, {NUM_ENGINES} engines"),
        );
        Self {
            engines: std::array::from_fn(|i| Engine {
                state: EngineState::new(i as u8 + 1),
                ignition_enabled: false,
            }),
            cfg,
            shared,
            sink,
            rng,
            prev_phase: MissionPhase::PreLaunch,
            ignition_active: false,
            ignition_timer_s: 0.0,
            shutdown_active: false,
            shutdown_timer_s: 0.0,
        }
    }

    pub fn engine_states(&self) -> [EngineState; NUM_ENGINES] {
        std::array::from_fn(|i| self.engines[i].state.clone())
    }

    pub fn running_count(&self) -> u8 {
        self.engines
            .iter()
            .filter(|e| e.state.state == EngineFsm::Running)
            .count() as u8
    }

    pub fn fault_count(&self) -> u8 {
        self.engines.iter().filter(|e| e.state.fault.is_some()).count() as u8
    }

    /// Clear sticky faults and return faulted engines to Offline.
    pub fn reset_faults(&mut self) {
        for engine in &mut self.engines {
            if engine.state.fault.take().is_some() {
                engine.state.state = EngineFsm::Offline;
                engine.state.thrust_pct = 0.0;
                engine.state.ignition_elapsed_s = 0.0;
                engine.state.shutdown_elapsed_s = 0.0;
                self.sink.emit(
                    EventLevel::Info,
                    "ECS",
                    &format!("engine {} fault reset", engine.state.id),
                );
            }
        }
    }

    fn handle_phase(&mut self, phase: MissionPhase) {
        if phase == self.prev_phase {
            return;
        }
        match phase {
            MissionPhase::Ignition => {
                if !self.ignition_active && !self.shutdown_active {
                    self.ignition_active = true;
                    self.ignition_timer_s = 0.0;
                    self.sink
                        .emit(EventLevel::Info, "ECS", "ignition sequence started");
                }
            }
            MissionPhase::Abort | MissionPhase::MissionComplete => {
                self.begin_shutdown();
            }
            _ => {}
        }
        self.prev_phase = phase;
    }

    fn begin_shutdown(&mut self) {
        let any_lit = self
            .engines
            .iter()
            .any(|e| !matches!(e.state.state, EngineFsm::Offline | EngineFsm::Fault));
        if any_lit && !self.shutdown_active {
            self.ignition_active = false;
            self.shutdown_active = true;
            self.shutdown_timer_s = 0.0;
            self.sink
                .emit(EventLevel::Info, "ECS", "engine shutdown sequence started");
        }
    }

    fn advance_ignition_sequence(&mut self, dt_s: f64) {
        self.ignition_timer_s += dt_s;
        let t = self.ignition_timer_s;

        if t < SEQ_PRESTART_END_S {
            // Stage 1: purge and pressurize.
            for engine in &mut self.engines {
                if engine.state.state == EngineFsm::Offline {
                    engine.state.state = EngineFsm::PreStart;
                }
            }
        } else if t < SEQ_SPINUP_END_S {
            // Stage 2: spin up turbopumps, linear 0 -> 12000 rpm.
            let ramp = (t - SEQ_PRESTART_END_S) / (SEQ_SPINUP_END_S - SEQ_PRESTART_END_S);
            for engine in &mut self.engines {
                if engine.state.state == EngineFsm::PreStart {
                    engine.state.turbopump_rpm = ramp * TURBOPUMP_FULL_RPM;
                }
            }
        } else if t < SEQ_IGNITE_END_S {
            // Stage 3: light the engines.
            for engine in &mut self.engines {
                if engine.state.state == EngineFsm::PreStart {
                    engine.state.state = EngineFsm::Ignition;
                    engine.state.ignition_elapsed_s = 0.0;
                    engine.ignition_enabled = true;
                }
            }
        } else {
            // Stage 4: everyone still igniting goes to min-throttle run.
            for engine in &mut self.engines {
                if engine.state.state == EngineFsm::Ignition {
                    engine.state.state = EngineFsm::Running;
                    engine.state.thrust_pct = self.cfg.min_throttle_pct;
                }
            }
            self.ignition_active = false;
            self.sink.emit(
                EventLevel::Info,
                "ECS",
                "ignition sequence complete, all engines running",
            );
        }
    }

    fn advance_shutdown_sequence(&mut self, dt_s: f64) {
        self.shutdown_timer_s += dt_s;
        if self.shutdown_timer_s < self.cfg.shutdown_time_s {
            let factor = 1.0 - self.shutdown_timer_s / self.cfg.shutdown_time_s;
            for engine in &mut self.engines {
                if engine.state.state == EngineFsm::Running {
                    engine.state.state = EngineFsm::Shutdown;
                }
                if engine.state.state == EngineFsm::Shutdown {
                    engine.state.shutdown_elapsed_s = self.shutdown_timer_s;
                    engine.state.thrust_pct = self.cfg.min_throttle_pct * factor;
                }
            }
        } else {
            for engine in &mut self.engines {
                if engine.state.state != EngineFsm::Fault {
                    engine.state.state = EngineFsm::Offline;
                }
                engine.state.thrust_pct = 0.0;
                engine.ignition_enabled = false;
            }
            self.shutdown_active = false;
            self.sink
                .emit(EventLevel::Info, "ECS", "engine shutdown sequence complete");
        }
    }

    fn update_engine(&mut self, index: usize, dt_s: f64, phase: MissionPhase, throttle_cmd: u8) {
        let min_throttle = self.cfg.min_throttle_pct;
        let engine = &mut self.engines[index];
        match engine.state.state {
            EngineFsm::Offline => {
                engine.state.thrust_pct = 0.0;
                engine.state.turbopump_rpm = 0.0;
                engine.ignition_enabled = false;
            }
            EngineFsm::PreStart => {
                engine.state.thrust_pct = 0.0;
            }
            EngineFsm::Ignition => {
                if engine.ignition_enabled {
                    engine.state.ignition_elapsed_s += dt_s;
                }
                if engine.state.ignition_elapsed_s > PER_ENGINE_IGNITION_DELAY_S {
                    engine.state.state = EngineFsm::Running;
                    engine.state.thrust_pct = min_throttle;
                    self.sink.emit(
                        EventLevel::Info,
                        "ECS",
                        &format!("engine {} ignited", engine.state.id),
                    );
                }
            }
            EngineFsm::Running => {
                if phase.in_flight() {
                    // Track the commanded throttle at a bounded ramp rate.
                    let target = f64::from(throttle_cmd).max(min_throttle).min(100.0);
                    let delta = target - engine.state.thrust_pct;
                    let step = THRUST_RAMP_PCT_PER_S * dt_s;
                    engine.state.thrust_pct += delta.clamp(-step, step);
                    engine.state.thrust_pct = engine.state.thrust_pct.clamp(0.0, 100.0);
                }
            }
            EngineFsm::Shutdown => {
                engine.state.shutdown_elapsed_s += dt_s;
            }
            EngineFsm::Fault => {
                engine.state.thrust_pct = 0.0;
                engine.ignition_enabled = false;
            }
        }
    }

    fn simulate_sensors(&mut self, index: usize) {
        let max_chamber = self.cfg.max_chamber_pa;
        let running = self.engines[index].state.state == EngineFsm::Running;
        let thrust_factor = self.engines[index].state.thrust_pct / 100.0;

        let chamber_base = if running {
            AMBIENT_PRESSURE_PA + (max_chamber - AMBIENT_PRESSURE_PA) * thrust_factor
        } else {
            AMBIENT_PRESSURE_PA
        };
        let chamber = chamber_base + self.noise(chamber_base * 0.02);

        let rpm_base = if running {
            MIN_TURBOPUMP_RPM + (TURBOPUMP_FULL_RPM - MIN_TURBOPUMP_RPM) * thrust_factor
        } else {
            self.engines[index].state.turbopump_rpm
        };
        let rpm = if running {
            (rpm_base + self.noise(rpm_base * 0.05)).max(0.0)
        } else {
            rpm_base
        };

        let nozzle = if running {
            RUNNING_NOZZLE_K + self.noise(50.0)
        } else {
            AMBIENT_NOZZLE_K + self.noise(5.0)
        };

        let engine = &mut self.engines[index];
        engine.state.chamber_pa = chamber;
        engine.state.turbopump_rpm = rpm;
        engine.state.nozzle_k = nozzle;

        if engine.state.state == EngineFsm::Running {
            engine.state.fuel_flow_kgs = FUEL_FLOW_FULL_KGS * thrust_factor;
            engine.state.ox_flow_kgs = OX_FLOW_FULL_KGS * thrust_factor;
        } else {
            engine.state.fuel_flow_kgs = 0.0;
            engine.state.ox_flow_kgs = 0.0;
        }
    }

    fn monitor_health(&mut self, index: usize) {
        if self.engines[index].state.fault.is_some() {
            return;
        }

        let state = self.engines[index].state.state;
        let chamber = self.engines[index].state.chamber_pa;
        let rpm = self.engines[index].state.turbopump_rpm;
        let nozzle = self.engines[index].state.nozzle_k;

        let fault = if state == EngineFsm::Running && chamber > self.cfg.max_chamber_pa {
            Some(FaultKind::ChamberPressureHigh)
        } else if state == EngineFsm::Running && chamber < MIN_CHAMBER_PA {
            Some(FaultKind::ChamberPressureLow)
        } else if state == EngineFsm::Running && rpm < MIN_TURBOPUMP_RPM {
            Some(FaultKind::TurbopumpUnderspeed)
        } else if nozzle > MAX_NOZZLE_TEMP_K {
            Some(FaultKind::NozzleOverTemp)
        } else if self.cfg.sensor_fault_probability > 0.0
            && self.rng.gen::<f64>() < self.cfg.sensor_fault_probability
        {
            Some(FaultKind::SensorInjected)
        } else {
            None
        };

        if let Some(kind) = fault {
            self.declare_fault(index, kind);
        }
    }

    fn declare_fault(&mut self, index: usize, kind: FaultKind) {
        let engine = &mut self.engines[index];
        engine.state.fault = Some(kind);
        engine.state.state = EngineFsm::Fault;
        engine.state.thrust_pct = 0.0;
        engine.ignition_enabled = false;
        self.sink.emit(
            kind.event_level(),
            "ECS",
            &format!("engine {} FAULT: {kind}", engine.state.id),
        );
    }

    fn publish_aggregates(&self) {
        let running = self.running_count();
        let thrust_sum: f64 = self.engines.iter().map(|e| e.state.thrust_pct).sum();
        self.shared.set_engines_running(running);
        self.shared
            .set_engine_thrust_pct(thrust_sum / NUM_ENGINES as f64);
        self.shared.set_engine_faults(self.fault_count());
    }

    fn noise(&mut self, sigma: f64) -> f64 {
        if sigma <= 0.0 {
            return 0.0;
        }
        // Sum of uniforms approximates a normal spread well enough for
        // sensor jitter.
        let sum: f64 = (0..4).map(|_| self.rng.gen_range(-1.0..1.0)).sum();
        sum / 2.0 * sigma
    }
}

impl Subsystem for EngineControl {
    fn step(&mut self, dt_s: f64) -> Result<(), BodyFailure> {
        if dt_s <= 0.0 || dt_s > 1.0 {
            return Ok(());
        }

        let phase = self.shared.phase();
        let throttle_cmd = self.shared.throttle_pct();
        self.handle_phase(phase);

        if self.ignition_active {
            self.advance_ignition_sequence(dt_s);
        }
        if self.shutdown_active {
            self.advance_shutdown_sequence(dt_s);
        }

        for index in 0..NUM_ENGINES {
            self.update_engine(index, dt_s, phase, throttle_cmd);
            self.simulate_sensors(index);
            self.monitor_health(index);
        }

        self.publish_aggregates();
        Ok(())
    }
}
