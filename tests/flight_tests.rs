use std::sync::Arc;

use slsim::config::{EngineConfig, VehicleConfig};
use slsim::events::{EventLevel, EventSink};
use slsim::scheduler::Subsystem;
use slsim::state::{MissionPhase, VehicleShared};
use slsim::subsystems::{EngineControl, EngineFsm, FlightControl, NUM_ENGINES};

const FC_DT: f64 = 0.01; // 100 Hz
const ECS_DECIMATION: usize = 2; // 50 Hz

struct Sim {
    shared: Arc<VehicleShared>,
    sink: Arc<EventSink>,
    fcc: FlightControl,
    ecs: EngineControl,
    tick: usize,
}

impl Sim {
    fn new(mission_start_time_s: f64) -> Self {
        let vehicle = VehicleConfig {
            mission_start_time_s,
            ..VehicleConfig::default()
        };
        let engines = EngineConfig {
            sensor_fault_probability: 0.0,
            ..EngineConfig::default()
        };
        let shared = Arc::new(VehicleShared::new(
            vehicle.initial_mass_kg(),
            vehicle.mission_start_time_s,
        ));
        let sink = Arc::new(EventSink::with_capture());
        let fcc = FlightControl::new(vehicle, Arc::clone(&shared), Arc::clone(&sink));
        let ecs = EngineControl::new(engines, Arc::clone(&shared), Arc::clone(&sink));
        Self {
            shared,
            sink,
            fcc,
            ecs,
            tick: 0,
        }
    }

    /// Advance both subsystems with fixed deterministic timesteps.
    fn run_for(&mut self, seconds: f64) {
        let steps = (seconds / FC_DT).round() as usize;
        for _ in 0..steps {
            self.step();
        }
    }

    fn step(&mut self) {
        self.fcc.step(FC_DT).unwrap();
        if self.tick % ECS_DECIMATION == 0 {
            self.ecs.step(FC_DT * ECS_DECIMATION as f64).unwrap();
        }
        self.tick += 1;
    }

    fn run_until_phase(&mut self, phase: MissionPhase, limit_s: f64) {
        let steps = (limit_s / FC_DT).round() as usize;
        for _ in 0..steps {
            if self.fcc.phase() == phase {
                return;
            }
            self.step();
        }
        panic!(
            "phase {phase} not reached within {limit_s} s (still {})",
            self.fcc.phase()
        );
    }
}

#[test]
fn ground_support_holds_vehicle_before_liftoff() {
    let mut sim = Sim::new(-10.0);
    sim.shared.set_mission_go(true);

    let steps = (9.0 / FC_DT) as usize;
    for _ in 0..steps {
        sim.step();
        let phase = sim.shared.phase();
        if phase.ground_held() {
            assert_eq!(sim.shared.altitude_m(), 0.0);
            assert_eq!(sim.shared.velocity_ms(), 0.0);
            assert_eq!(sim.shared.acceleration_ms2(), 0.0);
        }
    }
}

#[test]
fn cold_boot_reaches_liftoff_with_positive_altitude_at_t_zero() {
    let mut sim = Sim::new(-10.0);
    sim.shared.set_mission_go(true);

    // T-10 .. T-6: countdown.
    sim.run_until_phase(MissionPhase::Countdown, 1.0);

    sim.run_until_phase(MissionPhase::Ignition, 5.0);
    assert!(sim.fcc.mission_time_s() >= -6.05);

    // Four seconds of ignition sequence brings all engines to min
    // throttle.
    sim.run_for(4.2);
    assert_eq!(sim.ecs.running_count(), NUM_ENGINES as u8);
    for engine in &sim.ecs.engine_states() {
        assert_eq!(engine.state, EngineFsm::Running);
        assert!((engine.thrust_pct - 60.0).abs() < 1e-6);
    }

    // Advance to T+0.
    while sim.fcc.mission_time_s() < 0.0 {
        sim.step();
    }
    assert_eq!(sim.fcc.phase(), MissionPhase::Liftoff);
    assert!(sim.shared.altitude_m() > 0.0, "altitude {}", sim.shared.altitude_m());
    assert!(sim.shared.velocity_ms() > 0.0, "velocity {}", sim.shared.velocity_ms());
    assert!(sim.shared.fuel_pct() < 100.0);
}

#[test]
fn phase_sequence_is_monotone_through_mission_complete() {
    let mut sim = Sim::new(-8.0);
    sim.shared.set_mission_go(true);

    let mut last_phase = sim.shared.phase();
    let mut seen = vec![last_phase];
    let steps = (500.0 / FC_DT) as usize;
    for _ in 0..steps {
        sim.step();
        let phase = sim.shared.phase();
        assert!(
            phase >= last_phase,
            "phase regressed from {last_phase} to {phase}"
        );
        if phase != last_phase {
            seen.push(phase);
            last_phase = phase;
        }
        if phase == MissionPhase::MissionComplete {
            break;
        }
    }

    assert_eq!(
        seen,
        vec![
            MissionPhase::PreLaunch,
            MissionPhase::Countdown,
            MissionPhase::Ignition,
            MissionPhase::Liftoff,
            MissionPhase::Ascent,
            MissionPhase::StageSeparation,
            MissionPhase::OrbitInsertion,
            MissionPhase::MissionComplete,
        ]
    );
}

#[test]
fn fuel_and_altitude_invariants_hold_every_tick() {
    let mut sim = Sim::new(-8.0);
    sim.shared.set_mission_go(true);

    let mut last_fuel = sim.shared.fuel_pct();
    let steps = (200.0 / FC_DT) as usize;
    for _ in 0..steps {
        sim.step();
        let fuel = sim.shared.fuel_pct();
        assert!((0.0..=100.0).contains(&fuel), "fuel out of range: {fuel}");
        assert!(sim.shared.altitude_m() >= 0.0);
        if sim.ecs.running_count() > 0 {
            assert!(fuel <= last_fuel + 1e-9, "fuel increased while burning");
        }
        last_fuel = fuel;
    }
}

#[test]
fn stage_separation_sheds_seventy_percent_of_mass() {
    let mut sim = Sim::new(-8.0);
    sim.shared.set_mission_go(true);

    sim.run_until_phase(MissionPhase::Ascent, 30.0);
    while sim.fcc.mission_time_s() < 119.9 {
        sim.step();
    }
    let mass_before = sim.shared.mass_kg();
    sim.run_until_phase(MissionPhase::StageSeparation, 1.0);
    sim.step();
    let mass_after = sim.shared.mass_kg();
    let expected = mass_before * 0.3;
    // A few ticks of fuel burn either side of the event.
    assert!(
        (mass_after - expected).abs() / expected < 0.01,
        "mass {mass_after} vs expected {expected}"
    );
}

#[test]
fn abort_mid_ascent_disables_autopilot_and_stops_engines() {
    let mut sim = Sim::new(-8.0);
    sim.shared.set_mission_go(true);

    // Run to T+30, well into ascent.
    while sim.fcc.mission_time_s() < 30.0 {
        sim.step();
    }
    assert_eq!(sim.fcc.phase(), MissionPhase::Ascent);
    assert!(sim.fcc.autopilot_enabled());

    // Operator abort.
    sim.shared.set_abort_requested(true);
    sim.shared.set_mission_go(false);

    // Observed within one flight-control period.
    sim.step();
    assert_eq!(sim.fcc.phase(), MissionPhase::Abort);
    assert!(!sim.fcc.autopilot_enabled());

    // Engines commanded to zero within the 2 s shutdown sequence.
    sim.run_for(2.2);
    assert_eq!(sim.ecs.running_count(), 0);
    for engine in &sim.ecs.engine_states() {
        assert_eq!(engine.thrust_pct, 0.0);
    }

    // Abort is terminal.
    sim.run_for(5.0);
    assert_eq!(sim.fcc.phase(), MissionPhase::Abort);

    assert!(sim
        .sink
        .captured()
        .iter()
        .any(|e| e.level == EventLevel::Critical && e.message.contains("ABORT")));
}

#[test]
fn abort_can_only_happen_once() {
    let mut sim = Sim::new(-8.0);
    sim.shared.set_mission_go(true);
    while sim.fcc.mission_time_s() < 15.0 {
        sim.step();
    }

    sim.shared.set_abort_requested(true);
    sim.step();
    assert_eq!(sim.fcc.phase(), MissionPhase::Abort);

    let aborts = sim
        .sink
        .captured()
        .iter()
        .filter(|e| e.message.contains("-> ABORT"))
        .count();
    sim.run_for(2.0);
    let aborts_after = sim
        .sink
        .captured()
        .iter()
        .filter(|e| e.message.contains("-> ABORT"))
        .count();
    assert_eq!(aborts, 1);
    assert_eq!(aborts_after, 1);
}

#[test]
fn max_q_throttle_down_reduces_commanded_thrust_in_ascent() {
    let mut sim = Sim::new(-8.0);
    sim.shared.set_mission_go(true);

    sim.run_until_phase(MissionPhase::Liftoff, 12.0);
    let thrust_liftoff = sim.fcc.thrust_n();
    assert_eq!(thrust_liftoff, 30_000_000.0);

    sim.run_until_phase(MissionPhase::Ascent, 15.0);
    sim.step();
    assert_eq!(sim.fcc.thrust_n(), thrust_liftoff * 0.75);
}
