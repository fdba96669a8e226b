use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub dry_mass_kg: f64,
    pub fuel_mass_kg: f64,
    /// Total thrust at 100% across all engines.
    pub max_thrust_n: f64,
    pub mission_start_time_s: f64,
    pub target_orbit_altitude_m: f64,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            dry_mass_kg: 500_000.0,
            fuel_mass_kg: 1_500_000.0,
            max_thrust_n: 30_000_000.0,
            mission_start_time_s: -630.0,
            target_orbit_altitude_m: 400_000.0,
        }
    }
}

impl VehicleConfig {
    pub fn initial_mass_kg(&self) -> f64 {
        self.dry_mass_kg + self.fuel_mass_kg
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_chamber_pa: f64,
    pub min_throttle_pct: f64,
    pub startup_time_s: f64,
    pub shutdown_time_s: f64,
    /// Probability of an injected sensor fault per engine per tick.
    pub sensor_fault_probability: f64,
    pub rng_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chamber_pa: 20_000_000.0,
            min_throttle_pct: 60.0,
            startup_time_s: 3.0,
            shutdown_time_s: 2.0,
            sensor_fault_probability: 1.0e-4,
            rng_seed: 0x5A7B_51D0_0000_0001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub flight_control_hz: u32,
    pub engine_control_hz: u32,
    pub telemetry_hz: u32,
    pub safety_monitor_hz: u32,
    /// Deadline as a multiple of the period.
    pub deadline_factor: f64,
    pub restart_limit: u32,
    pub watchdog_timeout_ms: u64,
    pub pulse_period_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            flight_control_hz: 100,
            engine_control_hz: 50,
            telemetry_hz: 10,
            safety_monitor_hz: 2,
            deadline_factor: 1.5,
            restart_limit: 3,
            watchdog_timeout_ms: 1000,
            pulse_period_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub device_path: PathBuf,
    pub ring_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/tmp/sls_telemetry"),
            ring_capacity: crate::ring::DEFAULT_RING_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub endpoint: String,
    pub socket_dir: PathBuf,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::command::ENDPOINT_NAME.to_string(),
            socket_dir: PathBuf::from("/tmp"),
        }
    }
}

impl CommandConfig {
    pub fn endpoint_path(&self) -> PathBuf {
        crate::command::endpoint_path(&self.socket_dir, &self.endpoint)
    }
}

/// Complete simulator configuration. Externally supplied; every field has
/// a default matching the reference vehicle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub vehicle: VehicleConfig,
    pub engines: EngineConfig,
    pub timing: TimingConfig,
    pub telemetry: TelemetryConfig,
    pub command: CommandConfig,
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_reference_vehicle() {
        let config = SimConfig::default();
        assert_eq!(config.vehicle.dry_mass_kg, 500_000.0);
        assert_eq!(config.vehicle.fuel_mass_kg, 1_500_000.0);
        assert_eq!(config.vehicle.max_thrust_n, 30_000_000.0);
        assert_eq!(config.engines.min_throttle_pct, 60.0);
        assert_eq!(config.engines.max_chamber_pa, 20_000_000.0);
        assert_eq!(config.timing.flight_control_hz, 100);
        assert_eq!(config.timing.engine_control_hz, 50);
        assert_eq!(config.timing.telemetry_hz, 10);
        assert_eq!(config.telemetry.ring_capacity, 8192);
        assert_eq!(config.command.endpoint, "sls_fcc");
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: SimConfig =
            serde_json::from_str(r#"{"vehicle": {"dry_mass_kg": 1000.0}}"#).unwrap();
        assert_eq!(config.vehicle.dry_mass_kg, 1000.0);
        assert_eq!(config.vehicle.fuel_mass_kg, 1_500_000.0);
        assert_eq!(config.timing.restart_limit, 3);
    }

    #[test]
    fn liftoff_thrust_exceeds_pad_weight() {
        let config = VehicleConfig::default();
        let weight = config.initial_mass_kg() * 9.81;
        assert!(config.max_thrust_n > weight);
    }
}
