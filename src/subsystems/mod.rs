pub mod engines;
pub mod flight;
pub mod safety;
pub mod telemetry;

pub use engines::{EngineControl, EngineFsm, EngineState, NUM_ENGINES};
pub use flight::FlightControl;
pub use safety::SafetyMonitor;
pub use telemetry::TelemetrySampler;

use serde::{Deserialize, Serialize};

use crate::events::EventLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Minor,
    Major,
    Critical,
    Catastrophic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    ChamberPressureHigh,
    ChamberPressureLow,
    TurbopumpUnderspeed,
    NozzleOverTemp,
    SensorInjected,
    WatchdogTimeout,
    DeadlineMiss,
}

impl FaultKind {
    pub fn severity(self) -> Severity {
        match self {
            FaultKind::ChamberPressureHigh
            | FaultKind::ChamberPressureLow
            | FaultKind::TurbopumpUnderspeed
            | FaultKind::NozzleOverTemp
            | FaultKind::SensorInjected => Severity::Critical,
            FaultKind::WatchdogTimeout => Severity::Major,
            FaultKind::DeadlineMiss => Severity::Warn,
        }
    }

    /// Event level used when this fault is reported.
    pub fn event_level(self) -> EventLevel {
        match self.severity() {
            Severity::Info => EventLevel::Info,
            Severity::Warn => EventLevel::Warn,
            Severity::Minor | Severity::Major => EventLevel::Error,
            Severity::Critical | Severity::Catastrophic => EventLevel::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::ChamberPressureHigh => "chamber pressure exceeded maximum",
            FaultKind::ChamberPressureLow => "chamber pressure too low",
            FaultKind::TurbopumpUnderspeed => "turbopump underspeed",
            FaultKind::NozzleOverTemp => "nozzle overtemperature",
            FaultKind::SensorInjected => "injected sensor fault",
            FaultKind::WatchdogTimeout => "watchdog timeout",
            FaultKind::DeadlineMiss => "deadline miss",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
