//! # Space Launch Vehicle Simulator
//!
//! Soft real-time simulation core for a space-launch vehicle: a set of
//! cooperating periodic subsystems exchanging commands and telemetry
//! through typed message passing, a shared lock-free vehicle state and a
//! ring-buffered telemetry byte stream.
//!
//! ## Architecture
//!
//! - [`clock`] - monotonic time, deadline sleeps, periodic pulses
//! - [`events`] - leveled event sink with component tags
//! - [`ring`] / [`device`] - telemetry ring buffer and its byte-stream endpoint
//! - [`command`] - named request/reply command endpoint (`sls_fcc`)
//! - [`state`] - shared vehicle state, mission phases
//! - [`scheduler`] - fixed-priority periodic subsystem loop
//! - [`subsystems`] - flight control, engine control, telemetry, safety monitor
//! - [`console`] - operator console line grammar
//! - [`config`] - simulator configuration
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use slsim::config::SimConfig;
//! use slsim::events::EventSink;
//! use slsim::state::VehicleShared;
//! use slsim::subsystems::FlightControl;
//!
//! let config = SimConfig::default();
//! let shared = Arc::new(VehicleShared::new(
//!     config.vehicle.initial_mass_kg(),
//!     config.vehicle.mission_start_time_s,
//! ));
//! let sink = Arc::new(EventSink::new());
//! let fcc = FlightControl::new(config.vehicle.clone(), shared, sink);
//! # let _ = fcc;
//! ```

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod command;
pub mod config;
pub mod console;
pub mod device;
pub mod events;
pub mod ring;
pub mod scheduler;
pub mod state;
pub mod subsystems;

pub use command::{CommandClient, CommandReply, CommandService, OperatorCommand};
pub use config::SimConfig;
pub use device::{DeviceServer, TelemetryReader};
pub use events::{EventLevel, EventSink};
pub use ring::TelemetryRing;
pub use scheduler::{Scheduler, Subsystem, SubsystemSpec};
pub use state::{MissionPhase, SystemState, VehicleShared};
