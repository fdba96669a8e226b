use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::events::{EventLevel, EventSink};
use crate::ring::TelemetryRing;
use crate::scheduler::{BodyFailure, Subsystem};
use crate::state::VehicleShared;

const RECORD_CAPACITY: usize = 128;

/// Samples the shared vehicle state and appends one record per tick to
/// the telemetry ring:
/// `<sec>.<millis>,alt=<f>,vel=<f>,thr=<i>,go=<0|1>\n`
pub struct TelemetrySampler {
    shared: Arc<VehicleShared>,
    ring: Arc<TelemetryRing>,
    sink: Arc<EventSink>,
    line: heapless::String<RECORD_CAPACITY>,
    records_written: u64,
}

impl TelemetrySampler {
    pub fn new(shared: Arc<VehicleShared>, ring: Arc<TelemetryRing>, sink: Arc<EventSink>) -> Self {
        Self {
            shared,
            ring,
            sink,
            line: heapless::String::new(),
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    fn format_record(&mut self) -> Result<(), core::fmt::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let altitude = self.shared.altitude_m();
        let velocity = self.shared.velocity_ms();
        let throttle = self.shared.throttle_pct();
        let go = u8::from(self.shared.mission_go());

        self.line.clear();
        writeln!(
            self.line,
            "{}.{:03},alt={altitude:.2},vel={velocity:.2},thr={throttle},go={go}",
            now.as_secs(),
            now.subsec_millis(),
        )
    }
}

impl Subsystem for TelemetrySampler {
    fn step(&mut self, _dt_s: f64) -> Result<(), BodyFailure> {
        if self.format_record().is_err() {
            self.sink
                .emit(EventLevel::Warn, "TELEM", "telemetry record overflow");
            return Ok(());
        }
        match self.ring.append(self.line.as_bytes()) {
            Ok(()) => self.records_written += 1,
            Err(e) => {
                self.sink
                    .emit(EventLevel::Warn, "TELEM", &format!("telemetry write failed: {e}"));
            }
        }
        Ok(())
    }
}
