use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::events::{EventLevel, EventSink};
use crate::scheduler::{BodyFailure, Subsystem, TaskStats};
use crate::state::VehicleShared;
use crate::subsystems::FaultKind;

/// Engines faulted in flight before the monitor escalates to Critical.
const ENGINE_OUT_CRITICAL_THRESHOLD: u8 = 2;

struct WatchedTask {
    name: &'static str,
    stats: Arc<TaskStats>,
    /// Heartbeat value already reported as stalled, to avoid repeats.
    reported_at_ms: Option<u64>,
}

/// Watchdog over the other subsystems plus a multiple-engine-out check.
/// Runs above flight control so a stalled loop still gets reported.
///
/// The monitor observes and reports; it never writes the operator
/// control fields. An abort stays the command service's call.
pub struct SafetyMonitor {
    shared: Arc<VehicleShared>,
    sink: Arc<EventSink>,
    watched: Vec<WatchedTask>,
    watchdog_timeout_ms: u64,
    epoch: Instant,
    engine_out_reported: bool,
}

impl SafetyMonitor {
    pub fn new(
        shared: Arc<VehicleShared>,
        sink: Arc<EventSink>,
        watched: Vec<(&'static str, Arc<TaskStats>)>,
        watchdog_timeout_ms: u64,
        epoch: Instant,
    ) -> Self {
        Self {
            shared,
            sink,
            watched: watched
                .into_iter()
                .map(|(name, stats)| WatchedTask {
                    name,
                    stats,
                    reported_at_ms: None,
                })
                .collect(),
            watchdog_timeout_ms,
            epoch,
            engine_out_reported: false,
        }
    }

    fn check_heartbeats(&mut self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        for task in &mut self.watched {
            // Tasks that have not completed a first iteration yet are
            // still starting up, not stalled.
            if task.stats.iterations.load(Ordering::Relaxed) == 0 {
                continue;
            }
            let heartbeat = task.stats.last_heartbeat_ms.load(Ordering::Acquire);
            let stalled = now_ms.saturating_sub(heartbeat) > self.watchdog_timeout_ms;
            if stalled {
                if task.reported_at_ms != Some(heartbeat) {
                    task.reported_at_ms = Some(heartbeat);
                    self.sink.emit(
                        FaultKind::WatchdogTimeout.event_level(),
                        "SAFETY",
                        &format!(
                            "{}: {} ({} ms since last heartbeat)",
                            task.name,
                            FaultKind::WatchdogTimeout,
                            now_ms.saturating_sub(heartbeat)
                        ),
                    );
                }
            } else {
                task.reported_at_ms = None;
            }
        }
    }

    fn check_engines(&mut self) {
        let faults = self.shared.engine_faults();
        if faults >= ENGINE_OUT_CRITICAL_THRESHOLD && self.shared.phase().in_flight() {
            if !self.engine_out_reported {
                self.engine_out_reported = true;
                self.sink.emit(
                    EventLevel::Critical,
                    "SAFETY",
                    &format!("{faults} engines faulted in flight, abort recommended"),
                );
            }
        } else {
            self.engine_out_reported = false;
        }
    }
}

impl Subsystem for SafetyMonitor {
    fn step(&mut self, _dt_s: f64) -> Result<(), BodyFailure> {
        self.check_heartbeats();
        self.check_engines();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MissionPhase;

    #[test]
    fn stalled_heartbeat_is_reported_once() {
        let shared = Arc::new(VehicleShared::new(1.0, 0.0));
        let sink = Arc::new(EventSink::with_capture());
        let stats = Arc::new(TaskStats::default());
        stats.iterations.store(10, Ordering::Relaxed);
        stats.last_heartbeat_ms.store(0, Ordering::Release);

        let epoch = Instant::now() - std::time::Duration::from_millis(500);
        let mut monitor = SafetyMonitor::new(
            shared,
            Arc::clone(&sink),
            vec![("FlightControl", stats)],
            100,
            epoch,
        );
        monitor.step(0.5).unwrap();
        monitor.step(0.5).unwrap();

        let timeouts: Vec<_> = sink
            .captured()
            .into_iter()
            .filter(|e| e.message.contains("watchdog timeout"))
            .collect();
        assert_eq!(timeouts.len(), 1);
    }

    #[test]
    fn multiple_engine_faults_in_flight_raise_one_critical_event() {
        let shared = Arc::new(VehicleShared::new(1.0, 0.0));
        let sink = Arc::new(EventSink::with_capture());
        shared.set_phase(MissionPhase::Ascent);
        shared.set_engine_faults(2);
        shared.set_mission_go(true);

        let mut monitor = SafetyMonitor::new(
            Arc::clone(&shared),
            Arc::clone(&sink),
            Vec::new(),
            1000,
            Instant::now(),
        );
        monitor.step(0.5).unwrap();
        monitor.step(0.5).unwrap();

        let criticals: Vec<_> = sink
            .captured()
            .into_iter()
            .filter(|e| e.level == EventLevel::Critical && e.message.contains("abort recommended"))
            .collect();
        assert_eq!(criticals.len(), 1);

        // The monitor observes only; the operator control fields belong
        // to the command service.
        assert!(!shared.abort_requested());
        assert!(shared.mission_go());
    }

    #[test]
    fn single_engine_fault_is_not_escalated() {
        let shared = Arc::new(VehicleShared::new(1.0, 0.0));
        let sink = Arc::new(EventSink::with_capture());
        shared.set_phase(MissionPhase::Ascent);
        shared.set_engine_faults(1);

        let mut monitor = SafetyMonitor::new(
            Arc::clone(&shared),
            Arc::clone(&sink),
            Vec::new(),
            1000,
            Instant::now(),
        );
        monitor.step(0.5).unwrap();
        assert!(!shared.abort_requested());
        assert!(sink
            .captured()
            .iter()
            .all(|e| e.level != EventLevel::Critical));
    }
}
