use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Pulse code reserved for scheduler ticks on the command endpoint.
pub const PULSE_TICK: i32 = 100;

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("failed to arm periodic timer: {0}")]
    TimerArm(#[from] std::io::Error),
}

/// Monotonic timestamp, unaffected by wall-clock jumps.
#[inline]
pub fn now() -> Instant {
    Instant::now()
}

/// Sleep until an absolute deadline. May return slightly late, never early.
pub fn sleep_until(deadline: Instant) {
    loop {
        let current = Instant::now();
        if current >= deadline {
            return;
        }
        thread::sleep(deadline - current);
    }
}

/// A minimal timer-driven message: a code and an integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub code: i32,
    pub value: i32,
}

/// Periodic pulse generator backed by a dedicated timer thread.
///
/// Delivers at most one pulse per period into a bounded channel of
/// capacity one: a slow receiver coalesces pulses instead of building
/// a backlog.
pub struct PulseSource {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    coalesced: Arc<std::sync::atomic::AtomicU64>,
}

impl PulseSource {
    pub fn start(period: Duration, code: i32, value: i32) -> Result<(Self, Receiver<Pulse>), ClockError> {
        let (tx, rx) = mpsc::sync_channel::<Pulse>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let coalesced = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let thread_stop = Arc::clone(&stop);
        let thread_coalesced = Arc::clone(&coalesced);
        let handle = thread::Builder::new()
            .name(format!("pulse-{code}"))
            .spawn(move || {
                let mut next = now() + period;
                loop {
                    sleep_until(next);
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    match tx.try_send(Pulse { code, value }) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            thread_coalesced.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                    next += period;
                    // Receiver stalled longer than a full period: rebase
                    // rather than firing a burst of catch-up pulses.
                    let current = now();
                    if next < current {
                        next = current + period;
                    }
                }
            })?;

        Ok((
            Self {
                stop,
                handle: Some(handle),
                coalesced,
            },
            rx,
        ))
    }

    /// Pulses coalesced because the receiver was slow.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PulseSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_until_never_wakes_early() {
        let deadline = now() + Duration::from_millis(20);
        sleep_until(deadline);
        assert!(now() >= deadline);
    }

    #[test]
    fn pulse_source_delivers_at_period() {
        let (source, rx) = PulseSource::start(Duration::from_millis(10), PULSE_TICK, 7).unwrap();
        let first = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(first.code, PULSE_TICK);
        assert_eq!(first.value, 7);
        let second = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(second.code, PULSE_TICK);
        source.stop();
    }

    #[test]
    fn slow_receiver_coalesces_to_one_pending_pulse() {
        let (source, rx) = PulseSource::start(Duration::from_millis(5), PULSE_TICK, 0).unwrap();
        // Let several periods elapse without draining.
        thread::sleep(Duration::from_millis(60));
        let mut immediately_available = 0;
        while rx.try_recv().is_ok() {
            immediately_available += 1;
        }
        assert!(immediately_available <= 1, "backlog of {immediately_available} pulses");
        assert!(source.coalesced() > 0);
        source.stop();
    }
}
