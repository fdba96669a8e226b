use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use arrayvec::ArrayString;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub const COMPONENT_TAG_MAX: usize = 16;

pub type ComponentTag = ArrayString<COMPONENT_TAG_MAX>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Critical = 4,
}

impl EventLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EventLevel::Debug,
            1 => EventLevel::Info,
            2 => EventLevel::Warn,
            3 => EventLevel::Error,
            _ => EventLevel::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventLevel::Debug => "DEBUG",
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
            EventLevel::Critical => "CRIT",
        }
    }
}

/// One recorded event, kept only by the capture backend.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub level: EventLevel,
    pub component: ComponentTag,
    pub message: String,
}

enum SinkBackend {
    /// Forward each line to the tracing subscriber installed by the binary.
    Tracing,
    /// Retain events in memory so tests can assert on them.
    Capture(Mutex<Vec<EventRecord>>),
}

/// Leveled, thread-safe event sink with a runtime level filter.
///
/// A single formatted line is the atomic unit. Under contention, events
/// below the drop threshold are discarded and counted rather than queued.
pub struct EventSink {
    min_level: AtomicU8,
    drop_threshold: AtomicU8,
    emitted: AtomicU64,
    dropped: AtomicU64,
    line: Mutex<()>,
    backend: SinkBackend,
}

impl EventSink {
    pub fn new() -> Self {
        Self::with_backend(SinkBackend::Tracing)
    }

    /// Sink that retains events for inspection. Test support.
    pub fn with_capture() -> Self {
        Self::with_backend(SinkBackend::Capture(Mutex::new(Vec::new())))
    }

    fn with_backend(backend: SinkBackend) -> Self {
        Self {
            min_level: AtomicU8::new(EventLevel::Info as u8),
            drop_threshold: AtomicU8::new(EventLevel::Warn as u8),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            line: Mutex::new(()),
            backend,
        }
    }

    pub fn set_level(&self, level: EventLevel) {
        self.min_level.store(level as u8, Ordering::Release);
    }

    pub fn level(&self) -> EventLevel {
        EventLevel::from_u8(self.min_level.load(Ordering::Acquire))
    }

    /// Events strictly below this level may be dropped under pressure.
    pub fn set_drop_threshold(&self, level: EventLevel) {
        self.drop_threshold.store(level as u8, Ordering::Release);
    }

    /// Emit one event. The message is borrowed for the duration of the call.
    pub fn emit(&self, level: EventLevel, component: &str, message: &str) {
        if (level as u8) < self.min_level.load(Ordering::Acquire) {
            return;
        }

        let guard = match self.line.try_lock() {
            Some(guard) => guard,
            None => {
                if (level as u8) < self.drop_threshold.load(Ordering::Acquire) {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                self.line.lock()
            }
        };

        let tag = truncate_tag(component);
        match &self.backend {
            SinkBackend::Tracing => dispatch_tracing(level, &tag, message),
            SinkBackend::Capture(records) => records.lock().push(EventRecord {
                level,
                component: tag,
                message: message.to_string(),
            }),
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        drop(guard);
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Snapshot of captured events. Empty for the tracing backend.
    pub fn captured(&self) -> Vec<EventRecord> {
        match &self.backend {
            SinkBackend::Tracing => Vec::new(),
            SinkBackend::Capture(records) => records.lock().clone(),
        }
    }

    #[cfg(test)]
    fn hold_line_for_test(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.line.lock()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_tag(component: &str) -> ComponentTag {
    let mut tag = ComponentTag::new();
    for ch in component.chars() {
        if tag.try_push(ch).is_err() {
            break;
        }
    }
    tag
}

fn dispatch_tracing(level: EventLevel, component: &ComponentTag, message: &str) {
    let component: &str = component;
    match level {
        EventLevel::Debug => tracing::debug!(target: "slsim", %component, "{message}"),
        EventLevel::Info => tracing::info!(target: "slsim", %component, "{message}"),
        EventLevel::Warn => tracing::warn!(target: "slsim", %component, "{message}"),
        EventLevel::Error => tracing::error!(target: "slsim", %component, "{message}"),
        EventLevel::Critical => {
            tracing::error!(target: "slsim", %component, critical = true, "{message}");
        }
    }
}
