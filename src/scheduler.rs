use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::clock;
use crate::events::{EventLevel, EventSink};

/// Default fixed priorities, highest first.
pub mod priority {
    pub const SAFETY_MONITOR: u8 = 60;
    pub const FLIGHT_CONTROL: u8 = 50;
    pub const ENGINE_CONTROL: u8 = 45;
    pub const TELEMETRY: u8 = 40;
    pub const NAVIGATION: u8 = 35;
    pub const CONSOLE: u8 = 20;
}

const DEFAULT_DEADLINE_FACTOR: f64 = 1.5;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to spawn subsystem thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("subsystem restart limit exceeded; scheduler shut down")]
    FatalShutdown,
}

/// Recoverable failure of one subsystem iteration. Triggers the restart
/// policy, never propagates past the scheduler.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct BodyFailure(pub String);

/// A periodic task body. Runs strictly sequentially within its own thread.
pub trait Subsystem: Send {
    fn step(&mut self, dt_s: f64) -> Result<(), BodyFailure>;
}

#[derive(Debug, Clone)]
pub struct SubsystemSpec {
    pub name: &'static str,
    /// Component tag used on emitted events.
    pub component: &'static str,
    pub period: Duration,
    pub priority: u8,
    pub deadline: Duration,
}

impl SubsystemSpec {
    pub fn new(name: &'static str, component: &'static str, period: Duration, priority: u8) -> Self {
        Self {
            name,
            component,
            period,
            priority,
            deadline: period.mul_f64(DEFAULT_DEADLINE_FACTOR),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Live counters for one scheduled task.
#[derive(Debug, Default)]
pub struct TaskStats {
    pub iterations: AtomicU64,
    pub deadline_misses: AtomicU32,
    pub restarts: AtomicU32,
    /// Milliseconds since scheduler epoch at the last completed iteration.
    pub last_heartbeat_ms: AtomicU64,
}

struct TaskHandle {
    spec: SubsystemSpec,
    stats: Arc<TaskStats>,
    join: JoinHandle<()>,
}

/// Runs a fixed set of periodic subsystems on dedicated threads.
///
/// The set is known at construction; there is no dynamic registry. A
/// global shutdown flag is polled at every loop header and observed
/// within one period.
pub struct Scheduler {
    sink: Arc<EventSink>,
    shutdown: Arc<AtomicBool>,
    restart_limit: u32,
    backoff_base: Duration,
    epoch: Instant,
    tasks: Vec<TaskHandle>,
}

impl Scheduler {
    pub fn new(sink: Arc<EventSink>, shutdown: Arc<AtomicBool>, restart_limit: u32) -> Self {
        Self {
            sink,
            shutdown,
            restart_limit,
            backoff_base: Duration::from_secs(1),
            epoch: clock::now(),
            tasks: Vec::new(),
        }
    }

    /// Override the restart backoff base interval. Test support.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    pub fn spawn(
        &mut self,
        spec: SubsystemSpec,
        body: Box<dyn Subsystem>,
    ) -> Result<Arc<TaskStats>, SchedulerError> {
        let stats = Arc::new(TaskStats::default());
        let task = TaskCtx {
            spec: spec.clone(),
            stats: Arc::clone(&stats),
            sink: Arc::clone(&self.sink),
            shutdown: Arc::clone(&self.shutdown),
            restart_limit: self.restart_limit,
            backoff_base: self.backoff_base,
            epoch: self.epoch,
        };
        let join = thread::Builder::new()
            .name(spec.name.to_string())
            .spawn(move || run_task(task, body))?;
        self.sink.emit(
            EventLevel::Info,
            "SCHED",
            &format!(
                "started {} (period {} ms, priority {})",
                spec.name,
                spec.period.as_millis(),
                spec.priority
            ),
        );
        self.tasks.push(TaskHandle {
            spec,
            stats: Arc::clone(&stats),
            join,
        });
        Ok(stats)
    }

    pub fn stats(&self, name: &str) -> Option<Arc<TaskStats>> {
        self.tasks
            .iter()
            .find(|t| t.spec.name == name)
            .map(|t| Arc::clone(&t.stats))
    }

    pub fn task_stats(&self) -> Vec<(&'static str, Arc<TaskStats>)> {
        self.tasks
            .iter()
            .map(|t| (t.spec.name, Arc::clone(&t.stats)))
            .collect()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Set the shutdown flag and wait for every task to observe it.
    pub fn shutdown_and_join(mut self) {
        self.request_shutdown();
        for task in self.tasks.drain(..) {
            if task.join.join().is_err() {
                self.sink.emit(
                    EventLevel::Error,
                    "SCHED",
                    &format!("{} panicked during shutdown", task.spec.name),
                );
            }
        }
        self.sink
            .emit(EventLevel::Info, "SCHED", "all subsystems stopped");
    }
}

struct TaskCtx {
    spec: SubsystemSpec,
    stats: Arc<TaskStats>,
    sink: Arc<EventSink>,
    shutdown: Arc<AtomicBool>,
    restart_limit: u32,
    backoff_base: Duration,
    epoch: Instant,
}

fn run_task(ctx: TaskCtx, mut body: Box<dyn Subsystem>) {
    apply_thread_priority(&ctx);

    let mut last = clock::now();
    let mut restarts: u32 = 0;

    loop {
        if ctx.shutdown.load(Ordering::Acquire) {
            break;
        }
        let start = clock::now();
        let dt_s = (start - last).as_secs_f64();
        last = start;

        if let Err(failure) = body.step(dt_s) {
            restarts += 1;
            ctx.stats.restarts.store(restarts, Ordering::Relaxed);
            ctx.sink.emit(
                EventLevel::Error,
                ctx.spec.component,
                &format!(
                    "{} body failure ({restarts}/{}): {failure}",
                    ctx.spec.name, ctx.restart_limit
                ),
            );
            if restarts > ctx.restart_limit {
                ctx.sink.emit(
                    EventLevel::Critical,
                    "SCHED",
                    &format!("{} exceeded restart limit, fatal shutdown", ctx.spec.name),
                );
                ctx.shutdown.store(true, Ordering::Release);
                break;
            }
            // min_interval = base * 2^(n-1)
            let backoff = ctx.backoff_base * (1u32 << (restarts - 1).min(16));
            clock::sleep_until(start + backoff);
            continue;
        }

        let elapsed = start.elapsed();
        ctx.stats.iterations.fetch_add(1, Ordering::Relaxed);
        ctx.stats
            .last_heartbeat_ms
            .store(ctx.epoch.elapsed().as_millis() as u64, Ordering::Release);

        if elapsed > ctx.spec.deadline {
            ctx.stats.deadline_misses.fetch_add(1, Ordering::Relaxed);
            ctx.sink.emit(
                EventLevel::Warn,
                ctx.spec.component,
                &format!(
                    "deadline miss: {:.2} ms > {:.2} ms",
                    elapsed.as_secs_f64() * 1000.0,
                    ctx.spec.deadline.as_secs_f64() * 1000.0
                ),
            );
        }

        clock::sleep_until(start + ctx.spec.period);
    }
}

/// Best-effort SCHED_FIFO at the configured priority. Unprivileged
/// processes fall back to the default policy.
fn apply_thread_priority(ctx: &TaskCtx) {
    let param = libc::sched_param {
        sched_priority: i32::from(ctx.spec.priority),
    };
    // SAFETY: pthread_self is the calling thread and param outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        ctx.sink.emit(
            EventLevel::Debug,
            "SCHED",
            &format!("{} running without real-time priority", ctx.spec.name),
        );
    }
}
