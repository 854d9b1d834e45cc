//! Periodic trigger sources.
//!
//! A [`LoopedThread`] runs an OS thread that ticks at a fixed wall-clock
//! interval. At each tick it allocates a fresh [`TickId`], resets the steps it
//! owns and fires its trigger, which computes its roots and, transitively,
//! every step they trigger.
//!
//! The thread sleeps until the next scheduled tick boundary rather than for a
//! fixed duration, so the tick rate does not drift with the computation time.
//! A tick that overruns the following boundary is counted and the schedule is
//! re-anchored to the next boundary in the future.
//!
//! Stopping is cooperative: the loop checks its stop flag at every tick
//! boundary and the waiting thread is unparked immediately.
//!
//! # Manual stepping
//!
//! A stopped thread can be ticked synchronously with [`LoopedThread::step`],
//! which is the deterministic way of driving a network in tests.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking::{Parker, Unparker};
use parking_lot::Mutex;

use crate::error::LifecycleError;
use crate::loom_exports::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crate::network::Network;
use crate::time::{MonotonicTime, TickId};
use crate::trigger::{Propagation, Trigger};

/// Below this remaining duration, the loop spins instead of parking.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

/// Stable identifier of a looped thread within a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreadId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}.{}", self.index, self.generation)
    }
}

/// How the elapsed time passed to kernels is computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimeMode {
    /// Each tick advances simulated time by exactly one interval.
    #[default]
    Fixed,
    /// Each tick advances simulated time by the measured wall-clock time
    /// since the previous tick, optionally clamped.
    Measured,
}

/// Configuration of a looped thread.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoopConfig {
    /// Wall-clock period between two ticks.
    pub interval: Duration,
    /// How elapsed time is computed.
    pub time_mode: TimeMode,
    /// Upper bound of the measured elapsed time, if any.
    pub max_elapsed: Option<Duration>,
    /// Stack size of the spawned OS thread, if not the platform default.
    pub stack_size: Option<usize>,
}

impl LoopConfig {
    /// Creates a configuration with a fixed time step equal to `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Sets the time mode.
    pub fn with_time_mode(mut self, time_mode: TimeMode) -> Self {
        self.time_mode = time_mode;
        self
    }

    /// Clamps the measured elapsed time.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Sets the stack size of the spawned thread.
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("the tick interval must be strictly positive".into());
        }
        if self.max_elapsed.is_some_and(|max| max.is_zero()) {
            return Err("the maximum elapsed time must be strictly positive".into());
        }

        Ok(())
    }

    fn elapsed(&self, measured: Duration) -> Duration {
        match self.time_mode {
            TimeMode::Fixed => self.interval,
            TimeMode::Measured => self
                .max_elapsed
                .map_or(measured, |max| measured.min(max)),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10),
            time_mode: TimeMode::Fixed,
            max_elapsed: None,
            stack_size: None,
        }
    }
}

#[derive(Default)]
struct Control {
    handle: Option<JoinHandle<()>>,
    unparker: Option<Unparker>,
}

/// State shared between a looped thread, its handles and the arena.
pub(crate) struct LoopShared {
    pub(crate) id: ThreadId,
    pub(crate) name: String,
    config: Mutex<LoopConfig>,
    network: Weak<Network>,
    running: AtomicBool,
    last_tick: AtomicU64,
    ticks: AtomicU64,
    overruns: AtomicU64,
    time: Mutex<MonotonicTime>,
    control: Mutex<Control>,
    /// Serializes ticks of this thread.
    tick_lock: Mutex<()>,
}

impl LoopShared {
    pub(crate) fn new(
        id: ThreadId,
        name: String,
        config: LoopConfig,
        network: Weak<Network>,
    ) -> Self {
        Self {
            id,
            name,
            config: Mutex::new(config),
            network,
            running: AtomicBool::new(false),
            last_tick: AtomicU64::new(TickId::NONE.as_u64()),
            ticks: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            time: Mutex::new(MonotonicTime::EPOCH),
            control: Mutex::new(Control::default()),
            tick_lock: Mutex::new(()),
        }
    }

    pub(crate) fn config(&self) -> LoopConfig {
        self.config.lock().clone()
    }

    /// Asks the loop to exit at its next boundary, without waiting.
    pub(crate) fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(unparker) = &self.control.lock().unparker {
            unparker.unpark();
        }
    }

    /// Performs a single tick.
    fn tick(&self, network: &Network, elapsed: Duration) -> TickId {
        let _guard = self.tick_lock.lock();
        let tick = network.ticks.next();
        let table = network.root_table();

        for (_, cell) in table.owned(self.id) {
            cell.reset();
        }

        let mut propagation = Propagation::new(&table, tick, elapsed);
        propagation.fire(Trigger::Thread(self.id));

        // Steps signalled by other threads and not reached by a join of this
        // thread.
        for (step, cell) in table.owned(self.id) {
            if cell.is_ready() && cell.last_tick() != tick && table.join_degree(*step) == 0 {
                propagation.run(*step, cell);
            }
        }

        {
            let mut time = self.time.lock();
            *time = time.checked_add(elapsed).unwrap_or(*time);
        }
        self.last_tick.store(tick.as_u64(), Ordering::Release);
        self.ticks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(thread = %self.name, %tick, "tick completed");

        tick
    }
}

impl fmt::Debug for LoopShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Handle to a periodic trigger source.
///
/// Handles are cheap to clone and all refer to the same thread. Dropping the
/// last handle does not stop the thread; dropping the network does.
#[derive(Clone)]
pub struct LoopedThread {
    shared: Arc<LoopShared>,
}

impl LoopedThread {
    pub(crate) fn from_shared(shared: Arc<LoopShared>) -> Self {
        Self { shared }
    }

    /// Identifier of the thread.
    pub fn id(&self) -> ThreadId {
        self.shared.id
    }

    /// Name of the thread, also used as the OS thread name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current configuration.
    pub fn config(&self) -> LoopConfig {
        self.shared.config()
    }

    /// Replaces the configuration; takes effect at the next start.
    pub fn set_config(&self, config: LoopConfig) -> Result<(), crate::TopologyError> {
        config
            .validate()
            .map_err(crate::TopologyError::InvalidConfiguration)?;
        *self.shared.config.lock() = config;

        Ok(())
    }

    /// Checks whether the OS thread is ticking.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The id of the last completed tick.
    pub fn current_tick(&self) -> TickId {
        TickId::from_raw(self.shared.last_tick.load(Ordering::Acquire))
    }

    /// Simulated time of this thread: the sum of all elapsed times passed to
    /// kernels.
    pub fn time(&self) -> MonotonicTime {
        *self.shared.time.lock()
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }

    /// Number of ticks that overran the following tick boundary.
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    /// Spawns the OS thread.
    ///
    /// Starting a running thread has no effect.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut control = self.shared.control.lock();
        if self.is_running() {
            return Ok(());
        }
        if let Some(handle) = control.handle.take() {
            // A previous run was asked to stop but not joined.
            let _ = handle.join();
        }

        let config = self.shared.config();
        let parker = Parker::new();
        let unparker = parker.unparker();
        let mut builder = thread::Builder::new().name(self.shared.name.clone());
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        match builder.spawn(move || run_loop(shared, parker, config)) {
            Ok(handle) => {
                control.handle = Some(handle);
                control.unparker = Some(unparker);
                tracing::debug!(thread = %self.shared.name, "looped thread started");

                Ok(())
            }
            Err(error) => {
                self.shared.running.store(false, Ordering::Release);

                Err(LifecycleError::ThreadSpawn {
                    thread: self.shared.id,
                    error,
                })
            }
        }
    }

    /// Stops the OS thread and waits for the tick in progress to complete.
    ///
    /// Stopping a stopped thread has no effect.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        let (handle, unparker) = {
            let mut control = self.shared.control.lock();
            (control.handle.take(), control.unparker.take())
        };
        if let Some(unparker) = unparker {
            unparker.unpark();
        }
        if let Some(handle) = handle {
            // A kernel may stop its own thread.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            tracing::debug!(thread = %self.shared.name, "looped thread stopped");
        }
    }

    /// Performs a single tick synchronously on the calling thread.
    ///
    /// Returns `None` if the OS thread is running or the network was dropped.
    pub fn step(&self, elapsed: Duration) -> Option<TickId> {
        if self.is_running() {
            return None;
        }
        let network = self.shared.network.upgrade()?;

        Some(self.shared.tick(&network, elapsed))
    }
}

impl fmt::Debug for LoopedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopedThread")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("running", &self.is_running())
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

fn run_loop(shared: Arc<LoopShared>, parker: Parker, config: LoopConfig) {
    let interval = config.interval;
    let mut last = Instant::now();
    let mut deadline = last + interval;

    while wait_until(deadline, &parker, &shared.running) {
        let now = Instant::now();
        let elapsed = config.elapsed(now - last);
        last = now;

        let Some(network) = shared.network.upgrade() else {
            break;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| shared.tick(&network, elapsed)));
        drop(network);
        if result.is_err() {
            tracing::error!(thread = %shared.name, "tick aborted by a panic");
        }

        deadline += interval;
        let now = Instant::now();
        if deadline <= now {
            let missed = (now - deadline).as_nanos() / interval.as_nanos() + 1;
            let missed = u32::try_from(missed).unwrap_or(u32::MAX);
            deadline += interval.saturating_mul(missed);
            shared.overruns.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(thread = %shared.name, missed, "tick overran its interval");
        }
    }

    shared.running.store(false, Ordering::Release);
}

/// Waits until `deadline`; returns `false` if a stop was requested.
fn wait_until(deadline: Instant, parker: &Parker, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        let remaining = deadline - now;
        if remaining > SPIN_THRESHOLD {
            parker.park_timeout(remaining - SPIN_THRESHOLD);
        } else {
            spin_sleep::sleep(remaining);
        }
    }
}
