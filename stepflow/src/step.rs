//! Steps: computational nodes and their execution state machine.
//!
//! A step is built from a [`Step`] prototype, which declares the step's name,
//! its input and output slots and the [`Computable`] kernel it runs, and is
//! then moved into a [`Group`](crate::Group) with
//! [`Group::add_step`](crate::Group::add_step).
//!
//! Within a tick, the state of a step only moves forward:
//!
//! ```text
//!              ┌──────────► Done
//! Idle ──► Computing
//!              └──────────► Exception
//! ```
//!
//! It is reset to `Idle` at the start of each tick of the looped thread that
//! owns it. The id of the last tick a step computed for is recorded, which
//! makes computations idempotent per tick.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::error::ComputeError;
use crate::kernel::{Computable, Layout};
use crate::loom_exports::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use crate::slot::{InputSlot, Inputs, OutputSlot, Outputs, Shape, SlotDescriptor};
use crate::time::TickId;

/// Stable identifier of a step within a network.
///
/// Identifiers are never reused: the generation disambiguates arena slots
/// recycled after a step was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

impl StepId {
    /// Address of the output slot with the given index.
    pub fn output(self, index: usize) -> crate::OutputSlotId {
        crate::OutputSlotId {
            node: self.into(),
            index,
        }
    }

    /// Address of the input slot with the given index.
    pub fn input(self, index: usize) -> crate::InputSlotId {
        crate::InputSlotId {
            node: self.into(),
            index,
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step#{}.{}", self.index, self.generation)
    }
}

/// Execution state of a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum StepState {
    /// Waiting to be computed.
    Idle = 0,
    /// The kernel is running.
    Computing = 1,
    /// The kernel completed and the outputs were published.
    Done = 2,
    /// The kernel failed; the outputs were left untouched.
    Exception = 3,
}

impl StepState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Computing,
            2 => Self::Done,
            _ => Self::Exception,
        }
    }
}

/// A step prototype.
///
/// The prototype declares the slots and the kernel of a step before it is
/// added to a group.
pub struct Step {
    name: String,
    inputs: Vec<(String, SlotDescriptor)>,
    outputs: Vec<(String, SlotDescriptor)>,
    kernel: Box<dyn Computable>,
}

impl Step {
    /// Creates a step prototype without any slot.
    pub fn new(name: impl Into<String>, kernel: impl Computable) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            kernel: Box::new(kernel),
        }
    }

    /// Appends an input slot.
    pub fn input(mut self, name: impl Into<String>, descriptor: SlotDescriptor) -> Self {
        self.inputs.push((name.into(), descriptor));
        self
    }

    /// Appends an output slot.
    pub fn output(mut self, name: impl Into<String>, descriptor: SlotDescriptor) -> Self {
        self.outputs.push((name.into(), descriptor));
        self
    }

    /// Name of the step.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_cell(self) -> StepCell {
        StepCell {
            name: self.name,
            inputs: self
                .inputs
                .into_iter()
                .map(|(name, descriptor)| InputSlot::new(name, descriptor))
                .collect(),
            outputs: self
                .outputs
                .into_iter()
                .map(|(name, descriptor)| OutputSlot::new(name, descriptor))
                .collect(),
            kernel: Mutex::new(KernelSlot {
                kernel: self.kernel,
                started: false,
            }),
            state: AtomicU8::new(StepState::Idle as u8),
            last_tick: CachePadded::new(AtomicU64::new(TickId::NONE.as_u64())),
            ready: ReadyFlag::new(),
            computations: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// A read-only view of the state of a step, for display purposes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepSnapshot {
    /// Name of the step.
    pub name: String,
    /// Current execution state.
    pub state: StepState,
    /// Message of the last failure, cleared by the next successful
    /// computation.
    pub last_error: Option<String>,
    /// The last tick the step computed for.
    pub last_tick: TickId,
    /// Number of successful computations.
    pub computations: u64,
    /// Whether a trigger from another looped thread is pending.
    pub ready: bool,
    /// Whether the step is started.
    pub started: bool,
}

/// Outcome of a computation request.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ComputeOutcome {
    /// The outputs were published; the trigger should fire.
    Done,
    /// Already computed during this tick, or not started.
    Skipped,
    /// The computation failed; the trigger must not fire.
    Failed(ComputeError),
}

struct KernelSlot {
    kernel: Box<dyn Computable>,
    started: bool,
}

/// Pending trigger from another looped thread.
///
/// Holds the highest tick id among the signals received since the flag was
/// last taken, and the highest tick id ever taken.
#[derive(Debug)]
pub(crate) struct ReadyFlag {
    pending: AtomicU64,
    consumed: AtomicU64,
}

impl ReadyFlag {
    pub(crate) fn new() -> Self {
        Self {
            pending: AtomicU64::new(TickId::NONE.as_u64()),
            consumed: AtomicU64::new(TickId::NONE.as_u64()),
        }
    }

    /// Records a signal emitted during `tick`.
    pub(crate) fn mark(&self, tick: TickId) {
        let _ = self
            .pending
            .fetch_update(Ordering::Release, Ordering::Relaxed, |current| {
                (tick.as_u64() > current).then_some(tick.as_u64())
            });
    }

    /// Takes the pending signal, if any.
    ///
    /// Only the step owning the flag takes it.
    pub(crate) fn take(&self) -> Option<TickId> {
        let tick = TickId::from_raw(self.pending.swap(TickId::NONE.as_u64(), Ordering::Acquire));
        if !tick.is_some() {
            return None;
        }
        if tick.as_u64() > self.consumed.load(Ordering::Relaxed) {
            self.consumed.store(tick.as_u64(), Ordering::Relaxed);
        }

        Some(tick)
    }

    /// Takes the pending signal and returns the highest tick signalled so
    /// far, or [`TickId::NONE`].
    pub(crate) fn consume(&self) -> TickId {
        self.take();

        TickId::from_raw(self.consumed.load(Ordering::Relaxed))
    }

    pub(crate) fn is_set(&self) -> bool {
        self.pending.load(Ordering::Relaxed) != TickId::NONE.as_u64()
    }
}

/// A step as stored in the arena.
pub(crate) struct StepCell {
    pub(crate) name: String,
    pub(crate) inputs: Vec<InputSlot>,
    pub(crate) outputs: Vec<OutputSlot>,
    kernel: Mutex<KernelSlot>,
    state: AtomicU8,
    last_tick: CachePadded<AtomicU64>,
    ready: ReadyFlag,
    computations: AtomicU64,
    last_error: Mutex<Option<ComputeError>>,
}

impl StepCell {
    pub(crate) fn state(&self) -> StepState {
        StepState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn last_tick(&self) -> TickId {
        TickId::from_raw(self.last_tick.load(Ordering::Acquire))
    }

    pub(crate) fn is_started(&self) -> bool {
        self.kernel.lock().started
    }

    /// Resets the state to `Idle` at the beginning of a tick.
    pub(crate) fn reset(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != StepState::Computing as u8).then_some(StepState::Idle as u8)
            });
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.is_set()
    }

    /// Records a trigger from another looped thread.
    pub(crate) fn mark_ready(&self, tick: TickId) {
        self.ready.mark(tick);
    }

    /// Validates the slots, allocates the output buffers and starts the
    /// kernel.
    ///
    /// Starting an already started step has no effect.
    pub(crate) fn start(&self) -> Result<(), String> {
        let mut slot = self.kernel.lock();
        if slot.started {
            return Ok(());
        }

        for output in &self.outputs {
            output.buffer.conform_to(&output.descriptor);
        }
        for input in &self.inputs {
            let Shape::Fixed { rows, cols } = input.descriptor.shape else {
                continue;
            };
            let Some((buffer, _)) = input.source() else {
                continue;
            };
            let shape = buffer.shape();
            if shape != (0, 0) && shape != (rows, cols) {
                return Err(format!(
                    "input '{}' expects a {}x{} matrix but its source holds a {}x{} matrix",
                    input.name, rows, cols, shape.0, shape.1
                ));
            }
        }

        let layout = Layout {
            inputs: &self.inputs,
            outputs: &self.outputs,
        };
        slot.kernel.start(&layout).map_err(|e| e.to_string())?;
        slot.started = true;
        self.state.store(StepState::Idle as u8, Ordering::Release);

        Ok(())
    }

    /// Stops the kernel, waiting for any computation in progress.
    ///
    /// Returns `false` if the step was not started.
    pub(crate) fn stop(&self) -> bool {
        let mut slot = self.kernel.lock();
        if !slot.started {
            return false;
        }
        slot.kernel.stop();
        slot.started = false;
        self.state.store(StepState::Idle as u8, Ordering::Release);

        true
    }

    /// Runs the kernel for `tick` unless it already ran for that tick.
    ///
    /// The inputs listed in `foreign` are fed by steps of other looped
    /// threads; they are read as they stood at the latest tick that
    /// signalled this step.
    pub(crate) fn compute(
        &self,
        tick: TickId,
        elapsed: Duration,
        foreign: &[usize],
    ) -> ComputeOutcome {
        if self.last_tick() == tick {
            return ComputeOutcome::Skipped;
        }

        let previous = match self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state != StepState::Computing as u8).then_some(StepState::Computing as u8)
            }) {
            Ok(previous) => previous,
            Err(_) => {
                let error = ComputeError::ReentrantComputeDetected;
                *self.last_error.lock() = Some(error.clone());

                return ComputeOutcome::Failed(error);
            }
        };

        let mut slot = self.kernel.lock();
        if !slot.started {
            self.state.store(previous, Ordering::Release);

            return ComputeOutcome::Skipped;
        }
        self.last_tick.store(tick.as_u64(), Ordering::Release);
        let signalled = self.ready.consume();

        let sources: Vec<_> = self.inputs.iter().map(InputSlot::source).collect();
        let inputs = Inputs::acquire(&sources, tick, foreign, signalled);
        let mut outputs = Outputs::acquire(&self.outputs, tick);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            slot.kernel.compute(&inputs, &mut outputs, elapsed)
        }));
        drop(inputs);

        let error = match result {
            Ok(Ok(())) => {
                outputs.commit(tick);
                self.computations.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = None;
                self.state.store(StepState::Done as u8, Ordering::Release);

                return ComputeOutcome::Done;
            }
            Ok(Err(e)) => ComputeError::Kernel(e),
            Err(payload) => ComputeError::Panicked(panic_message(payload)),
        };
        outputs.rollback();
        *self.last_error.lock() = Some(error.clone());
        self.state.store(StepState::Exception as u8, Ordering::Release);

        ComputeOutcome::Failed(error)
    }

    pub(crate) fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            name: self.name.clone(),
            state: self.state(),
            last_error: self.last_error.lock().as_ref().map(ToString::to_string),
            last_tick: self.last_tick(),
            computations: self.computations.load(Ordering::Relaxed),
            ready: self.ready.is_set(),
            started: self.is_started(),
        }
    }
}

impl fmt::Debug for StepCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepCell")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("last_tick", &self.last_tick())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
