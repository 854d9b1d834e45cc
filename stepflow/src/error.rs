//! Error types.
//!
//! Topology edits and lifecycle calls report failures synchronously to the
//! caller with [`TopologyError`] and [`LifecycleError`]; the rejected edit has
//! no effect. Failures raised while computing are never returned to a caller:
//! they are recorded on the step as a [`ComputeError`] and surface through
//! [`StepSnapshot`](crate::StepSnapshot).

use std::error::Error;
use std::fmt;
use std::io;

use crate::group::GroupId;
use crate::kernel::KernelError;
use crate::looped_thread::ThreadId;
use crate::slot::{InputSlotId, OutputSlotId, SlotDescriptor};
use crate::step::StepId;

/// An error returned by a topology-editing call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopologyError {
    /// The source and target slot descriptors are incompatible.
    TypeMismatch {
        /// Descriptor of the source output slot.
        source: SlotDescriptor,
        /// Descriptor of the target input slot.
        target: SlotDescriptor,
    },
    /// The target input slot already has a source.
    SlotOccupied(InputSlotId),
    /// The connection would close a cycle that cannot be cut automatically.
    UnresolvableCycle {
        /// The source of the rejected connection.
        source: OutputSlotId,
        /// The target of the rejected connection.
        target: InputSlotId,
    },
    /// The requested edit is inconsistent with the current configuration.
    InvalidConfiguration(String),
    /// The step does not exist or was removed.
    UnknownStep(StepId),
    /// The group does not exist or was removed.
    UnknownGroup(GroupId),
    /// The looped thread does not exist.
    UnknownThread(ThreadId),
    /// The port index is out of range.
    UnknownOutput(OutputSlotId),
    /// The port index is out of range.
    UnknownInput(InputSlotId),
    /// The step or group is not a direct member of the group being edited.
    NotVisible(GroupId),
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { source, target } => write!(
                f,
                "an output of type {source} cannot be connected to an input of type {target}"
            ),
            Self::SlotOccupied(slot) => write!(f, "input {slot} is already connected"),
            Self::UnresolvableCycle { source, target } => write!(
                f,
                "connecting {source} to {target} closes a cycle that must be cut explicitly"
            ),
            Self::InvalidConfiguration(reason) => write!(f, "invalid configuration: {reason}"),
            Self::UnknownStep(id) => write!(f, "no step with id {id}"),
            Self::UnknownGroup(id) => write!(f, "no group with id {id}"),
            Self::UnknownThread(id) => write!(f, "no looped thread with id {id}"),
            Self::UnknownOutput(slot) => write!(f, "no output slot {slot}"),
            Self::UnknownInput(slot) => write!(f, "no input slot {slot}"),
            Self::NotVisible(group) => {
                write!(f, "the slot owner is not a direct member of group {group}")
            }
        }
    }
}

impl Error for TopologyError {}

/// An error returned when starting a group or a step.
#[derive(Debug)]
pub enum LifecycleError {
    /// A step refused to start.
    InvalidConfiguration {
        /// The step that failed to start.
        step: StepId,
        /// Name of the step.
        name: String,
        /// The reason reported by the slot validation or the kernel.
        reason: String,
    },
    /// The operating system failed to spawn a looped thread.
    ThreadSpawn {
        /// The thread that could not be spawned.
        thread: ThreadId,
        /// The underlying error.
        error: io::Error,
    },
    /// The group does not exist or was removed.
    UnknownGroup(GroupId),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration { step, name, reason } => {
                write!(f, "step '{name}' ({step}) could not be started: {reason}")
            }
            Self::ThreadSpawn { thread, error } => {
                write!(f, "looped thread {thread} could not be spawned: {error}")
            }
            Self::UnknownGroup(id) => write!(f, "no group with id {id}"),
        }
    }
}

impl Error for LifecycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ThreadSpawn { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A failure recorded on a step during a computation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComputeError {
    /// The kernel returned an error.
    Kernel(KernelError),
    /// The kernel panicked.
    Panicked(String),
    /// The step was entered while already computing.
    ReentrantComputeDetected,
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel(e) => write!(f, "kernel error: {e}"),
            Self::Panicked(msg) => write!(f, "kernel panicked: {msg}"),
            Self::ReentrantComputeDetected => {
                f.write_str("re-entrant computation detected (cycle without temporal cut?)")
            }
        }
    }
}

impl Error for ComputeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Kernel(e) => Some(e),
            _ => None,
        }
    }
}

impl From<KernelError> for ComputeError {
    fn from(e: KernelError) -> Self {
        Self::Kernel(e)
    }
}
