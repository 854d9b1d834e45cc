//! Typed slots and their buffers.
//!
//! # Output and input slots
//!
//! Every step has an ordered list of *output slots* and an ordered list of
//! *input slots*, each described by a [`SlotDescriptor`].
//!
//! An output slot owns its buffer: a [`Matrix`] guarded by a read/write lock
//! and tagged with the [`TickId`] of the tick that produced it. The buffer
//! also retains the frame as it stood at the end of the previous tick, which
//! is what a *temporal cut* connection reads.
//!
//! An input slot only holds a weak reference to the buffer of the output slot
//! it is connected to. A disconnected input has no reference at all: kernels
//! observe it as "no input", never as stale data.
//!
//! # Addressing
//!
//! Slots are addressed from the editor side with [`OutputSlotId`] and
//! [`InputSlotId`], which pair the owning [`Node`] with a port index. The
//! owner is either a step or a group, in which case the id refers to one of
//! the group's boundary slots.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::group::GroupId;
use crate::matrix::Matrix;
use crate::step::StepId;
use crate::time::TickId;

/// Shape accepted or produced by a slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape {
    /// Any shape; the buffer is resized by the kernel as needed.
    #[default]
    Dynamic,
    /// A fixed `rows × cols` shape.
    Fixed {
        /// Number of rows.
        rows: usize,
        /// Number of columns.
        cols: usize,
    },
}

/// Type and shape descriptor of a slot, used to validate connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotDescriptor {
    /// Shape of the matrix carried by the slot.
    pub shape: Shape,
}

impl SlotDescriptor {
    /// A slot accepting matrices of any shape.
    pub const fn dynamic() -> Self {
        Self {
            shape: Shape::Dynamic,
        }
    }

    /// A slot carrying `rows × cols` matrices.
    pub const fn matrix(rows: usize, cols: usize) -> Self {
        Self {
            shape: Shape::Fixed { rows, cols },
        }
    }

    /// A slot carrying 1×1 matrices.
    pub const fn scalar() -> Self {
        Self::matrix(1, 1)
    }

    /// Checks whether an output with this descriptor may feed an input with
    /// the `target` descriptor.
    pub fn is_compatible_with(&self, target: &SlotDescriptor) -> bool {
        match (self.shape, target.shape) {
            (Shape::Dynamic, _) | (_, Shape::Dynamic) => true,
            (a, b) => a == b,
        }
    }

    /// Checks whether a matrix conforms to this descriptor.
    pub fn accepts(&self, matrix: &Matrix) -> bool {
        match self.shape {
            Shape::Dynamic => true,
            Shape::Fixed { rows, cols } => matrix.shape() == (rows, cols),
        }
    }

    /// Returns the initial content of a buffer with this descriptor.
    pub(crate) fn initial_matrix(&self) -> Matrix {
        match self.shape {
            Shape::Dynamic => Matrix::default(),
            Shape::Fixed { rows, cols } => Matrix::zeros(rows, cols),
        }
    }
}

impl fmt::Display for SlotDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            Shape::Dynamic => f.write_str("matrix[*]"),
            Shape::Fixed { rows, cols } => write!(f, "matrix[{rows}x{cols}]"),
        }
    }
}

/// A step or a group, as seen from the group that contains it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Node {
    /// A step.
    Step(StepId),
    /// A nested group, addressed through its boundary slots.
    Group(GroupId),
}

impl From<StepId> for Node {
    fn from(id: StepId) -> Self {
        Node::Step(id)
    }
}

impl From<GroupId> for Node {
    fn from(id: GroupId) -> Self {
        Node::Group(id)
    }
}

/// Address of an output slot of a step, or of a group's boundary output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutputSlotId {
    /// The owner of the slot.
    pub node: Node,
    /// The port index within the owner's outputs.
    pub index: usize,
}

/// Address of an input slot of a step, or of a group's boundary input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InputSlotId {
    /// The owner of the slot.
    pub node: Node,
    /// The port index within the owner's inputs.
    pub index: usize,
}

impl fmt::Display for OutputSlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.out[{}]", NodeDisplay(self.node), self.index)
    }
}

impl fmt::Display for InputSlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.in[{}]", NodeDisplay(self.node), self.index)
    }
}

struct NodeDisplay(Node);

impl fmt::Display for NodeDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Node::Step(id) => write!(f, "{id}"),
            Node::Group(id) => write!(f, "{id}"),
        }
    }
}

/// A resolved port of a step: the step and the port index.
pub(crate) type PortRef = (StepId, usize);

/// The content of an output buffer.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The most recent value.
    pub(crate) current: Matrix,
    /// Tick that produced `current`.
    pub(crate) tick: TickId,
    /// The value as it stood before `current` was produced.
    pub(crate) previous: Matrix,
    /// Tick that produced `previous`.
    pub(crate) previous_tick: TickId,
}

impl Frame {
    fn new(initial: Matrix) -> Self {
        Self {
            previous: initial.clone(),
            current: initial,
            tick: TickId::NONE,
            previous_tick: TickId::NONE,
        }
    }

    /// Saves the current value as the previous-tick value before `tick`
    /// overwrites it.
    fn begin_write(&mut self, tick: TickId) {
        if self.tick != tick {
            self.previous.clone_from(&self.current);
            self.previous_tick = self.tick;
        }
    }

    /// Publishes the value written during `tick`.
    fn commit(&mut self, tick: TickId) {
        self.tick = tick;
    }

    /// Discards a partially written value.
    fn rollback(&mut self) {
        self.current.clone_from(&self.previous);
        self.tick = self.previous_tick;
    }

    /// Returns the value as it stood at the end of the tick preceding `tick`.
    fn value_before(&self, tick: TickId) -> (&Matrix, TickId) {
        if self.tick == tick {
            (&self.previous, self.previous_tick)
        } else {
            (&self.current, self.tick)
        }
    }

    /// Returns the latest value produced no later than `bound`, assuming at
    /// most one tick committed past it.
    fn value_at(&self, bound: TickId) -> (&Matrix, TickId) {
        if self.tick > bound {
            (&self.previous, self.previous_tick)
        } else {
            (&self.current, self.tick)
        }
    }
}

/// The shared buffer of an output slot.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    frame: RwLock<Frame>,
}

impl OutputBuffer {
    pub(crate) fn new(initial: Matrix) -> Self {
        Self {
            frame: RwLock::new(Frame::new(initial)),
        }
    }

    /// Returns a copy of the latest value and its tick.
    pub(crate) fn latest(&self) -> (Matrix, TickId) {
        let frame = self.frame.read();

        (frame.current.clone(), frame.tick)
    }

    /// Reallocates both frames if they do not match the descriptor.
    pub(crate) fn conform_to(&self, descriptor: &SlotDescriptor) {
        if let Shape::Fixed { rows, cols } = descriptor.shape {
            let mut frame = self.frame.write();
            frame.current.reset_to(rows, cols);
            frame.previous.reset_to(rows, cols);
        }
    }

    pub(crate) fn shape(&self) -> (usize, usize) {
        self.frame.read().current.shape()
    }
}

/// An output slot of a step.
#[derive(Debug)]
pub(crate) struct OutputSlot {
    pub(crate) name: String,
    pub(crate) descriptor: SlotDescriptor,
    pub(crate) buffer: Arc<OutputBuffer>,
}

impl OutputSlot {
    pub(crate) fn new(name: String, descriptor: SlotDescriptor) -> Self {
        Self {
            name,
            buffer: Arc::new(OutputBuffer::new(descriptor.initial_matrix())),
            descriptor,
        }
    }
}

/// The reference held by a connected input slot.
#[derive(Clone, Debug)]
pub(crate) struct Binding {
    pub(crate) buffer: Weak<OutputBuffer>,
    /// Read the previous-tick value rather than the current one.
    pub(crate) cut: bool,
}

/// An input slot of a step.
#[derive(Debug)]
pub(crate) struct InputSlot {
    pub(crate) name: String,
    pub(crate) descriptor: SlotDescriptor,
    binding: RwLock<Option<Binding>>,
}

impl InputSlot {
    pub(crate) fn new(name: String, descriptor: SlotDescriptor) -> Self {
        Self {
            name,
            descriptor,
            binding: RwLock::new(None),
        }
    }

    pub(crate) fn bind(&self, binding: Binding) {
        *self.binding.write() = Some(binding);
    }

    pub(crate) fn unbind(&self) {
        *self.binding.write() = None;
    }

    /// Returns the live source buffer, if any.
    pub(crate) fn source(&self) -> Option<(Arc<OutputBuffer>, bool)> {
        let binding = self.binding.read();
        let binding = binding.as_ref()?;

        binding.buffer.upgrade().map(|buffer| (buffer, binding.cut))
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.source().is_some()
    }
}

enum InputRead<'a> {
    Live(RwLockReadGuard<'a, Frame>),
    Bounded {
        frame: RwLockReadGuard<'a, Frame>,
        bound: TickId,
    },
    Snapshot { data: Matrix, tick: TickId },
}

impl InputRead<'_> {
    fn data(&self) -> (&Matrix, TickId) {
        match self {
            InputRead::Live(frame) => (&frame.current, frame.tick),
            InputRead::Bounded { frame, bound } => frame.value_at(*bound),
            InputRead::Snapshot { data, tick } => (data, *tick),
        }
    }
}

/// Read access to the inputs of a step during a computation.
///
/// Live inputs are read under a read lock held for the duration of the
/// computation. Inputs connected through a temporal cut are copied out of
/// their source beforehand. Inputs fed by another looped thread read the
/// value their source held at the tick that signalled the step, even if the
/// source has computed again since.
pub struct Inputs<'a> {
    slots: Vec<Option<InputRead<'a>>>,
}

impl<'a> Inputs<'a> {
    /// Acquires all inputs for a computation during `tick`.
    ///
    /// Snapshots of temporal-cut sources are taken before any lock is held
    /// for the rest of the computation. The live inputs listed in `foreign`
    /// are read as of `signalled`.
    pub(crate) fn acquire(
        sources: &'a [Option<(Arc<OutputBuffer>, bool)>],
        tick: TickId,
        foreign: &[usize],
        signalled: TickId,
    ) -> Self {
        let mut slots: Vec<Option<InputRead<'a>>> = sources
            .iter()
            .map(|source| match source {
                Some((buffer, true)) => {
                    let frame = buffer.frame.read();
                    let (data, produced) = frame.value_before(tick);

                    Some(InputRead::Snapshot {
                        data: data.clone(),
                        tick: produced,
                    })
                }
                _ => None,
            })
            .collect();

        for (index, (slot, source)) in slots.iter_mut().zip(sources).enumerate() {
            if let Some((buffer, false)) = source {
                // Several inputs may share the same source.
                let frame = buffer.frame.read_recursive();
                *slot = Some(if foreign.contains(&index) {
                    InputRead::Bounded {
                        frame,
                        bound: signalled,
                    }
                } else {
                    InputRead::Live(frame)
                });
            }
        }

        Self { slots }
    }

    /// Number of input slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the step has no input slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the value of an input, or `None` if it is not connected.
    pub fn get(&self, index: usize) -> Option<&Matrix> {
        self.slots
            .get(index)?
            .as_ref()
            .map(|input| input.data().0)
    }

    /// Returns the scalar value of a 1×1 input.
    pub fn scalar(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Matrix::as_scalar)
    }

    /// Returns the tick that produced the value of an input.
    ///
    /// This is [`TickId::NONE`] if the source was never computed.
    pub fn tick(&self, index: usize) -> Option<TickId> {
        self.slots
            .get(index)?
            .as_ref()
            .map(|input| input.data().1)
    }

    /// Checks whether an input is connected.
    pub fn is_connected(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Iterates over all inputs in port order.
    pub fn iter(&self) -> impl Iterator<Item = Option<&Matrix>> + '_ {
        self.slots
            .iter()
            .map(|slot| slot.as_ref().map(|input| input.data().0))
    }
}

impl fmt::Debug for Inputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Write access to the outputs of a step during a computation.
///
/// Each output is locked for writing for the duration of the computation.
pub struct Outputs<'a> {
    frames: Vec<RwLockWriteGuard<'a, Frame>>,
}

impl<'a> Outputs<'a> {
    /// Acquires all outputs for a computation during `tick`.
    pub(crate) fn acquire(slots: &'a [OutputSlot], tick: TickId) -> Self {
        let frames = slots
            .iter()
            .map(|slot| {
                let mut frame = slot.buffer.frame.write();
                frame.begin_write(tick);

                frame
            })
            .collect();

        Self { frames }
    }

    /// Publishes the written values.
    pub(crate) fn commit(mut self, tick: TickId) {
        for frame in &mut self.frames {
            frame.commit(tick);
        }
    }

    /// Restores the values as they were before the computation.
    pub(crate) fn rollback(mut self) {
        for frame in &mut self.frames {
            frame.rollback();
        }
    }

    /// Number of output slots.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` if the step has no output slot.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns the value of an output as left by the previous computation.
    pub fn get(&self, index: usize) -> Option<&Matrix> {
        self.frames.get(index).map(|frame| &frame.current)
    }

    /// Returns a mutable reference to the value of an output.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Matrix> {
        self.frames.get_mut(index).map(|frame| &mut frame.current)
    }

    /// Replaces the value of an output.
    ///
    /// Returns `false` if there is no such output.
    pub fn set(&mut self, index: usize, value: Matrix) -> bool {
        match self.get_mut(index) {
            Some(current) => {
                *current = value;
                true
            }
            None => false,
        }
    }

    /// Replaces the value of an output with a scalar.
    pub fn set_scalar(&mut self, index: usize, value: f64) -> bool {
        match self.get_mut(index) {
            Some(current) if current.shape() == (1, 1) => current.set(0, 0, value),
            Some(current) => {
                *current = Matrix::scalar(value);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Outputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.frames.iter().map(|frame| &frame.current))
            .finish()
    }
}
