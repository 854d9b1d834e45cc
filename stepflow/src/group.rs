//! Groups: the topology-editing and lifecycle interface.
//!
//! A [`Group`] is a hierarchical container of steps, nested groups and looped
//! threads. All groups of a hierarchy share a single network; a [`Group`]
//! value is a cheap handle to one of them.
//!
//! Edits are only allowed between direct members of the group being edited:
//! steps of a nested group are reached through the boundary slots it exposes
//! with [`Group::expose_input`] and [`Group::expose_output`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use stepflow::{Group, Inputs, KernelError, LoopConfig, Outputs, SlotDescriptor, Step};
//!
//! let root = Group::new("root");
//!
//! let mut n = 0.0;
//! let counter = root
//!     .add_step(
//!         Step::new(
//!             "counter",
//!             move |_: &Inputs<'_>, outputs: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> {
//!                 n += 1.0;
//!                 outputs.set_scalar(0, n);
//!                 Ok(())
//!             },
//!         )
//!         .output("count", SlotDescriptor::scalar()),
//!     )
//!     .unwrap();
//! let doubler = root
//!     .add_step(
//!         Step::new(
//!             "doubler",
//!             |inputs: &Inputs<'_>, outputs: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> {
//!                 outputs.set_scalar(0, 2.0 * inputs.scalar(0).unwrap_or(0.0));
//!                 Ok(())
//!             },
//!         )
//!         .input("x", SlotDescriptor::scalar())
//!         .output("y", SlotDescriptor::scalar()),
//!     )
//!     .unwrap();
//! root.connect(counter.output(0), doubler.input(0)).unwrap();
//!
//! let thread = root.add_thread("main", LoopConfig::default()).unwrap();
//! root.add_root(thread.id(), counter).unwrap();
//!
//! root.start().unwrap();
//! thread.step(Duration::from_millis(10));
//! thread.step(Duration::from_millis(10));
//!
//! let (y, _) = root.read_output(doubler.output(0)).unwrap();
//! assert_eq!(y.as_scalar(), Some(4.0));
//! root.stop();
//! ```

mod description;

use std::fmt;
use std::sync::Arc;

pub use description::{
    BoundaryDescription, GroupDescription, SlotDescription, StepDescription, ThreadDescription,
};

use crate::error::{LifecycleError, TopologyError};
use crate::looped_thread::{LoopConfig, LoopedThread, ThreadId};
use crate::matrix::Matrix;
use crate::network::Network;
use crate::slot::{InputSlotId, Node, OutputSlotId};
use crate::step::{Step, StepCell, StepId, StepSnapshot};
use crate::time::TickId;
use crate::trigger::{BoundarySlot, ListenerInfo, Trigger};

/// Stable identifier of a group within a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

impl GroupId {
    /// Address of the boundary output slot with the given index.
    pub fn output(self, index: usize) -> OutputSlotId {
        OutputSlotId {
            node: self.into(),
            index,
        }
    }

    /// Address of the boundary input slot with the given index.
    pub fn input(self, index: usize) -> InputSlotId {
        InputSlotId {
            node: self.into(),
            index,
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}.{}", self.index, self.generation)
    }
}

/// Configuration of a group, inherited by nested groups.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupConfig {
    /// Maximum length, in connections, of an existing path from the target
    /// back to the source for which a new connection is automatically marked
    /// as a temporal cut.
    ///
    /// A longer cycle is rejected and must be cut explicitly with
    /// [`Group::connect_cut`]. The default of `1` cuts self-loops and
    /// two-step feedback loops.
    pub auto_cut_hops: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self { auto_cut_hops: 1 }
    }
}

/// A root of a looped thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Root {
    /// A single step, computed at every tick unless it is fed by another
    /// step of the same thread.
    Step(StepId),
    /// A group whose entry steps are computed at every tick.
    Group(GroupId),
}

impl From<StepId> for Root {
    fn from(id: StepId) -> Self {
        Self::Step(id)
    }
}

impl From<GroupId> for Root {
    fn from(id: GroupId) -> Self {
        Self::Group(id)
    }
}

/// A connection as seen by the editor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionInfo {
    /// The source slot.
    pub source: OutputSlotId,
    /// The target slot.
    pub target: InputSlotId,
    /// Whether the target reads the value of the previous tick.
    pub temporal_cut: bool,
}

/// Handle to a group of a network.
#[derive(Clone)]
pub struct Group {
    network: Arc<Network>,
    id: GroupId,
}

impl Group {
    /// Creates the root group of a new network.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, GroupConfig::default())
    }

    /// Creates the root group of a new network with a custom configuration.
    pub fn with_config(name: impl Into<String>, config: GroupConfig) -> Self {
        let network = Arc::new(Network::new(name.into(), config));
        let id = network.topology.lock().root();

        Self { network, id }
    }

    /// Identifier of this group.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Name of this group, or `None` if it was removed.
    pub fn name(&self) -> Option<String> {
        let topology = self.network.topology.lock();

        topology.group(self.id).ok().map(|entry| entry.name.clone())
    }

    /// Handle to another group of the same network.
    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.network.topology.lock().group(id).ok()?;

        Some(Self {
            network: self.network.clone(),
            id,
        })
    }

    /// Creates a nested group.
    ///
    /// The nested group inherits the configuration of this group, and is
    /// running if this group is.
    pub fn add_group(&self, name: impl Into<String>) -> Result<Group, TopologyError> {
        let id = self.network.topology.lock().add_group(self.id, name.into())?;

        Ok(Self {
            network: self.network.clone(),
            id,
        })
    }

    /// Adds a step to this group.
    ///
    /// If the group is running, the step is started before this call returns.
    pub fn add_step(&self, step: Step) -> Result<StepId, TopologyError> {
        let (id, cell, running) = self.network.topology.lock().add_step(self.id, step)?;
        tracing::debug!(step = %cell.name, %id, "step added");

        if running {
            if let Err(reason) = cell.start() {
                if let Err(error) = self.network.topology.lock().remove_step(self.id, id) {
                    tracing::warn!(
                        step = %cell.name, %error,
                        "step left in place after failed start"
                    );
                }

                return Err(TopologyError::InvalidConfiguration(format!(
                    "step '{}' could not be started: {reason}",
                    cell.name
                )));
            }
        }

        Ok(id)
    }

    /// Removes a step and all its connections.
    ///
    /// A started step is stopped once detached; a computation in progress
    /// completes first.
    pub fn remove_step(&self, id: StepId) -> Result<(), TopologyError> {
        let cell = self.network.topology.lock().remove_step(self.id, id)?;
        if cell.stop() {
            tracing::debug!(step = %cell.name, "step stopped");
        }
        tracing::debug!(step = %cell.name, %id, "step removed");

        Ok(())
    }

    /// Connects an output to an input.
    ///
    /// If an existing path of at most [`GroupConfig::auto_cut_hops`]
    /// connections leads from the target back to the source, the connection
    /// is marked as a temporal cut. A longer cycle is rejected.
    pub fn connect(
        &self,
        source: OutputSlotId,
        target: InputSlotId,
    ) -> Result<ConnectionInfo, TopologyError> {
        self.connect_with(source, target, false)
    }

    /// Connects an output to an input as a temporal cut.
    ///
    /// The target reads the value its source held before the current tick,
    /// and its step is not triggered by the source.
    pub fn connect_cut(
        &self,
        source: OutputSlotId,
        target: InputSlotId,
    ) -> Result<ConnectionInfo, TopologyError> {
        self.connect_with(source, target, true)
    }

    fn connect_with(
        &self,
        source: OutputSlotId,
        target: InputSlotId,
        explicit_cut: bool,
    ) -> Result<ConnectionInfo, TopologyError> {
        let info = self
            .network
            .topology
            .lock()
            .connect(self.id, source, target, explicit_cut)?;
        tracing::debug!(%source, %target, temporal_cut = info.temporal_cut, "connected");

        Ok(info)
    }

    /// Removes the connection feeding an input.
    ///
    /// Returns `false` if the input was not connected.
    pub fn disconnect(&self, target: InputSlotId) -> Result<bool, TopologyError> {
        let removed = self.network.topology.lock().disconnect(self.id, target)?;
        if removed {
            tracing::debug!(%target, "disconnected");
        }

        Ok(removed)
    }

    /// Exposes an input of a direct member as a boundary input of this
    /// group.
    pub fn expose_input(
        &self,
        name: impl Into<String>,
        inner: InputSlotId,
    ) -> Result<InputSlotId, TopologyError> {
        self.network
            .topology
            .lock()
            .expose_input(self.id, name.into(), inner)
    }

    /// Exposes an output of a direct member as a boundary output of this
    /// group.
    pub fn expose_output(
        &self,
        name: impl Into<String>,
        inner: OutputSlotId,
    ) -> Result<OutputSlotId, TopologyError> {
        self.network
            .topology
            .lock()
            .expose_output(self.id, name.into(), inner)
    }

    /// Creates a looped thread owned by this group.
    ///
    /// The thread is spawned when the group is started.
    pub fn add_thread(
        &self,
        name: impl Into<String>,
        config: LoopConfig,
    ) -> Result<LoopedThread, TopologyError> {
        let shared = self.network.topology.lock().add_thread(
            self.id,
            name.into(),
            config,
            Arc::downgrade(&self.network),
        )?;

        Ok(LoopedThread::from_shared(shared))
    }

    /// Handle to a looped thread of the network.
    pub fn thread(&self, id: ThreadId) -> Option<LoopedThread> {
        let topology = self.network.topology.lock();
        let entry = topology.thread(id).ok()?;

        Some(LoopedThread::from_shared(entry.shared.clone()))
    }

    /// Makes a step or a group a root of a looped thread.
    ///
    /// A step can be driven by at most one thread.
    pub fn add_root(&self, thread: ThreadId, root: impl Into<Root>) -> Result<(), TopologyError> {
        self.network
            .topology
            .lock()
            .add_root(self.id, thread, root.into())
    }

    /// Removes a root from a looped thread.
    ///
    /// Returns `false` if it was not a root of this thread.
    pub fn remove_root(&self, thread: ThreadId, root: impl Into<Root>) -> Result<bool, TopologyError> {
        self.network.topology.lock().remove_root(thread, root.into())
    }

    /// Starts the steps of this group and its nested groups in topological
    /// order, then spawns their looped threads.
    ///
    /// If a step fails to start, the steps already started are stopped in
    /// reverse order and the error is returned.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let (order, threads) = {
            let mut topology = self.network.topology.lock();
            let table = topology
                .table(self.id)
                .map_err(|_| LifecycleError::UnknownGroup(self.id))?;
            topology.set_running(self.id, true);

            let mut threads: Vec<(usize, LoopedThread)> = topology
                .subtree_threads(self.id)
                .into_iter()
                .filter_map(|id| {
                    let shared = topology.thread(id).ok()?.shared.clone();
                    let first = table
                        .listeners(Trigger::Thread(id))
                        .first()
                        .and_then(|root| table.order().iter().position(|(s, _)| *s == root.step))
                        .unwrap_or(usize::MAX);

                    Some((first, LoopedThread::from_shared(shared)))
                })
                .collect();
            threads.sort_by_key(|(first, _)| *first);

            (table.order().to_vec(), threads)
        };

        let mut started: Vec<Arc<StepCell>> = Vec::with_capacity(order.len());
        for (id, cell) in &order {
            if let Err(reason) = cell.start() {
                tracing::error!(step = %cell.name, %reason, "step failed to start");
                for cell in started.iter().rev() {
                    cell.stop();
                }
                self.network.topology.lock().set_running(self.id, false);

                return Err(LifecycleError::InvalidConfiguration {
                    step: *id,
                    name: cell.name.clone(),
                    reason,
                });
            }
            tracing::debug!(step = %cell.name, "step started");
            started.push(cell.clone());
        }

        for (index, (_, thread)) in threads.iter().enumerate() {
            if let Err(e) = thread.start() {
                for (_, thread) in threads[..index].iter().rev() {
                    thread.stop();
                }
                for cell in started.iter().rev() {
                    cell.stop();
                }
                self.network.topology.lock().set_running(self.id, false);

                return Err(e);
            }
        }
        tracing::info!(group = %self.id, steps = order.len(), threads = threads.len(), "group started");

        Ok(())
    }

    /// Stops the looped threads of this group and its nested groups, then
    /// stops their steps in reverse topological order.
    ///
    /// No step of the group computes after it is stopped.
    pub fn stop(&self) {
        let (order, threads) = {
            let mut topology = self.network.topology.lock();
            let Ok(table) = topology.table(self.id) else {
                return;
            };
            topology.set_running(self.id, false);
            let threads: Vec<LoopedThread> = topology
                .subtree_threads(self.id)
                .into_iter()
                .filter_map(|id| {
                    let shared = topology.thread(id).ok()?.shared.clone();

                    Some(LoopedThread::from_shared(shared))
                })
                .collect();

            (table.order().to_vec(), threads)
        };

        for thread in threads.iter().rev() {
            thread.stop();
        }
        for (_, cell) in order.iter().rev() {
            if cell.stop() {
                tracing::debug!(step = %cell.name, "step stopped");
            }
        }
        tracing::info!(group = %self.id, "group stopped");
    }

    /// Checks whether the group was started and not stopped since.
    pub fn is_running(&self) -> bool {
        let topology = self.network.topology.lock();

        topology.group(self.id).is_ok_and(|entry| entry.running)
    }

    /// A snapshot of the state of a step of the network.
    pub fn step_state(&self, id: StepId) -> Option<StepSnapshot> {
        let cell = self.network.topology.lock().step(id).ok()?.cell.clone();

        Some(cell.snapshot())
    }

    /// The value last published on an output, with the tick that produced
    /// it.
    ///
    /// Boundary outputs of groups are followed to the step output they
    /// expose.
    pub fn read_output(&self, slot: OutputSlotId) -> Option<(Matrix, TickId)> {
        let (step, index) = self.resolve_output(slot).ok()?;
        let cell = self.network.topology.lock().step(step).ok()?.cell.clone();

        Some(cell.outputs.get(index)?.buffer.latest())
    }

    /// Resolves an output slot, possibly a boundary slot, to the step output
    /// it designates.
    pub fn resolve_output(&self, slot: OutputSlotId) -> Result<(StepId, usize), TopologyError> {
        let mut topology = self.network.topology.lock();
        if let Node::Group(group) = slot.node {
            let scope = topology.group(group)?.parent.unwrap_or(group);
            if let Some(port) = topology.table(scope)?.redirect(BoundarySlot::Output(slot)) {
                return Ok(port);
            }
        }

        topology.resolve_output(slot)
    }

    /// Resolves an input slot, possibly a boundary slot, to the step input it
    /// designates.
    pub fn resolve_input(&self, slot: InputSlotId) -> Result<(StepId, usize), TopologyError> {
        let mut topology = self.network.topology.lock();
        if let Node::Group(group) = slot.node {
            let scope = topology.group(group)?.parent.unwrap_or(group);
            if let Some(port) = topology.table(scope)?.redirect(BoundarySlot::Input(slot)) {
                return Ok(port);
            }
        }

        topology.resolve_input(slot)
    }

    /// Resolved listeners of a trigger within this group, in notification
    /// order.
    pub fn listeners(&self, trigger: Trigger) -> Vec<ListenerInfo> {
        let Ok(table) = self.network.topology.lock().table(self.id) else {
            return Vec::new();
        };

        table
            .listeners(trigger)
            .iter()
            .map(|listener| ListenerInfo {
                step: listener.step,
                looped: listener.looped,
            })
            .collect()
    }

    /// Steps of this group and its nested groups in start order.
    pub fn execution_order(&self) -> Vec<StepId> {
        let Ok(table) = self.network.topology.lock().table(self.id) else {
            return Vec::new();
        };

        table.order().iter().map(|(id, _)| *id).collect()
    }

    /// The looped thread owning a step, if any.
    pub fn owner(&self, step: StepId) -> Option<ThreadId> {
        self.network.root_table().owner(step)
    }

    /// Enumerates the members, boundary slots, connections and threads of
    /// this group, recursively.
    pub fn describe(&self) -> Result<GroupDescription, TopologyError> {
        let topology = self.network.topology.lock();

        description::describe(&topology, self.id)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
