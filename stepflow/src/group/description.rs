//! Read-only enumeration of a group, for inspection and display.

use crate::error::TopologyError;
use crate::group::{ConnectionInfo, GroupConfig, GroupId, Root};
use crate::looped_thread::{LoopConfig, ThreadId};
use crate::network::Topology;
use crate::slot::{InputSlotId, Node, OutputSlotId, SlotDescriptor};
use crate::step::{StepId, StepState};

/// A slot of a step.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotDescription {
    /// Name of the slot.
    pub name: String,
    /// Declared shape of the slot.
    pub descriptor: SlotDescriptor,
}

/// A step, as listed by [`Group::describe`](crate::Group::describe).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepDescription {
    /// Identifier of the step.
    pub id: StepId,
    /// Name of the step.
    pub name: String,
    /// Execution state at the time of the call.
    pub state: StepState,
    /// Input slots, in declaration order.
    pub inputs: Vec<SlotDescription>,
    /// Output slots, in declaration order.
    pub outputs: Vec<SlotDescription>,
}

/// A boundary slot of a group and the inner slot it proxies.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundaryDescription<T> {
    /// Name of the boundary slot.
    pub name: String,
    /// The slot of a direct member that is exposed.
    pub inner: T,
}

/// A looped thread owned by a group.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThreadDescription {
    /// Identifier of the thread.
    pub id: ThreadId,
    /// Name of the thread.
    pub name: String,
    /// Configuration of the thread.
    pub config: LoopConfig,
    /// Roots, in insertion order.
    pub roots: Vec<Root>,
}

/// A group and, recursively, its nested groups.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupDescription {
    /// Identifier of the group.
    pub id: GroupId,
    /// Name of the group.
    pub name: String,
    /// Configuration of the group.
    pub config: GroupConfig,
    /// Whether the group is running.
    pub running: bool,
    /// Steps directly contained in the group.
    pub steps: Vec<StepDescription>,
    /// Nested groups.
    pub groups: Vec<GroupDescription>,
    /// Boundary inputs.
    pub inputs: Vec<BoundaryDescription<InputSlotId>>,
    /// Boundary outputs.
    pub outputs: Vec<BoundaryDescription<OutputSlotId>>,
    /// Connections made in this group, in insertion order.
    pub connections: Vec<ConnectionInfo>,
    /// Looped threads owned by the group.
    pub threads: Vec<ThreadDescription>,
}

impl GroupDescription {
    /// Total number of steps in this group and its nested groups.
    pub fn step_count(&self) -> usize {
        self.steps.len() + self.groups.iter().map(Self::step_count).sum::<usize>()
    }
}

pub(super) fn describe(topology: &Topology, id: GroupId) -> Result<GroupDescription, TopologyError> {
    let entry = topology.group(id)?;

    let mut steps = Vec::new();
    let mut groups = Vec::new();
    for &member in &entry.members {
        match member {
            Node::Step(step) => steps.push(describe_step(topology, step)?),
            Node::Group(group) => groups.push(describe(topology, group)?),
        }
    }

    let threads = entry
        .threads
        .iter()
        .filter_map(|&thread| {
            let entry = topology.thread(thread).ok()?;

            Some(ThreadDescription {
                id: thread,
                name: entry.shared.name.clone(),
                config: entry.shared.config(),
                roots: entry.roots.clone(),
            })
        })
        .collect();

    Ok(GroupDescription {
        id,
        name: entry.name.clone(),
        config: entry.config.clone(),
        running: entry.running,
        steps,
        groups,
        inputs: entry
            .inputs
            .iter()
            .map(|boundary| BoundaryDescription {
                name: boundary.name.clone(),
                inner: boundary.inner,
            })
            .collect(),
        outputs: entry
            .outputs
            .iter()
            .map(|boundary| BoundaryDescription {
                name: boundary.name.clone(),
                inner: boundary.inner,
            })
            .collect(),
        connections: topology
            .connections
            .values()
            .filter(|connection| connection.group == id)
            .map(|connection| connection.info())
            .collect(),
        threads,
    })
}

fn describe_step(topology: &Topology, id: StepId) -> Result<StepDescription, TopologyError> {
    let cell = &topology.step(id)?.cell;

    Ok(StepDescription {
        id,
        name: cell.name.clone(),
        state: cell.state(),
        inputs: cell
            .inputs
            .iter()
            .map(|slot| slot_description(&slot.name, slot.descriptor))
            .collect(),
        outputs: cell
            .outputs
            .iter()
            .map(|slot| slot_description(&slot.name, slot.descriptor))
            .collect(),
    })
}

fn slot_description(name: &str, descriptor: SlotDescriptor) -> SlotDescription {
    SlotDescription {
        name: name.to_string(),
        descriptor,
    }
}
