//! The arena shared by all groups of a network.
//!
//! Steps, groups, connections and looped threads all live in a single
//! [`Topology`] addressed by generational indices, protected by one mutex.
//! Groups are views into this arena; no Rust reference cycle ever exists
//! between steps, even when the dataflow graph is cyclic.
//!
//! Kernel hooks, thread joins and computations never run while the topology
//! lock is held.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use slab::Slab;

use crate::error::TopologyError;
use crate::group::{ConnectionInfo, GroupConfig, GroupId, Root};
use crate::looped_thread::{LoopConfig, LoopShared, ThreadId};
use crate::slot::{Binding, InputSlotId, Node, OutputSlotId, PortRef};
use crate::step::{Step, StepCell, StepId};
use crate::time::TickCounter;
use crate::trigger::TriggerTable;

/// State shared by all handles to a network.
#[derive(Debug)]
pub(crate) struct Network {
    pub(crate) topology: Mutex<Topology>,
    pub(crate) ticks: TickCounter,
}

impl Network {
    pub(crate) fn new(name: String, config: GroupConfig) -> Self {
        Self {
            topology: Mutex::new(Topology::new(name, config)),
            ticks: TickCounter::new(),
        }
    }

    /// Returns the network-wide trigger table, rebuilding it if needed.
    pub(crate) fn root_table(&self) -> Arc<TriggerTable> {
        let mut topology = self.topology.lock();
        let root = topology.root();

        topology.table_of(root)
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        // Looped threads only hold weak references to the network: ask them
        // to exit at their next tick boundary.
        for (_, thread) in self.topology.get_mut().threads.iter() {
            thread.shared.request_stop();
        }
    }
}

#[derive(Debug)]
pub(crate) struct StepEntry {
    pub(crate) cell: Arc<StepCell>,
    pub(crate) group: GroupId,
    generation: u64,
}

#[derive(Debug)]
pub(crate) struct Boundary<T> {
    pub(crate) name: String,
    pub(crate) inner: T,
}

#[derive(Debug)]
pub(crate) struct GroupEntry {
    pub(crate) name: String,
    pub(crate) parent: Option<GroupId>,
    pub(crate) config: GroupConfig,
    pub(crate) members: Vec<Node>,
    pub(crate) inputs: Vec<Boundary<InputSlotId>>,
    pub(crate) outputs: Vec<Boundary<OutputSlotId>>,
    pub(crate) threads: Vec<ThreadId>,
    pub(crate) running: bool,
    generation: u64,
    cache: Option<Arc<TriggerTable>>,
}

#[derive(Debug)]
pub(crate) struct ThreadEntry {
    pub(crate) shared: Arc<LoopShared>,
    pub(crate) group: GroupId,
    pub(crate) roots: Vec<Root>,
    generation: u64,
}

/// A connection as stored in the arena.
#[derive(Clone, Debug)]
pub(crate) struct Connection {
    /// The source as given by the editor.
    pub(crate) source: OutputSlotId,
    /// The target as given by the editor.
    pub(crate) target: InputSlotId,
    /// The resolved source port.
    pub(crate) from: PortRef,
    /// The resolved target port.
    pub(crate) to: PortRef,
    pub(crate) cut: bool,
    /// The group in which the connection was made.
    pub(crate) group: GroupId,
}

impl Connection {
    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            source: self.source,
            target: self.target,
            temporal_cut: self.cut,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Topology {
    root: GroupId,
    generation: u64,
    pub(crate) steps: Slab<StepEntry>,
    pub(crate) groups: Slab<GroupEntry>,
    pub(crate) threads: Slab<ThreadEntry>,
    /// Connections keyed by resolved target port, in insertion order.
    pub(crate) connections: IndexMap<PortRef, Connection>,
}

impl Topology {
    fn new(name: String, config: GroupConfig) -> Self {
        let mut groups = Slab::new();
        let index = groups.insert(GroupEntry {
            name,
            parent: None,
            config,
            members: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            threads: Vec::new(),
            running: false,
            generation: 0,
            cache: None,
        });

        Self {
            root: GroupId {
                index,
                generation: 0,
            },
            generation: 0,
            steps: Slab::new(),
            groups,
            threads: Slab::new(),
            connections: IndexMap::new(),
        }
    }

    pub(crate) fn root(&self) -> GroupId {
        self.root
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub(crate) fn group(&self, id: GroupId) -> Result<&GroupEntry, TopologyError> {
        self.groups
            .get(id.index)
            .filter(|entry| entry.generation == id.generation)
            .ok_or(TopologyError::UnknownGroup(id))
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut GroupEntry, TopologyError> {
        self.groups
            .get_mut(id.index)
            .filter(|entry| entry.generation == id.generation)
            .ok_or(TopologyError::UnknownGroup(id))
    }

    pub(crate) fn step(&self, id: StepId) -> Result<&StepEntry, TopologyError> {
        self.steps
            .get(id.index)
            .filter(|entry| entry.generation == id.generation)
            .ok_or(TopologyError::UnknownStep(id))
    }

    pub(crate) fn thread(&self, id: ThreadId) -> Result<&ThreadEntry, TopologyError> {
        self.threads
            .get(id.index)
            .filter(|entry| entry.generation == id.generation)
            .ok_or(TopologyError::UnknownThread(id))
    }

    fn thread_mut(&mut self, id: ThreadId) -> Result<&mut ThreadEntry, TopologyError> {
        self.threads
            .get_mut(id.index)
            .filter(|entry| entry.generation == id.generation)
            .ok_or(TopologyError::UnknownThread(id))
    }

    pub(crate) fn step_id(&self, index: usize) -> StepId {
        StepId {
            index,
            generation: self.steps[index].generation,
        }
    }

    pub(crate) fn group_id(&self, index: usize) -> GroupId {
        GroupId {
            index,
            generation: self.groups[index].generation,
        }
    }

    pub(crate) fn thread_id(&self, index: usize) -> ThreadId {
        ThreadId {
            index,
            generation: self.threads[index].generation,
        }
    }

    /// Returns the group directly containing a step or a group.
    fn parent_of(&self, node: Node) -> Result<Option<GroupId>, TopologyError> {
        match node {
            Node::Step(id) => Ok(Some(self.step(id)?.group)),
            Node::Group(id) => Ok(self.group(id)?.parent),
        }
    }

    fn check_visible(&self, group: GroupId, node: Node) -> Result<(), TopologyError> {
        if self.parent_of(node)? == Some(group) {
            Ok(())
        } else {
            Err(TopologyError::NotVisible(group))
        }
    }

    fn node_name(&self, node: Node) -> Option<&str> {
        match node {
            Node::Step(id) => self.step(id).ok().map(|entry| entry.cell.name.as_str()),
            Node::Group(id) => self.group(id).ok().map(|entry| entry.name.as_str()),
        }
    }

    fn check_name(&self, group: GroupId, name: &str) -> Result<(), TopologyError> {
        let entry = self.group(group)?;
        if entry
            .members
            .iter()
            .any(|&member| self.node_name(member) == Some(name))
        {
            return Err(TopologyError::InvalidConfiguration(format!(
                "the name '{name}' is already used in group '{}'",
                entry.name
            )));
        }

        Ok(())
    }

    /// Returns `group` and its ancestors, innermost first.
    fn lineage(&self, group: GroupId) -> Vec<GroupId> {
        let mut lineage = Vec::new();
        let mut current = Some(group);
        while let Some(id) = current {
            let Ok(entry) = self.group(id) else { break };
            lineage.push(id);
            current = entry.parent;
        }

        lineage
    }

    /// Checks whether `group` is `ancestor` or one of its descendants.
    pub(crate) fn is_within(&self, group: GroupId, ancestor: GroupId) -> bool {
        self.lineage(group).contains(&ancestor)
    }

    /// Marks the caches of `group` and all its ancestors as dirty.
    fn invalidate(&mut self, group: GroupId) {
        for id in self.lineage(group) {
            if let Ok(entry) = self.group_mut(id) {
                entry.cache = None;
            }
        }
    }

    /// Marks all caches as dirty.
    fn invalidate_all(&mut self) {
        for (_, entry) in self.groups.iter_mut() {
            entry.cache = None;
        }
    }

    /// Marks dirty the caches that may depend on a connection.
    ///
    /// Thread ownership spans the whole network, so once a looped thread
    /// exists any connection may change the tables of unrelated groups.
    fn invalidate_connection(&mut self, connection: &Connection) {
        if !self.threads.is_empty() {
            self.invalidate_all();
            return;
        }
        self.invalidate(connection.group);
        for node in [connection.source.node, connection.target.node] {
            if let Node::Group(id) = node {
                self.invalidate(id);
            }
        }
    }

    /// Returns the trigger table of a group, rebuilding it if it is dirty.
    pub(crate) fn table(&mut self, group: GroupId) -> Result<Arc<TriggerTable>, TopologyError> {
        if let Some(table) = &self.group(group)?.cache {
            return Ok(table.clone());
        }

        let table = Arc::new(TriggerTable::build(self, group));
        tracing::trace!(group = %group, "trigger-chain cache rebuilt");
        self.group_mut(group)?.cache = Some(table.clone());

        Ok(table)
    }

    /// Infallible variant of [`Topology::table`] for a group known to exist.
    fn table_of(&mut self, group: GroupId) -> Arc<TriggerTable> {
        match self.table(group) {
            Ok(table) => table,
            Err(_) => Arc::new(TriggerTable::build(self, group)),
        }
    }

    /// Groups of the subtree rooted at `group`, depth-first in member order.
    pub(crate) fn subtree_groups(&self, group: GroupId) -> Vec<GroupId> {
        let mut groups = Vec::new();
        self.visit(group, &mut |node| {
            if let Node::Group(id) = node {
                groups.push(id);
            }
        });

        groups
    }

    /// Steps of the subtree rooted at `group`, depth-first in member order.
    pub(crate) fn subtree_steps(&self, group: GroupId) -> Vec<StepId> {
        let mut steps = Vec::new();
        self.visit(group, &mut |node| {
            if let Node::Step(id) = node {
                steps.push(id);
            }
        });

        steps
    }

    fn visit(&self, group: GroupId, f: &mut impl FnMut(Node)) {
        let Ok(entry) = self.group(group) else {
            return;
        };
        f(Node::Group(group));
        for &member in &entry.members {
            match member {
                Node::Step(_) => f(member),
                Node::Group(child) => self.visit(child, f),
            }
        }
    }

    /// Looped threads owned by the subtree rooted at `group`.
    pub(crate) fn subtree_threads(&self, group: GroupId) -> Vec<ThreadId> {
        self.subtree_groups(group)
            .into_iter()
            .filter_map(|id| self.group(id).ok())
            .flat_map(|entry| entry.threads.iter().copied())
            .collect()
    }

    pub(crate) fn set_running(&mut self, group: GroupId, running: bool) {
        for id in self.subtree_groups(group) {
            if let Ok(entry) = self.group_mut(id) {
                entry.running = running;
            }
        }
    }

    pub(crate) fn add_group(
        &mut self,
        parent: GroupId,
        name: String,
    ) -> Result<GroupId, TopologyError> {
        self.check_name(parent, &name)?;
        let config = self.group(parent)?.config.clone();
        let running = self.group(parent)?.running;
        let generation = self.next_generation();
        let index = self.groups.insert(GroupEntry {
            name,
            parent: Some(parent),
            config,
            members: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            threads: Vec::new(),
            running,
            generation,
            cache: None,
        });
        let id = GroupId { index, generation };
        self.group_mut(parent)?.members.push(Node::Group(id));
        self.invalidate(parent);

        Ok(id)
    }

    /// Inserts a step; returns its id, its cell and whether the group is
    /// running.
    pub(crate) fn add_step(
        &mut self,
        group: GroupId,
        step: Step,
    ) -> Result<(StepId, Arc<StepCell>, bool), TopologyError> {
        self.check_name(group, step.name())?;
        let running = self.group(group)?.running;
        let cell = Arc::new(step.into_cell());
        let generation = self.next_generation();
        let index = self.steps.insert(StepEntry {
            cell: cell.clone(),
            group,
            generation,
        });
        let id = StepId { index, generation };
        self.group_mut(group)?.members.push(Node::Step(id));
        self.invalidate(group);

        Ok((id, cell, running))
    }

    /// Removes a step and all its incident connections.
    pub(crate) fn remove_step(
        &mut self,
        group: GroupId,
        id: StepId,
    ) -> Result<Arc<StepCell>, TopologyError> {
        self.check_visible(group, Node::Step(id))?;

        let incident: Vec<PortRef> = self
            .connections
            .values()
            .filter(|c| c.from.0 == id || c.to.0 == id)
            .map(|c| c.to)
            .collect();
        for to in incident {
            self.remove_connection(to);
        }

        let mut roots_changed = false;
        for (_, thread) in self.threads.iter_mut() {
            let before = thread.roots.len();
            thread.roots.retain(|root| *root != Root::Step(id));
            roots_changed |= thread.roots.len() != before;
        }

        self.group_mut(group)?
            .members
            .retain(|member| *member != Node::Step(id));
        let entry = self.steps.remove(id.index);
        if roots_changed {
            self.invalidate_all();
        } else {
            self.invalidate(group);
        }

        Ok(entry.cell)
    }

    fn remove_connection(&mut self, to: PortRef) -> Option<Connection> {
        let connection = self.connections.shift_remove(&to)?;
        if let Ok(entry) = self.step(to.0) {
            entry.cell.inputs[to.1].unbind();
        }
        self.invalidate_connection(&connection);

        Some(connection)
    }

    /// Resolves an output slot address down to a step port.
    pub(crate) fn resolve_output(&self, slot: OutputSlotId) -> Result<PortRef, TopologyError> {
        match slot.node {
            Node::Step(id) => {
                if slot.index < self.step(id)?.cell.outputs.len() {
                    Ok((id, slot.index))
                } else {
                    Err(TopologyError::UnknownOutput(slot))
                }
            }
            Node::Group(id) => {
                let boundary = self
                    .group(id)?
                    .outputs
                    .get(slot.index)
                    .ok_or(TopologyError::UnknownOutput(slot))?;

                self.resolve_output(boundary.inner)
            }
        }
    }

    /// Resolves an input slot address down to a step port.
    pub(crate) fn resolve_input(&self, slot: InputSlotId) -> Result<PortRef, TopologyError> {
        match slot.node {
            Node::Step(id) => {
                if slot.index < self.step(id)?.cell.inputs.len() {
                    Ok((id, slot.index))
                } else {
                    Err(TopologyError::UnknownInput(slot))
                }
            }
            Node::Group(id) => {
                let boundary = self
                    .group(id)?
                    .inputs
                    .get(slot.index)
                    .ok_or(TopologyError::UnknownInput(slot))?;

                self.resolve_input(boundary.inner)
            }
        }
    }

    /// Successors of each step through connections that are not temporal
    /// cuts, deduplicated, in connection order.
    pub(crate) fn successors(&self) -> HashMap<StepId, Vec<StepId>> {
        let mut successors: HashMap<StepId, Vec<StepId>> = HashMap::new();
        for connection in self.connections.values().filter(|c| !c.cut) {
            let list = successors.entry(connection.from.0).or_default();
            if !list.contains(&connection.to.0) {
                list.push(connection.to.0);
            }
        }

        successors
    }

    /// Length of the shortest path of non-cut connections from `from` to
    /// `to`.
    fn hops_between(&self, from: StepId, to: StepId) -> Option<usize> {
        if from == to {
            return Some(0);
        }
        let successors = self.successors();
        let mut visited = HashSet::from([from]);
        let mut queue = VecDeque::from([(from, 0)]);
        while let Some((step, hops)) = queue.pop_front() {
            for &next in successors.get(&step).into_iter().flatten() {
                if next == to {
                    return Some(hops + 1);
                }
                if visited.insert(next) {
                    queue.push_back((next, hops + 1));
                }
            }
        }

        None
    }

    pub(crate) fn connect(
        &mut self,
        group: GroupId,
        source: OutputSlotId,
        target: InputSlotId,
        explicit_cut: bool,
    ) -> Result<ConnectionInfo, TopologyError> {
        self.check_visible(group, source.node)?;
        self.check_visible(group, target.node)?;
        let from = self.resolve_output(source)?;
        let to = self.resolve_input(target)?;

        let source_cell = self.step(from.0)?.cell.clone();
        let target_cell = self.step(to.0)?.cell.clone();
        let source_descriptor = source_cell.outputs[from.1].descriptor;
        let target_descriptor = target_cell.inputs[to.1].descriptor;
        if !source_descriptor.is_compatible_with(&target_descriptor) {
            return Err(TopologyError::TypeMismatch {
                source: source_descriptor,
                target: target_descriptor,
            });
        }
        if self.connections.contains_key(&to) {
            return Err(TopologyError::SlotOccupied(target));
        }

        let cut = if explicit_cut {
            true
        } else {
            match self.hops_between(to.0, from.0) {
                None => false,
                Some(hops) if hops <= self.group(group)?.config.auto_cut_hops => true,
                Some(_) => return Err(TopologyError::UnresolvableCycle { source, target }),
            }
        };

        target_cell.inputs[to.1].bind(Binding {
            buffer: Arc::downgrade(&source_cell.outputs[from.1].buffer),
            cut,
        });
        let connection = Connection {
            source,
            target,
            from,
            to,
            cut,
            group,
        };
        let info = connection.info();
        self.invalidate_connection(&connection);
        self.connections.insert(to, connection);

        Ok(info)
    }

    pub(crate) fn disconnect(
        &mut self,
        group: GroupId,
        target: InputSlotId,
    ) -> Result<bool, TopologyError> {
        self.check_visible(group, target.node)?;
        let to = self.resolve_input(target)?;

        Ok(self.remove_connection(to).is_some())
    }

    pub(crate) fn expose_input(
        &mut self,
        group: GroupId,
        name: String,
        inner: InputSlotId,
    ) -> Result<InputSlotId, TopologyError> {
        self.check_visible(group, inner.node)?;
        self.resolve_input(inner)?;
        let entry = self.group_mut(group)?;
        if entry.inputs.iter().any(|boundary| boundary.name == name) {
            return Err(TopologyError::InvalidConfiguration(format!(
                "boundary input '{name}' already exists"
            )));
        }
        entry.inputs.push(Boundary { name, inner });
        let index = entry.inputs.len() - 1;
        self.invalidate(group);

        Ok(InputSlotId {
            node: Node::Group(group),
            index,
        })
    }

    pub(crate) fn expose_output(
        &mut self,
        group: GroupId,
        name: String,
        inner: OutputSlotId,
    ) -> Result<OutputSlotId, TopologyError> {
        self.check_visible(group, inner.node)?;
        self.resolve_output(inner)?;
        let entry = self.group_mut(group)?;
        if entry.outputs.iter().any(|boundary| boundary.name == name) {
            return Err(TopologyError::InvalidConfiguration(format!(
                "boundary output '{name}' already exists"
            )));
        }
        entry.outputs.push(Boundary { name, inner });
        let index = entry.outputs.len() - 1;
        self.invalidate(group);

        Ok(OutputSlotId {
            node: Node::Group(group),
            index,
        })
    }

    pub(crate) fn add_thread(
        &mut self,
        group: GroupId,
        name: String,
        config: LoopConfig,
        network: Weak<Network>,
    ) -> Result<Arc<LoopShared>, TopologyError> {
        config
            .validate()
            .map_err(TopologyError::InvalidConfiguration)?;
        self.group(group)?;
        let generation = self.next_generation();
        let entry = self.threads.vacant_entry();
        let id = ThreadId {
            index: entry.key(),
            generation,
        };
        let shared = Arc::new(LoopShared::new(id, name, config, network));
        entry.insert(ThreadEntry {
            shared: shared.clone(),
            group,
            roots: Vec::new(),
            generation,
        });
        self.group_mut(group)?.threads.push(id);

        Ok(shared)
    }

    /// Steps directly driven by a root.
    fn root_steps(&self, root: Root) -> Vec<StepId> {
        match root {
            Root::Step(id) => vec![id],
            Root::Group(id) => self.subtree_steps(id),
        }
    }

    pub(crate) fn add_root(
        &mut self,
        group: GroupId,
        thread: ThreadId,
        root: Root,
    ) -> Result<(), TopologyError> {
        let entry = self.thread(thread)?;
        if !self.is_within(entry.group, group) && !self.is_within(group, entry.group) {
            return Err(TopologyError::NotVisible(group));
        }
        let root_group = match root {
            Root::Step(id) => self.step(id)?.group,
            Root::Group(id) => {
                self.group(id)?;
                id
            }
        };
        if !self.is_within(root_group, entry.group) {
            return Err(TopologyError::InvalidConfiguration(format!(
                "the root is not contained in the group owning thread {thread}"
            )));
        }

        let new_steps: HashSet<StepId> = self.root_steps(root).into_iter().collect();
        for (index, other) in self.threads.iter() {
            for &existing in &other.roots {
                let overlaps = existing == root
                    || self
                        .root_steps(existing)
                        .iter()
                        .any(|step| new_steps.contains(step))
                    || matches!(
                        (existing, root),
                        (Root::Group(a), Root::Group(b))
                            if self.is_within(a, b) || self.is_within(b, a)
                    );
                if overlaps {
                    return Err(TopologyError::InvalidConfiguration(format!(
                        "the root is already driven by looped thread {}",
                        self.thread_id(index)
                    )));
                }
            }
        }

        self.thread_mut(thread)?.roots.push(root);
        self.invalidate_all();

        Ok(())
    }

    pub(crate) fn remove_root(
        &mut self,
        thread: ThreadId,
        root: Root,
    ) -> Result<bool, TopologyError> {
        let entry = self.thread_mut(thread)?;
        let before = entry.roots.len();
        entry.roots.retain(|existing| *existing != root);
        let removed = entry.roots.len() != before;
        if removed {
            self.invalidate_all();
        }

        Ok(removed)
    }
}
