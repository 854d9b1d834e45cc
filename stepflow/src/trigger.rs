//! Triggers and the trigger-chain cache.
//!
//! A trigger fires when its source completes: a step after a successful
//! computation, or a looped thread at every tick. Each trigger has an
//! ordered list of listeners, resolved once per topology edit into a
//! [`TriggerTable`] and reused by every tick until the next edit.
//!
//! # Ownership
//!
//! Every step is owned by at most one looped thread. A thread owns its roots,
//! then every step reachable from them through connections that are not
//! temporal cuts, without crossing the roots of other threads. Threads claim
//! steps in creation order, so a step reachable from two threads belongs to
//! the oldest one.
//!
//! A listener owned by a different thread than the firing step is *looped*:
//! it is not computed synchronously but its ready flag is raised, and its own
//! thread picks it up at its next tick.
//!
//! # Joins
//!
//! A step with several predecessors owned by the same thread computes once,
//! when the last of them has fired during the tick. A predecessor that failed
//! never fires, so the join is withheld for the whole tick.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::group::{GroupId, Root};
use crate::looped_thread::ThreadId;
use crate::network::Topology;
use crate::slot::{InputSlotId, Node, OutputSlotId, PortRef};
use crate::step::{ComputeOutcome, StepCell, StepId};
use crate::time::TickId;

/// The source of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Trigger {
    /// Fires when the step completes successfully.
    Step(StepId),
    /// Entry point of a group: its listeners are the members with no
    /// predecessor inside the group.
    ///
    /// This trigger is never fired on its own. A looped thread whose root is
    /// a group fires these listeners as part of its own trigger.
    Group(GroupId),
    /// Fires at each tick of the looped thread; its listeners are the roots
    /// of the thread.
    Thread(ThreadId),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(id) => write!(f, "trigger of {id}"),
            Self::Group(id) => write!(f, "trigger of {id}"),
            Self::Thread(id) => write!(f, "trigger of {id}"),
        }
    }
}

/// A resolved listener of a trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ListenerInfo {
    /// The listening step.
    pub step: StepId,
    /// Whether the listener is owned by another looped thread and only gets
    /// its ready flag raised.
    pub looped: bool,
}

#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) step: StepId,
    pub(crate) cell: Arc<StepCell>,
    pub(crate) looped: bool,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("step", &self.step)
            .field("looped", &self.looped)
            .finish_non_exhaustive()
    }
}

/// Boundary slot of a group, keyed for redirection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum BoundarySlot {
    Input(InputSlotId),
    Output(OutputSlotId),
}

/// The resolved trigger chains of a group.
#[derive(Debug)]
pub(crate) struct TriggerTable {
    listeners: HashMap<Trigger, Vec<Listener>>,
    join_degree: HashMap<StepId, usize>,
    foreign_inputs: HashMap<StepId, Vec<usize>>,
    owners: HashMap<StepId, ThreadId>,
    owned: HashMap<ThreadId, Vec<(StepId, Arc<StepCell>)>>,
    order: Vec<(StepId, Arc<StepCell>)>,
    redirects: HashMap<BoundarySlot, PortRef>,
}

impl TriggerTable {
    /// Resolves the trigger chains of the subtree rooted at `scope`.
    pub(crate) fn build(topology: &Topology, scope: GroupId) -> Self {
        let steps = topology.subtree_steps(scope);
        let in_scope: HashSet<StepId> = steps.iter().copied().collect();
        let successors = topology.successors();
        let owners = assign_owners(topology, &successors);

        let order = topological_order(&steps, &successors);
        let position: HashMap<StepId, usize> =
            order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let cell = |id: StepId| topology.step(id).map(|entry| entry.cell.clone()).ok();

        let mut join_degree: HashMap<StepId, usize> = HashMap::new();
        for (&from, targets) in &successors {
            for &to in targets {
                if owners.get(&from).is_some() && owners.get(&from) == owners.get(&to) {
                    *join_degree.entry(to).or_default() += 1;
                }
            }
        }

        let mut foreign_inputs: HashMap<StepId, Vec<usize>> = HashMap::new();
        for connection in topology.connections.values().filter(|c| !c.cut) {
            let (from, (to, index)) = (connection.from.0, connection.to);
            if in_scope.contains(&to) && owners.get(&from) != owners.get(&to) {
                foreign_inputs.entry(to).or_default().push(index);
            }
        }

        let mut listeners: HashMap<Trigger, Vec<Listener>> = HashMap::new();
        for &from in &steps {
            let list: Vec<Listener> = successors
                .get(&from)
                .into_iter()
                .flatten()
                .filter(|to| in_scope.contains(*to))
                .filter_map(|&to| {
                    Some(Listener {
                        step: to,
                        cell: cell(to)?,
                        looped: owners.get(&to) != owners.get(&from),
                    })
                })
                .collect();
            if !list.is_empty() {
                listeners.insert(Trigger::Step(from), list);
            }
        }

        let group_roots = |group: GroupId| -> Vec<StepId> {
            let members: HashSet<StepId> = topology.subtree_steps(group).into_iter().collect();
            let mut has_inner_predecessor = HashSet::new();
            for (from, targets) in &successors {
                if members.contains(from) {
                    has_inner_predecessor.extend(targets.iter().copied());
                }
            }
            let mut roots: Vec<StepId> = members
                .into_iter()
                .filter(|id| !has_inner_predecessor.contains(id))
                .collect();
            roots.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));

            roots
        };
        let as_listeners = |ids: Vec<StepId>| -> Vec<Listener> {
            ids.into_iter()
                .filter_map(|step| {
                    Some(Listener {
                        step,
                        cell: cell(step)?,
                        looped: false,
                    })
                })
                .collect()
        };

        for group in topology.subtree_groups(scope) {
            listeners.insert(Trigger::Group(group), as_listeners(group_roots(group)));
        }

        let mut redirects = HashMap::new();
        for group in topology.subtree_groups(scope) {
            let Ok(entry) = topology.group(group) else {
                continue;
            };
            for index in 0..entry.inputs.len() {
                let slot = InputSlotId {
                    node: Node::Group(group),
                    index,
                };
                if let Ok(port) = topology.resolve_input(slot) {
                    redirects.insert(BoundarySlot::Input(slot), port);
                }
            }
            for index in 0..entry.outputs.len() {
                let slot = OutputSlotId {
                    node: Node::Group(group),
                    index,
                };
                if let Ok(port) = topology.resolve_output(slot) {
                    redirects.insert(BoundarySlot::Output(slot), port);
                }
            }
        }

        let mut owned: HashMap<ThreadId, Vec<(StepId, Arc<StepCell>)>> = HashMap::new();
        for thread in topology.subtree_threads(scope) {
            let Ok(entry) = topology.thread(thread) else {
                continue;
            };
            let mut roots = Vec::new();
            for root in &entry.roots {
                let ids = match *root {
                    Root::Step(id) => vec![id],
                    Root::Group(id) => group_roots(id),
                };
                for id in ids {
                    if !roots.contains(&id) {
                        roots.push(id);
                    }
                }
            }
            // A root fed by a step of the same thread computes once that step
            // has completed, like any other join.
            roots.retain(|id| !join_degree.contains_key(id));
            roots.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
            listeners.insert(Trigger::Thread(thread), as_listeners(roots));
            owned.insert(
                thread,
                order
                    .iter()
                    .filter(|id| owners.get(*id) == Some(&thread))
                    .filter_map(|&id| Some((id, cell(id)?)))
                    .collect(),
            );
        }

        let order = order
            .into_iter()
            .filter_map(|id| Some((id, cell(id)?)))
            .collect();

        Self {
            listeners,
            join_degree,
            foreign_inputs,
            owners,
            owned,
            order,
            redirects,
        }
    }

    /// Listeners of a trigger, in notification order.
    pub(crate) fn listeners(&self, trigger: Trigger) -> &[Listener] {
        self.listeners
            .get(&trigger)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of same-thread predecessors a step waits for within a tick.
    pub(crate) fn join_degree(&self, step: StepId) -> usize {
        self.join_degree.get(&step).copied().unwrap_or(0)
    }

    /// The looped thread owning a step, if any.
    /// Input slots of `step` fed by a step of another looped thread.
    pub(crate) fn foreign_inputs(&self, step: StepId) -> &[usize] {
        self.foreign_inputs.get(&step).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn owner(&self, step: StepId) -> Option<ThreadId> {
        self.owners.get(&step).copied()
    }

    /// Steps owned by a looped thread, in topological order.
    pub(crate) fn owned(&self, thread: ThreadId) -> &[(StepId, Arc<StepCell>)] {
        self.owned.get(&thread).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps of the scope in topological order, ties broken by insertion.
    pub(crate) fn order(&self) -> &[(StepId, Arc<StepCell>)] {
        &self.order
    }

    pub(crate) fn redirect(&self, slot: BoundarySlot) -> Option<PortRef> {
        self.redirects.get(&slot).copied()
    }
}

/// Assigns each step to the looped thread owning it.
fn assign_owners(
    topology: &Topology,
    successors: &HashMap<StepId, Vec<StepId>>,
) -> HashMap<StepId, ThreadId> {
    let mut threads: Vec<ThreadId> = topology
        .threads
        .iter()
        .map(|(index, _)| topology.thread_id(index))
        .collect();
    threads.sort_by_key(|id| id.generation);

    let mut seeds: Vec<(ThreadId, Vec<StepId>)> = Vec::with_capacity(threads.len());
    let mut owners = HashMap::new();
    for &thread in &threads {
        let Ok(entry) = topology.thread(thread) else {
            continue;
        };
        let mut roots = Vec::new();
        for &root in &entry.roots {
            match root {
                Root::Step(id) => roots.push(id),
                Root::Group(id) => roots.extend(topology.subtree_steps(id)),
            }
        }
        for &id in &roots {
            owners.entry(id).or_insert(thread);
        }
        seeds.push((thread, roots));
    }

    for (thread, roots) in seeds {
        let mut queue: VecDeque<StepId> = roots
            .into_iter()
            .filter(|id| owners.get(id) == Some(&thread))
            .collect();
        while let Some(step) = queue.pop_front() {
            for &next in successors.get(&step).into_iter().flatten() {
                if !owners.contains_key(&next) {
                    owners.insert(next, thread);
                    queue.push_back(next);
                }
            }
        }
    }

    owners
}

/// Kahn's algorithm over non-cut connections within `steps`; ready steps are
/// taken in insertion order.
fn topological_order(steps: &[StepId], successors: &HashMap<StepId, Vec<StepId>>) -> Vec<StepId> {
    let rank: HashMap<StepId, usize> = steps.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let mut in_degree: HashMap<StepId, usize> = steps.iter().map(|&id| (id, 0)).collect();
    for &from in steps {
        for to in successors.get(&from).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(to) {
                *degree += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = steps
        .iter()
        .enumerate()
        .filter(|(_, id)| in_degree[*id] == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(Reverse(i)) = ready.pop() {
        let step = steps[i];
        order.push(step);
        for to in successors.get(&step).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(to) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(rank[to]));
                }
            }
        }
    }

    // Steps on a cycle without temporal cut never become ready; keep them in
    // insertion order so that they are still started and stopped.
    if order.len() < steps.len() {
        let placed: HashSet<StepId> = order.iter().copied().collect();
        order.extend(steps.iter().filter(|id| !placed.contains(*id)));
    }

    order
}

/// Propagation of triggers during a single tick.
pub(crate) struct Propagation<'a> {
    table: &'a TriggerTable,
    tick: TickId,
    elapsed: Duration,
    pending: HashMap<StepId, usize>,
}

impl<'a> Propagation<'a> {
    pub(crate) fn new(table: &'a TriggerTable, tick: TickId, elapsed: Duration) -> Self {
        Self {
            table,
            tick,
            elapsed,
            pending: HashMap::new(),
        }
    }

    /// Notifies the listeners of a trigger, recursively.
    pub(crate) fn fire(&mut self, trigger: Trigger) {
        let table = self.table;
        let join = matches!(trigger, Trigger::Step(_));
        for listener in table.listeners(trigger) {
            self.notify(listener, join);
        }
    }

    fn notify(&mut self, listener: &Listener, join: bool) {
        if listener.cell.last_tick() == self.tick {
            return;
        }
        if listener.looped {
            listener.cell.mark_ready(self.tick);
            tracing::trace!(step = %listener.cell.name, tick = %self.tick, "ready flag raised");
            return;
        }
        if join {
            let degree = self.table.join_degree(listener.step);
            if degree > 1 {
                let remaining = self.pending.entry(listener.step).or_insert(degree);
                *remaining -= 1;
                if *remaining > 0 {
                    return;
                }
            }
        }

        self.run(listener.step, &listener.cell);
    }

    /// Computes a step and fires its trigger on success.
    pub(crate) fn run(&mut self, step: StepId, cell: &StepCell) {
        match cell.compute(self.tick, self.elapsed, self.table.foreign_inputs(step)) {
            ComputeOutcome::Done => self.fire(Trigger::Step(step)),
            ComputeOutcome::Skipped => {}
            ComputeOutcome::Failed(error) => {
                tracing::warn!(step = %cell.name, tick = %self.tick, %error, "computation failed");
            }
        }
    }
}

impl fmt::Debug for Propagation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Propagation")
            .field("tick", &self.tick)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
