//! A trigger-driven dataflow execution core for networks of continuous-time
//! computational elements.
//!
//! Stepflow executes networks of *steps*: computational nodes with typed
//! input and output slots carrying matrices, wired together into a possibly
//! cyclic graph and driven by one or more periodic *looped threads*. At each
//! tick, a looped thread computes its root steps, and every step that
//! completes triggers the steps listening to it, so that data flows through
//! the network in dependency order.
//!
//! The execution guarantees are the following:
//!
//! * a step computes at most once per tick, however many of its sources
//!   fire,
//! * a step with several sources driven by the same thread computes once all
//!   of them have completed,
//! * a connection that closes a cycle is a *temporal cut*: its target reads
//!   the value its source held before the current tick, which makes feedback
//!   loops well-defined,
//! * a failed or panicking kernel leaves its outputs untouched and does not
//!   trigger its listeners, but never aborts the tick for unrelated steps,
//! * a step owned by another looped thread is never computed synchronously:
//!   a ready flag is raised instead and the owning thread picks it up.
//!
//! # A practical overview
//!
//! ## Writing kernels
//!
//! The numeric payload of a step is a [`Computable`] kernel: any type with a
//! `compute` method reading [`Inputs`] and writing [`Outputs`], or simply a
//! closure with the same signature. The kernel also receives the simulated
//! time elapsed since the previous tick.
//!
//! ```
//! use std::time::Duration;
//! use stepflow::{Computable, Inputs, KernelError, Outputs};
//!
//! /// Forward-Euler integrator.
//! pub struct Integrator {
//!     state: f64,
//! }
//!
//! impl Computable for Integrator {
//!     fn compute(
//!         &mut self,
//!         inputs: &Inputs<'_>,
//!         outputs: &mut Outputs<'_>,
//!         elapsed: Duration,
//!     ) -> Result<(), KernelError> {
//!         self.state += inputs.scalar(0).unwrap_or(0.0) * elapsed.as_secs_f64();
//!         outputs.set_scalar(0, self.state);
//!
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Assembling a network
//!
//! Steps are declared with the [`Step`] builder and added to a [`Group`],
//! which hands back a [`StepId`]. Slots are then addressed by index and
//! connected with [`Group::connect`]. Connecting an output to an input of an
//! incompatible shape, or to an input that already has a source, is rejected.
//!
//! Groups nest: a nested group exposes some of the slots of its members as
//! boundary slots, which the enclosing group connects like the slots of a
//! step.
//!
//! Feedback is expressed with ordinary connections. A connection whose target
//! can already reach its source through a short path (one connection by
//! default, see [`GroupConfig`]) is automatically marked as a temporal cut;
//! longer cycles must be cut explicitly with [`Group::connect_cut`].
//!
//! ```
//! use std::time::Duration;
//! use stepflow::{Group, Inputs, KernelError, LoopConfig, Outputs, SlotDescriptor, Step};
//!
//! fn gain(k: f64) -> impl FnMut(&Inputs<'_>, &mut Outputs<'_>, Duration) -> Result<(), KernelError> {
//!     move |inputs, outputs, _| {
//!         outputs.set_scalar(0, k * inputs.scalar(0).unwrap_or(1.0));
//!         Ok(())
//!     }
//! }
//!
//! let bench = Group::new("bench");
//! let a = bench
//!     .add_step(
//!         Step::new("a", gain(0.5))
//!             .input("u", SlotDescriptor::scalar())
//!             .output("y", SlotDescriptor::scalar()),
//!     )
//!     .unwrap();
//! let b = bench
//!     .add_step(
//!         Step::new("b", gain(2.0))
//!             .input("u", SlotDescriptor::scalar())
//!             .output("y", SlotDescriptor::scalar()),
//!     )
//!     .unwrap();
//!
//! // `a -> b` is an ordinary connection, `b -> a` closes a cycle and becomes
//! // a temporal cut.
//! assert!(!bench.connect(a.output(0), b.input(0)).unwrap().temporal_cut);
//! assert!(bench.connect(b.output(0), a.input(0)).unwrap().temporal_cut);
//!
//! let thread = bench.add_thread("main", LoopConfig::new(Duration::from_millis(1))).unwrap();
//! bench.add_root(thread.id(), a).unwrap();
//! ```
//!
//! ## Running
//!
//! [`Group::start`] starts the steps of a group in topological order, then
//! spawns its [`LoopedThread`]s. [`Group::stop`] joins the threads and stops
//! the steps in reverse order; no step computes after it was stopped.
//!
//! For deterministic execution, for instance in tests, the threads can also
//! be left stopped and ticked manually with [`LoopedThread::step`].
//!
//! The topology can be edited while the network runs: edits are serialized
//! with ticks and take effect at the next tick of each thread.
//!
//! # Logging
//!
//! Stepflow emits [`tracing`] events: lifecycle transitions at the `info` and
//! `debug` levels, kernel failures at the `warn` level and per-tick activity
//! at the `trace` level. Install any `tracing` subscriber to collect them.
//!
//! # Feature flags
//!
//! * `serde`: serialization of identifiers, slot descriptors, loop
//!   configurations and [`GroupDescription`].

#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod error;
mod group;
mod kernel;
mod loom_exports;
mod looped_thread;
mod matrix;
mod network;
mod slot;
mod step;
pub mod time;
mod trigger;

pub use error::{ComputeError, LifecycleError, TopologyError};
pub use group::{
    BoundaryDescription, ConnectionInfo, Group, GroupConfig, GroupDescription, GroupId, Root,
    SlotDescription, StepDescription, ThreadDescription,
};
pub use kernel::{Computable, KernelError, Layout};
pub use looped_thread::{LoopConfig, LoopedThread, ThreadId, TimeMode};
pub use matrix::Matrix;
pub use slot::{InputSlotId, Inputs, Node, OutputSlotId, Outputs, Shape, SlotDescriptor};
pub use step::{Step, StepId, StepSnapshot, StepState};
pub use time::{MonotonicTime, TickId};
pub use trigger::{ListenerInfo, Trigger};
