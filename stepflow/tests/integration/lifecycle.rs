//! Start and stop ordering.

use std::time::Duration;

use stepflow::{
    Computable, Group, Inputs, KernelError, Layout, LifecycleError, LoopConfig, Outputs,
    SlotDescriptor, Step, TopologyError,
};

use crate::{adder, Log, DT};

#[test]
fn start_and_stop_follow_topological_order() {
    let log = Log::default();
    let bench = Group::new("bench");

    // Inserted in reverse dependency order.
    let c = adder(&bench, "c", 1, 0.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);
    let a = adder(&bench, "a", 0, 1.0, &log);
    bench.connect(a.output(0), b.input(0)).unwrap();
    bench.connect(b.output(0), c.input(0)).unwrap();
    assert_eq!(bench.execution_order(), [a, b, c]);

    bench.start().unwrap();
    assert!(bench.is_running());
    bench.stop();
    assert!(!bench.is_running());

    assert_eq!(
        log.entries(),
        ["start:a", "start:b", "start:c", "stop:c", "stop:b", "stop:a"]
    );
}

#[test]
fn start_is_idempotent() {
    let log = Log::default();
    let bench = Group::new("bench");
    adder(&bench, "a", 0, 1.0, &log);

    bench.start().unwrap();
    bench.start().unwrap();
    bench.stop();
    bench.stop();

    assert_eq!(log.entries(), ["start:a", "stop:a"]);
}

#[test]
fn stopped_steps_never_compute() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);
    bench.connect(a.output(0), b.input(0)).unwrap();

    let thread = bench.add_thread("main", LoopConfig::default()).unwrap();
    bench.add_root(thread.id(), a).unwrap();

    // Not started yet.
    thread.step(DT).unwrap();
    assert!(log.computes().is_empty());

    bench.start().unwrap();
    thread.step(DT).unwrap();
    bench.stop();
    thread.step(DT).unwrap();

    assert_eq!(log.computes(), ["a", "b"]);
    assert!(!bench.step_state(a).unwrap().started);
    assert_eq!(bench.step_state(b).unwrap().computations, 1);
}

#[test]
fn step_added_to_running_group_is_started() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let thread = bench.add_thread("main", LoopConfig::default()).unwrap();
    bench.add_root(thread.id(), a).unwrap();
    bench.start().unwrap();

    let late = adder(&bench, "late", 1, 0.0, &log);
    assert!(bench.step_state(late).unwrap().started);
    bench.connect(a.output(0), late.input(0)).unwrap();
    thread.step(DT).unwrap();

    assert_eq!(log.computes(), ["a", "late"]);
    assert_eq!(log.entries()[..2], ["start:a", "start:late"]);
}

/// A kernel that refuses to start without a connected input.
struct NeedsInput;

impl Computable for NeedsInput {
    fn compute(
        &mut self,
        _: &Inputs<'_>,
        _: &mut Outputs<'_>,
        _: Duration,
    ) -> Result<(), KernelError> {
        Ok(())
    }

    fn start(&mut self, layout: &Layout<'_>) -> Result<(), KernelError> {
        if !layout.is_connected(0) {
            return Err(KernelError::new("input 0 must be connected"));
        }
        Ok(())
    }
}

#[test]
fn failed_start_rolls_back() {
    let log = Log::default();
    let bench = Group::new("bench");
    adder(&bench, "a", 0, 1.0, &log);
    adder(&bench, "b", 0, 1.0, &log);
    let picky = bench
        .add_step(Step::new("picky", NeedsInput).input("in", SlotDescriptor::scalar()))
        .unwrap();

    match bench.start() {
        Err(LifecycleError::InvalidConfiguration { step, name, reason }) => {
            assert_eq!(step, picky);
            assert_eq!(name, "picky");
            assert_eq!(reason, "input 0 must be connected");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!bench.is_running());
    assert_eq!(
        log.entries(),
        ["start:a", "start:b", "stop:b", "stop:a"]
    );
}

#[test]
fn step_failing_to_start_in_running_group_is_removed() {
    let log = Log::default();
    let bench = Group::new("bench");
    adder(&bench, "a", 0, 1.0, &log);
    bench.start().unwrap();

    let result =
        bench.add_step(Step::new("picky", NeedsInput).input("in", SlotDescriptor::scalar()));
    assert!(matches!(result, Err(TopologyError::InvalidConfiguration(_))));

    let description = bench.describe().unwrap();
    assert_eq!(description.steps.len(), 1);
    assert!(bench.is_running());
}

#[test]
fn nested_group_lifecycle() {
    let log = Log::default();
    let bench = Group::new("bench");
    let inner = bench.add_group("inner").unwrap();
    adder(&inner, "x", 0, 1.0, &log);

    inner.start().unwrap();
    assert!(inner.is_running());
    assert!(!bench.is_running());
    inner.stop();

    bench.start().unwrap();
    assert!(inner.is_running());
    bench.stop();

    assert_eq!(log.entries(), ["start:x", "stop:x", "start:x", "stop:x"]);
}
