//! Topology edits and their validation.

use std::thread;
use std::time::Duration;

use stepflow::{
    Group, GroupConfig, Inputs, KernelError, LoopConfig, Outputs, SlotDescriptor, Step,
    TopologyError, Trigger,
};

use crate::{adder, scalar, Log, DT};

fn matrix_source(bench: &Group, name: &str, rows: usize, cols: usize) -> stepflow::StepId {
    bench
        .add_step(
            Step::new(
                name,
                |_: &Inputs<'_>, outputs: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> {
                    if let Some(m) = outputs.get_mut(0) {
                        m.fill(1.0);
                    }
                    Ok(())
                },
            )
            .output("out", SlotDescriptor::matrix(rows, cols)),
        )
        .unwrap()
}

#[test]
fn incompatible_shapes_are_rejected() {
    let log = Log::default();
    let bench = Group::new("bench");
    let m = matrix_source(&bench, "m", 2, 2);
    let s = adder(&bench, "s", 1, 0.0, &log);

    assert_eq!(
        bench.connect(m.output(0), s.input(0)),
        Err(TopologyError::TypeMismatch {
            source: SlotDescriptor::matrix(2, 2),
            target: SlotDescriptor::scalar(),
        })
    );

    let any = bench
        .add_step(
            Step::new(
                "any",
                |_: &Inputs<'_>, _: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> { Ok(()) },
            )
            .input("in", SlotDescriptor::dynamic()),
        )
        .unwrap();
    bench.connect(m.output(0), any.input(0)).unwrap();
}

#[test]
fn occupied_input_is_rejected() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 0, 2.0, &log);
    let c = adder(&bench, "c", 1, 0.0, &log);

    bench.connect(a.output(0), c.input(0)).unwrap();
    assert_eq!(
        bench.connect(b.output(0), c.input(0)),
        Err(TopologyError::SlotOccupied(c.input(0)))
    );

    // Reconnecting requires a disconnection first.
    assert!(bench.disconnect(c.input(0)).unwrap());
    assert!(!bench.disconnect(c.input(0)).unwrap());
    bench.connect(b.output(0), c.input(0)).unwrap();
}

#[test]
fn long_cycle_must_be_cut_explicitly() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 1, 1.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);
    let c = adder(&bench, "c", 1, 0.0, &log);
    bench.connect(a.output(0), b.input(0)).unwrap();
    bench.connect(b.output(0), c.input(0)).unwrap();

    assert_eq!(
        bench.connect(c.output(0), a.input(0)),
        Err(TopologyError::UnresolvableCycle {
            source: c.output(0),
            target: a.input(0),
        })
    );
    assert!(bench.connect_cut(c.output(0), a.input(0)).unwrap().temporal_cut);

    let thread = bench.add_thread("main", LoopConfig::default()).unwrap();
    bench.add_root(thread.id(), a).unwrap();
    bench.start().unwrap();
    thread.step(DT).unwrap();
    thread.step(DT).unwrap();

    assert_eq!(scalar(&bench, c), 2.0);
    assert_eq!(log.computes(), ["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn auto_cut_reach_is_configurable() {
    let log = Log::default();
    let bench = Group::with_config("bench", GroupConfig { auto_cut_hops: 2 });
    let a = adder(&bench, "a", 1, 1.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);
    let c = adder(&bench, "c", 1, 0.0, &log);
    bench.connect(a.output(0), b.input(0)).unwrap();
    bench.connect(b.output(0), c.input(0)).unwrap();

    assert!(bench.connect(c.output(0), a.input(0)).unwrap().temporal_cut);

    // Nested groups inherit the configuration.
    let inner = bench.add_group("inner").unwrap();
    assert_eq!(inner.describe().unwrap().config.auto_cut_hops, 2);
}

#[test]
fn removed_step_is_detached() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);
    bench.connect(a.output(0), b.input(0)).unwrap();

    let thread = bench.add_thread("main", LoopConfig::default()).unwrap();
    bench.add_root(thread.id(), a).unwrap();
    bench.start().unwrap();
    thread.step(DT).unwrap();

    bench.remove_step(a).unwrap();
    assert_eq!(bench.remove_step(a), Err(TopologyError::UnknownStep(a)));
    assert!(bench.step_state(a).is_none());
    assert!(bench.listeners(Trigger::Thread(thread.id())).is_empty());
    assert_eq!(
        bench.connect(a.output(0), b.input(0)),
        Err(TopologyError::UnknownStep(a))
    );

    // The removed step was stopped, and the tick no longer computes anything.
    log.clear();
    thread.step(DT).unwrap();
    assert_eq!(log.entries(), Vec::<String>::new());
    assert!(bench.describe().unwrap().connections.is_empty());
}

#[test]
fn names_are_unique_within_a_group() {
    let log = Log::default();
    let bench = Group::new("bench");
    adder(&bench, "a", 0, 1.0, &log);

    let duplicate = bench.add_step(Step::new(
        "a",
        |_: &Inputs<'_>, _: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> { Ok(()) },
    ));
    assert!(matches!(duplicate, Err(TopologyError::InvalidConfiguration(_))));
    assert!(bench.add_group("a").is_err());

    // The same name is fine in a nested group.
    let inner = bench.add_group("inner").unwrap();
    adder(&inner, "a", 0, 1.0, &log);
}

#[test]
fn port_indices_are_checked() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);

    assert_eq!(
        bench.connect(a.output(1), b.input(0)),
        Err(TopologyError::UnknownOutput(a.output(1)))
    );
    assert_eq!(
        bench.connect(a.output(0), b.input(3)),
        Err(TopologyError::UnknownInput(b.input(3)))
    );
}

#[test]
fn edits_while_running_are_safe() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);

    let looped = bench
        .add_thread("main", LoopConfig::new(Duration::from_micros(200)))
        .unwrap();
    bench.add_root(looped.id(), a).unwrap();
    bench.start().unwrap();

    let editor = {
        let bench = bench.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                bench.connect(a.output(0), b.input(0)).unwrap();
                bench.disconnect(b.input(0)).unwrap();
            }
        })
    };
    editor.join().unwrap();

    bench.stop();

    let snapshot = bench.step_state(b).unwrap();
    assert!(snapshot.last_error.is_none());
    assert!(!looped.is_running());
}
