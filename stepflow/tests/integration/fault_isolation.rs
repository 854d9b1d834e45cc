//! Failures of a kernel only affect its own step and its dependents.

use std::time::Duration;

use stepflow::{
    Group, Inputs, KernelError, LoopConfig, Matrix, Outputs, SlotDescriptor, Step, StepId, StepState,
    TickId,
};

use crate::{adder, scalar, Log, DT};

fn failing(bench: &Group, name: &str, fail_on: fn(u64) -> bool) -> StepId {
    let mut n = 0;
    bench
        .add_step(
            Step::new(
                name,
                move |_: &Inputs<'_>, outputs: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> {
                    n += 1;
                    outputs.set_scalar(0, n as f64);
                    if fail_on(n) {
                        return Err(KernelError::new(format!("failure #{n}")));
                    }
                    Ok(())
                },
            )
            .input("in", SlotDescriptor::scalar())
            .output("out", SlotDescriptor::scalar()),
        )
        .unwrap()
}

#[test]
fn failed_step_does_not_trigger_its_listeners() {
    let log = Log::default();
    let bench = Group::new("bench");

    let s = adder(&bench, "s", 0, 1.0, &log);
    let f = failing(&bench, "f", |n| n == 2);
    let g = adder(&bench, "g", 1, 0.0, &log);
    let h = adder(&bench, "h", 1, 0.0, &log);
    bench.connect(s.output(0), f.input(0)).unwrap();
    bench.connect(s.output(0), g.input(0)).unwrap();
    bench.connect(f.output(0), h.input(0)).unwrap();

    let thread = bench.add_thread("main", LoopConfig::default()).unwrap();
    bench.add_root(thread.id(), s).unwrap();
    bench.start().unwrap();

    let first = thread.step(DT).unwrap();
    assert_eq!(scalar(&bench, h), 1.0);
    log.clear();

    let second = thread.step(DT).unwrap();
    assert_eq!(log.computes(), ["s", "g"]);
    let snapshot = bench.step_state(f).unwrap();
    assert_eq!(snapshot.state, StepState::Exception);
    assert_eq!(snapshot.last_error.as_deref(), Some("kernel error: failure #2"));
    assert_eq!(snapshot.last_tick, second);

    // The failed computation left the published value untouched.
    assert_eq!(bench.read_output(f.output(0)).unwrap(), (Matrix::scalar(1.0), first));
    assert_eq!(bench.step_state(h).unwrap().last_tick, first);
    assert_eq!(bench.step_state(g).unwrap().state, StepState::Done);

    // The step recovers at the next tick.
    log.clear();
    thread.step(DT).unwrap();
    assert_eq!(log.computes(), ["s", "h", "g"]);
    assert_eq!(bench.step_state(f).unwrap().state, StepState::Done);
    assert_eq!(bench.step_state(f).unwrap().last_error, None);
    assert_eq!(scalar(&bench, h), 3.0);
}

#[test]
fn panicking_kernel_is_contained() {
    let log = Log::default();
    let bench = Group::new("bench");

    let s = adder(&bench, "s", 0, 1.0, &log);
    let p = bench
        .add_step(
            Step::new(
                "p",
                |_: &Inputs<'_>, _: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> {
                    panic!("kernel bug")
                },
            )
            .input("in", SlotDescriptor::scalar())
            .output("out", SlotDescriptor::scalar()),
        )
        .unwrap();
    let after = adder(&bench, "after", 1, 0.0, &log);
    let sibling = adder(&bench, "sibling", 1, 0.0, &log);
    bench.connect(s.output(0), p.input(0)).unwrap();
    bench.connect(s.output(0), sibling.input(0)).unwrap();
    bench.connect(p.output(0), after.input(0)).unwrap();

    let thread = bench.add_thread("main", LoopConfig::default()).unwrap();
    bench.add_root(thread.id(), s).unwrap();
    bench.start().unwrap();

    thread.step(DT).unwrap();
    thread.step(DT).unwrap();

    assert_eq!(log.computes(), ["s", "sibling", "s", "sibling"]);
    let snapshot = bench.step_state(p).unwrap();
    assert_eq!(snapshot.state, StepState::Exception);
    assert_eq!(snapshot.last_error.as_deref(), Some("kernel panicked: kernel bug"));
    assert_eq!(bench.step_state(after).unwrap().last_tick, TickId::NONE);
}

#[test]
fn failed_predecessor_withholds_join() {
    let log = Log::default();
    let bench = Group::new("bench");

    let s = adder(&bench, "s", 0, 1.0, &log);
    let ok = adder(&bench, "ok", 1, 0.0, &log);
    let f = failing(&bench, "f", |_| true);
    let j = adder(&bench, "j", 2, 0.0, &log);
    bench.connect(s.output(0), ok.input(0)).unwrap();
    bench.connect(s.output(0), f.input(0)).unwrap();
    bench.connect(ok.output(0), j.input(0)).unwrap();
    bench.connect(f.output(0), j.input(1)).unwrap();

    let thread = bench.add_thread("main", LoopConfig::default()).unwrap();
    bench.add_root(thread.id(), s).unwrap();
    bench.start().unwrap();
    thread.step(DT).unwrap();

    assert_eq!(log.computes(), ["s", "ok"]);
    assert_eq!(bench.step_state(j).unwrap().state, StepState::Idle);
}
