//! Nested groups and boundary slots.

use stepflow::{Group, ListenerInfo, LoopConfig, Node, Root, TopologyError, Trigger};

use crate::{adder, scalar, Log, DT};

/// `src -> [inner: x -> y] -> sink`, where `inner` exposes `x.in0` and
/// `y.out`.
struct Bench {
    root: Group,
    inner: Group,
    src: stepflow::StepId,
    x: stepflow::StepId,
    y: stepflow::StepId,
    sink: stepflow::StepId,
}

fn bench(log: &Log) -> Bench {
    let root = Group::new("root");
    let inner = root.add_group("inner").unwrap();

    let src = adder(&root, "src", 0, 1.0, log);
    let x = adder(&inner, "x", 1, 10.0, log);
    let y = adder(&inner, "y", 1, 100.0, log);
    let sink = adder(&root, "sink", 1, 0.0, log);

    inner.connect(x.output(0), y.input(0)).unwrap();
    let input = inner.expose_input("u", x.input(0)).unwrap();
    let output = inner.expose_output("y", y.output(0)).unwrap();
    assert_eq!(input, inner.id().input(0));
    assert_eq!(output, inner.id().output(0));

    root.connect(src.output(0), input).unwrap();
    root.connect(output, sink.input(0)).unwrap();

    Bench {
        root,
        inner,
        src,
        x,
        y,
        sink,
    }
}

#[test]
fn data_flows_through_boundaries() {
    let log = Log::default();
    let b = bench(&log);

    let thread = b.root.add_thread("main", LoopConfig::default()).unwrap();
    b.root.add_root(thread.id(), b.src).unwrap();
    b.root.start().unwrap();
    thread.step(DT).unwrap();

    assert_eq!(log.computes(), ["src", "x", "y", "sink"]);
    assert_eq!(scalar(&b.root, b.sink), 111.0);

    // Boundary outputs are readable like step outputs.
    let (value, _) = b.root.read_output(b.inner.id().output(0)).unwrap();
    assert_eq!(value.as_scalar(), Some(111.0));
    assert_eq!(b.root.resolve_output(b.inner.id().output(0)), Ok((b.y, 0)));
    assert_eq!(b.root.resolve_input(b.inner.id().input(0)), Ok((b.x, 0)));
}

#[test]
fn nested_members_are_not_visible() {
    let log = Log::default();
    let b = bench(&log);

    assert_eq!(
        b.root.connect(b.src.output(0), b.y.input(0)),
        Err(TopologyError::NotVisible(b.root.id()))
    );
    assert_eq!(
        b.inner.disconnect(b.sink.input(0)),
        Err(TopologyError::NotVisible(b.inner.id()))
    );
    assert_eq!(
        b.root.expose_output("bad", b.y.output(0)),
        Err(TopologyError::NotVisible(b.root.id()))
    );
    assert!(b.inner.expose_input("u", b.y.input(0)).is_err());
}

#[test]
fn boundary_input_is_occupied_by_outer_connection() {
    let log = Log::default();
    let b = bench(&log);

    // `x.in0` is fed through the boundary.
    let other = adder(&b.inner, "other", 0, 5.0, &log);
    assert_eq!(
        b.inner.connect(other.output(0), b.x.input(0)),
        Err(TopologyError::SlotOccupied(b.x.input(0)))
    );

    assert!(b.root.disconnect(b.inner.id().input(0)).unwrap());
    b.inner.connect(other.output(0), b.x.input(0)).unwrap();
}

#[test]
fn group_driven_as_a_unit() {
    let log = Log::default();
    let b = bench(&log);
    b.root.disconnect(b.inner.id().input(0)).unwrap();

    assert_eq!(
        b.root.listeners(Trigger::Group(b.inner.id())),
        [ListenerInfo {
            step: b.x,
            looped: false
        }]
    );

    let thread = b.inner.add_thread("inner-loop", LoopConfig::default()).unwrap();
    b.inner.add_root(thread.id(), b.inner.id()).unwrap();
    b.root.start().unwrap();
    thread.step(DT).unwrap();

    // The sink is reached through the boundary output.
    assert_eq!(log.computes(), ["x", "y", "sink"]);
    assert_eq!(scalar(&b.root, b.sink), 110.0);
    assert_eq!(b.root.owner(b.sink), Some(thread.id()));
    assert_eq!(b.root.owner(b.src), None);
}

#[test]
fn overlapping_roots_are_rejected() {
    let log = Log::default();
    let b = bench(&log);

    let t1 = b.root.add_thread("t1", LoopConfig::default()).unwrap();
    let t2 = b.root.add_thread("t2", LoopConfig::default()).unwrap();
    b.root.add_root(t1.id(), b.inner.id()).unwrap();

    assert!(matches!(
        b.root.add_root(t2.id(), b.x),
        Err(TopologyError::InvalidConfiguration(_))
    ));
    assert!(b.root.add_root(t1.id(), b.inner.id()).is_err());

    assert!(b.root.remove_root(t1.id(), b.inner.id()).unwrap());
    assert!(!b.root.remove_root(t1.id(), b.inner.id()).unwrap());
    b.root.add_root(t2.id(), b.x).unwrap();
}

#[test]
fn describe_enumerates_the_hierarchy() {
    let log = Log::default();
    let b = bench(&log);
    let thread = b.root.add_thread("main", LoopConfig::default()).unwrap();
    b.root.add_root(thread.id(), b.src).unwrap();

    let description = b.root.describe().unwrap();
    assert_eq!(description.name, "root");
    assert_eq!(description.step_count(), 4);
    assert_eq!(
        description.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        ["src", "sink"]
    );
    assert_eq!(description.connections.len(), 2);
    assert_eq!(description.threads.len(), 1);
    assert_eq!(description.threads[0].roots, [Root::Step(b.src)]);

    let inner = &description.groups[0];
    assert_eq!(inner.id, b.inner.id());
    assert_eq!(inner.inputs[0].name, "u");
    assert_eq!(inner.inputs[0].inner.node, Node::Step(b.x));
    assert_eq!(inner.outputs[0].inner, b.y.output(0));
    assert_eq!(inner.connections.len(), 1);
    assert!(!inner.connections[0].temporal_cut);

    assert_eq!(b.root.group(b.inner.id()).unwrap().name().as_deref(), Some("inner"));
}

#[test]
fn group_root_fed_by_thread_waits_for_its_source() {
    let log = Log::default();
    let b = bench(&log);

    let thread = b.root.add_thread("main", LoopConfig::default()).unwrap();
    b.root.add_root(thread.id(), b.inner.id()).unwrap();
    b.root.add_root(thread.id(), b.src).unwrap();

    let roots: Vec<_> = b
        .root
        .listeners(Trigger::Thread(thread.id()))
        .into_iter()
        .map(|l| l.step)
        .collect();
    assert_eq!(roots, [b.src]);

    b.root.start().unwrap();
    thread.step(DT).unwrap();
    assert_eq!(log.computes(), ["src", "x", "y", "sink"]);
    assert_eq!(scalar(&b.root, b.sink), 111.0);
}

/// `inner` holds `x -> y`, `side` holds `s -> m` once connected, and `m`
/// feeds `y` from the enclosing group.
#[test]
fn ownership_changes_refresh_sibling_groups() {
    let log = Log::default();
    let root = Group::new("root");
    let inner = root.add_group("inner").unwrap();
    let side = root.add_group("side").unwrap();

    let x = adder(&inner, "x", 0, 1.0, &log);
    let y = adder(&inner, "y", 2, 0.0, &log);
    let s = adder(&side, "s", 0, 1.0, &log);
    let m = adder(&side, "m", 1, 0.0, &log);
    inner.connect(x.output(0), y.input(0)).unwrap();
    let m_out = side.expose_output("m", m.output(0)).unwrap();
    let y_in = inner.expose_input("v", y.input(1)).unwrap();
    root.connect(m_out, y_in).unwrap();

    let first = root.add_thread("first", LoopConfig::default()).unwrap();
    let second = root.add_thread("second", LoopConfig::default()).unwrap();
    root.add_root(first.id(), s).unwrap();
    root.add_root(second.id(), x).unwrap();

    assert_eq!(
        inner.listeners(Trigger::Step(x)),
        [ListenerInfo {
            step: y,
            looped: false
        }]
    );

    // `first` now reaches `y` through `m` and claims it.
    side.connect(s.output(0), m.input(0)).unwrap();
    assert_eq!(root.owner(y), Some(first.id()));
    assert_eq!(
        inner.listeners(Trigger::Step(x)),
        [ListenerInfo {
            step: y,
            looped: true
        }]
    );
}
