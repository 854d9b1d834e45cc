//! Hand-off between looped threads.

use stepflow::{Group, ListenerInfo, LoopConfig, TickId, Trigger};

use crate::{adder, scalar, Log, DT};

#[test]
fn foreign_listener_is_marked_ready() {
    let log = Log::default();
    let bench = Group::new("bench");

    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 0, 10.0, &log);
    let c = adder(&bench, "c", 2, 0.0, &log);
    bench.connect(a.output(0), c.input(0)).unwrap();
    bench.connect(b.output(0), c.input(1)).unwrap();

    // `fast` is created first and claims `c`.
    let fast = bench.add_thread("fast", LoopConfig::default()).unwrap();
    let slow = bench.add_thread("slow", LoopConfig::default()).unwrap();
    bench.add_root(fast.id(), a).unwrap();
    bench.add_root(slow.id(), b).unwrap();
    bench.start().unwrap();

    assert_eq!(bench.owner(c), Some(fast.id()));
    assert_eq!(
        bench.listeners(Trigger::Step(b)),
        [ListenerInfo {
            step: c,
            looped: true
        }]
    );
    assert_eq!(
        bench.listeners(Trigger::Step(a)),
        [ListenerInfo {
            step: c,
            looped: false
        }]
    );

    // The slow thread only raises the ready flag of `c`.
    slow.step(DT).unwrap();
    assert_eq!(log.computes(), ["b"]);
    let snapshot = bench.step_state(c).unwrap();
    assert!(snapshot.ready);
    assert_eq!(snapshot.last_tick, TickId::NONE);

    // The fast thread computes it and consumes the flag.
    let tick = fast.step(DT).unwrap();
    assert_eq!(log.computes(), ["b", "a", "c"]);
    let snapshot = bench.step_state(c).unwrap();
    assert!(!snapshot.ready);
    assert_eq!(snapshot.last_tick, tick);
    assert_eq!(scalar(&bench, c), 11.0);
}

#[test]
fn tick_ids_are_unique_across_threads() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 0, 1.0, &log);

    let t1 = bench.add_thread("t1", LoopConfig::default()).unwrap();
    let t2 = bench.add_thread("t2", LoopConfig::default()).unwrap();
    bench.add_root(t1.id(), a).unwrap();
    bench.add_root(t2.id(), b).unwrap();
    bench.start().unwrap();

    let mut ticks = Vec::new();
    for _ in 0..3 {
        ticks.push(t1.step(DT).unwrap());
        ticks.push(t2.step(DT).unwrap());
    }

    assert!(ticks.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(t1.current_tick(), ticks[4]);
    assert_eq!(t2.current_tick(), ticks[5]);
}

#[test]
fn ownership_stops_at_foreign_roots() {
    let log = Log::default();
    let bench = Group::new("bench");

    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);
    let c = adder(&bench, "c", 1, 0.0, &log);
    bench.connect(a.output(0), b.input(0)).unwrap();
    bench.connect(b.output(0), c.input(0)).unwrap();

    let first = bench.add_thread("first", LoopConfig::default()).unwrap();
    let second = bench.add_thread("second", LoopConfig::default()).unwrap();
    bench.add_root(first.id(), a).unwrap();
    bench.add_root(second.id(), b).unwrap();
    bench.start().unwrap();

    assert_eq!(bench.owner(a), Some(first.id()));
    assert_eq!(bench.owner(b), Some(second.id()));
    assert_eq!(bench.owner(c), Some(second.id()));

    first.step(DT).unwrap();
    assert_eq!(log.computes(), ["a"]);
    assert!(bench.step_state(b).unwrap().ready);

    second.step(DT).unwrap();
    assert_eq!(log.computes(), ["a", "b", "c"]);
    assert_eq!(scalar(&bench, c), 1.0);
}
