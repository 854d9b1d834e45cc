//! Looped threads running on their own OS thread.

use std::thread;
use std::time::{Duration, Instant};

use stepflow::{Group, LoopConfig, MonotonicTime, TimeMode};

use crate::{adder, Log};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }

    false
}

#[test]
fn thread_ticks_until_stopped() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let b = adder(&bench, "b", 1, 0.0, &log);
    bench.connect(a.output(0), b.input(0)).unwrap();

    let interval = Duration::from_millis(2);
    let looped = bench.add_thread("main", LoopConfig::new(interval)).unwrap();
    bench.add_root(looped.id(), a).unwrap();
    bench.start().unwrap();
    assert!(looped.is_running());

    assert!(wait_for(|| looped.ticks() >= 5));
    bench.stop();
    assert!(!looped.is_running());

    let ticks = looped.ticks();
    let snapshot = bench.step_state(b).unwrap();
    assert_eq!(snapshot.computations, ticks);
    assert_eq!(snapshot.last_tick, looped.current_tick());
    assert_eq!(
        looped.time(),
        MonotonicTime::EPOCH + interval * u32::try_from(ticks).unwrap()
    );

    // Nothing runs after the stop.
    thread::sleep(interval * 5);
    assert_eq!(looped.ticks(), ticks);
    assert_eq!(bench.step_state(b).unwrap().computations, ticks);

    // Manual stepping is refused while running, allowed when stopped.
    assert!(looped.step(interval).is_some());
    bench.start().unwrap();
    assert!(looped.step(interval).is_none());
    bench.stop();
}

#[test]
fn measured_time_is_clamped() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);

    let max = Duration::from_millis(3);
    let config = LoopConfig::new(Duration::from_millis(1))
        .with_time_mode(TimeMode::Measured)
        .with_max_elapsed(max);
    let looped = bench.add_thread("measured", config).unwrap();
    bench.add_root(looped.id(), a).unwrap();
    bench.start().unwrap();
    assert!(wait_for(|| looped.ticks() >= 3));
    bench.stop();

    let ticks = u32::try_from(looped.ticks()).unwrap();
    assert!(looped.time() > MonotonicTime::EPOCH);
    assert!(looped.time() <= MonotonicTime::EPOCH + max * ticks);
}

#[test]
fn invalid_configuration_is_rejected() {
    let bench = Group::new("bench");

    assert!(bench
        .add_thread("zero", LoopConfig::new(Duration::ZERO))
        .is_err());

    let looped = bench.add_thread("ok", LoopConfig::default()).unwrap();
    assert!(looped.set_config(LoopConfig::new(Duration::ZERO)).is_err());
    looped
        .set_config(LoopConfig::new(Duration::from_millis(5)).with_stack_size(256 * 1024))
        .unwrap();
    assert_eq!(looped.config().interval, Duration::from_millis(5));
    assert_eq!(bench.thread(looped.id()).unwrap().name(), "ok");
}

#[test]
fn dropping_the_network_stops_threads() {
    let log = Log::default();
    let bench = Group::new("bench");
    let a = adder(&bench, "a", 0, 1.0, &log);
    let looped = bench
        .add_thread("main", LoopConfig::new(Duration::from_millis(1)))
        .unwrap();
    bench.add_root(looped.id(), a).unwrap();
    bench.start().unwrap();
    assert!(wait_for(|| looped.ticks() >= 1));

    drop(bench);
    assert!(wait_for(|| !looped.is_running()));
    assert!(looped.step(Duration::from_millis(1)).is_none());
}
