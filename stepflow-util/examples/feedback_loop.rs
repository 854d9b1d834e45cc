//! Example: a proportional controller driving an integrator towards a
//! setpoint, ticked in real time by a looped thread.
//!
//! This example demonstrates in particular:
//!
//! * closing a loop with a temporal cut,
//! * real-time looped threads,
//! * probes read from another thread,
//! * orderly shutdown.
//!
//! ```text
//! ┏━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┓
//! ┃ loop                                                       ┃
//! ┃ ┌──────────┐    ┌─────┐    ┌──────┐    ┌───────┐    ┌────┐ ┃
//! ┃ │ setpoint ├───►│ sum ├───►│ gain ├───►│ plant ├─┬─►│ x  │ ┃
//! ┃ └──────────┘    └─────┘    └──────┘    └───────┘ │  └────┘ ┃
//! ┃                    ▲        ┌──────┐             │         ┃
//! ┃                    └────┊───┤ neg  │◄────────────┘         ┃
//! ┃                         cut └──────┘                       ┃
//! ┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛
//! ```

use std::error::Error;
use std::thread;
use std::time::Duration;

use stepflow::{Group, LoopConfig, SlotDescriptor};
use stepflow_util::helper_kernels::{Constant, Gain, Integrator, Probe, Sum};

const SETPOINT: f64 = 3.0;
const K: f64 = 5.0;
const INTERVAL: Duration = Duration::from_millis(5);
const RUN_TIME: Duration = Duration::from_secs(2);

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // ---------------
    // Bench assembly.
    // ---------------

    let bench = Group::new("loop");
    let scalar = SlotDescriptor::scalar();

    // Steps.
    let setpoint = bench.add_step(Constant::step("setpoint", SETPOINT))?;
    let sum = bench.add_step(Sum::step("sum", 2, scalar))?;
    let gain = bench.add_step(Gain::step("gain", K, scalar))?;
    let plant = bench.add_step(Integrator::step("plant", 0.0))?;
    let neg = bench.add_step(Gain::step("neg", -1.0, scalar))?;
    let (probe, x) = Probe::step("x", scalar);
    let probe = bench.add_step(probe)?;

    // Connections.
    bench.connect(setpoint.output(0), sum.input(0))?;
    bench.connect(sum.output(0), gain.input(0))?;
    bench.connect(gain.output(0), plant.input(0))?;
    bench.connect(plant.output(0), neg.input(0))?;
    bench.connect(plant.output(0), probe.input(0))?;

    // The loop is too long to be cut automatically.
    bench.connect_cut(neg.output(0), sum.input(1))?;

    // Looped thread.
    let looped = bench.add_thread("control", LoopConfig::new(INTERVAL))?;
    bench.add_root(looped.id(), setpoint)?;

    // ----------
    // Execution.
    // ----------

    bench.start()?;
    let mut elapsed = Duration::ZERO;
    while elapsed < RUN_TIME {
        thread::sleep(RUN_TIME / 10);
        elapsed += RUN_TIME / 10;
        if let Some(sample) = x.latest() {
            println!(
                "t = {:?}, tick {}: x = {:.4}",
                looped.time(),
                sample.tick,
                sample.value.as_scalar().unwrap_or(f64::NAN)
            );
        }
    }
    bench.stop();

    println!(
        "{} ticks, {} overruns, final x = {:?}",
        looped.ticks(),
        looped.overruns(),
        x.scalar()
    );

    Ok(())
}
