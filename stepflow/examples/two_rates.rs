//! Example: a fast sampling loop and a slow supervision loop sharing data.
//!
//! This example demonstrates in particular:
//!
//! * closures as kernels,
//! * looped threads running at different rates,
//! * the ready-flag hand-off between threads,
//! * fault isolation of a failing step.
//!
//! ```text
//!  fast (2 ms)                        slow (50 ms)
//! ┌─────────┐     ┌─────────┐        ┌────────────┐
//! │ sampler ├────►│ average ├───┊───►│ supervisor │
//! └─────────┘     └─────────┘  cut   └────────────┘
//! ```

use std::error::Error;
use std::thread;
use std::time::Duration;

use stepflow::{Group, Inputs, KernelError, LoopConfig, Outputs, SlotDescriptor, Step};

const THRESHOLD: f64 = 0.9;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // ---------------
    // Bench assembly.
    // ---------------

    let bench = Group::new("bench");
    let scalar = SlotDescriptor::scalar();

    // A triangle wave between 0 and 1 with a period of 200 ms.
    let mut phase = Duration::ZERO;
    let sampler = Step::new(
        "sampler",
        move |_: &Inputs<'_>, outputs: &mut Outputs<'_>, elapsed: Duration| -> Result<(), KernelError> {
            phase += elapsed;
            let t = (phase.as_secs_f64() / 0.2).fract();
            outputs.set_scalar(0, 1.0 - (2.0 * t - 1.0).abs());

            Ok(())
        },
    )
    .output("out", scalar);

    // Exponential moving average.
    let average = Step::new(
        "average",
        |inputs: &Inputs<'_>, outputs: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> {
            let x = inputs.scalar(0).unwrap_or_default();
            let previous = outputs.get(0).and_then(|m| m.as_scalar()).unwrap_or(x);
            outputs.set_scalar(0, previous + 0.1 * (x - previous));

            Ok(())
        },
    )
    .input("in", scalar)
    .output("out", scalar);

    // Fails whenever the average exceeds the threshold.
    let supervisor = Step::new(
        "supervisor",
        |inputs: &Inputs<'_>, _: &mut Outputs<'_>, _: Duration| match inputs.scalar(0) {
            Some(x) if x > THRESHOLD => Err(KernelError::new(format!("average {x:.3} too high"))),
            _ => Ok(()),
        },
    )
    .input("in", scalar);

    let sampler = bench.add_step(sampler)?;
    let average = bench.add_step(average)?;
    let supervisor = bench.add_step(supervisor)?;
    bench.connect(sampler.output(0), average.input(0))?;
    bench.connect_cut(average.output(0), supervisor.input(0))?;

    let fast = bench.add_thread("fast", LoopConfig::new(Duration::from_millis(2)))?;
    let slow = bench.add_thread("slow", LoopConfig::new(Duration::from_millis(50)))?;
    bench.add_root(fast.id(), sampler)?;
    bench.add_root(slow.id(), supervisor)?;

    // ----------
    // Execution.
    // ----------

    bench.start()?;
    for _ in 0..10 {
        thread::sleep(Duration::from_millis(100));
        let state = bench.step_state(supervisor).ok_or("supervisor removed")?;
        println!(
            "fast: {} ticks, slow: {} ticks, supervisor: {:?} {}",
            fast.ticks(),
            slow.ticks(),
            state.state,
            state.last_error.unwrap_or_default()
        );
    }
    bench.stop();

    Ok(())
}
