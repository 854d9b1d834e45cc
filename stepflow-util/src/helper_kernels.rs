//! Helper kernels.
//!
//! This module contains ready-made kernels for sources, sinks and the usual
//! linear blocks of a block diagram, together with constructors returning
//! [`Step`] prototypes with the matching slots.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use stepflow::{
    Computable, Inputs, KernelError, Layout, Matrix, Outputs, Shape, SlotDescriptor, Step, TickId,
};

/// A constant source.
#[derive(Clone, Debug)]
pub struct Constant {
    value: Matrix,
}

impl Constant {
    /// Creates a source publishing `value` at every computation.
    pub fn new(value: impl Into<Matrix>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// A step with a single output named `out` sized after the value.
    pub fn step(name: impl Into<String>, value: impl Into<Matrix>) -> Step {
        let kernel = Self::new(value);
        let (rows, cols) = kernel.value.shape();

        Step::new(name, kernel).output("out", SlotDescriptor::matrix(rows, cols))
    }
}

impl Computable for Constant {
    fn compute(
        &mut self,
        _: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
        _: Duration,
    ) -> Result<(), KernelError> {
        if let Some(out) = outputs.get_mut(0) {
            out.clone_from(&self.value);
        }

        Ok(())
    }

    fn start(&mut self, layout: &Layout<'_>) -> Result<(), KernelError> {
        match layout.output(0) {
            Some(descriptor) if !descriptor.accepts(&self.value) => Err(KernelError::new(format!(
                "the constant does not fit an output of type {descriptor}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Element-wise multiplication by a constant.
#[derive(Clone, Debug)]
pub struct Gain {
    k: f64,
}

impl Gain {
    /// Creates a gain.
    pub fn new(k: f64) -> Self {
        Self { k }
    }

    /// A step with a single input `in` and a single output `out`.
    pub fn step(name: impl Into<String>, k: f64, descriptor: SlotDescriptor) -> Step {
        Step::new(name, Self::new(k))
            .input("in", descriptor)
            .output("out", descriptor)
    }
}

impl Computable for Gain {
    fn compute(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
        _: Duration,
    ) -> Result<(), KernelError> {
        let Some(input) = inputs.get(0) else {
            return Ok(());
        };
        let Some(out) = outputs.get_mut(0) else {
            return Ok(());
        };
        out.clone_from(input);
        for x in out.as_mut_slice() {
            *x *= self.k;
        }

        Ok(())
    }
}

/// Element-wise sum of all connected inputs.
///
/// Unconnected inputs are ignored. All connected inputs must have the same
/// shape.
#[derive(Clone, Debug, Default)]
pub struct Sum;

impl Sum {
    /// A step with `n` inputs named `in0`, `in1`... and a single output
    /// `out`.
    pub fn step(name: impl Into<String>, n: usize, descriptor: SlotDescriptor) -> Step {
        let mut step = Step::new(name, Sum);
        for i in 0..n {
            step = step.input(format!("in{i}"), descriptor);
        }

        step.output("out", descriptor)
    }
}

impl Computable for Sum {
    fn compute(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
        _: Duration,
    ) -> Result<(), KernelError> {
        let mut acc: Option<Matrix> = None;
        for input in inputs.iter().flatten() {
            match &mut acc {
                None => acc = Some(input.clone()),
                Some(acc) => {
                    if acc.shape() != input.shape() {
                        return Err(KernelError::new(format!(
                            "cannot add a {}x{} matrix to a {}x{} matrix",
                            input.rows(),
                            input.cols(),
                            acc.rows(),
                            acc.cols()
                        )));
                    }
                    for (a, x) in acc.as_mut_slice().iter_mut().zip(input.as_slice()) {
                        *a += x;
                    }
                }
            }
        }
        if let Some(acc) = acc {
            outputs.set(0, acc);
        }

        Ok(())
    }
}

/// Forward-Euler integrator of its input over the elapsed time.
#[derive(Clone, Debug)]
pub struct Integrator {
    initial: Matrix,
    state: Matrix,
}

impl Integrator {
    /// Creates an integrator starting from `initial`.
    pub fn new(initial: impl Into<Matrix>) -> Self {
        let initial = initial.into();

        Self {
            state: initial.clone(),
            initial,
        }
    }

    /// A step with a single input `in` and a single output `out` sized after
    /// the initial state.
    pub fn step(name: impl Into<String>, initial: impl Into<Matrix>) -> Step {
        let kernel = Self::new(initial);
        let (rows, cols) = kernel.initial.shape();
        let descriptor = SlotDescriptor::matrix(rows, cols);

        Step::new(name, kernel)
            .input("in", descriptor)
            .output("out", descriptor)
    }
}

impl Computable for Integrator {
    fn compute(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
        elapsed: Duration,
    ) -> Result<(), KernelError> {
        if let Some(rate) = inputs.get(0) {
            if rate.shape() != self.state.shape() {
                return Err(KernelError::new("the rate does not match the state shape"));
            }
            let dt = elapsed.as_secs_f64();
            for (x, dx) in self.state.as_mut_slice().iter_mut().zip(rate.as_slice()) {
                *x += dx * dt;
            }
        }
        outputs.set(0, self.state.clone());

        Ok(())
    }

    fn start(&mut self, layout: &Layout<'_>) -> Result<(), KernelError> {
        if let Some(SlotDescriptor {
            shape: Shape::Fixed { rows, cols },
        }) = layout.input(0)
        {
            if (*rows, *cols) != self.initial.shape() {
                return Err(KernelError::new("the input does not match the state shape"));
            }
        }
        self.state.clone_from(&self.initial);

        Ok(())
    }
}

/// A sample recorded by a [`Probe`].
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// The value of the input.
    pub value: Matrix,
    /// The tick that produced the value.
    pub tick: TickId,
}

/// A sink recording the latest value of its input.
///
/// The recorded values are read through a [`ProbeReader`], which can be sent
/// to another thread.
#[derive(Debug)]
pub struct Probe {
    latest: Arc<Mutex<Option<Sample>>>,
    count: Arc<Mutex<u64>>,
}

impl Probe {
    /// Creates a probe and its reader.
    pub fn new() -> (Self, ProbeReader) {
        let latest = Arc::new(Mutex::new(None));
        let count = Arc::new(Mutex::new(0));

        (
            Self {
                latest: latest.clone(),
                count: count.clone(),
            },
            ProbeReader { latest, count },
        )
    }

    /// A step with a single input `in`, and its reader.
    pub fn step(name: impl Into<String>, descriptor: SlotDescriptor) -> (Step, ProbeReader) {
        let (probe, reader) = Self::new();

        (Step::new(name, probe).input("in", descriptor), reader)
    }
}

impl Computable for Probe {
    fn compute(
        &mut self,
        inputs: &Inputs<'_>,
        _: &mut Outputs<'_>,
        _: Duration,
    ) -> Result<(), KernelError> {
        if let (Some(value), Some(tick)) = (inputs.get(0), inputs.tick(0)) {
            *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(Sample {
                value: value.clone(),
                tick,
            });
            *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        }

        Ok(())
    }
}

/// Read access to the samples of a [`Probe`].
#[derive(Clone, Debug)]
pub struct ProbeReader {
    latest: Arc<Mutex<Option<Sample>>>,
    count: Arc<Mutex<u64>>,
}

impl ProbeReader {
    /// The latest sample, if any.
    pub fn latest(&self) -> Option<Sample> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The latest value as a scalar, if any.
    pub fn scalar(&self) -> Option<f64> {
        self.latest()?.value.as_scalar()
    }

    /// Number of samples recorded so far.
    pub fn count(&self) -> u64 {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
