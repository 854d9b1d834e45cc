//! The capability injected into steps.
//!
//! A step does not know what it computes: the numeric work is delegated to a
//! [`Computable`] kernel supplied when the step is built. The scheduler only
//! guarantees when and how often the kernel is called, and which locks are
//! held while it runs.
//!
//! # Implementing kernels
//!
//! Stateful kernels implement [`Computable`] directly. Only
//! [`Computable::compute`] is mandatory; [`Computable::start`] and
//! [`Computable::stop`] have default implementations and are guaranteed to be
//! called in matched pairs around any run of the step.
//!
//! ```
//! use std::time::Duration;
//! use stepflow::{Computable, Inputs, KernelError, Outputs};
//!
//! /// Leaky integrator `dx/dt = (u - x) / tau`.
//! struct Leaky {
//!     tau: f64,
//!     x: f64,
//! }
//!
//! impl Computable for Leaky {
//!     fn compute(
//!         &mut self,
//!         inputs: &Inputs<'_>,
//!         outputs: &mut Outputs<'_>,
//!         elapsed: Duration,
//!     ) -> Result<(), KernelError> {
//!         let u = inputs.scalar(0).unwrap_or(0.0);
//!         self.x += elapsed.as_secs_f64() * (u - self.x) / self.tau;
//!         outputs.set_scalar(0, self.x);
//!
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Stateless kernels can simply be closures with the signature of
//! [`Computable::compute`]:
//!
//! ```
//! use std::time::Duration;
//! use stepflow::{Inputs, KernelError, Outputs, SlotDescriptor, Step};
//!
//! let doubler = Step::new(
//!     "doubler",
//!     |inputs: &Inputs<'_>, outputs: &mut Outputs<'_>, _: Duration| -> Result<(), KernelError> {
//!         let x = inputs.scalar(0).ok_or_else(|| KernelError::new("no input"))?;
//!         outputs.set_scalar(0, 2.0 * x);
//!
//!         Ok(())
//!     },
//! )
//! .input("in", SlotDescriptor::scalar())
//! .output("out", SlotDescriptor::scalar());
//! ```

use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::slot::{InputSlot, Inputs, OutputSlot, Outputs, SlotDescriptor};

/// A kernel computation, the payload of a step.
pub trait Computable: Send + 'static {
    /// Computes the outputs from the inputs.
    ///
    /// `elapsed` is the simulated time elapsed since the previous tick of the
    /// looped thread driving the computation. An error leaves the step in the
    /// `Exception` state, restores its outputs and withholds its trigger for
    /// the current tick.
    fn compute(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
        elapsed: Duration,
    ) -> Result<(), KernelError>;

    /// Validates the slot layout and allocates resources before a run.
    ///
    /// An error prevents the step, and the group being started, from running.
    fn start(&mut self, _layout: &Layout<'_>) -> Result<(), KernelError> {
        Ok(())
    }

    /// Releases resources after a run.
    fn stop(&mut self) {}
}

impl<F> Computable for F
where
    F: FnMut(&Inputs<'_>, &mut Outputs<'_>, Duration) -> Result<(), KernelError> + Send + 'static,
{
    fn compute(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
        elapsed: Duration,
    ) -> Result<(), KernelError> {
        self(inputs, outputs, elapsed)
    }
}

/// The slot layout of a step, as seen by [`Computable::start`].
pub struct Layout<'a> {
    pub(crate) inputs: &'a [InputSlot],
    pub(crate) outputs: &'a [OutputSlot],
}

impl Layout<'_> {
    /// Number of input slots.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Number of output slots.
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Descriptor of an input slot.
    pub fn input(&self, index: usize) -> Option<&SlotDescriptor> {
        self.inputs.get(index).map(|slot| &slot.descriptor)
    }

    /// Descriptor of an output slot.
    pub fn output(&self, index: usize) -> Option<&SlotDescriptor> {
        self.outputs.get(index).map(|slot| &slot.descriptor)
    }

    /// Checks whether an input slot currently has a source.
    pub fn is_connected(&self, index: usize) -> bool {
        self.inputs
            .get(index)
            .map(InputSlot::is_connected)
            .unwrap_or(false)
    }

    /// Shape of the buffer currently feeding an input, if connected.
    pub fn source_shape(&self, index: usize) -> Option<(usize, usize)> {
        let (buffer, _) = self.inputs.get(index)?.source()?;

        Some(buffer.shape())
    }
}

impl fmt::Debug for Layout<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

/// An error raised by a kernel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelError {
    message: String,
}

impl KernelError {
    /// Creates an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for KernelError {}

impl From<String> for KernelError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for KernelError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
