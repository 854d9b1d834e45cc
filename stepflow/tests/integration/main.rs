mod cross_thread;
mod fault_isolation;
mod groups;
mod lifecycle;
mod looped_thread;
mod topology;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use stepflow::{
    Computable, Group, Inputs, KernelError, Layout, Matrix, Outputs, SlotDescriptor, Step, StepId,
};

pub(crate) const DT: Duration = Duration::from_millis(10);

/// A shared, ordered record of kernel activity.
#[derive(Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub(crate) fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn computes(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix("compute:").map(str::to_string))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Outputs the sum of its connected inputs plus a bias, and logs its
/// lifecycle.
pub(crate) struct Adder {
    name: &'static str,
    bias: f64,
    log: Log,
}

impl Computable for Adder {
    fn compute(
        &mut self,
        inputs: &Inputs<'_>,
        outputs: &mut Outputs<'_>,
        _elapsed: Duration,
    ) -> Result<(), KernelError> {
        self.log.push(format!("compute:{}", self.name));
        let sum: f64 = inputs.iter().flatten().filter_map(Matrix::as_scalar).sum();
        for index in 0..outputs.len() {
            outputs.set_scalar(index, sum + self.bias);
        }

        Ok(())
    }

    fn start(&mut self, _layout: &Layout<'_>) -> Result<(), KernelError> {
        self.log.push(format!("start:{}", self.name));
        Ok(())
    }

    fn stop(&mut self) {
        self.log.push(format!("stop:{}", self.name));
    }
}

/// Adds an [`Adder`] step with `inputs` scalar inputs and one scalar output.
pub(crate) fn adder(group: &Group, name: &'static str, inputs: usize, bias: f64, log: &Log) -> StepId {
    let mut step = Step::new(
        name,
        Adder {
            name,
            bias,
            log: log.clone(),
        },
    );
    for i in 0..inputs {
        step = step.input(format!("in{i}"), SlotDescriptor::scalar());
    }
    step = step.output("out", SlotDescriptor::scalar());

    group.add_step(step).unwrap()
}

/// Reads a scalar output.
pub(crate) fn scalar(group: &Group, step: StepId) -> f64 {
    let (value, _) = group.read_output(step.output(0)).unwrap();

    value.as_scalar().unwrap()
}
