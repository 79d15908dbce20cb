use std::sync::Arc;

use log::debug;
use tapestry_core::{Error, ExecutionContext, Result, Tensor};

use crate::operation::{Operation, Parameters};
use crate::registry::OperationRegistry;
use crate::spec::TensorSpec;
use crate::tape::{Tape, TapeStack};

/// Executes operations eagerly and records them on the active tapes.
#[derive(Debug)]
pub struct Session {
    context: ExecutionContext,
    tapes: TapeStack,
    registry: OperationRegistry,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ExecutionContext::default())
    }
}

impl Session {
    /// A session over `context` with the built-in operations registered.
    pub fn new(context: ExecutionContext) -> Self {
        Session {
            context,
            tapes: TapeStack::new(),
            registry: OperationRegistry::builtin(),
        }
    }

    pub fn with_registry(mut self, registry: OperationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn tapes(&self) -> &TapeStack {
        &self.tapes
    }

    pub fn tapes_mut(&mut self) -> &mut TapeStack {
        &mut self.tapes
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut OperationRegistry {
        &mut self.registry
    }

    /// Validate, execute and record `operation`.
    pub fn execute(
        &mut self,
        operation: &Arc<dyn Operation>,
        inputs: &[Tensor],
    ) -> Result<Vec<Tensor>> {
        let specs: Vec<TensorSpec> = inputs
            .iter()
            .map(|t| TensorSpec::of(t.id().to_string(), t))
            .collect();
        operation
            .validate_inputs(&specs)
            .into_result(operation.name())?;
        debug!("execute `{}` on {} inputs", operation.name(), inputs.len());
        let outputs = operation.execute(inputs)?;
        self.tapes.record(operation, inputs, &outputs);
        Ok(outputs)
    }

    /// [`execute`](Self::execute) for operations with exactly one output.
    pub fn apply(&mut self, operation: &Arc<dyn Operation>, inputs: &[Tensor]) -> Result<Tensor> {
        let mut outputs = self.execute(operation, inputs)?;
        match outputs.len() {
            1 => Ok(outputs.remove(0)),
            n => Err(Error::msg(format!(
                "`{}` produced {n} outputs, expected 1",
                operation.name()
            ))),
        }
    }

    /// Look `name` up in the registry, then execute it.
    pub fn call(
        &mut self,
        name: &str,
        params: &Parameters,
        inputs: &[Tensor],
    ) -> Result<Vec<Tensor>> {
        let operation = self.registry.create_operation(name, params)?;
        self.execute(&operation, inputs)
    }

    /// Push `tape`, run `f`, then pop the tape and return it with the
    /// result of `f`. The tape is popped even when `f` fails.
    pub fn record_with<T, R>(
        &mut self,
        tape: T,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<(T, R)>
    where
        T: Tape,
    {
        self.tapes.push(tape);
        let result = f(self);
        let tape = self.tapes.pop_as::<T>()?;
        Ok((tape, result?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::GradientTape;
    use crate::ops;
    use crate::tape::ExecutionTape;
    use tapestry_core::DType;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_execute_records_on_active_tape() {
        init();
        let ctx = ExecutionContext::cpu();
        let a = ctx.tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap();
        let b = ctx.ones((3, 2), DType::F32).unwrap();
        let mut session = Session::new(ctx);

        let (tape, out) = session
            .record_with(ExecutionTape::recording(), |s| {
                let h = s.apply(&ops::matmul(), &[a.clone(), b.clone()])?;
                s.apply(&ops::relu(), &[h])
            })
            .unwrap();
        assert_eq!(tape.len(), 2);
        assert_eq!(out.to_f64_vec().unwrap(), vec![6.0, 6.0, 15.0, 15.0]);
        assert!(session.tapes().is_empty());

        // nothing on the stack: executed but not recorded
        session.apply(&ops::relu(), &[out]).unwrap();
    }

    #[test]
    fn test_invalid_inputs_rejected_before_execution() {
        let ctx = ExecutionContext::cpu();
        let a = ctx.zeros((2, 3), DType::F32).unwrap();
        let b = ctx.zeros((4, 5), DType::F32).unwrap();
        let mut session = Session::new(ctx);
        let (tape, result) = session
            .record_with(ExecutionTape::recording(), |s| {
                Ok(s.execute(&ops::matmul(), &[a.clone(), b.clone()]))
            })
            .unwrap();
        match result {
            Err(Error::InvalidOperation { op, reasons }) => {
                assert_eq!(op, "matmul");
                assert!(reasons[0].contains("inner dimensions"));
            }
            other => panic!("expected InvalidOperation, got {other:?}"),
        }
        assert!(tape.is_empty());
    }

    #[test]
    fn test_call_by_name() {
        let ctx = ExecutionContext::cpu();
        let x = ctx.tensor(&[1.0, 2.0, 3.0, 4.0], (2, 2)).unwrap();
        let mut session = Session::new(ctx);
        let out = session
            .call("sum", &Parameters::new().with("axes", 0usize), &[x.clone()])
            .unwrap();
        assert_eq!(out[0].to_f64_vec().unwrap(), vec![4.0, 6.0]);
        assert!(matches!(
            session.call("gelu", &Parameters::new(), &[x]),
            Err(Error::UnknownOperation(_))
        ));
    }

    #[test]
    fn test_record_with_gradient_tape() {
        let ctx = ExecutionContext::cpu();
        let x = ctx.tensor(&[1.0, -1.0], 2).unwrap();
        let mut session = Session::new(ctx);
        let mut tape = GradientTape::recording();
        tape.watch([&x]);
        let (tape, loss) = session
            .record_with(tape, |s| {
                let y = s.apply(&ops::tanh(), &[x.clone()])?;
                s.apply(&ops::sum(&[], false), &[y])
            })
            .unwrap();
        let grads = tape.compute_gradients(&[loss], &[x.clone()]).unwrap();
        let g = grads.get(&x).unwrap().to_f64_vec().unwrap();
        let expected = 1.0 - 1.0f64.tanh().powi(2);
        assert!((g[0] - expected).abs() < 1e-5);
        assert!((g[1] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_record_with_pops_on_error() {
        let mut session = Session::default();
        let result = session.record_with(ExecutionTape::recording(), |_| -> Result<()> {
            Err(Error::msg("boom"))
        });
        assert!(result.is_err());
        assert!(session.tapes().is_empty());
    }
}
