use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tapestry_core::{Error, Result, Tensor};

use crate::spec::TensorSpec;

// Operation — a named computation described as data
//
// An Operation knows how to check its inputs, predict its outputs, compute
// them and differentiate them, but it is not tied to any one execution
// engine. The same value can be executed eagerly by a Session, merely
// recorded on a tape, or placed in a ComputeGraph that has never seen a
// tensor.
//
// Operations are immutable. `with_parameters` builds a new one.
//
// VALIDATION:
//
// `validate_inputs` runs while a graph is being built, before any tensor
// exists, so it returns a ValidationResult listing every problem instead
// of failing on the first. A builder can collect failures across many
// nodes before deciding to abort. Only when an operation is executed does
// an Invalid result become Error::InvalidOperation.

/// Broad category of an operation, used for grouping and graph styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Input,
    Output,
    Math,
    Shape,
    Activation,
    Reduction,
    Nn,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Input => "input",
            OpType::Output => "output",
            OpType::Math => "math",
            OpType::Shape => "shape",
            OpType::Activation => "activation",
            OpType::Reduction => "reduction",
            OpType::Nn => "nn",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v:?}"),
            ParamValue::Ints(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        ParamValue::Ints(v)
    }
}

impl From<Vec<usize>> for ParamValue {
    fn from(v: Vec<usize>) -> Self {
        ParamValue::Ints(v.into_iter().map(|x| x as i64).collect())
    }
}

/// Ordered parameter map of an operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameters(BTreeMap<String, ParamValue>);

impl Parameters {
    pub fn new() -> Self {
        Parameters(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    fn wrong_type(op: &str, name: &str, expected: &str, got: &ParamValue) -> Error {
        Error::InvalidParameter {
            op: op.to_string(),
            name: name.to_string(),
            reason: format!("expected {expected}, got {got}"),
        }
    }

    /// Non-negative integer parameter, or `default` when absent.
    pub fn usize_or(&self, op: &str, name: &str, default: usize) -> Result<usize> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(*v as usize),
            Some(other) => Err(Self::wrong_type(op, name, "a non-negative integer", other)),
        }
    }

    pub fn bool_or(&self, op: &str, name: &str, default: bool) -> Result<bool> {
        match self.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(v)) => Ok(*v),
            Some(other) => Err(Self::wrong_type(op, name, "a boolean", other)),
        }
    }

    /// List of non-negative integers, or empty when absent. A single
    /// integer is accepted as a one-element list.
    pub fn usizes_or_empty(&self, op: &str, name: &str) -> Result<Vec<usize>> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(vec![*v as usize]),
            Some(ParamValue::Ints(vs)) if vs.iter().all(|v| *v >= 0) => {
                Ok(vs.iter().map(|&v| v as usize).collect())
            }
            Some(other) => Err(Self::wrong_type(
                op,
                name,
                "a list of non-negative integers",
                other,
            )),
        }
    }

    /// A required list of non-negative integers.
    pub fn usizes(&self, op: &str, name: &str) -> Result<Vec<usize>> {
        if self.get(name).is_none() {
            return Err(Error::InvalidParameter {
                op: op.to_string(),
                name: name.to_string(),
                reason: "missing".into(),
            });
        }
        self.usizes_or_empty(op, name)
    }
}

/// Outcome of [`Operation::validate_inputs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<String>),
}

impl ValidationResult {
    /// Valid when `reasons` is empty.
    pub fn from_reasons(reasons: Vec<String>) -> Self {
        if reasons.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(reasons)
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn reasons(&self) -> &[String] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(reasons) => reasons,
        }
    }

    /// Turn an Invalid result into [`Error::InvalidOperation`] for `op`.
    pub fn into_result(self, op: &str) -> Result<()> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(reasons) => Err(Error::InvalidOperation {
                op: op.to_string(),
                reasons,
            }),
        }
    }
}

/// A named, typed computation over tensors.
pub trait Operation: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn op_type(&self) -> OpType;

    fn parameters(&self) -> &Parameters;

    /// Check arity and per-input shape/dtype constraints. Never fails.
    fn validate_inputs(&self, inputs: &[TensorSpec]) -> ValidationResult;

    /// Output specs as a pure function of the input specs.
    fn infer_outputs(&self, inputs: &[TensorSpec]) -> Result<Vec<TensorSpec>>;

    /// Compute the outputs. Inputs are never modified.
    fn execute(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>>;

    /// The same kind of operation with different parameters.
    fn with_parameters(&self, params: Parameters) -> Result<Arc<dyn Operation>>;

    /// Vector-Jacobian product: given the forward inputs and outputs and the
    /// gradient of each output, return the gradient for each input (`None`
    /// for inputs that receive none).
    fn backward(
        &self,
        inputs: &[Tensor],
        outputs: &[Tensor],
        grad_outputs: &[Tensor],
    ) -> Result<Vec<Option<Tensor>>> {
        let _ = (inputs, outputs, grad_outputs);
        Err(Error::not_implemented(
            format!("{}.backward", self.name()),
            "autodiff",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_accessors() {
        let p = Parameters::new()
            .with("axis", 1usize)
            .with("keep_dims", true)
            .with("axes", vec![0usize, 2]);
        assert_eq!(p.usize_or("sum", "axis", 0).unwrap(), 1);
        assert_eq!(p.usize_or("sum", "missing", 7).unwrap(), 7);
        assert!(p.bool_or("sum", "keep_dims", false).unwrap());
        assert_eq!(p.usizes_or_empty("sum", "axes").unwrap(), vec![0, 2]);
        assert_eq!(p.usizes_or_empty("sum", "axis").unwrap(), vec![1]);
        assert!(matches!(
            p.bool_or("sum", "axis", false),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(p.usizes("reshape", "shape").is_err());
    }

    #[test]
    fn test_validation_result() {
        assert!(ValidationResult::from_reasons(vec![]).is_valid());
        let invalid = ValidationResult::from_reasons(vec!["a".into(), "b".into()]);
        assert_eq!(invalid.reasons().len(), 2);
        let err = invalid.into_result("matmul").unwrap_err();
        assert_eq!(err.to_string(), "invalid inputs for operation `matmul`: a; b");
    }
}
