use crate::dtype::DType;
use crate::shape::Shape;

/// All errors that can occur within tapestry.
///
/// One enum covers the whole workspace: shape and index failures, dtype
/// conversion failures, operation lookup/validation failures, graph
/// structure failures and backend gaps. Validation of operation inputs
/// does *not* go through this type during graph construction; it returns
/// a structured `ValidationResult` instead, and is only converted into
/// [`Error::InvalidOperation`] when an operation is actually executed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wrong number of indices / dimensions.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// An index is outside the extent of its axis.
    #[error("index {index} out of bounds for axis {axis} with size {bound} (shape {shape})")]
    IndexOutOfBounds {
        index: usize,
        axis: usize,
        bound: usize,
        shape: Shape,
    },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Two shapes that must agree do not.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Matrix multiplication inner dimensions disagree.
    #[error("matmul shape mismatch: [{m}x{k1}] @ [{k2}x{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Reshape to a shape with a different element count.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// Element count does not match the shape volume.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Conversion outside the dtype compatibility table.
    #[error("conversion from {from} to {to} is not supported")]
    ConversionNotSupported { from: DType, to: DType },

    /// A value cannot be represented by the target dtype.
    #[error("value {value} is not representable as {dtype}")]
    ValueOutOfRange { value: f64, dtype: DType },

    /// A packed code that no legal value encodes to.
    #[error("corrupt packed {dtype} value: code {code:#04b} at element {index}")]
    CorruptPackedValue { dtype: DType, code: u8, index: usize },

    /// A slice descriptor that cannot be applied to its axis.
    #[error("invalid slice on axis {axis}: {reason}")]
    InvalidSlice { axis: usize, reason: String },

    /// Read from a shape-only (void) tensor.
    #[error("tensor data of shape {shape} is void and holds no values")]
    VoidData { shape: Shape },

    /// The backend does not implement this operation.
    #[error("operation `{op}` is not implemented by the {backend} backend")]
    NotImplemented { op: String, backend: String },

    /// Operation name missing from the registry.
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),

    /// Operation inputs failed validation.
    #[error("invalid inputs for operation `{op}`: {}", reasons.join("; "))]
    InvalidOperation { op: String, reasons: Vec<String> },

    /// An operation parameter is missing or has the wrong type.
    #[error("invalid parameter `{name}` for operation `{op}`: {reason}")]
    InvalidParameter {
        op: String,
        name: String,
        reason: String,
    },

    /// A node id is already present in the graph.
    #[error("duplicate graph node `{0}`")]
    DuplicateNode(String),

    /// A node id is absent from the graph.
    #[error("graph node `{0}` not found")]
    NodeNotFound(String),

    /// The graph contains a cycle.
    #[error("compute graph contains a cycle through nodes {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    /// A tape popped from a stack is not of the requested type.
    #[error("tape on top of the stack is not a {expected}")]
    TapeTypeMismatch { expected: &'static str },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Shorthand for [`Error::NotImplemented`].
    pub fn not_implemented(op: impl Into<String>, backend: impl Into<String>) -> Self {
        Error::NotImplemented {
            op: op.into(),
            backend: backend.into(),
        }
    }
}

/// Convenience Result type used throughout tapestry.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
