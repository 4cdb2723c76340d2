use snafu::Snafu;
use tessera_dtype::DType;

use crate::{Op, TensorId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Tensor id does not belong to this graph.
    #[snafu(display("unknown tensor {id}"))]
    UnknownTensor { id: TensorId },

    #[snafu(display("tensor rank must be in 1..={max}, got {rank}"))]
    InvalidRank { rank: usize, max: usize },

    #[snafu(display("tensor dimensions must be non-zero, got {shape:?}"))]
    ZeroDimension { shape: Vec<usize> },

    /// Row length is not a whole number of quantization blocks.
    #[snafu(display("row of {ne0} elements is not a whole number of {dtype} blocks"))]
    PartialBlock { dtype: DType, ne0: usize },

    /// Operand shapes are incompatible for the operation.
    #[snafu(display("shape mismatch for {op}: {lhs:?} vs {rhs:?}"))]
    ShapeMismatch { op: Op, lhs: [usize; 4], rhs: [usize; 4] },

    #[snafu(display("element count mismatch for {op}: expected {expected}, got {actual}"))]
    ElementCountMismatch { op: Op, expected: usize, actual: usize },

    #[snafu(display("{op} expects {expected} operand, got {actual}"))]
    DTypeMismatch { op: Op, expected: DType, actual: DType },

    #[snafu(display("invalid permutation {axes:?}"))]
    InvalidPermutation { axes: [usize; 4] },

    #[snafu(display("invalid dimension {dim} for {op}"))]
    InvalidDimension { op: Op, dim: usize },

    /// View reaches past the end of its base tensor.
    #[snafu(display("view out of bounds: offset {offset} + size {size} exceeds base size {base_size}"))]
    ViewOutOfBounds { offset: usize, size: usize, base_size: usize },

    /// Placement would run past the end of the address space.
    #[snafu(display("tensor {id} of {size} bytes cannot be placed at address {addr}"))]
    AddressOverflow { id: TensorId, addr: u64, size: usize },

    /// Views share their base allocation and cannot be assigned one directly.
    #[snafu(display("tensor {id} is a view and cannot be assigned an allocation"))]
    AssignView { id: TensorId },
}
