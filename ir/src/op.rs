//! Operator kinds.
//!
//! A graph node is a tensor together with the operator that produced it, so
//! [`Op`] only names the kind of computation. Operands live in the tensor's
//! source slots.

use enumset::{EnumSet, enum_set};

/// Operator kind of a graph node.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::IntoStaticStr)]
#[derive(enumset::EnumSetType)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    /// Leaf tensor, no computation.
    None,

    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Sqr,
    Sqrt,
    Scale,

    Norm,
    RmsNorm,
    GroupNorm,
    SumRows,
    SoftMax,

    MulMat,
    /// Expert-indexed matrix multiply.
    MulMatId,
    Rope,
    /// Gated linear unit over the two halves of each row.
    Glu,

    GetRows,
    SetRows,
    Cpy,
    Cont,
    Concat,

    Reshape,
    View,
    Permute,
    Transpose,
}

/// Kinds that only reinterpret tensor metadata and never touch memory.
pub const METADATA_ONLY: EnumSet<Op> = enum_set!(Op::None | Op::Reshape | Op::Transpose | Op::View | Op::Permute);

impl Op {
    /// True for kinds that neither read nor write memory.
    pub fn is_metadata_only(self) -> bool {
        METADATA_ONLY.contains(self)
    }
}
