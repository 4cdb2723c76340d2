//! Element storage types for tessera tensors.
//!
//! Only the storage layout matters to the rest of the workspace: how many
//! bytes a row of `n` elements occupies. Block-quantized types pack a fixed
//! number of elements into a fixed-size block.


/// Tensor element storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    F32,
    F16,
    BF16,
    I8,
    I16,
    I32,
    I64,

    /// 32 elements, one f16 scale + 16 bytes of packed nibbles.
    Q4_0,
    /// 32 elements, f16 scale and min + 16 bytes of packed nibbles.
    Q4_1,
    /// 32 elements, one f16 scale + 32 signed bytes.
    Q8_0,
}

impl DType {
    /// Number of elements stored per block (1 for plain types).
    pub const fn block_size(&self) -> usize {
        match self {
            Self::Q4_0 | Self::Q4_1 | Self::Q8_0 => 32,
            _ => 1,
        }
    }

    /// Size in bytes of one block.
    pub const fn type_size(&self) -> usize {
        match self {
            Self::F32 | Self::I32 => 4,
            Self::F16 | Self::BF16 | Self::I16 => 2,
            Self::I8 => 1,
            Self::I64 => 8,
            Self::Q4_0 => 2 + 16,
            Self::Q4_1 => 2 + 2 + 16,
            Self::Q8_0 => 2 + 32,
        }
    }

    pub const fn is_quantized(&self) -> bool {
        self.block_size() > 1
    }

    /// Bytes occupied by a contiguous row of `ne` elements.
    ///
    /// Panics if `ne` is not a multiple of the block size.
    pub fn row_size(&self, ne: usize) -> usize {
        assert!(ne % self.block_size() == 0, "row of {ne} elements is not a whole number of {self} blocks");
        self.type_size() * (ne / self.block_size())
    }
}
