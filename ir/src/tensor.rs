//! Tensor metadata.

use std::fmt;

use smallvec::SmallVec;
use tessera_dtype::DType;

use crate::Op;

/// Maximum tensor rank.
pub const MAX_DIMS: usize = 4;

/// Maximum number of operand slots per node.
pub const MAX_SRC: usize = 10;

/// Index of a tensor in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u32);

impl TensorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a backend buffer that tensors are placed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(pub u32);

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Concrete placement of a tensor's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub buffer: AllocationId,
    /// Address of the first byte inside the buffer's address space.
    pub addr: u64,
}

/// A tensor and, for graph nodes, the operator that produces it.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub(crate) id: TensorId,
    pub(crate) op: Op,
    pub(crate) dtype: DType,
    pub(crate) ne: [usize; MAX_DIMS],
    pub(crate) src: [Option<TensorId>; MAX_SRC],
    pub(crate) params: SmallVec<[f32; 2]>,
    /// Base tensor whose storage this tensor aliases. Never itself a view.
    pub(crate) view_src: Option<TensorId>,
    pub(crate) view_offs: usize,
    pub(crate) alloc: Option<Allocation>,
    /// Read back by the caller after the graph runs.
    pub(crate) output: bool,
}

impl Tensor {
    pub(crate) fn new(id: TensorId, op: Op, dtype: DType, ne: [usize; MAX_DIMS]) -> Self {
        Self {
            id,
            op,
            dtype,
            ne,
            src: [None; MAX_SRC],
            params: SmallVec::new(),
            view_src: None,
            view_offs: 0,
            alloc: None,
            output: false,
        }
    }

    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> [usize; MAX_DIMS] {
        self.ne
    }

    /// Present operands in slot order.
    pub fn sources(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.src.iter().flatten().copied()
    }

    /// Scalar operator parameters (epsilon, scale factor, ...).
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn view_src(&self) -> Option<TensorId> {
        self.view_src
    }

    pub fn view_offs(&self) -> usize {
        self.view_offs
    }

    pub fn is_view(&self) -> bool {
        self.view_src.is_some()
    }

    pub fn alloc(&self) -> Option<Allocation> {
        self.alloc
    }

    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn nelements(&self) -> usize {
        self.ne.iter().product()
    }

    pub fn nrows(&self) -> usize {
        self.ne[1..].iter().product()
    }

    /// Size of the tensor's contiguous storage in bytes.
    pub fn nbytes(&self) -> usize {
        self.dtype.row_size(self.ne[0]) * self.nrows()
    }
}
