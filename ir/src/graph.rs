//! Computation graph container and builder.
//!
//! Every operator call appends its result to the node array, so construction
//! order is a valid execution order. Leaf tensors created with
//! [`Graph::new_tensor`] are not nodes.
//!
//! Views (reshape, permute, in-place results, copy destinations, ...) always
//! point directly at a non-view base tensor: a view of a view is re-pointed at
//! the base with the offsets accumulated.

use snafu::{OptionExt, ensure};
use tessera_dtype::DType;

use crate::error::*;
use crate::tensor::{Allocation, AllocationId, MAX_DIMS, Tensor, TensorId};
use crate::Op;

#[derive(Debug, Clone, Default)]
pub struct Graph {
    tensors: Vec<Tensor>,
    nodes: Vec<TensorId>,
    leafs: Vec<TensorId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn get(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(id.index())
    }

    /// Panics if `id` does not belong to this graph.
    pub fn tensor(&self, id: TensorId) -> &Tensor {
        match self.get(id) {
            Some(tensor) => tensor,
            None => panic!("tensor {id} does not belong to this graph"),
        }
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    /// Node array in execution order.
    pub fn nodes(&self) -> &[TensorId] {
        &self.nodes
    }

    /// Mutable node array, for passes that reorder it in place.
    pub fn nodes_mut(&mut self) -> &mut [TensorId] {
        &mut self.nodes
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Tensor at position `i` of the node array.
    pub fn node(&self, i: usize) -> &Tensor {
        self.tensor(self.nodes[i])
    }

    pub fn leafs(&self) -> &[TensorId] {
        &self.leafs
    }

    /// Base tensor owning the storage of `id`.
    pub fn base(&self, id: TensorId) -> TensorId {
        self.tensor(id).view_src.unwrap_or(id)
    }

    /// Number of operand slots across all nodes that reference `id`.
    pub fn n_uses(&self, id: TensorId) -> usize {
        self.nodes.iter().map(|&n| self.tensor(n).src.iter().filter(|s| **s == Some(id)).count()).sum()
    }

    // =========================================================================
    // Tensor management
    // =========================================================================

    /// Create a leaf tensor.
    pub fn new_tensor(&mut self, dtype: DType, shape: &[usize]) -> Result<TensorId> {
        let ne = check_shape(dtype, shape)?;
        let id = self.push(Op::None, dtype, ne);
        self.leafs.push(id);
        Ok(id)
    }

    pub fn set_output(&mut self, id: TensorId) -> Result<()> {
        self.checked_mut(id)?.output = true;
        Ok(())
    }

    /// Place a non-view tensor at `addr` inside `buffer`. Views of the tensor
    /// follow it.
    ///
    /// The whole tensor must fit below the end of the address space, so
    /// `addr + nbytes` and every view address derived from it are representable.
    pub fn assign(&mut self, id: TensorId, buffer: AllocationId, addr: u64) -> Result<()> {
        let tensor = self.checked_mut(id)?;
        ensure!(!tensor.is_view(), AssignViewSnafu { id });
        let size = tensor.nbytes();
        ensure!(addr.checked_add(size as u64).is_some(), AddressOverflowSnafu { id, addr, size });
        tensor.alloc = Some(Allocation { buffer, addr });

        for view in self.tensors.iter_mut().filter(|t| t.view_src == Some(id)) {
            view.alloc = Some(Allocation { buffer, addr: addr + view.view_offs as u64 });
        }
        Ok(())
    }

    fn checked(&self, id: TensorId) -> Result<&Tensor> {
        self.get(id).context(UnknownTensorSnafu { id })
    }

    fn checked_mut(&mut self, id: TensorId) -> Result<&mut Tensor> {
        self.tensors.get_mut(id.index()).context(UnknownTensorSnafu { id })
    }

    fn push(&mut self, op: Op, dtype: DType, ne: [usize; MAX_DIMS]) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        self.tensors.push(Tensor::new(id, op, dtype, ne));
        id
    }

    fn push_node(&mut self, op: Op, dtype: DType, ne: [usize; MAX_DIMS], srcs: &[TensorId], params: &[f32]) -> TensorId {
        let id = self.push(op, dtype, ne);
        let tensor = &mut self.tensors[id.index()];
        for (slot, &src) in tensor.src.iter_mut().zip(srcs) {
            *slot = Some(src);
        }
        tensor.params.extend_from_slice(params);
        self.nodes.push(id);
        id
    }

    /// Append a node whose storage aliases `a` at byte `offset`.
    fn push_view_node(
        &mut self,
        op: Op,
        a: TensorId,
        ne: [usize; MAX_DIMS],
        offset: usize,
        srcs: &[TensorId],
        params: &[f32],
    ) -> TensorId {
        let src = self.tensor(a);
        let dtype = src.dtype;
        let (base, view_offs) = match src.view_src {
            Some(base) => (base, src.view_offs + offset),
            None => (a, offset),
        };
        let alloc = self.tensor(base).alloc.map(|al| Allocation { buffer: al.buffer, addr: al.addr + view_offs as u64 });

        let id = self.push_node(op, dtype, ne, srcs, params);
        let tensor = &mut self.tensors[id.index()];
        tensor.view_src = Some(base);
        tensor.view_offs = view_offs;
        tensor.alloc = alloc;
        id
    }

    // =========================================================================
    // Elementwise
    // =========================================================================

    fn binary(&mut self, op: Op, a: TensorId, b: TensorId, inplace: bool) -> Result<TensorId> {
        let lhs = self.checked(a)?.ne;
        let rhs = self.checked(b)?.ne;
        ensure!(can_repeat(rhs, lhs), ShapeMismatchSnafu { op, lhs, rhs });

        if inplace {
            Ok(self.push_view_node(op, a, lhs, 0, &[a, b], &[]))
        } else {
            let dtype = self.tensor(a).dtype;
            Ok(self.push_node(op, dtype, lhs, &[a, b], &[]))
        }
    }

    fn unary(&mut self, op: Op, a: TensorId, params: &[f32], inplace: bool) -> Result<TensorId> {
        let src = self.checked(a)?;
        let (ne, dtype) = (src.ne, src.dtype);
        if inplace {
            Ok(self.push_view_node(op, a, ne, 0, &[a], params))
        } else {
            Ok(self.push_node(op, dtype, ne, &[a], params))
        }
    }

    /// `a + b`, broadcasting `b` over `a`.
    pub fn add(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.binary(Op::Add, a, b, false)
    }

    /// `a += b`; the result is a view of `a`.
    pub fn add_inplace(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.binary(Op::Add, a, b, true)
    }

    pub fn sub(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.binary(Op::Sub, a, b, false)
    }

    pub fn mul(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.binary(Op::Mul, a, b, false)
    }

    pub fn div(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        self.binary(Op::Div, a, b, false)
    }

    pub fn sqr(&mut self, a: TensorId) -> Result<TensorId> {
        self.unary(Op::Sqr, a, &[], false)
    }

    pub fn sqrt(&mut self, a: TensorId) -> Result<TensorId> {
        self.unary(Op::Sqrt, a, &[], false)
    }

    pub fn scale(&mut self, a: TensorId, factor: f32) -> Result<TensorId> {
        self.unary(Op::Scale, a, &[factor], false)
    }

    pub fn scale_inplace(&mut self, a: TensorId, factor: f32) -> Result<TensorId> {
        self.unary(Op::Scale, a, &[factor], true)
    }

    // =========================================================================
    // Normalization and reductions
    // =========================================================================

    pub fn norm(&mut self, a: TensorId, eps: f32) -> Result<TensorId> {
        self.unary(Op::Norm, a, &[eps], false)
    }

    pub fn rms_norm(&mut self, a: TensorId, eps: f32) -> Result<TensorId> {
        self.unary(Op::RmsNorm, a, &[eps], false)
    }

    pub fn group_norm(&mut self, a: TensorId, n_groups: usize, eps: f32) -> Result<TensorId> {
        let ne = self.checked(a)?.ne;
        ensure!(n_groups > 0 && ne[2] % n_groups == 0, InvalidDimensionSnafu { op: Op::GroupNorm, dim: n_groups });
        self.unary(Op::GroupNorm, a, &[n_groups as f32, eps], false)
    }

    pub fn soft_max(&mut self, a: TensorId) -> Result<TensorId> {
        self.unary(Op::SoftMax, a, &[], false)
    }

    /// Sum along dimension 0. Row sums are always `f32`.
    pub fn sum_rows(&mut self, a: TensorId) -> Result<TensorId> {
        let ne = self.checked(a)?.ne;
        Ok(self.push_node(Op::SumRows, DType::F32, [1, ne[1], ne[2], ne[3]], &[a], &[]))
    }

    // =========================================================================
    // Projections
    // =========================================================================

    /// `a: [k, m, ..]` times `b: [k, n, ..]` gives `[m, n, ..]`.
    pub fn mul_mat(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        let lhs = self.checked(a)?.ne;
        let rhs = self.checked(b)?.ne;
        ensure!(
            lhs[0] == rhs[0] && rhs[2] % lhs[2] == 0 && rhs[3] % lhs[3] == 0,
            ShapeMismatchSnafu { op: Op::MulMat, lhs, rhs }
        );
        Ok(self.push_node(Op::MulMat, DType::F32, [lhs[1], rhs[1], rhs[2], rhs[3]], &[a, b], &[]))
    }

    /// Expert-indexed matrix multiply.
    ///
    /// `experts: [k, m, n_expert]`, `b: [k, n_used, n_tokens]`,
    /// `ids: [n_used, n_tokens]` of `i32`; the result is `[m, n_used, n_tokens]`.
    pub fn mul_mat_id(&mut self, experts: TensorId, b: TensorId, ids: TensorId) -> Result<TensorId> {
        let lhs = self.checked(experts)?.ne;
        let rhs = self.checked(b)?.ne;
        let index = self.checked(ids)?;
        let (index_ne, index_dtype) = (index.ne, index.dtype);

        ensure!(
            index_dtype == DType::I32,
            DTypeMismatchSnafu { op: Op::MulMatId, expected: DType::I32, actual: index_dtype }
        );
        ensure!(lhs[0] == rhs[0], ShapeMismatchSnafu { op: Op::MulMatId, lhs, rhs });
        ensure!(
            index_ne[0] == rhs[1] && index_ne[1] == rhs[2],
            ShapeMismatchSnafu { op: Op::MulMatId, lhs: index_ne, rhs }
        );
        Ok(self.push_node(Op::MulMatId, DType::F32, [lhs[1], rhs[1], rhs[2], 1], &[experts, b, ids], &[]))
    }

    /// Rotary position embedding; `pos` holds one `i32` position per row group.
    pub fn rope(&mut self, a: TensorId, pos: TensorId) -> Result<TensorId> {
        let ne = self.checked(a)?.ne;
        let positions = self.checked(pos)?;
        let (pos_ne, pos_dtype) = (positions.ne, positions.dtype);

        ensure!(pos_dtype == DType::I32, DTypeMismatchSnafu { op: Op::Rope, expected: DType::I32, actual: pos_dtype });
        ensure!(pos_ne[0] == ne[2], ShapeMismatchSnafu { op: Op::Rope, lhs: ne, rhs: pos_ne });
        let dtype = self.tensor(a).dtype;
        Ok(self.push_node(Op::Rope, dtype, ne, &[a, pos], &[]))
    }

    /// Gated linear unit over the two halves of each row.
    pub fn glu(&mut self, a: TensorId) -> Result<TensorId> {
        let src = self.checked(a)?;
        let (ne, dtype) = (src.ne, src.dtype);
        ensure!(ne[0] % 2 == 0, InvalidDimensionSnafu { op: Op::Glu, dim: 0usize });
        ensure!((ne[0] / 2) % dtype.block_size() == 0, PartialBlockSnafu { dtype, ne0: ne[0] / 2 });
        Ok(self.push_node(Op::Glu, dtype, [ne[0] / 2, ne[1], ne[2], ne[3]], &[a], &[]))
    }

    // =========================================================================
    // Data movement
    // =========================================================================

    /// Gather rows of `a` by the `i32` indices in `rows: [n, a.ne2, a.ne3]`.
    pub fn get_rows(&mut self, a: TensorId, rows: TensorId) -> Result<TensorId> {
        let ne = self.checked(a)?.ne;
        let index = self.checked(rows)?;
        let (rows_ne, rows_dtype) = (index.ne, index.dtype);

        ensure!(
            rows_dtype == DType::I32,
            DTypeMismatchSnafu { op: Op::GetRows, expected: DType::I32, actual: rows_dtype }
        );
        ensure!(
            rows_ne[1] == ne[2] && rows_ne[2] == ne[3],
            ShapeMismatchSnafu { op: Op::GetRows, lhs: ne, rhs: rows_ne }
        );
        Ok(self.push_node(Op::GetRows, DType::F32, [ne[0], rows_ne[0], rows_ne[1], rows_ne[2]], &[a, rows], &[]))
    }

    /// Scatter the rows of `src` into `dst` at the `i32` indices in `rows`.
    ///
    /// The result is a view of `dst`, which is not itself an operand.
    pub fn set_rows(&mut self, dst: TensorId, src: TensorId, rows: TensorId) -> Result<TensorId> {
        let dst_ne = self.checked(dst)?.ne;
        let src_ne = self.checked(src)?.ne;
        let index = self.checked(rows)?;
        let (rows_ne, rows_dtype) = (index.ne, index.dtype);

        ensure!(
            rows_dtype == DType::I32,
            DTypeMismatchSnafu { op: Op::SetRows, expected: DType::I32, actual: rows_dtype }
        );
        ensure!(
            src_ne[0] == dst_ne[0] && rows_ne[0] == src_ne[1],
            ShapeMismatchSnafu { op: Op::SetRows, lhs: dst_ne, rhs: src_ne }
        );
        Ok(self.push_view_node(Op::SetRows, dst, dst_ne, 0, &[src, rows], &[]))
    }

    /// Copy `a` into `b`; the result is a view of `b`.
    pub fn cpy(&mut self, a: TensorId, b: TensorId) -> Result<TensorId> {
        let expected = self.checked(b)?.nelements();
        let actual = self.checked(a)?.nelements();
        ensure!(expected == actual, ElementCountMismatchSnafu { op: Op::Cpy, expected, actual });
        let ne = self.tensor(b).ne;
        Ok(self.push_view_node(Op::Cpy, b, ne, 0, &[a, b], &[]))
    }

    /// Materialize `a` into fresh contiguous storage.
    pub fn cont(&mut self, a: TensorId) -> Result<TensorId> {
        self.unary(Op::Cont, a, &[], false)
    }

    pub fn dup(&mut self, a: TensorId) -> Result<TensorId> {
        self.unary(Op::Dup, a, &[], false)
    }

    pub fn concat(&mut self, a: TensorId, b: TensorId, dim: usize) -> Result<TensorId> {
        ensure!(dim < MAX_DIMS, InvalidDimensionSnafu { op: Op::Concat, dim });
        let lhs = self.checked(a)?.ne;
        let rhs = self.checked(b)?.ne;
        ensure!(
            (0..MAX_DIMS).all(|d| d == dim || lhs[d] == rhs[d]),
            ShapeMismatchSnafu { op: Op::Concat, lhs, rhs }
        );

        let mut ne = lhs;
        ne[dim] += rhs[dim];
        let dtype = self.tensor(a).dtype;
        Ok(self.push_node(Op::Concat, dtype, ne, &[a, b], &[]))
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn reshape(&mut self, a: TensorId, shape: &[usize]) -> Result<TensorId> {
        let src = self.checked(a)?;
        let (dtype, actual) = (src.dtype, src.nelements());
        let ne = check_shape(dtype, shape)?;
        let expected: usize = ne.iter().product();
        ensure!(expected == actual, ElementCountMismatchSnafu { op: Op::Reshape, expected, actual });
        Ok(self.push_view_node(Op::Reshape, a, ne, 0, &[a], &[]))
    }

    /// Contiguous view of `shape` starting `offset` bytes into `a`.
    pub fn view(&mut self, a: TensorId, shape: &[usize], offset: usize) -> Result<TensorId> {
        let src = self.checked(a)?;
        let dtype = src.dtype;
        let (base, base_offs) = match src.view_src {
            Some(base) => (base, src.view_offs),
            None => (a, 0),
        };
        let ne = check_shape(dtype, shape)?;
        let size = dtype.row_size(ne[0]) * ne[1..].iter().product::<usize>();
        let base_size = self.tensor(base).nbytes();
        ensure!(
            base_offs + offset + size <= base_size,
            ViewOutOfBoundsSnafu { offset: base_offs + offset, size, base_size }
        );
        Ok(self.push_view_node(Op::View, a, ne, offset, &[a], &[]))
    }

    /// Reorder dimensions: dimension `i` of `a` becomes dimension `axes[i]`.
    pub fn permute(&mut self, a: TensorId, axes: [usize; MAX_DIMS]) -> Result<TensorId> {
        let ne = self.permuted_shape(a, axes)?;
        Ok(self.push_view_node(Op::Permute, a, ne, 0, &[a], &[]))
    }

    /// Swap the first two dimensions.
    pub fn transpose(&mut self, a: TensorId) -> Result<TensorId> {
        let ne = self.permuted_shape(a, [1, 0, 2, 3])?;
        Ok(self.push_view_node(Op::Transpose, a, ne, 0, &[a], &[]))
    }

    fn permuted_shape(&self, a: TensorId, axes: [usize; MAX_DIMS]) -> Result<[usize; MAX_DIMS]> {
        let src = self.checked(a)?;
        let mut seen = [false; MAX_DIMS];
        for &axis in &axes {
            ensure!(axis < MAX_DIMS && !seen[axis], InvalidPermutationSnafu { axes });
            seen[axis] = true;
        }

        let mut ne = [1; MAX_DIMS];
        for (i, &axis) in axes.iter().enumerate() {
            ne[axis] = src.ne[i];
        }
        ensure!(ne[0] % src.dtype.block_size() == 0, PartialBlockSnafu { dtype: src.dtype, ne0: ne[0] });
        Ok(ne)
    }

    // =========================================================================
    // Fusion legality
    // =========================================================================

    /// Whether nodes `start..start + ops.len()` form a chain that a single
    /// fused kernel can replace.
    ///
    /// Each node must have the requested kind and consume its predecessor
    /// through one of the first two operand slots with an identical shape.
    /// Every node except the last must feed only its successor and must not
    /// be a graph output, since its value disappears once fused.
    pub fn can_fuse(&self, start: usize, ops: &[Op]) -> bool {
        if ops.is_empty() || start + ops.len() > self.nodes.len() {
            return false;
        }

        for (i, &op) in ops.iter().enumerate() {
            let node = self.node(start + i);
            if node.op != op {
                return false;
            }

            if i + 1 < ops.len() && (node.is_output() || self.n_uses(node.id) != 1) {
                return false;
            }

            if i > 0 {
                let prev = self.node(start + i - 1);
                if node.src[0] != Some(prev.id) && node.src[1] != Some(prev.id) {
                    return false;
                }
                if node.ne != prev.ne {
                    return false;
                }
            }
        }

        true
    }
}

fn check_shape(dtype: DType, shape: &[usize]) -> Result<[usize; MAX_DIMS]> {
    ensure!((1..=MAX_DIMS).contains(&shape.len()), InvalidRankSnafu { rank: shape.len(), max: MAX_DIMS });
    ensure!(shape.iter().all(|&d| d > 0), ZeroDimensionSnafu { shape: shape.to_vec() });
    ensure!(shape[0] % dtype.block_size() == 0, PartialBlockSnafu { dtype, ne0: shape[0] });

    let mut ne = [1; MAX_DIMS];
    ne[..shape.len()].copy_from_slice(shape);
    Ok(ne)
}

/// Whether `small` can be broadcast over `big` by whole repetitions.
fn can_repeat(small: [usize; MAX_DIMS], big: [usize; MAX_DIMS]) -> bool {
    small.iter().zip(big.iter()).all(|(&s, &b)| b % s == 0)
}
