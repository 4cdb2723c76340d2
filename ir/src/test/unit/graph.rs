//! Graph builder tests: shapes, views, allocations and error reporting.

use test_case::test_case;

use crate::{AllocationId, DType, Error, Graph, Op, TensorId};

fn matrix(graph: &mut Graph, rows: usize, cols: usize) -> TensorId {
    graph.new_tensor(DType::F32, &[cols, rows]).unwrap()
}

// =========================================================================
// Construction
// =========================================================================

#[test]
fn test_ops_append_nodes_in_order() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 4, 8);
    let b = matrix(&mut graph, 4, 8);

    let sum = graph.add(a, b).unwrap();
    let prod = graph.mul(sum, b).unwrap();

    assert_eq!(graph.nodes(), &[sum, prod]);
    assert_eq!(graph.leafs(), &[a, b]);
    assert_eq!(graph.tensor(prod).op(), Op::Mul);
    assert_eq!(graph.tensor(prod).sources().collect::<Vec<_>>(), vec![sum, b]);
}

#[test]
fn test_broadcast_rhs() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 4, 8);
    let row = graph.new_tensor(DType::F32, &[8]).unwrap();

    let sum = graph.add(a, row).unwrap();
    assert_eq!(graph.tensor(sum).shape(), [8, 4, 1, 1]);

    let err = graph.add(row, a).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { op: Op::Add, .. }));
}

#[test]
fn test_mul_mat_shape() {
    let mut graph = Graph::new();
    let w = graph.new_tensor(DType::Q4_0, &[64, 16]).unwrap();
    let x = graph.new_tensor(DType::F32, &[64, 3]).unwrap();

    let y = graph.mul_mat(w, x).unwrap();
    assert_eq!(graph.tensor(y).shape(), [16, 3, 1, 1]);
    assert_eq!(graph.tensor(y).dtype(), DType::F32);

    let bad = graph.new_tensor(DType::F32, &[32, 3]).unwrap();
    assert!(matches!(graph.mul_mat(w, bad), Err(Error::ShapeMismatch { op: Op::MulMat, .. })));
}

#[test]
fn test_mul_mat_id_requires_i32_ids() {
    let mut graph = Graph::new();
    let experts = graph.new_tensor(DType::F16, &[32, 16, 4]).unwrap();
    let x = graph.new_tensor(DType::F32, &[32, 2, 5]).unwrap();
    let ids = graph.new_tensor(DType::I32, &[2, 5]).unwrap();

    let y = graph.mul_mat_id(experts, x, ids).unwrap();
    assert_eq!(graph.tensor(y).shape(), [16, 2, 5, 1]);

    let float_ids = graph.new_tensor(DType::F32, &[2, 5]).unwrap();
    let err = graph.mul_mat_id(experts, x, float_ids).unwrap_err();
    assert_eq!(err, Error::DTypeMismatch { op: Op::MulMatId, expected: DType::I32, actual: DType::F32 });
}

#[test]
fn test_reductions_and_glu() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 4, 8);

    let sums = graph.sum_rows(a).unwrap();
    assert_eq!(graph.tensor(sums).shape(), [1, 4, 1, 1]);

    let gated = graph.glu(a).unwrap();
    assert_eq!(graph.tensor(gated).shape(), [4, 4, 1, 1]);

    let odd = graph.new_tensor(DType::F32, &[7]).unwrap();
    assert!(matches!(graph.glu(odd), Err(Error::InvalidDimension { op: Op::Glu, .. })));
}

#[test]
fn test_sum_rows_of_quantized_rows_is_f32() {
    let mut graph = Graph::new();
    let q = graph.new_tensor(DType::Q4_0, &[32, 4]).unwrap();

    let sums = graph.sum_rows(q).unwrap();
    assert_eq!(graph.tensor(sums).dtype(), DType::F32);
    assert_eq!(graph.tensor(sums).shape(), [1, 4, 1, 1]);
    assert_eq!(graph.tensor(sums).nbytes(), 16);
}

#[test]
fn test_glu_keeps_whole_quant_blocks() {
    let mut graph = Graph::new();
    let narrow = graph.new_tensor(DType::Q8_0, &[32, 4]).unwrap();
    let wide = graph.new_tensor(DType::Q8_0, &[64, 4]).unwrap();

    assert_eq!(graph.glu(narrow).unwrap_err(), Error::PartialBlock { dtype: DType::Q8_0, ne0: 16 });
    let gated = graph.glu(wide).unwrap();
    assert_eq!(graph.tensor(gated).nbytes(), 34 * 4);
}

#[test]
fn test_group_norm() {
    let mut graph = Graph::new();
    let a = graph.new_tensor(DType::F32, &[8, 4, 6]).unwrap();

    let normed = graph.group_norm(a, 3, 1e-6).unwrap();
    assert_eq!(graph.tensor(normed).op(), Op::GroupNorm);
    assert_eq!(graph.tensor(normed).shape(), [8, 4, 6, 1]);
    assert_eq!(graph.tensor(normed).params(), &[3.0, 1e-6]);

    assert!(matches!(graph.group_norm(a, 4, 1e-6), Err(Error::InvalidDimension { op: Op::GroupNorm, dim: 4 })));
}

#[test]
fn test_get_rows_and_rope() {
    let mut graph = Graph::new();
    let embd = graph.new_tensor(DType::Q8_0, &[64, 100]).unwrap();
    let tokens = graph.new_tensor(DType::I32, &[6]).unwrap();
    let rows = graph.get_rows(embd, tokens).unwrap();
    assert_eq!(graph.tensor(rows).shape(), [64, 6, 1, 1]);

    let heads = graph.new_tensor(DType::F32, &[16, 4, 6]).unwrap();
    let rotated = graph.rope(heads, tokens).unwrap();
    assert_eq!(graph.tensor(rotated).shape(), [16, 4, 6, 1]);
    assert_eq!(graph.tensor(rotated).sources().collect::<Vec<_>>(), vec![heads, tokens]);
}

#[test]
fn test_concat() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 4, 8);
    let b = matrix(&mut graph, 2, 8);

    let joined = graph.concat(a, b, 1).unwrap();
    assert_eq!(graph.tensor(joined).shape(), [8, 6, 1, 1]);
    assert!(graph.concat(a, b, 0).is_err());
    assert!(matches!(graph.concat(a, b, 4), Err(Error::InvalidDimension { op: Op::Concat, dim: 4 })));
}

#[test_case(&[] ; "empty shape")]
#[test_case(&[1, 2, 3, 4, 5] ; "rank five")]
#[test_case(&[4, 0] ; "zero dimension")]
fn test_invalid_shapes(shape: &[usize]) {
    let mut graph = Graph::new();
    assert!(graph.new_tensor(DType::F32, shape).is_err());
}

#[test]
fn test_partial_quant_block() {
    let mut graph = Graph::new();
    let err = graph.new_tensor(DType::Q4_0, &[48]).unwrap_err();
    assert_eq!(err, Error::PartialBlock { dtype: DType::Q4_0, ne0: 48 });
}

#[test]
fn test_unknown_tensor() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 2, 2);
    let err = graph.add(a, TensorId(42)).unwrap_err();
    assert_eq!(err, Error::UnknownTensor { id: TensorId(42) });
}

// =========================================================================
// Views
// =========================================================================

#[test]
fn test_view_of_view_points_at_base() {
    let mut graph = Graph::new();
    let a = graph.new_tensor(DType::F32, &[16, 4]).unwrap();

    let first = graph.view(a, &[16, 2], 64).unwrap();
    let second = graph.view(first, &[8], 16).unwrap();
    let reshaped = graph.reshape(second, &[2, 4]).unwrap();

    for view in [first, second, reshaped] {
        assert_eq!(graph.tensor(view).view_src(), Some(a));
        assert_eq!(graph.base(view), a);
    }
    assert_eq!(graph.tensor(second).view_offs(), 80);
    assert_eq!(graph.tensor(reshaped).view_offs(), 80);
    assert_eq!(graph.base(a), a);
}

#[test]
fn test_view_bounds() {
    let mut graph = Graph::new();
    let a = graph.new_tensor(DType::F32, &[16, 4]).unwrap();
    let tail = graph.view(a, &[16], 192).unwrap();

    let err = graph.view(tail, &[16], 4).unwrap_err();
    assert_eq!(err, Error::ViewOutOfBounds { offset: 196, size: 64, base_size: 256 });
}

#[test]
fn test_permute_and_transpose() {
    let mut graph = Graph::new();
    let a = graph.new_tensor(DType::F32, &[2, 3, 4]).unwrap();

    let p = graph.permute(a, [2, 0, 1, 3]).unwrap();
    assert_eq!(graph.tensor(p).shape(), [3, 4, 2, 1]);
    assert_eq!(graph.tensor(p).op(), Op::Permute);

    let t = graph.transpose(a).unwrap();
    assert_eq!(graph.tensor(t).shape(), [3, 2, 4, 1]);
    assert_eq!(graph.tensor(t).op(), Op::Transpose);

    assert!(matches!(graph.permute(a, [0, 0, 1, 2]), Err(Error::InvalidPermutation { .. })));
}

#[test]
fn test_inplace_results_alias_destination() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 4, 8);
    let b = matrix(&mut graph, 4, 8);

    let acc = graph.add_inplace(a, b).unwrap();
    let scaled = graph.scale_inplace(acc, 2.0).unwrap();
    let copied = graph.cpy(scaled, b).unwrap();

    assert_eq!(graph.base(acc), a);
    assert_eq!(graph.base(scaled), a);
    assert_eq!(graph.base(copied), b);
    assert_eq!(graph.tensor(scaled).params(), &[2.0]);
    assert_eq!(graph.tensor(copied).op(), Op::Cpy);
}

#[test]
fn test_set_rows_hides_destination() {
    let mut graph = Graph::new();
    let cache = graph.new_tensor(DType::F16, &[8, 32]).unwrap();
    let rows = graph.new_tensor(DType::F32, &[8, 2]).unwrap();
    let index = graph.new_tensor(DType::I32, &[2]).unwrap();

    let stored = graph.set_rows(cache, rows, index).unwrap();
    assert_eq!(graph.base(stored), cache);
    assert!(graph.tensor(stored).sources().all(|s| s != cache));
}

#[test]
fn test_cpy_element_count() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 4, 8);
    let b = matrix(&mut graph, 4, 4);
    assert_eq!(graph.cpy(a, b).unwrap_err(), Error::ElementCountMismatch { op: Op::Cpy, expected: 16, actual: 32 });
}

// =========================================================================
// Allocation
// =========================================================================

#[test]
fn test_assign_propagates_to_views() {
    let mut graph = Graph::new();
    let a = graph.new_tensor(DType::F32, &[16, 4]).unwrap();
    let early = graph.view(a, &[16], 64).unwrap();

    graph.assign(a, AllocationId(3), 4096).unwrap();
    let late = graph.view(a, &[16], 128).unwrap();

    assert_eq!(graph.tensor(a).alloc().map(|al| al.addr), Some(4096));
    assert_eq!(graph.tensor(early).alloc().map(|al| al.addr), Some(4160));
    assert_eq!(graph.tensor(late).alloc().map(|al| (al.buffer, al.addr)), Some((AllocationId(3), 4224)));
}

#[test]
fn test_assign_rejects_address_overflow() {
    let mut graph = Graph::new();
    let a = graph.new_tensor(DType::F32, &[16]).unwrap();

    let err = graph.assign(a, AllocationId(0), u64::MAX - 8).unwrap_err();
    assert_eq!(err, Error::AddressOverflow { id: a, addr: u64::MAX - 8, size: 64 });
    assert!(graph.tensor(a).alloc().is_none());

    graph.assign(a, AllocationId(0), u64::MAX - 64).unwrap();
}

#[test]
fn test_assign_rejects_views() {
    let mut graph = Graph::new();
    let a = graph.new_tensor(DType::F32, &[16]).unwrap();
    let v = graph.reshape(a, &[4, 4]).unwrap();
    assert_eq!(graph.assign(v, AllocationId(0), 0).unwrap_err(), Error::AssignView { id: v });
}

#[test]
fn test_nbytes() {
    let mut graph = Graph::new();
    let f = graph.new_tensor(DType::F16, &[64, 3, 2]).unwrap();
    let q = graph.new_tensor(DType::Q4_0, &[64, 3]).unwrap();
    assert_eq!(graph.tensor(f).nbytes(), 64 * 2 * 6);
    assert_eq!(graph.tensor(q).nbytes(), 2 * 18 * 3);
}

#[test]
fn test_n_uses_counts_operand_slots() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 2, 2);
    let sq = graph.mul(a, a).unwrap();
    let _ = graph.add(sq, a).unwrap();

    assert_eq!(graph.n_uses(a), 3);
    assert_eq!(graph.n_uses(sq), 1);
}

#[test]
fn test_set_output() {
    let mut graph = Graph::new();
    let a = matrix(&mut graph, 2, 2);
    let b = graph.sqr(a).unwrap();
    assert!(!graph.tensor(b).is_output());

    graph.set_output(b).unwrap();
    assert!(graph.tensor(b).is_output());
    assert_eq!(graph.set_output(TensorId(99)).unwrap_err(), Error::UnknownTensor { id: TensorId(99) });
}
