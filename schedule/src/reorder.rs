//! Concurrency-aware reordering of scheduling units.
//!
//! Units are walked in order while a *batch* of mutually independent units is
//! grown. When a unit conflicts with the batch, a barrier would be needed
//! before it; first the next few units are searched for ones that can still
//! join the batch, and those are emitted ahead of the conflicting unit.
//!
//! A lookahead candidate may move forward only if it is independent of the
//! batch and of every unit it jumps over (the *pending* set). Kinds outside
//! [`REORDERABLE`] end the search: their dependencies are not fully described
//! by their operands.

use enumset::{EnumSet, enum_set};
use tessera_ir::{Graph, Op};
use tracing::trace;

use crate::mem_range::MemRanges;
use crate::node::NodeInfo;

/// Kinds that lookahead may move across or pull forward, metadata-only kinds
/// included.
///
/// `Cpy` and `SetRows` must never be added: they write through a destination
/// that is not one of their operands.
pub const REORDERABLE: EnumSet<Op> = enum_set!(
    Op::MulMat
        | Op::MulMatId
        | Op::Rope
        | Op::Norm
        | Op::RmsNorm
        | Op::GroupNorm
        | Op::SumRows
        | Op::Mul
        | Op::Add
        | Op::Div
        | Op::Glu
        | Op::Scale
        | Op::GetRows
        | Op::None
        | Op::Reshape
        | Op::Transpose
        | Op::View
        | Op::Permute
);

pub fn is_reorderable(op: Op) -> bool {
    REORDERABLE.contains(op)
}

/// Compute a new order for `units`, as indices into `units`.
///
/// `lookahead` is the number of positions after a conflicting unit that are
/// searched for units to pull forward. `debug` above 1 traces every pulled
/// unit and every lookahead barrier; above 2 the trackers trace their ranges.
pub fn reorder(graph: &Graph, units: &[NodeInfo], lookahead: usize, debug: u8) -> Vec<usize> {
    let n = units.len();
    let mut order = Vec::with_capacity(n);
    let mut used = vec![false; n];

    let mut batch = MemRanges::new(debug);
    let mut pending = MemRanges::new(debug);

    for i0 in 0..n {
        if used[i0] {
            continue;
        }
        let unit = &units[i0];

        if !unit.is_metadata_only() && batch.conflicts_node(graph, unit) {
            pending.reset();
            pending.add_node(graph, unit);

            let window_end = n.min(i0.saturating_add(lookahead).saturating_add(1));
            for i1 in i0 + 1..window_end {
                if used[i1] {
                    continue;
                }
                let candidate = &units[i1];

                if !is_reorderable(candidate.op) {
                    if debug > 1 {
                        trace!(barrier = i1, op = %candidate.op, "lookahead stopped");
                    }
                    break;
                }

                let joins_batch = candidate.is_metadata_only() || !batch.conflicts_node(graph, candidate);
                if joins_batch && !pending.conflicts_node(graph, candidate) {
                    batch.add_node(graph, candidate);
                    order.push(i1);
                    used[i1] = true;
                    if debug > 1 {
                        trace!(unit = i1, ahead_of = i0, "pulled forward");
                    }
                } else {
                    pending.add_node(graph, candidate);
                }
            }

            batch.reset();
        }

        batch.add_node(graph, unit);
        order.push(i0);
    }

    order
}
