//! Packing of short elementwise chains into single dispatch units.
//!
//! Reordering must not separate nodes that a backend would later fuse, so the
//! node array is first grouped into [`NodeInfo`] units, reordered as units,
//! and expanded again afterwards.

use enumset::{EnumSet, enum_set};
use tessera_ir::{Graph, Op};
use tracing::trace;

use crate::node::NodeInfo;

/// Kinds that may open a fused chain.
pub const FUSE_STARTERS: EnumSet<Op> = enum_set!(Op::Add | Op::RmsNorm);

/// Kinds that may follow the starter inside a chain.
pub const FUSE_CONTINUATIONS: EnumSet<Op> = enum_set!(Op::Add | Op::Mul | Op::RmsNorm);

/// Decides whether a run of nodes can be replaced by one fused kernel.
///
/// `ops` holds the kinds of nodes `start..start + ops.len()` of the graph's
/// node array. Implementations must be free of side effects; their answer is
/// taken as final.
pub trait FusionOracle {
    fn can_fuse(&self, graph: &Graph, start: usize, ops: &[Op]) -> bool;
}

impl<F> FusionOracle for F
where
    F: Fn(&Graph, usize, &[Op]) -> bool,
{
    fn can_fuse(&self, graph: &Graph, start: usize, ops: &[Op]) -> bool {
        self(graph, start, ops)
    }
}

/// Fuses dataflow chains accepted by [`Graph::can_fuse`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DataflowFusion;

impl FusionOracle for DataflowFusion {
    fn can_fuse(&self, graph: &Graph, start: usize, ops: &[Op]) -> bool {
        graph.can_fuse(start, ops)
    }
}

/// Never fuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFusion;

impl FusionOracle for NoFusion {
    fn can_fuse(&self, _graph: &Graph, _start: usize, _ops: &[Op]) -> bool {
        false
    }
}

/// Group the graph's node array into scheduling units.
///
/// At every starter kind, the following nodes are collected while their kinds
/// are continuations, up to `max_fuse` nodes in total. The longest prefix the
/// oracle accepts (at least two nodes) becomes one unit; otherwise the starter
/// stays alone. Every other node becomes its own unit.
///
/// `debug` above 1 traces every accepted chain.
pub fn fuse_nodes(graph: &Graph, oracle: &impl FusionOracle, max_fuse: usize, debug: u8) -> Vec<NodeInfo> {
    let nodes = graph.nodes();
    let n = nodes.len();
    let mut units = Vec::with_capacity(n);
    let mut ops: Vec<Op> = Vec::with_capacity(max_fuse);

    let mut i = 0;
    while i < n {
        let mut unit = NodeInfo::new(graph, nodes[i]);

        if FUSE_STARTERS.contains(unit.op) {
            ops.clear();
            ops.push(unit.op);
            ops.extend(
                nodes[i + 1..]
                    .iter()
                    .map(|&id| graph.tensor(id).op())
                    .take_while(|&op| FUSE_CONTINUATIONS.contains(op))
                    .take(max_fuse.saturating_sub(1)),
            );

            let accepted = (2..=ops.len()).rev().find(|&len| oracle.can_fuse(graph, i, &ops[..len])).unwrap_or(1);
            if accepted > 1 && debug > 1 {
                trace!(start = i, ops = ?&ops[..accepted], "fused chain");
            }

            for &fused in &nodes[i + 1..i + accepted] {
                unit.add_fused(fused);
            }
            i += accepted - 1;
        }

        units.push(unit);
        i += 1;
    }

    units
}
