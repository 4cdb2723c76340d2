//! Scheduling units.

use smallvec::SmallVec;
use tessera_ir::{Graph, Op, TensorId};

use crate::mem_range::MemRanges;

/// One scheduling unit: a graph node plus the nodes fused into it.
///
/// The fused nodes follow the primary in the original node array and are
/// always emitted right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node: TensorId,
    pub op: Op,
    pub fused: SmallVec<[TensorId; 4]>,
}

impl NodeInfo {
    pub fn new(graph: &Graph, node: TensorId) -> Self {
        Self { node, op: graph.tensor(node).op(), fused: SmallVec::new() }
    }

    /// Tensor holding the unit's final result.
    pub fn dst(&self) -> TensorId {
        self.fused.last().copied().unwrap_or(self.node)
    }

    pub fn is_metadata_only(&self) -> bool {
        self.op.is_metadata_only()
    }

    pub fn add_fused(&mut self, node: TensorId) {
        self.fused.push(node);
    }

    /// Number of graph nodes in the unit.
    pub fn n_nodes(&self) -> usize {
        1 + self.fused.len()
    }

    /// Primary followed by fused nodes.
    pub fn members(&self) -> impl Iterator<Item = TensorId> + '_ {
        std::iter::once(self.node).chain(self.fused.iter().copied())
    }

    /// Operands read by any member, in member then slot order.
    fn reads<'g>(&'g self, graph: &'g Graph) -> impl Iterator<Item = TensorId> + 'g {
        self.members().flat_map(move |member| graph.tensor(member).sources())
    }
}

impl MemRanges {
    /// Track the footprint of `unit`: every operand of every member as read,
    /// the unit's result as written.
    pub fn add_node(&mut self, graph: &Graph, unit: &NodeInfo) -> bool {
        for src in unit.reads(graph) {
            if !self.add_src(graph, src) {
                return false;
            }
        }
        self.add_dst(graph, unit.dst())
    }

    /// Whether the footprint of `unit` conflicts with any tracked range.
    pub fn conflicts_node(&self, graph: &Graph, unit: &NodeInfo) -> bool {
        unit.reads(graph).any(|src| self.conflicts_src(graph, src)) || self.conflicts_dst(graph, unit.dst())
    }
}
