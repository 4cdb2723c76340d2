//! Graph optimization driver: fuse, reorder, unfuse, write back.

use tessera_ir::{Graph, TensorId};
use tracing::debug;

use crate::concurrency::concurrent_groups;
use crate::config::GraphOptimizeConfig;
use crate::fuse::{FusionOracle, NoFusion, fuse_nodes};
use crate::node::NodeInfo;
use crate::reorder::reorder;

/// What a call to [`optimize_graph`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeSummary {
    /// Graph nodes.
    pub n_nodes: usize,
    /// Scheduling units after fusion.
    pub n_units: usize,
    /// Nodes absorbed into a preceding unit.
    pub n_fused: usize,
    /// Units emitted at a different position than they started at.
    pub n_moved: usize,
    /// Concurrent groups of the units in their original order.
    pub groups_before: usize,
    /// Concurrent groups of the units in the new order.
    pub groups_after: usize,
}

/// Expand `order` (indices into `units`) into a node order, each primary
/// followed by its fused nodes.
pub fn unfuse(units: &[NodeInfo], order: &[usize]) -> Vec<TensorId> {
    order.iter().flat_map(|&idx| units[idx].members()).collect()
}

/// Reorder the graph's node array in place for concurrent dispatch.
///
/// Fusable chains are grouped first so that reordering never splits them.
/// The result is a permutation of the original nodes in which every pair of
/// conflicting units keeps its relative order.
#[tracing::instrument(skip_all, fields(graph.n_nodes = graph.n_nodes()))]
pub fn optimize_graph(graph: &mut Graph, oracle: &impl FusionOracle, config: &GraphOptimizeConfig) -> OptimizeSummary {
    let n_nodes = graph.n_nodes();
    if !config.enabled {
        debug!("graph optimization disabled");
        return OptimizeSummary { n_nodes, n_units: n_nodes, ..Default::default() };
    }

    let units = if config.fusion {
        fuse_nodes(graph, oracle, config.max_fuse, config.debug)
    } else {
        fuse_nodes(graph, &NoFusion, 1, config.debug)
    };

    let identity: Vec<usize> = (0..units.len()).collect();
    let order = if config.reorder { reorder(graph, &units, config.lookahead, config.debug) } else { identity.clone() };
    assert_eq!(order.len(), units.len(), "reorder lost units");

    let summary = OptimizeSummary {
        n_nodes,
        n_units: units.len(),
        n_fused: n_nodes - units.len(),
        n_moved: order.iter().enumerate().filter(|&(pos, &idx)| pos != idx).count(),
        groups_before: concurrent_groups(graph, &units, &identity, 0).len(),
        groups_after: concurrent_groups(graph, &units, &order, 0).len(),
    };

    let nodes = unfuse(&units, &order);
    assert_eq!(nodes.len(), n_nodes, "unfuse changed the node count");
    graph.nodes_mut().copy_from_slice(&nodes);

    debug!(
        n_units = summary.n_units,
        n_fused = summary.n_fused,
        n_moved = summary.n_moved,
        groups.before = summary.groups_before,
        groups.after = summary.groups_after,
        "graph optimized"
    );
    summary
}
