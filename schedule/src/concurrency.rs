//! Barrier placement for a fixed order.
//!
//! A dispatcher walking an order keeps every unit in the current group until
//! the next unit conflicts with it, then places a barrier. The group count is
//! therefore the number of barriers plus one, and is what reordering tries to
//! lower.

use tessera_ir::Graph;

use crate::mem_range::MemRanges;
use crate::node::NodeInfo;

/// Consecutive units that may execute concurrently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcurrentGroup {
    /// Indices into the unit slice, in dispatch order.
    pub units: Vec<usize>,
}

impl ConcurrentGroup {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Split `order` (indices into `units`) into concurrent groups.
pub fn concurrent_groups(graph: &Graph, units: &[NodeInfo], order: &[usize], debug: u8) -> Vec<ConcurrentGroup> {
    let mut groups = Vec::new();
    let mut current = ConcurrentGroup::default();
    let mut ranges = MemRanges::new(debug);

    for &idx in order {
        let unit = &units[idx];
        if !unit.is_metadata_only() && ranges.conflicts_node(graph, unit) {
            groups.push(std::mem::take(&mut current));
            ranges.reset();
        }
        ranges.add_node(graph, unit);
        current.units.push(idx);
    }

    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Concurrent groups of the graph's node array as it stands, one node per unit.
///
/// Group members are node array positions.
pub fn node_groups(graph: &Graph) -> Vec<ConcurrentGroup> {
    let units: Vec<NodeInfo> = graph.nodes().iter().map(|&id| NodeInfo::new(graph, id)).collect();
    let order: Vec<usize> = (0..units.len()).collect();
    concurrent_groups(graph, &units, &order, 0)
}
