//! Fusion and concurrency-aware reordering of tessera execution graphs.
//!
//! Before dispatch, the node array of a [`Graph`](tessera_ir::Graph) is
//! rearranged so that operators without memory hazards between them end up
//! next to each other and can be submitted to independent command streams.
//!
//! # Module Organization
//!
//! - [`mem_range`] - Byte ranges read and written by operators, hazard test
//! - [`node`] - Scheduling units (a node plus the nodes fused into it)
//! - [`fuse`] - Grouping of fusable elementwise chains
//! - [`reorder`] - Lookahead reordering of units
//! - [`concurrency`] - Barrier placement for a fixed order
//! - [`config`] - Pass configuration
//!
//! The driver [`optimize_graph`] composes them: fuse, reorder the units,
//! expand units back into nodes, and write the new order into the graph.

pub mod concurrency;
pub mod config;
pub mod fuse;
pub mod mem_range;
pub mod node;
pub mod optimize;
pub mod reorder;


pub use concurrency::{ConcurrentGroup, concurrent_groups, node_groups};
pub use config::GraphOptimizeConfig;
pub use fuse::{DataflowFusion, FUSE_CONTINUATIONS, FUSE_STARTERS, FusionOracle, NoFusion, fuse_nodes};
pub use mem_range::{BufferId, MemRange, MemRanges, RangeKind};
pub use node::NodeInfo;
pub use optimize::{OptimizeSummary, optimize_graph, unfuse};
pub use reorder::{REORDERABLE, is_reorderable, reorder};
