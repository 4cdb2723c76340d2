//! Graph representation for the tessera runtime.
//!
//! # Module Organization
//!
//! - [`op`] - Operator kinds and their classification sets
//! - [`tensor`] - Tensor metadata, view relationships and allocations
//! - [`graph`] - Graph container, builder and fusion legality
//! - [`error`] - Error types for graph construction

pub mod error;
pub mod graph;
pub mod op;
pub mod tensor;


pub use error::{Error, Result};
pub use graph::Graph;
pub use op::{METADATA_ONLY, Op};
pub use tensor::{Allocation, AllocationId, MAX_DIMS, MAX_SRC, Tensor, TensorId};

pub use tessera_dtype::DType;
