//! Memory hazard tracking.
//!
//! A [`MemRange`] is a byte interval inside one buffer, tagged with whether
//! it is read ([`RangeKind::Src`]) or written ([`RangeKind::Dst`]).
//! [`MemRanges`] accumulates the ranges touched by a set of operators and
//! answers whether another range may run concurrently with all of them.
//!
//! Tensors that have not been placed yet are identified by their base tensor
//! instead of a buffer, with a fixed placeholder interval. Placeholder and
//! allocated ranges live under different [`BufferId`] variants and therefore
//! never conflict with each other.

use std::fmt;

use tessera_ir::{AllocationId, Graph, TensorId};
use tracing::trace;

/// Interval used for tensors without an allocation. Never real bytes.
pub const PLACEHOLDER_RANGE: (u64, u64) = (0, 1024);

const INITIAL_CAPACITY: usize = 256;

/// Identity of the storage a range lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferId {
    /// Placed tensor: the backend buffer holding it.
    Allocation(AllocationId),
    /// Unplaced tensor: its own base tensor.
    Tensor(TensorId),
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation(id) => write!(f, "{id}"),
            Self::Tensor(id) => write!(f, "tensor{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum RangeKind {
    Src,
    Dst,
}

/// Half-open byte interval `[start, end)` inside `buffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRange {
    pub buffer: BufferId,
    pub start: u64,
    pub end: u64,
    pub kind: RangeKind,
}

impl MemRange {
    pub fn new(buffer: BufferId, start: u64, end: u64, kind: RangeKind) -> Self {
        Self { buffer, start, end, kind }
    }

    /// Range covered by the storage of `id`.
    ///
    /// Views resolve to their base tensor, so every view of a tensor maps to
    /// the full extent of the base.
    ///
    /// # Panics
    ///
    /// If `id` is not in `graph`, or if its base is itself a view.
    pub fn from_tensor(graph: &Graph, id: TensorId, kind: RangeKind) -> Self {
        let tensor = graph.tensor(id);
        let base = match tensor.view_src() {
            Some(base) => graph.tensor(base),
            None => tensor,
        };
        assert!(!base.is_view(), "view {id} resolves to {}, which is itself a view", base.id());

        match base.alloc() {
            Some(alloc) => {
                Self::new(BufferId::Allocation(alloc.buffer), alloc.addr, alloc.addr + base.nbytes() as u64, kind)
            }
            None => {
                let (start, end) = PLACEHOLDER_RANGE;
                Self::new(BufferId::Tensor(base.id()), start, end, kind)
            }
        }
    }

    /// Interval test against a previously tracked range.
    ///
    /// The upper bound is inclusive on `self.end`, so a range ending exactly
    /// where `stored` begins still overlaps it.
    pub fn overlaps(&self, stored: &MemRange) -> bool {
        self.start < stored.end && self.end >= stored.start
    }

    /// Whether `self` and `stored` may not execute concurrently.
    ///
    /// Ranges in different buffers never conflict, and neither do two reads.
    pub fn conflicts_with(&self, stored: &MemRange) -> bool {
        if self.buffer != stored.buffer {
            return false;
        }
        if self.kind == RangeKind::Src && stored.kind == RangeKind::Src {
            return false;
        }
        self.overlaps(stored)
    }
}

impl fmt::Display for MemRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}[{}, {})", self.kind, self.buffer, self.start, self.end)
    }
}

/// Growable set of tracked ranges.
///
/// `debug` above 2 traces every added range and the first overlap found by
/// each conflict query.
#[derive(Debug, Clone)]
pub struct MemRanges {
    ranges: Vec<MemRange>,
    debug: u8,
}

impl Default for MemRanges {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MemRanges {
    pub fn new(debug: u8) -> Self {
        Self { ranges: Vec::with_capacity(INITIAL_CAPACITY), debug }
    }

    /// Forget every tracked range, keeping the allocation.
    pub fn reset(&mut self) {
        self.ranges.clear();
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Track `range`. Always succeeds for the growable set.
    pub fn add(&mut self, range: MemRange) -> bool {
        if self.debug > 2 {
            trace!(range = %range, "add range");
        }
        self.ranges.push(range);
        true
    }

    /// Whether `range` conflicts with any tracked range.
    pub fn conflicts(&self, range: &MemRange) -> bool {
        let Some(stored) = self.ranges.iter().find(|stored| range.conflicts_with(stored)) else {
            return false;
        };

        if self.debug > 2 {
            trace!(range = %range, stored = %stored, "range overlaps a tracked range");
        }
        true
    }

    // =========================================================================
    // Tensor helpers
    // =========================================================================

    /// Track the storage of `id` as read.
    pub fn add_src(&mut self, graph: &Graph, id: TensorId) -> bool {
        self.add(MemRange::from_tensor(graph, id, RangeKind::Src))
    }

    /// Track the storage of `id` as written.
    pub fn add_dst(&mut self, graph: &Graph, id: TensorId) -> bool {
        self.add(MemRange::from_tensor(graph, id, RangeKind::Dst))
    }

    pub fn conflicts_src(&self, graph: &Graph, id: TensorId) -> bool {
        self.conflicts(&MemRange::from_tensor(graph, id, RangeKind::Src))
    }

    pub fn conflicts_dst(&self, graph: &Graph, id: TensorId) -> bool {
        self.conflicts(&MemRange::from_tensor(graph, id, RangeKind::Dst))
    }

    /// Track every operand of `id` as read and `id` itself as written.
    pub fn add_tensor(&mut self, graph: &Graph, id: TensorId) -> bool {
        for src in graph.tensor(id).sources() {
            if !self.add_src(graph, src) {
                return false;
            }
        }
        self.add_dst(graph, id)
    }

    /// Whether computing `id` conflicts with any tracked range.
    pub fn conflicts_tensor(&self, graph: &Graph, id: TensorId) -> bool {
        graph.tensor(id).sources().any(|src| self.conflicts_src(graph, src)) || self.conflicts_dst(graph, id)
    }
}
