//! Vertex bookkeeping: identifiers, search states, adjacency.

use smallvec::SmallVec;

/// Index of a vertex slot within a graph. Slots are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VertexId(pub(crate) u32);

impl VertexId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Tri-state flag used by the topological sort and reused as the
/// per-evaluation "affected" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchState {
    /// Untouched this pass.
    Clear,
    /// Marked affected (evaluation) or on the DFS stack (historical name).
    InProgress,
    /// Fully processed this pass.
    Done,
}

/// Classification of a vertex slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VertexKind {
    Topic,
    Detector,
}

/// Per-vertex metadata shared by topics and detectors.
///
/// For a topic vertex, `out_edges` point at its subscribing detectors; for a
/// detector vertex, at the topics it publishes. Future and timed
/// publications never appear here: their data path goes through the input
/// queue, so the sort has nothing to see.
#[derive(Debug)]
pub(crate) struct VertexMeta {
    pub(crate) kind: VertexKind,
    pub(crate) name: &'static str,
    pub(crate) out_edges: SmallVec<[VertexId; 4]>,
    pub(crate) state: SearchState,
}

impl VertexMeta {
    pub(crate) fn new(kind: VertexKind, name: &'static str) -> Self {
        Self {
            kind,
            name,
            out_edges: SmallVec::new(),
            state: SearchState::Clear,
        }
    }
}
