//! Error types for graph construction and evaluation.

/// Errors that can occur during graph construction and evaluation.
///
/// Programming errors (publishing an undeclared kind, mutating topology
/// mid-evaluation) are not represented here; those panic with the offending
/// vertex named in the message.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The subscription/publication edges contain a cycle involving the
    /// named vertex. Feedback must go through a future publication instead.
    #[error("cycle detected involving vertex: {0}")]
    CycleDetected(String),

    /// A topic kind was registered twice in the same graph.
    #[error("topic kind already registered: {0}")]
    AlreadyRegistered(&'static str),

    /// Fixed-capacity profile only: a topic kind was resolved without being
    /// pre-registered.
    #[error("unresolved topic kind: {0} (fixed-capacity graphs require pre-registration)")]
    UnresolvedTopic(&'static str),

    /// Fixed-capacity profile only: the input queue is full.
    #[error("graph input queue overflow: capacity {capacity} exceeded")]
    QueueOverflow {
        /// Configured queue capacity.
        capacity: usize,
    },
}
