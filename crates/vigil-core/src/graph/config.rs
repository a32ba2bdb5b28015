//! Graph deployment profile configuration.
//!
//! Two profiles satisfy the same behavioral contract; only the error surface
//! differs:
//!
//! - **Dynamic** (default): resizable containers, topics created on demand
//!   at first resolve.
//! - **Fixed-capacity**: pre-sized containers, all topics must be registered
//!   up front. Resolving an unregistered kind yields
//!   [`GraphError::UnresolvedTopic`](super::GraphError::UnresolvedTopic) and
//!   exceeding the input queue capacity yields
//!   [`GraphError::QueueOverflow`](super::GraphError::QueueOverflow).

/// Default input queue capacity for the fixed-capacity profile.
pub const DEFAULT_INPUT_QUEUE_CAPACITY: usize = 32;

/// Default vertex capacity for the fixed-capacity profile.
pub const DEFAULT_VERTEX_CAPACITY: usize = 64;

/// Capacities for the fixed-capacity deployment profile.
#[derive(Debug, Clone)]
pub struct FixedCapacityConfig {
    /// Maximum number of pending external pushes.
    pub input_queue_capacity: usize,
    /// Maximum number of vertices (topics plus detectors).
    pub vertex_capacity: usize,
}

impl Default for FixedCapacityConfig {
    fn default() -> Self {
        Self {
            input_queue_capacity: DEFAULT_INPUT_QUEUE_CAPACITY,
            vertex_capacity: DEFAULT_VERTEX_CAPACITY,
        }
    }
}

/// Construction-time configuration for a [`Graph`](super::Graph).
#[derive(Debug, Clone, Default)]
pub struct GraphConfig {
    pub(crate) fixed: Option<FixedCapacityConfig>,
}

impl GraphConfig {
    /// Creates the dynamic profile: on-demand topic creation, unbounded
    /// input queue.
    #[must_use]
    pub fn dynamic() -> Self {
        Self::default()
    }

    /// Creates the fixed-capacity profile with default capacities.
    #[must_use]
    pub fn fixed_capacity() -> Self {
        Self {
            fixed: Some(FixedCapacityConfig::default()),
        }
    }

    /// Creates the fixed-capacity profile with explicit capacities.
    #[must_use]
    pub fn fixed_capacity_with(config: FixedCapacityConfig) -> Self {
        Self {
            fixed: Some(config),
        }
    }

    /// Returns whether this is the fixed-capacity profile.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }

    /// Returns the input queue capacity, if bounded.
    #[must_use]
    pub fn input_queue_capacity(&self) -> Option<usize> {
        self.fixed.as_ref().map(|f| f.input_queue_capacity)
    }

    /// Returns the vertex capacity, if bounded.
    #[must_use]
    pub fn vertex_capacity(&self) -> Option<usize> {
        self.fixed.as_ref().map(|f| f.vertex_capacity)
    }
}
