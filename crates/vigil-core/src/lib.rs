//! # Vigil Core
//!
//! An in-process dataflow engine for reactive, testable control logic.
//!
//! Applications model their behavior as a directed graph of two kinds of
//! vertices:
//!
//! - **Topics**: typed, single-valued buses ([`graph::Topic`])
//! - **Detectors**: reactive functions subscribing to some topic kinds and
//!   publishing to others ([`graph::Detector`])
//!
//! External code pushes typed values into topics; the engine evaluates the
//! graph in topological order, invoking each affected detector exactly once
//! per evaluation. The entire computation is deterministic, single-threaded,
//! and side-effect-free from the detectors' perspective.
//!
//! ## Design Principles
//!
//! 1. **One event per evaluation** - each [`Graph::evaluate_graph`] consumes
//!    exactly one externally pushed value, so every output list describes the
//!    settled effects of a single input
//! 2. **Deterministic order** - vertex visitation follows a stored
//!    topological order with insertion-order tie-breaks
//! 3. **Feedback through the queue** - cycles are rejected at sort time; the
//!    only feedback path is a future publication re-entering the input queue
//! 4. **No clocks, no I/O** - timed publications are driven by the owner
//!    polling with explicit timestamps
//!
//! ## Example
//!
//! ```rust,ignore
//! use vigil_core::{Graph, Detector, Subscriber, Declarations, DetectorContext};
//!
//! let mut graph = Graph::new();
//! graph.add_detector(ThresholdDetector::default())?;
//!
//! graph.push_data(Temperature { celsius: 110 })?;
//! graph.evaluate_graph()?;
//! assert!(graph.output_value::<TooHot>().is_some());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod graph;
pub mod snapshot;
pub mod time;

// Re-export key types
pub use graph::{
    Declarations, Detector, DetectorContext, DetectorId, ErasedTopicState, FixedCapacityConfig,
    Graph, GraphConfig, GraphError, GraphMetrics, Lag, Lagged, OutputItem, Subscriber, Topic,
    TopicState, TopicStateId,
};
pub use snapshot::{GraphStateStore, StateSnapshot};
pub use time::{TimeOffset, TimeoutPublisherService, TimerHandle};

/// Result type for vigil-core operations.
pub type Result<T> = std::result::Result<T, GraphError>;
