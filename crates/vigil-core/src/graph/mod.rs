//! # Detector Graph Engine
//!
//! Topics, detectors, and the evaluation engine that connects them.
//!
//! ## Overview
//!
//! This module provides the graph layer of the engine:
//!
//! - **[`Graph`]**: owns every vertex, drives evaluation cycles, exposes the
//!   push/evaluate/output APIs
//! - **[`Topic`]**: a typed single-valued bus; exactly one per
//!   [`TopicState`] kind per graph
//! - **[`Detector`]** / **[`Subscriber`]**: user logic with declared
//!   subscriptions and publications
//! - **[`DetectorContext`]**: the capability through which detectors publish
//! - **[`Lag`]**: built-in feedback detector closing loops through the input
//!   queue
//!
//! ## Key Design Principles
//!
//! 1. **Type-keyed routing** - topics are discovered by the `TypeId` of the
//!    value they carry; one topic per kind per graph
//! 2. **Cycle detection** - subscription/publication edges must form a DAG;
//!    cycles are rejected by the sort
//! 3. **Feedback is not an edge** - a future or timed publication never
//!    participates in the sort; its value arrives through the input queue
//! 4. **Single dispatch** - an affected detector runs exactly once per
//!    evaluation: begin, one evaluate per fresh subscription, complete
//!
//! ## Data Flow
//!
//! ```text
//! push_data ──▶ input queue ──▶ (evaluate_graph pulls one entry)
//!     ──▶ topic value set, subscribers marked ──▶ topological walk
//!     ──▶ detector publishes ──▶ more topics ──▶ output list
//!     ──▶ future publishes re-enter the input queue
//! ```

pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod lag;
pub mod queue;
pub mod registry;
pub mod topic;
pub mod vertex;


// Re-export key types
pub use config::{FixedCapacityConfig, GraphConfig};
pub use detector::{Declarations, Detector, DetectorContext, DetectorId, Subscriber};
pub use engine::{Graph, GraphMetrics};
pub use error::GraphError;
pub use lag::{Lag, Lagged};
pub use topic::{ErasedTopicState, OutputItem, Topic, TopicState, TopicStateId};
