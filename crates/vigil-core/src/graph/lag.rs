//! One-evaluation lag: the built-in feedback detector.
//!
//! A detector that publishes into a topic it transitively depends on would
//! create a cycle in the sort. [`Lag<T>`] closes such loops expressively
//! instead of ad hoc: it subscribes to `T` and future-publishes
//! [`Lagged<T>`], so the value crosses evaluations through the input queue
//! and the feedback edge never exists as far as the sort is concerned.
//!
//! ```text
//!   Topic<T> ──▶ Lag<T> ──(future publish)──▶ Topic<Lagged<T>>
//! ```
//!
//! User detectors subscribe to `Lagged<T>` and stay free of future-publish
//! bookkeeping. Preferred over hand-rolled
//! [`publish_on_future_evaluation`](super::DetectorContext::publish_on_future_evaluation)
//! wiring in new code.

use super::detector::{Declarations, Detector, DetectorContext, Subscriber};
use super::topic::TopicState;

/// The one-evaluation-old copy of a `T`, produced by [`Lag<T>`].
#[derive(Debug, Clone)]
pub struct Lagged<T: TopicState> {
    /// The value `T` carried one evaluation ago.
    pub data: T,
}

impl<T: TopicState> TopicState for Lagged<T> {}

/// Produces a [`Lagged<T>`] one evaluation after each `T`.
#[derive(Debug)]
pub struct Lag<T: TopicState> {
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: TopicState> Default for Lag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TopicState> Lag<T> {
    /// Creates the lag detector; add it to a graph like any other detector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: TopicState> Detector for Lag<T> {
    fn declare(d: &mut Declarations<Self>) {
        d.subscribe::<T>().future_publish::<Lagged<T>>();
    }
}

impl<T: TopicState> Subscriber<T> for Lag<T> {
    fn evaluate(&mut self, value: &T, ctx: &mut DetectorContext<'_>) {
        ctx.publish_on_future_evaluation(Lagged {
            data: value.clone(),
        });
    }
}
