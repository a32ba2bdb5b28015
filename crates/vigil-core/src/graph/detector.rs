//! Detectors: declared wiring, subscription dispatch, and the publishing
//! capability handed to evaluation hooks.
//!
//! A detector is a compartmentalized unit of logic with fixed input kinds
//! (subscriptions) and fixed output kinds (publications). A new detector is
//! implemented by a type that:
//!
//! - implements [`Detector`], listing its wiring in [`Detector::declare`]
//! - implements [`Subscriber<T>`] for each kind `T` it subscribes to
//!
//! Detectors should be finely grained; it is often easiest to design the
//! intermediate [`TopicState`]s first and the detectors around them.
//!
//! # Example
//!
//! ```rust
//! use vigil_core::{Declarations, Detector, DetectorContext, Subscriber, TopicState};
//!
//! #[derive(Debug, Clone)]
//! struct Temperature {
//!     celsius: i32,
//! }
//! impl TopicState for Temperature {}
//!
//! #[derive(Debug, Clone)]
//! struct TooHot;
//! impl TopicState for TooHot {}
//!
//! #[derive(Default)]
//! struct OverheatDetector;
//!
//! impl Detector for OverheatDetector {
//!     fn declare(d: &mut Declarations<Self>) {
//!         d.subscribe::<Temperature>().publish::<TooHot>();
//!     }
//! }
//!
//! impl Subscriber<Temperature> for OverheatDetector {
//!     fn evaluate(&mut self, value: &Temperature, ctx: &mut DetectorContext<'_>) {
//!         if value.celsius > 100 {
//!             ctx.publish(TooHot);
//!         }
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::time::{TimeOffset, TimeoutPublisherService, TimerHandle};

use super::engine::Graph;
use super::error::GraphError;
use super::topic::{ErasedTopicState, TopicState};
use super::vertex::VertexId;

/// A unit of reactive logic in a graph.
///
/// The engine drives three hooks per evaluation in which the detector is
/// affected (i.e. at least one subscribed topic carries new data):
///
/// 1. [`begin_evaluation`](Detector::begin_evaluation) — once, before any
///    per-kind evaluate
/// 2. [`Subscriber::evaluate`] — once per subscribed kind with new data,
///    in subscription declaration order
/// 3. [`complete_evaluation`](Detector::complete_evaluation) — once, after
///    all evaluates; the canonical place to decide composite conditions
///
/// All publishing goes through the [`DetectorContext`] passed to the hooks;
/// there is no way to publish from a constructor, so initial state must be
/// delivered as an ordinary input.
pub trait Detector: 'static {
    /// Declares the detector's subscriptions and publications.
    ///
    /// Called once when the detector is added to a graph; the declared sets
    /// are fixed for the detector's lifetime and define its edges.
    fn declare(d: &mut Declarations<Self>)
    where
        Self: Sized;

    /// Called once per evaluation in which this detector is affected,
    /// before any per-kind evaluate.
    fn begin_evaluation(&mut self, ctx: &mut DetectorContext<'_>) {
        let _ = ctx;
    }

    /// Called once per evaluation in which this detector is affected, after
    /// all per-kind evaluates.
    fn complete_evaluation(&mut self, ctx: &mut DetectorContext<'_>) {
        let _ = ctx;
    }
}

/// Per-kind evaluation hook; implement once per subscribed kind.
///
/// The relative order of a detector's own `evaluate` calls within one
/// evaluation is subscription declaration order. It is deterministic, but
/// well-behaved detectors keep their evaluate bodies order-independent and
/// decide composite conditions in
/// [`complete_evaluation`](Detector::complete_evaluation).
pub trait Subscriber<T: TopicState>: Detector {
    /// Consumes the new value published to the `T` topic this evaluation.
    fn evaluate(&mut self, value: &T, ctx: &mut DetectorContext<'_>);
}

/// Opaque handle to a detector added to a graph; used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorId(pub(crate) VertexId);

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

pub(crate) type ResolveFn = fn(&mut Graph) -> Result<VertexId, GraphError>;
pub(crate) type DispatchFn = fn(&mut dyn Any, &dyn Any, &mut DetectorContext<'_>);
pub(crate) type MakeFn = fn() -> Box<dyn ErasedTopicState>;

pub(crate) struct SubscriptionDecl {
    pub(crate) state_name: &'static str,
    pub(crate) resolve: ResolveFn,
    pub(crate) dispatch: DispatchFn,
}

pub(crate) struct PublicationDecl {
    pub(crate) state: TypeId,
    pub(crate) state_name: &'static str,
    pub(crate) resolve: ResolveFn,
}

pub(crate) struct PeriodicDecl {
    pub(crate) state_name: &'static str,
    pub(crate) resolve: ResolveFn,
    pub(crate) period: TimeOffset,
    pub(crate) make: MakeFn,
}

/// Collects a detector's wiring during [`Detector::declare`].
///
/// Each method records one subscription or publication; the graph turns the
/// records into edges when the detector is added. Future and timed
/// publications produce no edge, only a resolved publish target.
pub struct Declarations<D: Detector> {
    pub(crate) subscriptions: Vec<SubscriptionDecl>,
    pub(crate) publications: Vec<PublicationDecl>,
    pub(crate) future_publications: Vec<PublicationDecl>,
    pub(crate) timeout_publications: Vec<PublicationDecl>,
    pub(crate) periodic_publications: Vec<PeriodicDecl>,
    _marker: PhantomData<fn(D)>,
}

fn resolve_entry<T: TopicState>(graph: &mut Graph) -> Result<VertexId, GraphError> {
    graph.resolve_topic_vertex::<T>()
}

fn dispatch_entry<D, T>(detector: &mut dyn Any, value: &dyn Any, ctx: &mut DetectorContext<'_>)
where
    D: Subscriber<T>,
    T: TopicState,
{
    let detector = detector
        .downcast_mut::<D>()
        .expect("subscription dispatcher bound to a different detector type");
    let value = value
        .downcast_ref::<T>()
        .expect("topic carries a different state kind than its dispatcher");
    detector.evaluate(value, ctx);
}

fn make_default<T: TopicState + Default>() -> Box<dyn ErasedTopicState> {
    Box::new(T::default())
}

impl<D: Detector> Declarations<D> {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            publications: Vec::new(),
            future_publications: Vec::new(),
            timeout_publications: Vec::new(),
            periodic_publications: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Subscribes the detector to kind `T`.
    ///
    /// Requires the detector to implement [`Subscriber<T>`]; adds a
    /// `Topic<T> → detector` edge.
    pub fn subscribe<T: TopicState>(&mut self) -> &mut Self
    where
        D: Subscriber<T>,
    {
        self.subscriptions.push(SubscriptionDecl {
            state_name: std::any::type_name::<T>(),
            resolve: resolve_entry::<T>,
            dispatch: dispatch_entry::<D, T>,
        });
        self
    }

    /// Declares that the detector publishes kind `T` during evaluation.
    ///
    /// Adds a `detector → Topic<T>` edge; the publication itself happens
    /// through [`DetectorContext::publish`].
    pub fn publish<T: TopicState>(&mut self) -> &mut Self {
        self.publications.push(PublicationDecl {
            state: TypeId::of::<T>(),
            state_name: std::any::type_name::<T>(),
            resolve: resolve_entry::<T>,
        });
        self
    }

    /// Declares that the detector publishes kind `T` on a *future*
    /// evaluation.
    ///
    /// Creates no sort-visible edge, so the detector may feed a topic it
    /// transitively depends on. The value goes through the input queue via
    /// [`DetectorContext::publish_on_future_evaluation`].
    pub fn future_publish<T: TopicState>(&mut self) -> &mut Self {
        self.future_publications.push(PublicationDecl {
            state: TypeId::of::<T>(),
            state_name: std::any::type_name::<T>(),
            resolve: resolve_entry::<T>,
        });
        self
    }

    /// Declares that the detector publishes kind `T` on a timeout.
    ///
    /// Like [`future_publish`](Self::future_publish), this creates no
    /// sort-visible edge; the value arrives through the input queue once
    /// the deadline passes and the owner polls. A default timer handle is
    /// allocated per declaration; see
    /// [`DetectorContext::publish_on_timeout`].
    pub fn timeout_publish<T: TopicState>(&mut self) -> &mut Self {
        self.timeout_publications.push(PublicationDecl {
            state: TypeId::of::<T>(),
            state_name: std::any::type_name::<T>(),
            resolve: resolve_entry::<T>,
        });
        self
    }

    /// Declares a recurring publication of `T::default()` every
    /// `period_ms` milliseconds once periodic publishing is started.
    ///
    /// # Panics
    ///
    /// Panics if `period_ms` is zero.
    pub fn periodic_publish<T: TopicState + Default>(&mut self, period_ms: TimeOffset) -> &mut Self {
        assert!(period_ms > 0, "periodic publication period must be nonzero");
        self.periodic_publications.push(PeriodicDecl {
            state_name: std::any::type_name::<T>(),
            resolve: resolve_entry::<T>,
            period: period_ms,
            make: make_default::<T>,
        });
        self
    }
}

// ---------------------------------------------------------------------------
// Erased detector storage
// ---------------------------------------------------------------------------

/// Object-safe detector view stored in the graph's vertex slots.
pub(crate) trait ErasedDetector: Any {
    fn begin(&mut self, ctx: &mut DetectorContext<'_>);
    fn complete(&mut self, ctx: &mut DetectorContext<'_>);
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<D: Detector> ErasedDetector for D {
    fn begin(&mut self, ctx: &mut DetectorContext<'_>) {
        Detector::begin_evaluation(self, ctx);
    }

    fn complete(&mut self, ctx: &mut DetectorContext<'_>) {
        Detector::complete_evaluation(self, ctx);
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One (detector, kind) subscription binding: reads the topic's new value
/// and hands it to the detector's typed evaluate hook.
pub(crate) struct SubscriptionDispatcher {
    pub(crate) topic: VertexId,
    pub(crate) state_name: &'static str,
    pub(crate) dispatch: DispatchFn,
}

/// An immediate or future publication resolved to its target topic vertex.
pub(crate) struct ResolvedPublication {
    pub(crate) state: TypeId,
    pub(crate) target: VertexId,
}

/// A timeout publication resolved to its target and default timer handle.
pub(crate) struct ResolvedTimeout {
    pub(crate) state: TypeId,
    pub(crate) target: VertexId,
    pub(crate) handle: TimerHandle,
}

/// Runtime state of one detector vertex.
pub(crate) struct DetectorNode {
    pub(crate) instance: Box<dyn ErasedDetector>,
    pub(crate) name: &'static str,
    pub(crate) dispatchers: SmallVec<[SubscriptionDispatcher; 4]>,
    pub(crate) publications: SmallVec<[ResolvedPublication; 2]>,
    pub(crate) future_publications: SmallVec<[ResolvedPublication; 2]>,
    pub(crate) timeout_publications: SmallVec<[ResolvedTimeout; 2]>,
}

// ---------------------------------------------------------------------------
// DetectorContext
// ---------------------------------------------------------------------------

pub(crate) type StagedPublications = SmallVec<[(VertexId, Box<dyn ErasedTopicState>); 2]>;

/// The publishing capability handed to detector hooks.
///
/// Every output a detector produces goes through here, and only kinds
/// declared in [`Detector::declare`] are accepted; publishing an undeclared
/// kind is a programming error and panics.
///
/// Immediate publications land in downstream topics within the current
/// evaluation. Future and timed publications re-enter the graph through the
/// input queue and are consumed by later evaluations, one per evaluation.
pub struct DetectorContext<'a> {
    detector_name: &'static str,
    publications: &'a [ResolvedPublication],
    future_publications: &'a [ResolvedPublication],
    timeout_publications: &'a [ResolvedTimeout],
    timeouts: &'a mut TimeoutPublisherService,
    staged: StagedPublications,
    staged_future: StagedPublications,
}

impl<'a> DetectorContext<'a> {
    pub(crate) fn new(
        detector_name: &'static str,
        publications: &'a [ResolvedPublication],
        future_publications: &'a [ResolvedPublication],
        timeout_publications: &'a [ResolvedTimeout],
        timeouts: &'a mut TimeoutPublisherService,
    ) -> Self {
        Self {
            detector_name,
            publications,
            future_publications,
            timeout_publications,
            timeouts,
            staged: SmallVec::new(),
            staged_future: SmallVec::new(),
        }
    }

    /// Publishes `value` into its topic within the current evaluation.
    ///
    /// Subscribers later in the topological order observe it this cycle.
    ///
    /// # Panics
    ///
    /// Panics if `T` was not declared via
    /// [`Declarations::publish`].
    pub fn publish<T: TopicState>(&mut self, value: T) {
        let target = self.lookup::<T>(self.publications, "publish");
        self.staged.push((target, Box::new(value)));
    }

    /// Enqueues `value` for the *next* evaluation instead of writing the
    /// topic now.
    ///
    /// The current evaluation visits no further vertices because of this
    /// call; the value is consumed by a subsequent evaluation like any
    /// external push.
    ///
    /// # Panics
    ///
    /// Panics if `T` was not declared via
    /// [`Declarations::future_publish`].
    pub fn publish_on_future_evaluation<T: TopicState>(&mut self, value: T) {
        let target = self.lookup::<T>(self.future_publications, "future-publish");
        self.staged_future.push((target, Box::new(value)));
    }

    /// Schedules `value` for publication `delay_ms` milliseconds after the
    /// last observed poll time, on the declaration's default timer handle.
    ///
    /// Re-scheduling while a publication is pending on the handle replaces
    /// it, resetting the deadline.
    ///
    /// # Panics
    ///
    /// Panics if `T` was not declared via
    /// [`Declarations::timeout_publish`].
    pub fn publish_on_timeout<T: TopicState>(&mut self, value: T, delay_ms: TimeOffset) {
        let decl = self.lookup_timeout::<T>();
        self.timeouts
            .schedule(decl.handle, delay_ms, decl.target, Box::new(value));
    }

    /// Like [`publish_on_timeout`](Self::publish_on_timeout) but on an
    /// explicit handle, letting one detector run several concurrent timers.
    ///
    /// # Panics
    ///
    /// Panics if `T` was not declared via
    /// [`Declarations::timeout_publish`].
    pub fn publish_on_timeout_with<T: TopicState>(
        &mut self,
        handle: TimerHandle,
        value: T,
        delay_ms: TimeOffset,
    ) {
        let decl = self.lookup_timeout::<T>();
        self.timeouts
            .schedule(handle, delay_ms, decl.target, Box::new(value));
    }

    /// Cancels the pending timed publication of `T` on the default handle.
    ///
    /// Returns whether a publication was pending.
    pub fn cancel_timeout<T: TopicState>(&mut self) -> bool {
        let decl = self.lookup_timeout::<T>();
        self.timeouts.cancel(decl.handle)
    }

    /// Cancels the pending timed publication on an explicit handle.
    pub fn cancel_timeout_with(&mut self, handle: TimerHandle) -> bool {
        self.timeouts.cancel(handle)
    }

    /// Returns whether the default timer for `T` has expired (or was never
    /// scheduled).
    #[must_use]
    pub fn timeout_expired<T: TopicState>(&self) -> bool {
        let decl = self.lookup_timeout::<T>();
        self.timeouts.has_expired(decl.handle)
    }

    /// Returns whether the timer on an explicit handle has expired (or was
    /// never scheduled).
    #[must_use]
    pub fn timeout_expired_with(&self, handle: TimerHandle) -> bool {
        self.timeouts.has_expired(handle)
    }

    pub(crate) fn finish(self) -> (StagedPublications, StagedPublications) {
        (self.staged, self.staged_future)
    }

    fn lookup<T: TopicState>(&self, set: &[ResolvedPublication], verb: &str) -> VertexId {
        let key = TypeId::of::<T>();
        set.iter().find(|p| p.state == key).map_or_else(
            || {
                panic!(
                    "detector `{}` attempted to {verb} undeclared kind `{}`",
                    self.detector_name,
                    std::any::type_name::<T>()
                )
            },
            |p| p.target,
        )
    }

    fn lookup_timeout<T: TopicState>(&self) -> &ResolvedTimeout {
        let key = TypeId::of::<T>();
        self.timeout_publications
            .iter()
            .find(|p| p.state == key)
            .unwrap_or_else(|| {
                panic!(
                    "detector `{}` attempted to timeout-publish undeclared kind `{}`",
                    self.detector_name,
                    std::any::type_name::<T>()
                )
            })
    }
}
