//! The graph engine: vertex ownership, topological sort, and the
//! evaluation cycle.
//!
//! # Typical control flow
//!
//! - External events are translated into topic states and passed to
//!   [`Graph::push_data`].
//! - [`Graph::evaluate_graph`] runs in an event loop until
//!   [`Graph::has_data_pending`] is false.
//! - After each evaluation, [`Graph::output_list`] is inspected for states
//!   of interest that must be passed onwards to the outside.
//!
//! Each evaluation consumes exactly one externally pushed value, so every
//! output list describes the settled effects of a single input. Callers
//! that want to absorb all pending events before inspecting simply loop.

use std::any::TypeId;
use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::time::{TimeOffset, TimeoutPublisherService, TimerHandle};

use super::config::GraphConfig;
use super::detector::{
    Declarations, Detector, DetectorContext, DetectorId, DetectorNode, ResolvedPublication,
    ResolvedTimeout, SubscriptionDispatcher,
};
use super::error::GraphError;
use super::queue::{GraphInputQueue, InputCapsule};
use super::registry::TopicRegistry;
use super::topic::{AnyTopic, ErasedTopicState, OutputItem, Topic, TopicState};
use super::vertex::{SearchState, VertexId, VertexKind, VertexMeta};

/// Counters updated during evaluation; readable at any time.
#[derive(Debug, Clone, Default)]
pub struct GraphMetrics {
    /// Completed evaluations.
    pub evaluations: u64,
    /// Detector dispatches (one per affected detector per evaluation).
    pub dispatches: u64,
    /// Immediate publications applied to topics.
    pub publishes: u64,
    /// Future publications enqueued for later evaluations.
    pub future_publishes: u64,
}

/// A graph of topics and detectors with push/evaluate/output APIs.
///
/// The graph owns all vertices. Detectors are added with
/// [`add_detector`](Graph::add_detector); the graph creates the topics
/// needed to satisfy their declared subscriptions and publications
/// (dynamic profile) or requires them pre-registered (fixed-capacity
/// profile).
///
/// The engine assumes exclusive single-threaded access; `&mut self`
/// receivers make re-entrant evaluation and mid-evaluation topology
/// mutation unrepresentable.
pub struct Graph {
    config: GraphConfig,
    registry: TopicRegistry,
    input_queue: GraphInputQueue,
    /// Vertex metadata, indexed by `VertexId`. `None` marks a removed slot;
    /// slot indices are never reused.
    meta: Vec<Option<VertexMeta>>,
    /// Topic storage, parallel to `meta` (`Some` for topic vertices).
    topics: Vec<Option<Box<dyn AnyTopic>>>,
    /// Detector storage, parallel to `meta` (`Some` for detector vertices).
    detectors: Vec<Option<DetectorNode>>,
    /// Stored topological order; valid while `needs_sort` is false.
    order: Vec<VertexId>,
    needs_sort: bool,
    /// States published during the most recent evaluation, in topological
    /// order.
    output: Vec<OutputItem>,
    timeouts: TimeoutPublisherService,
    metrics: GraphMetrics,
}

impl Graph {
    /// Creates an empty graph with the dynamic profile.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GraphConfig::dynamic())
    }

    /// Creates an empty graph with the given deployment profile.
    #[must_use]
    pub fn with_config(config: GraphConfig) -> Self {
        debug!(fixed = config.is_fixed(), "graph initialized");
        let input_queue = GraphInputQueue::new(config.input_queue_capacity());
        Self {
            config,
            registry: TopicRegistry::default(),
            input_queue,
            meta: Vec::new(),
            topics: Vec::new(),
            detectors: Vec::new(),
            order: Vec::new(),
            needs_sort: false,
            output: Vec::new(),
            timeouts: TimeoutPublisherService::new(),
            metrics: GraphMetrics::default(),
        }
    }

    // ---- Topic registration and lookup ----

    /// Registers the topic for kind `T` ahead of use.
    ///
    /// Required for every kind in the fixed-capacity profile; optional in
    /// the dynamic profile (topics are otherwise created at first resolve).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::AlreadyRegistered`] if the kind already has a
    /// topic in this graph.
    pub fn register_topic<T: TopicState>(&mut self) -> Result<(), GraphError> {
        if self.registry.resolve(TypeId::of::<T>()).is_some() {
            return Err(GraphError::AlreadyRegistered(std::any::type_name::<T>()));
        }
        self.create_topic::<T>();
        Ok(())
    }

    /// Returns the latest value carried by the `T` topic, if any was ever
    /// published. The value persists across evaluations.
    #[must_use]
    pub fn latest_value<T: TopicState>(&self) -> Option<&T> {
        let vertex = self.registry.resolve(TypeId::of::<T>())?;
        self.topics[vertex.index()]
            .as_ref()
            .expect("registry entry points at a topic vertex")
            .current_any()?
            .downcast_ref::<T>()
    }

    /// Returns the topic carrying kind `T`, if one exists in this graph.
    ///
    /// Between evaluations, [`Topic::has_new_value`] tells whether the kind
    /// was published by the most recent evaluation; during construction it
    /// is mostly useful for inspecting wiring.
    #[must_use]
    pub fn topic<T: TopicState>(&self) -> Option<&Topic<T>> {
        let vertex = self.registry.resolve(TypeId::of::<T>())?;
        self.topics[vertex.index()]
            .as_ref()
            .expect("registry entry points at a topic vertex")
            .as_any()
            .downcast_ref::<Topic<T>>()
    }

    pub(crate) fn resolve_topic_vertex<T: TopicState>(&mut self) -> Result<VertexId, GraphError> {
        if let Some(vertex) = self.registry.resolve(TypeId::of::<T>()) {
            return Ok(vertex);
        }
        if self.config.is_fixed() {
            return Err(GraphError::UnresolvedTopic(std::any::type_name::<T>()));
        }
        Ok(self.create_topic::<T>())
    }

    fn create_topic<T: TopicState>(&mut self) -> VertexId {
        self.check_vertex_capacity();
        let name = std::any::type_name::<T>();
        let vertex = VertexId(u32::try_from(self.meta.len()).expect("vertex count fits in u32"));
        self.meta
            .push(Some(VertexMeta::new(VertexKind::Topic, name)));
        self.topics.push(Some(Box::new(Topic::<T>::new())));
        self.detectors.push(None);
        self.registry
            .register(TypeId::of::<T>(), name, vertex)
            .expect("kind checked unoccupied");
        self.needs_sort = true;
        debug!(topic = name, "topic created");
        vertex
    }

    fn check_vertex_capacity(&self) {
        if let Some(capacity) = self.config.vertex_capacity() {
            let occupied = self.meta.iter().flatten().count();
            assert!(
                occupied < capacity,
                "graph vertex capacity exceeded ({capacity})"
            );
        }
    }

    // ---- Detector registration ----

    /// Adds a detector, wiring the edges its declarations call for.
    ///
    /// Topics for declared kinds are created on demand in the dynamic
    /// profile. The subscription and publication sets are fixed for the
    /// detector's lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnresolvedTopic`] in the fixed-capacity
    /// profile if a declared kind was not pre-registered.
    ///
    /// # Panics
    ///
    /// Panics if the fixed-capacity profile's vertex capacity is exceeded.
    pub fn add_detector<D: Detector>(&mut self, detector: D) -> Result<DetectorId, GraphError> {
        let mut decls = Declarations::<D>::new();
        D::declare(&mut decls);
        let name = std::any::type_name::<D>();

        // Resolve every declared kind first; in the dynamic profile this
        // creates the topics the detector depends on.
        let mut subscription_topics: SmallVec<[VertexId; 4]> = SmallVec::new();
        for decl in &decls.subscriptions {
            let topic = (decl.resolve)(self)?;
            trace!(detector = name, state = decl.state_name, "subscription declared");
            subscription_topics.push(topic);
        }
        let mut publications: SmallVec<[ResolvedPublication; 2]> = SmallVec::new();
        for decl in &decls.publications {
            let target = (decl.resolve)(self)?;
            trace!(detector = name, state = decl.state_name, "publication declared");
            publications.push(ResolvedPublication {
                state: decl.state,
                target,
            });
        }
        let mut future_publications: SmallVec<[ResolvedPublication; 2]> = SmallVec::new();
        for decl in &decls.future_publications {
            let target = (decl.resolve)(self)?;
            trace!(
                detector = name,
                state = decl.state_name,
                "future publication declared"
            );
            future_publications.push(ResolvedPublication {
                state: decl.state,
                target,
            });
        }
        let mut timeout_publications: SmallVec<[ResolvedTimeout; 2]> = SmallVec::new();
        for decl in &decls.timeout_publications {
            let target = (decl.resolve)(self)?;
            trace!(
                detector = name,
                state = decl.state_name,
                "timeout publication declared"
            );
            timeout_publications.push(ResolvedTimeout {
                state: decl.state,
                target,
                handle: self.timeouts.unique_handle(),
            });
        }
        let mut periodic: SmallVec<[(VertexId, &super::detector::PeriodicDecl); 2]> =
            SmallVec::new();
        for decl in &decls.periodic_publications {
            let target = (decl.resolve)(self)?;
            periodic.push((target, decl));
        }

        self.check_vertex_capacity();
        let vertex = VertexId(u32::try_from(self.meta.len()).expect("vertex count fits in u32"));

        let mut meta = VertexMeta::new(VertexKind::Detector, name);
        meta.out_edges = publications.iter().map(|p| p.target).collect();

        let dispatchers: SmallVec<[SubscriptionDispatcher; 4]> = decls
            .subscriptions
            .iter()
            .zip(subscription_topics.iter())
            .map(|(decl, &topic)| SubscriptionDispatcher {
                topic,
                state_name: decl.state_name,
                dispatch: decl.dispatch,
            })
            .collect();

        for (target, decl) in periodic {
            self.timeouts
                .schedule_periodic(vertex, target, decl.state_name, decl.period, decl.make);
        }

        self.meta.push(Some(meta));
        self.topics.push(None);
        self.detectors.push(Some(DetectorNode {
            instance: Box::new(detector),
            name,
            dispatchers,
            publications,
            future_publications,
            timeout_publications,
        }));

        // Subscription edges point from each topic at its new subscriber.
        for &topic in &subscription_topics {
            self.meta[topic.index()]
                .as_mut()
                .expect("subscription resolved to a live topic")
                .out_edges
                .push(vertex);
        }

        self.needs_sort = true;
        debug!(detector = name, "detector added");
        Ok(DetectorId(vertex))
    }

    /// Removes a detector, its subscriptions, and any timed publications it
    /// still has pending. Returns whether the detector was present.
    pub fn remove_detector(&mut self, id: DetectorId) -> bool {
        let vertex = id.0;
        let idx = vertex.index();
        match self.meta.get(idx) {
            Some(Some(meta)) if meta.kind == VertexKind::Detector => {}
            _ => return false,
        }
        let node = self.detectors[idx].take().expect("detector slot occupied");
        let handles: SmallVec<[TimerHandle; 2]> = node
            .timeout_publications
            .iter()
            .map(|t| t.handle)
            .collect();
        self.timeouts.remove_owner(vertex, &handles);
        self.meta[idx] = None;
        for meta in self.meta.iter_mut().flatten() {
            meta.out_edges.retain(|edge| *edge != vertex);
        }
        self.needs_sort = true;
        debug!(detector = node.name, "detector removed");
        true
    }

    // ---- Input ----

    /// Pushes a typed value into the graph.
    ///
    /// The value is copied into the input queue; the next call to
    /// [`evaluate_graph`](Graph::evaluate_graph) publishes it into its
    /// topic. This is the only way data enters the graph.
    ///
    /// # Errors
    ///
    /// Fixed-capacity profile only: [`GraphError::UnresolvedTopic`] if `T`
    /// was not pre-registered, [`GraphError::QueueOverflow`] if the queue
    /// is full.
    pub fn push_data<T: TopicState>(&mut self, value: T) -> Result<(), GraphError> {
        let target = self.resolve_topic_vertex::<T>()?;
        self.input_queue.enqueue(InputCapsule {
            target,
            value: Box::new(value),
        })
    }

    /// Returns whether data is pending evaluation.
    ///
    /// Useful for a "flush and evaluate everything" pattern, since each
    /// evaluation removes only a single value from the input queue.
    #[must_use]
    pub fn has_data_pending(&self) -> bool {
        self.input_queue.has_pending()
    }

    // ---- Evaluation ----

    /// Evaluates the whole graph.
    ///
    /// 1. Re-sorts if the topology changed; a sort failure aborts the
    ///    evaluation with the graph unmutated.
    /// 2. Dequeues at most one capsule from the input queue and publishes
    ///    it into its topic.
    /// 3. Walks vertices in topological order, dispatching each affected
    ///    detector once: `begin_evaluation`, every fresh subscription in
    ///    declaration order, `complete_evaluation`. Publications flag
    ///    downstream subscribers for the remainder of the walk.
    /// 4. Rebuilds the output list from topics with new data. Their
    ///    new-data flags stay raised until the next evaluation begins, so
    ///    [`Topic::has_new_value`] is queryable in between.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] if the topology has a cycle,
    /// or [`GraphError::QueueOverflow`] if a future publication overflows a
    /// bounded input queue mid-walk (the output list is left empty).
    pub fn evaluate_graph(&mut self) -> Result<(), GraphError> {
        if self.needs_sort {
            self.topo_sort()?;
        }

        // Reset the previous evaluation's traces: search states, new-data
        // flags, and the output list. Flags stay raised between evaluations
        // so callers can query `Topic::has_new_value` after one returns.
        for meta in self.meta.iter_mut().flatten() {
            meta.state = SearchState::Clear;
        }
        for topic in self.topics.iter_mut().flatten() {
            topic.clear_new_value();
        }
        self.output.clear();

        if let Some(capsule) = self.input_queue.dequeue_one() {
            trace!(state = capsule.value.state_name(), "input dequeued");
            self.publish_into(capsule.target, capsule.value);
        }

        for i in 0..self.order.len() {
            let vertex = self.order[i];
            let idx = vertex.index();
            let meta = self.meta[idx].as_ref().expect("sorted vertex is live");
            if meta.state != SearchState::InProgress {
                continue;
            }
            match meta.kind {
                VertexKind::Topic => {
                    self.meta[idx].as_mut().expect("vertex is live").state = SearchState::Done;
                }
                VertexKind::Detector => {
                    if let Err(error) = self.process_detector(vertex) {
                        self.output.clear();
                        return Err(error);
                    }
                    self.meta[idx].as_mut().expect("vertex is live").state = SearchState::Done;
                }
            }
        }

        // Compose the output list in topological order. New-data flags stay
        // raised until the next evaluation begins.
        for &vertex in &self.order {
            if let Some(topic) = self.topics[vertex.index()].as_ref() {
                if topic.has_new_value() {
                    self.output
                        .push(topic.current_erased().expect("new-value topic holds a value"));
                }
            }
        }

        self.metrics.evaluations += 1;
        trace!(outputs = self.output.len(), "evaluation complete");
        Ok(())
    }

    /// Evaluates the graph if data is pending; returns whether it did.
    ///
    /// A convenience combination of [`has_data_pending`](Graph::has_data_pending)
    /// and [`evaluate_graph`](Graph::evaluate_graph) for simple evaluation
    /// loops.
    ///
    /// # Errors
    ///
    /// Propagates any [`evaluate_graph`](Graph::evaluate_graph) error.
    pub fn evaluate_if_has_data_pending(&mut self) -> Result<bool, GraphError> {
        if self.has_data_pending() {
            self.evaluate_graph()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// The states published during the most recent evaluation, in
    /// topological order.
    ///
    /// The list is rebuilt by each evaluation, but the handles it holds are
    /// stable: clone one out to keep a value past the next evaluation.
    #[must_use]
    pub fn output_list(&self) -> &[OutputItem] {
        &self.output
    }

    /// Returns the value of kind `T` from the most recent evaluation's
    /// output list, if one was published.
    #[must_use]
    pub fn output_value<T: TopicState>(&self) -> Option<&T> {
        self.output.iter().find_map(|item| item.downcast_ref::<T>())
    }

    // ---- Timed publications ----

    /// Advances the graph's timeline to `now`, enqueueing every timed and
    /// periodic publication that came due. Returns how many were enqueued.
    ///
    /// The engine never reads a clock; wall-clock deployments pass a
    /// monotonic timestamp here, tests pass logical time.
    ///
    /// # Errors
    ///
    /// Fixed-capacity profile only: [`GraphError::QueueOverflow`] if the
    /// input queue fills up mid-drain (remaining due capsules are dropped).
    pub fn poll_timers(&mut self, now: TimeOffset) -> Result<usize, GraphError> {
        let due = self.timeouts.poll(now);
        let count = due.len();
        for capsule in due {
            self.input_queue.enqueue(capsule)?;
        }
        Ok(count)
    }

    /// Starts every declared periodic publication, anchoring first
    /// deadlines at `now + period`.
    pub fn start_periodic_publishing(&mut self, now: TimeOffset) {
        self.timeouts.start_periodic(now);
    }

    /// Vends a timer handle for detectors that run several concurrent
    /// timers through
    /// [`DetectorContext::publish_on_timeout_with`](super::DetectorContext::publish_on_timeout_with).
    pub fn unique_timer_handle(&mut self) -> TimerHandle {
        self.timeouts.unique_handle()
    }

    /// Read access to the timed-publication scheduler.
    #[must_use]
    pub fn timeout_service(&self) -> &TimeoutPublisherService {
        &self.timeouts
    }

    // ---- Introspection ----

    /// Number of live vertices (topics plus detectors).
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.meta.iter().flatten().count()
    }

    /// Number of topics in the graph.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.registry.len()
    }

    /// Evaluation counters.
    #[must_use]
    pub fn metrics(&self) -> &GraphMetrics {
        &self.metrics
    }

    // ---- Internals ----

    /// Publishes an erased value into a topic vertex: sets the value,
    /// raises the new-data flag, and marks subscribers affected for the
    /// remainder of the current walk.
    fn publish_into(&mut self, target: VertexId, value: Box<dyn ErasedTopicState>) {
        let idx = target.index();
        self.topics[idx]
            .as_mut()
            .expect("publication target is a topic vertex")
            .publish_erased(value);

        let meta = self.meta[idx].as_mut().expect("topic vertex is live");
        meta.state = SearchState::InProgress;
        let subscribers: SmallVec<[VertexId; 4]> = meta.out_edges.clone();
        for subscriber in subscribers {
            let meta = self.meta[subscriber.index()]
                .as_mut()
                .expect("subscriber vertex is live");
            if meta.state == SearchState::Clear {
                meta.state = SearchState::InProgress;
            }
        }
    }

    /// Dispatches one affected detector: begin, every fresh subscription in
    /// declaration order, complete; then applies its staged publications.
    fn process_detector(&mut self, vertex: VertexId) -> Result<(), GraphError> {
        let idx = vertex.index();
        // Take the detector out so its hooks can read topics while holding
        // a context that borrows the scheduler.
        let mut node = self.detectors[idx].take().expect("affected vertex is a detector");
        self.metrics.dispatches += 1;

        let (staged, staged_future) = {
            let Graph {
                topics, timeouts, ..
            } = self;
            let DetectorNode {
                instance,
                dispatchers,
                publications,
                future_publications,
                timeout_publications,
                name,
            } = &mut node;

            let mut ctx = DetectorContext::new(
                *name,
                publications.as_slice(),
                future_publications.as_slice(),
                timeout_publications.as_slice(),
                timeouts,
            );

            instance.begin(&mut ctx);
            for dispatcher in dispatchers.iter() {
                let topic = topics[dispatcher.topic.index()]
                    .as_ref()
                    .expect("subscription targets a topic vertex");
                if topic.has_new_value() {
                    trace!(
                        detector = *name,
                        state = dispatcher.state_name,
                        "dispatching subscription"
                    );
                    let value = topic.current_any().expect("new-value topic holds a value");
                    (dispatcher.dispatch)(instance.as_any_mut(), value, &mut ctx);
                }
            }
            instance.complete(&mut ctx);
            ctx.finish()
        };

        self.detectors[idx] = Some(node);

        for (target, value) in staged {
            self.metrics.publishes += 1;
            self.publish_into(target, value);
        }
        for (target, value) in staged_future {
            self.metrics.future_publishes += 1;
            self.input_queue.enqueue(InputCapsule { target, value })?;
        }
        Ok(())
    }

    /// Computes the stored topological order.
    ///
    /// Kahn's algorithm over the subscription/publication edges, with ready
    /// vertices taken in insertion (id) order so that independent vertices
    /// evaluate in the order they were added, reproducibly across runs. If
    /// any vertex is left unordered, the edges contain a cycle and the sort
    /// fails without touching the stored order.
    fn topo_sort(&mut self) -> Result<(), GraphError> {
        let slot_count = self.meta.len();
        let mut in_degree = vec![0usize; slot_count];
        let mut live = 0usize;
        for meta in self.meta.iter().flatten() {
            live += 1;
            for edge in &meta.out_edges {
                in_degree[edge.index()] += 1;
            }
        }

        // Seed with in-degree-zero vertices, ascending id.
        let mut ready: VecDeque<VertexId> = VecDeque::new();
        for (idx, meta) in self.meta.iter().enumerate() {
            if meta.is_some() && in_degree[idx] == 0 {
                ready.push_back(VertexId(u32::try_from(idx).expect("slot fits in u32")));
            }
        }

        let mut order = Vec::with_capacity(live);
        while let Some(vertex) = ready.pop_front() {
            order.push(vertex);
            let meta = self.meta[vertex.index()].as_ref().expect("queued vertex is live");
            let mut unblocked: SmallVec<[VertexId; 4]> = SmallVec::new();
            for &target in &meta.out_edges {
                let degree = &mut in_degree[target.index()];
                *degree -= 1;
                if *degree == 0 {
                    unblocked.push(target);
                }
            }
            unblocked.sort_unstable_by_key(|vertex| vertex.0);
            ready.extend(unblocked);
        }

        if order.len() < live {
            let ordered: Vec<bool> = {
                let mut seen = vec![false; slot_count];
                for vertex in &order {
                    seen[vertex.index()] = true;
                }
                seen
            };
            for (idx, meta) in self.meta.iter().enumerate() {
                if let Some(meta) = meta {
                    if !ordered[idx] {
                        warn!(vertex = meta.name, "cycle detected");
                        return Err(GraphError::CycleDetected(meta.name.to_string()));
                    }
                }
            }
            unreachable!("some live vertex is missing from a short order");
        }

        self.order = order;
        self.needs_sort = false;
        debug!(vertices = live, "graph sorted");
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("vertices", &self.vertex_count())
            .field("topics", &self.topic_count())
            .field("pending_inputs", &self.input_queue.len())
            .field("needs_sort", &self.needs_sort)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}
