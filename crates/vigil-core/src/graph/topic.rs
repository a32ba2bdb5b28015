//! Topics and the topic state types they carry.
//!
//! A [`Topic<T>`] is a typed single-valued bus. Exactly one topic exists per
//! [`TopicState`] kind per graph; the engine routes publications to it by
//! the `TypeId` of the value and hands the value to every subscribing
//! detector in topological order.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Application-wide public identifier for a [`TopicState`] kind.
///
/// Kinds that cross the graph boundary (fed in from or reported out to the
/// surrounding system) can carry an id from an application-defined number
/// space; snapshots index by it. Kinds without an id are *anonymous*: they
/// exist only inside the graph and never enter snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicStateId(pub i32);

impl fmt::Display for TopicStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicStateId({})", self.0)
    }
}

/// A value-type routed through the graph.
///
/// Topic states should be seen as plain data containers: self-explanatory
/// and self-contained, so a subscriber needs nothing else to act on one.
/// Values are carried by value in and out of the engine; wrap bulk payloads
/// in a cheaply clonable handle (e.g. `Arc<Buffer>`) if copies matter.
///
/// # Example
///
/// ```rust
/// use vigil_core::{TopicState, TopicStateId};
///
/// #[derive(Debug, Clone)]
/// struct AccelerometerData {
///     x: i32,
///     y: i32,
///     z: i32,
/// }
///
/// impl TopicState for AccelerometerData {
///     // Public id so this kind shows up in snapshots.
///     const ID: Option<TopicStateId> = Some(TopicStateId(7));
/// }
/// ```
pub trait TopicState: Clone + fmt::Debug + 'static {
    /// Public identifier for this kind; `None` (the default) marks the kind
    /// as anonymous.
    const ID: Option<TopicStateId> = None;
}

/// Object-safe view of a [`TopicState`], used wherever the engine must hold
/// values of mixed kinds (queue capsules, the output list, snapshots).
///
/// Implemented for every `TopicState` type; not meant to be implemented by
/// hand.
pub trait ErasedTopicState: Any + fmt::Debug {
    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Consumes the box and returns it as [`Any`] for by-value downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// The public id of this kind, or `None` for anonymous kinds.
    fn state_id(&self) -> Option<TopicStateId>;

    /// The Rust type name of this kind, for logs and panic messages.
    fn state_name(&self) -> &'static str;
}

impl<T: TopicState> ErasedTopicState for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn state_id(&self) -> Option<TopicStateId> {
        T::ID
    }

    fn state_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn ErasedTopicState {
    /// Returns whether the erased value is of kind `T`.
    #[must_use]
    pub fn is<T: TopicState>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Downcasts the erased value to kind `T`.
    #[must_use]
    pub fn downcast_ref<T: TopicState>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// A stable, shareable handle to a value published during an evaluation.
///
/// Handles stay valid indefinitely; the output list is rebuilt each
/// evaluation but values handed out are never invalidated.
pub type OutputItem = Arc<dyn ErasedTopicState>;

/// A typed single-valued bus.
///
/// Holds the current value (if any value was ever published), a new-data
/// flag raised on publish and lowered when the next evaluation begins, and
/// — through the owning graph's vertex metadata — the ordered list of
/// subscribing detectors.
#[derive(Debug)]
pub struct Topic<T: TopicState> {
    current: Option<Arc<T>>,
    new_value: bool,
}

impl<T: TopicState> Topic<T> {
    pub(crate) fn new() -> Self {
        Self {
            current: None,
            new_value: false,
        }
    }

    /// Sets the current value and raises the new-data flag.
    pub(crate) fn publish(&mut self, value: T) {
        self.current = Some(Arc::new(value));
        self.new_value = true;
    }

    /// Returns the current value, if one was ever published.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.current.as_deref()
    }

    /// Returns whether the new-data flag is currently raised.
    #[must_use]
    pub fn has_new_value(&self) -> bool {
        self.new_value
    }
}

/// Object-safe view of a [`Topic<T>`], stored in the graph's vertex slots.
pub(crate) trait AnyTopic: Any {
    /// Publishes a type-erased value into the topic. Panics on a kind
    /// mismatch, which would indicate a broken registry.
    fn publish_erased(&mut self, value: Box<dyn ErasedTopicState>);

    fn has_new_value(&self) -> bool;

    fn clear_new_value(&mut self);

    /// The current value as a shareable erased handle.
    fn current_erased(&self) -> Option<OutputItem>;

    /// The current value as [`Any`], for subscription dispatch.
    fn current_any(&self) -> Option<&dyn Any>;

    /// The topic itself as [`Any`], for typed access through the graph.
    fn as_any(&self) -> &dyn Any;
}

impl<T: TopicState> AnyTopic for Topic<T> {
    fn publish_erased(&mut self, value: Box<dyn ErasedTopicState>) {
        let name = value.state_name();
        let value = value
            .into_any()
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("topic kind mismatch: {name}"));
        self.publish(*value);
    }

    fn has_new_value(&self) -> bool {
        Topic::has_new_value(self)
    }

    fn clear_new_value(&mut self) {
        self.new_value = false;
    }

    fn current_erased(&self) -> Option<OutputItem> {
        self.current
            .clone()
            .map(|value| value as Arc<dyn ErasedTopicState>)
    }

    fn current_any(&self) -> Option<&dyn Any> {
        self.current.as_deref().map(|value| value as &dyn Any)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
