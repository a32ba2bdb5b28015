//! # State Snapshots
//!
//! Versioned accumulation of the latest *named* topic states.
//!
//! A [`StateSnapshot`] is the collection of public states that represents
//! the graph so far: the most recent value of every kind carrying a
//! [`TopicStateId`], composed by folding successive output lists. Anonymous
//! kinds (the default) are graph-internal and never enter snapshots.
//!
//! [`GraphStateStore`] maintains a bounded look-back queue of snapshots in
//! a no-duplication, safe-sharing fashion: snapshots hold the same stable
//! handles the output list does, so composing one copies pointers, not
//! values.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut store = GraphStateStore::new();
//!
//! graph.evaluate_graph()?;
//! store.take_new_snapshot(graph.output_list());
//!
//! let snapshot = store.last_state();
//! if let Some(door) = snapshot.get::<DoorState>() {
//!     // latest named DoorState, whenever it was last published
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use fxhash::FxHashMap;
use tracing::warn;

use crate::graph::{OutputItem, TopicState, TopicStateId};

/// Default number of snapshots kept by a [`GraphStateStore`].
pub const DEFAULT_LOOKBACK: usize = 1;

/// The collection of named topic states accumulated up to one evaluation.
#[derive(Debug, Default)]
pub struct StateSnapshot {
    states: FxHashMap<TopicStateId, OutputItem>,
    version: u32,
}

impl StateSnapshot {
    /// Builds the initial, empty snapshot (version 0).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a prime snapshot (version 0) from an output list.
    #[must_use]
    pub fn primed(outputs: &[OutputItem]) -> Self {
        let mut snapshot = Self::new();
        snapshot.update_values(outputs);
        snapshot
    }

    /// Builds the successor of `previous`, folding in an output list and
    /// incrementing the version.
    #[must_use]
    pub fn successor(previous: &StateSnapshot, outputs: &[OutputItem]) -> Self {
        let mut snapshot = Self {
            // Pointer-copies of the shared handles, not values.
            states: previous.states.clone(),
            version: previous.version + 1,
        };
        snapshot.update_values(outputs);
        snapshot
    }

    /// Returns the latest state with the given public id.
    #[must_use]
    pub fn get_by_id(&self, id: TopicStateId) -> Option<&OutputItem> {
        self.states.get(&id)
    }

    /// Returns the latest state of kind `T`, which must be a named kind.
    #[must_use]
    pub fn get<T: TopicState>(&self) -> Option<&T> {
        let id = T::ID?;
        self.states.get(&id)?.downcast_ref::<T>()
    }

    /// Number of named states in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns whether the snapshot holds no states.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The snapshot version: incremented once per composed snapshot.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Iterates the named states held by this snapshot.
    pub fn states(&self) -> impl Iterator<Item = &OutputItem> {
        self.states.values()
    }

    fn update_values(&mut self, outputs: &[OutputItem]) {
        // Two named states of the same kind in one output list means two
        // topics share a public id; the later one clobbers the earlier.
        let mut previous_id = None;
        for state in outputs {
            let Some(id) = state.state_id() else {
                continue;
            };
            if previous_id == Some(id) {
                warn!(
                    state = state.state_name(),
                    %id,
                    "duplicate named state in one output list"
                );
            }
            previous_id = Some(id);
            self.states.insert(id, Arc::clone(state));
        }
    }
}

/// A bounded look-back keeper of [`StateSnapshot`]s.
#[derive(Debug)]
pub struct GraphStateStore {
    lookback: VecDeque<Arc<StateSnapshot>>,
    capacity: usize,
}

impl GraphStateStore {
    /// Creates an empty store keeping [`DEFAULT_LOOKBACK`] snapshots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lookback(DEFAULT_LOOKBACK)
    }

    /// Creates an empty store keeping up to `capacity` snapshots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_lookback(capacity: usize) -> Self {
        assert!(capacity > 0, "state store look-back must be nonzero");
        Self {
            lookback: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Composes a new snapshot from the previous one and an output list,
    /// appending it to the look-back queue.
    pub fn take_new_snapshot(&mut self, outputs: &[OutputItem]) {
        let snapshot = match self.lookback.back() {
            Some(previous) => StateSnapshot::successor(previous, outputs),
            None => StateSnapshot::primed(outputs),
        };
        if self.lookback.len() == self.capacity {
            self.lookback.pop_front();
        }
        self.lookback.push_back(Arc::new(snapshot));
    }

    /// Returns the latest complete snapshot.
    ///
    /// Always returns a valid handle, possibly to an empty snapshot.
    #[must_use]
    pub fn last_state(&self) -> Arc<StateSnapshot> {
        self.lookback
            .back()
            .map_or_else(|| Arc::new(StateSnapshot::new()), Arc::clone)
    }

    /// Number of snapshots currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lookback.len()
    }

    /// Returns whether no snapshot has been taken yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookback.is_empty()
    }
}

impl Default for GraphStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct DoorState {
        open: bool,
    }

    impl TopicState for DoorState {
        const ID: Option<TopicStateId> = Some(TopicStateId(1));
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Setpoint(i32);

    impl TopicState for Setpoint {
        const ID: Option<TopicStateId> = Some(TopicStateId(2));
    }

    #[derive(Debug, Clone)]
    struct ScratchValue;

    impl TopicState for ScratchValue {}

    fn item<T: TopicState>(value: T) -> OutputItem {
        Arc::new(value)
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = StateSnapshot::new();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version(), 0);
        assert!(snapshot.get::<DoorState>().is_none());
    }

    #[test]
    fn test_named_states_accumulate_across_snapshots() {
        let mut store = GraphStateStore::new();
        store.take_new_snapshot(&[item(DoorState { open: true })]);
        store.take_new_snapshot(&[item(Setpoint(21))]);

        let last = store.last_state();
        // DoorState survives from the first snapshot.
        assert_eq!(last.get::<DoorState>(), Some(&DoorState { open: true }));
        assert_eq!(last.get::<Setpoint>(), Some(&Setpoint(21)));
        assert_eq!(last.len(), 2);
    }

    #[test]
    fn test_newer_value_replaces_older() {
        let mut store = GraphStateStore::new();
        store.take_new_snapshot(&[item(Setpoint(21))]);
        store.take_new_snapshot(&[item(Setpoint(25))]);

        assert_eq!(store.last_state().get::<Setpoint>(), Some(&Setpoint(25)));
    }

    #[test]
    fn test_anonymous_states_are_excluded() {
        let mut store = GraphStateStore::new();
        store.take_new_snapshot(&[item(ScratchValue), item(DoorState { open: false })]);

        let last = store.last_state();
        assert_eq!(last.len(), 1);
        assert!(last.get::<DoorState>().is_some());
    }

    #[test]
    fn test_versions_increment_per_snapshot() {
        let mut store = GraphStateStore::with_lookback(4);
        assert_eq!(store.last_state().version(), 0);

        store.take_new_snapshot(&[]);
        assert_eq!(store.last_state().version(), 0);
        store.take_new_snapshot(&[]);
        assert_eq!(store.last_state().version(), 1);
        store.take_new_snapshot(&[]);
        assert_eq!(store.last_state().version(), 2);
    }

    #[test]
    fn test_lookback_is_bounded() {
        let mut store = GraphStateStore::with_lookback(2);
        for i in 0..5 {
            store.take_new_snapshot(&[item(Setpoint(i))]);
        }
        assert_eq!(store.len(), 2);
        assert_eq!(store.last_state().get::<Setpoint>(), Some(&Setpoint(4)));
    }

    #[test]
    fn test_get_by_id() {
        let snapshot = StateSnapshot::primed(&[item(DoorState { open: true })]);
        let state = snapshot.get_by_id(TopicStateId(1)).unwrap();
        assert!(state.is::<DoorState>());
        assert!(snapshot.get_by_id(TopicStateId(99)).is_none());
    }

    #[test]
    fn test_last_state_valid_when_empty() {
        let store = GraphStateStore::new();
        assert!(store.is_empty());
        let snapshot = store.last_state();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version(), 0);
    }
}
