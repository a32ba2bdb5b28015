//! Topic registry: the per-graph mapping from state kind to topic vertex.
//!
//! An inversion-of-control container of singleton topics. Graphs use it to
//! register and resolve topics by the `TypeId` of the state they carry;
//! lookups are O(1) amortized on kind identity.

use std::any::TypeId;

use fxhash::FxHashMap;

use super::error::GraphError;
use super::vertex::VertexId;

/// Maps each [`TopicState`](super::TopicState) kind to the single topic
/// vertex carrying it within one graph.
#[derive(Debug, Default)]
pub(crate) struct TopicRegistry {
    entries: FxHashMap<TypeId, VertexId>,
}

impl TopicRegistry {
    /// Returns the topic vertex for a kind, if registered.
    pub(crate) fn resolve(&self, key: TypeId) -> Option<VertexId> {
        self.entries.get(&key).copied()
    }

    /// Associates a kind with a topic vertex.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::AlreadyRegistered`] if the kind is occupied.
    pub(crate) fn register(
        &mut self,
        key: TypeId,
        name: &'static str,
        vertex: VertexId,
    ) -> Result<(), GraphError> {
        if self.entries.contains_key(&key) {
            return Err(GraphError::AlreadyRegistered(name));
        }
        self.entries.insert(key, vertex);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = TopicRegistry::default();
        let key = TypeId::of::<u32>();

        assert!(registry.resolve(key).is_none());
        registry.register(key, "u32", VertexId(0)).unwrap();
        assert_eq!(registry.resolve(key), Some(VertexId(0)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_double_register_fails() {
        let mut registry = TopicRegistry::default();
        let key = TypeId::of::<u32>();

        registry.register(key, "u32", VertexId(0)).unwrap();
        let result = registry.register(key, "u32", VertexId(1));
        assert!(matches!(result, Err(GraphError::AlreadyRegistered("u32"))));
        // The original mapping is untouched.
        assert_eq!(registry.resolve(key), Some(VertexId(0)));
    }
}
