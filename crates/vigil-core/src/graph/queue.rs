//! The graph input queue.
//!
//! A FIFO of type-erased "publish this value into that topic" capsules.
//! Externally pushed values, future publications, and expired timed
//! publications all enter the graph through here; each call to
//! [`Graph::evaluate_graph`](super::Graph::evaluate_graph) drains exactly
//! one capsule.

use std::collections::VecDeque;

use super::error::GraphError;
use super::topic::ErasedTopicState;
use super::vertex::VertexId;

/// One pending publication: the target topic vertex and an owned copy of
/// the pushed value.
pub(crate) struct InputCapsule {
    pub(crate) target: VertexId,
    pub(crate) value: Box<dyn ErasedTopicState>,
}

impl std::fmt::Debug for InputCapsule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputCapsule")
            .field("target", &self.target)
            .field("state", &self.value.state_name())
            .finish()
    }
}

/// FIFO buffer of pending publications, optionally bounded.
#[derive(Debug)]
pub(crate) struct GraphInputQueue {
    queue: VecDeque<InputCapsule>,
    capacity: Option<usize>,
}

impl GraphInputQueue {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity.unwrap_or(8)),
            capacity,
        }
    }

    /// Appends a capsule.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::QueueOverflow`] when a bounded queue is full.
    pub(crate) fn enqueue(&mut self, capsule: InputCapsule) -> Result<(), GraphError> {
        if let Some(capacity) = self.capacity {
            if self.queue.len() >= capacity {
                return Err(GraphError::QueueOverflow { capacity });
            }
        }
        self.queue.push_back(capsule);
        Ok(())
    }

    /// Pops the head capsule, if any.
    pub(crate) fn dequeue_one(&mut self) -> Option<InputCapsule> {
        self.queue.pop_front()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::topic::TopicState;

    #[derive(Debug, Clone)]
    struct Ping(u8);

    impl TopicState for Ping {}

    fn capsule(n: u8) -> InputCapsule {
        InputCapsule {
            target: VertexId(0),
            value: Box::new(Ping(n)),
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = GraphInputQueue::new(None);
        queue.enqueue(capsule(1)).unwrap();
        queue.enqueue(capsule(2)).unwrap();
        queue.enqueue(capsule(3)).unwrap();

        assert_eq!(queue.len(), 3);
        for expected in 1..=3 {
            let capsule = queue.dequeue_one().unwrap();
            let ping = capsule.value.downcast_ref::<Ping>().unwrap();
            assert_eq!(ping.0, expected);
        }
        assert!(!queue.has_pending());
        assert!(queue.dequeue_one().is_none());
    }

    #[test]
    fn test_bounded_queue_overflows() {
        let mut queue = GraphInputQueue::new(Some(2));
        queue.enqueue(capsule(1)).unwrap();
        queue.enqueue(capsule(2)).unwrap();

        let result = queue.enqueue(capsule(3));
        assert!(matches!(
            result,
            Err(GraphError::QueueOverflow { capacity: 2 })
        ));
        // Draining frees capacity again.
        queue.dequeue_one();
        queue.enqueue(capsule(3)).unwrap();
    }
}
