//! # Time Module
//!
//! Deadline and periodic scheduling of topic publications.
//!
//! ## Concepts
//!
//! - **Timed publication**: a value a detector schedules for publication
//!   after a deadline; it re-enters the graph through the input queue, so
//!   (like a future publication) it never creates a sort-visible edge and a
//!   detector may feed a topic it transitively depends on
//! - **Periodic series**: a recurring publication of a kind's default value
//!   every fixed period
//! - **Timer handle**: identifies one schedulable slot; re-scheduling a
//!   pending handle replaces it
//!
//! The engine never reads a clock. The owner drives time explicitly by
//! calling [`Graph::poll_timers`](crate::Graph::poll_timers) with a
//! timestamp of its choosing; due publications are enqueued and consumed by
//! subsequent evaluations, one per evaluation. Tests drive logical time the
//! same way.

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::graph::queue::InputCapsule;
use crate::graph::topic::ErasedTopicState;
use crate::graph::vertex::VertexId;

/// A millisecond offset on the owner-supplied timeline.
pub type TimeOffset = u64;

/// Identifies one schedulable timed-publication slot.
///
/// Handles are vended by the owning graph
/// ([`Graph::unique_timer_handle`](crate::Graph::unique_timer_handle)) or
/// allocated implicitly, one per timeout declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) u64);

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimerHandle({})", self.0)
    }
}

/// Batch of capsules that came due in one poll.
pub(crate) type DueCapsules = SmallVec<[InputCapsule; 4]>;

struct ScheduledPublication {
    deadline: TimeOffset,
    target: VertexId,
    value: Box<dyn ErasedTopicState>,
}

struct PeriodicSeries {
    owner: VertexId,
    target: VertexId,
    state_name: &'static str,
    period: TimeOffset,
    next_due: Option<TimeOffset>,
    make: fn() -> Box<dyn ErasedTopicState>,
}

/// Deadline and periodic publication scheduler for one graph.
///
/// Detectors reach it only through their
/// [`DetectorContext`](crate::DetectorContext); the owner drains it through
/// [`Graph::poll_timers`](crate::Graph::poll_timers). Time only advances on
/// polls: a deadline scheduled during an evaluation is measured from the
/// most recent poll timestamp.
pub struct TimeoutPublisherService {
    now: TimeOffset,
    pending: FxHashMap<TimerHandle, ScheduledPublication>,
    periodic: Vec<PeriodicSeries>,
    periodic_started: bool,
    next_handle: u64,
}

impl TimeoutPublisherService {
    pub(crate) fn new() -> Self {
        Self {
            now: 0,
            pending: FxHashMap::default(),
            periodic: Vec::new(),
            periodic_started: false,
            next_handle: 0,
        }
    }

    /// The most recent poll timestamp.
    #[must_use]
    pub fn now(&self) -> TimeOffset {
        self.now
    }

    /// Number of pending one-shot timed publications.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns whether the timer on `handle` has expired.
    ///
    /// Also true for handles that were never scheduled: "expired" means "no
    /// publication pending".
    #[must_use]
    pub fn has_expired(&self, handle: TimerHandle) -> bool {
        !self.pending.contains_key(&handle)
    }

    pub(crate) fn unique_handle(&mut self) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    /// Arms (or re-arms) a one-shot publication on `handle`, due
    /// `delay_ms` after the last observed poll time.
    pub(crate) fn schedule(
        &mut self,
        handle: TimerHandle,
        delay_ms: TimeOffset,
        target: VertexId,
        value: Box<dyn ErasedTopicState>,
    ) {
        tracing::trace!(
            state = value.state_name(),
            %handle,
            delay_ms,
            "scheduling timed publication"
        );
        self.pending.insert(
            handle,
            ScheduledPublication {
                deadline: self.now.saturating_add(delay_ms),
                target,
                value,
            },
        );
    }

    /// Disarms `handle`, dropping the stored value. Returns whether a
    /// publication was pending.
    pub(crate) fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.pending.remove(&handle).is_some()
    }

    /// Registers a recurring publication owned by a detector vertex.
    pub(crate) fn schedule_periodic(
        &mut self,
        owner: VertexId,
        target: VertexId,
        state_name: &'static str,
        period: TimeOffset,
        make: fn() -> Box<dyn ErasedTopicState>,
    ) {
        let next_due = self
            .periodic_started
            .then(|| self.now.saturating_add(period));
        self.periodic.push(PeriodicSeries {
            owner,
            target,
            state_name,
            period,
            next_due,
            make,
        });
    }

    /// Starts all periodic series, anchoring their first deadlines at
    /// `now + period`.
    pub(crate) fn start_periodic(&mut self, now: TimeOffset) {
        self.now = self.now.max(now);
        self.periodic_started = true;
        for series in &mut self.periodic {
            series.next_due = Some(self.now.saturating_add(series.period));
        }
    }

    /// Drops all scheduling state owned by a removed detector vertex.
    pub(crate) fn remove_owner(&mut self, owner: VertexId, handles: &[TimerHandle]) {
        for &handle in handles {
            self.pending.remove(&handle);
        }
        self.periodic.retain(|series| series.owner != owner);
    }

    /// Advances time to `now` and returns every publication that came due.
    ///
    /// One-shots fire once at `deadline <= now` in (deadline, handle) order.
    /// A started periodic series fires once per poll in which it is due; a
    /// poll landing several periods late collapses the missed firings into
    /// one and re-anchors the next deadline past `now`.
    pub(crate) fn poll(&mut self, now: TimeOffset) -> DueCapsules {
        self.now = self.now.max(now);
        let now = self.now;

        let mut due: SmallVec<[(TimeOffset, TimerHandle); 4]> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&handle, p)| (p.deadline, handle))
            .collect();
        due.sort_unstable_by_key(|&(deadline, handle)| (deadline, handle.0));

        let mut fired = DueCapsules::new();
        for (_, handle) in due {
            let publication = self
                .pending
                .remove(&handle)
                .expect("due handle is pending");
            tracing::trace!(
                state = publication.value.state_name(),
                %handle,
                "timed publication expired"
            );
            fired.push(InputCapsule {
                target: publication.target,
                value: publication.value,
            });
        }

        for series in &mut self.periodic {
            let Some(next_due) = series.next_due else {
                continue;
            };
            if next_due <= now {
                tracing::trace!(state = series.state_name, "periodic publication fired");
                fired.push(InputCapsule {
                    target: series.target,
                    value: (series.make)(),
                });
                let mut next = next_due;
                while next <= now {
                    next = next.saturating_add(series.period);
                }
                series.next_due = Some(next);
            }
        }

        fired
    }
}

impl std::fmt::Debug for TimeoutPublisherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutPublisherService")
            .field("now", &self.now)
            .field("pending", &self.pending.len())
            .field("periodic", &self.periodic.len())
            .field("periodic_started", &self.periodic_started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::topic::TopicState;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Beep(u32);

    impl TopicState for Beep {}

    fn target() -> VertexId {
        VertexId(0)
    }

    fn beep_value(capsule: &InputCapsule) -> u32 {
        capsule.value.downcast_ref::<Beep>().unwrap().0
    }

    // ==================== One-shot Tests ====================

    #[test]
    fn test_schedule_and_poll() {
        let mut service = TimeoutPublisherService::new();
        let handle = service.unique_handle();
        service.schedule(handle, 100, target(), Box::new(Beep(1)));

        assert!(!service.has_expired(handle));
        assert!(service.poll(99).is_empty());

        let fired = service.poll(100);
        assert_eq!(fired.len(), 1);
        assert_eq!(beep_value(&fired[0]), 1);
        assert!(service.has_expired(handle));
    }

    #[test]
    fn test_reschedule_replaces() {
        let mut service = TimeoutPublisherService::new();
        let handle = service.unique_handle();
        service.schedule(handle, 50, target(), Box::new(Beep(1)));
        service.schedule(handle, 200, target(), Box::new(Beep(2)));

        // The first deadline no longer fires.
        assert!(service.poll(100).is_empty());
        let fired = service.poll(200);
        assert_eq!(fired.len(), 1);
        assert_eq!(beep_value(&fired[0]), 2);
    }

    #[test]
    fn test_cancel_drops_pending() {
        let mut service = TimeoutPublisherService::new();
        let handle = service.unique_handle();
        service.schedule(handle, 50, target(), Box::new(Beep(1)));

        assert!(service.cancel(handle));
        assert!(service.has_expired(handle));
        assert!(!service.cancel(handle));
        assert!(service.poll(1000).is_empty());
    }

    #[test]
    fn test_never_scheduled_counts_as_expired() {
        let mut service = TimeoutPublisherService::new();
        let handle = service.unique_handle();
        assert!(service.has_expired(handle));
    }

    #[test]
    fn test_due_order_is_deterministic() {
        let mut service = TimeoutPublisherService::new();
        let h1 = service.unique_handle();
        let h2 = service.unique_handle();
        let h3 = service.unique_handle();
        // Same deadline for h3/h1, later one for h2.
        service.schedule(h3, 10, target(), Box::new(Beep(3)));
        service.schedule(h1, 10, target(), Box::new(Beep(1)));
        service.schedule(h2, 20, target(), Box::new(Beep(2)));

        let fired = service.poll(30);
        let values: Vec<u32> = fired.iter().map(beep_value).collect();
        // (deadline, handle) order: h1 before h3 at t=10, then h2.
        assert_eq!(values, vec![1, 3, 2]);
    }

    #[test]
    fn test_deadline_measured_from_last_poll() {
        let mut service = TimeoutPublisherService::new();
        service.poll(1000);
        let handle = service.unique_handle();
        service.schedule(handle, 100, target(), Box::new(Beep(1)));

        assert!(service.poll(1099).is_empty());
        assert_eq!(service.poll(1100).len(), 1);
    }

    #[test]
    fn test_time_never_goes_backwards() {
        let mut service = TimeoutPublisherService::new();
        service.poll(500);
        service.poll(100);
        assert_eq!(service.now(), 500);
    }

    // ==================== Periodic Tests ====================

    #[test]
    fn test_periodic_fires_each_period() {
        let mut service = TimeoutPublisherService::new();
        service.schedule_periodic(VertexId(1), target(), "beep", 100, || {
            Box::new(Beep::default())
        });

        // Not started yet: nothing fires.
        assert!(service.poll(1000).is_empty());

        service.start_periodic(1000);
        assert!(service.poll(1099).is_empty());
        assert_eq!(service.poll(1100).len(), 1);
        assert!(service.poll(1150).is_empty());
        assert_eq!(service.poll(1200).len(), 1);
    }

    #[test]
    fn test_periodic_collapses_missed_firings() {
        let mut service = TimeoutPublisherService::new();
        service.schedule_periodic(VertexId(1), target(), "beep", 100, || {
            Box::new(Beep::default())
        });
        service.start_periodic(0);

        // Three periods elapse; a single catch-up firing.
        assert_eq!(service.poll(350).len(), 1);
        // Next deadline re-anchored past `now`.
        assert!(service.poll(399).is_empty());
        assert_eq!(service.poll(400).len(), 1);
    }

    #[test]
    fn test_remove_owner_clears_series_and_timers() {
        let mut service = TimeoutPublisherService::new();
        let handle = service.unique_handle();
        service.schedule(handle, 10, target(), Box::new(Beep(1)));
        service.schedule_periodic(VertexId(1), target(), "beep", 100, || {
            Box::new(Beep::default())
        });
        service.start_periodic(0);

        service.remove_owner(VertexId(1), &[handle]);
        assert!(service.poll(1000).is_empty());
    }
}
