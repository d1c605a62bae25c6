//! Property-based checks of the universal invariants in §3/§8: `Event`
//! construction enforces its stated invariants for arbitrary inputs, and
//! `compute_next_events` is a pure, deterministic function of its inputs.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use pdes_engine::error::EngineError;
use pdes_engine::event::{Event, Transition, TransitionId};
use pdes_engine::ids::{ObjectId, SimTime, StateId};
use quickcheck::{quickcheck, Arbitrary, Gen};

#[derive(Clone, Copy, Debug)]
struct SmallObjectId(u8);

impl Arbitrary for SmallObjectId {
    fn arbitrary(g: &mut Gen) -> Self {
        SmallObjectId(u8::arbitrary(g) % 8)
    }
}

fn object_id(tag: SmallObjectId) -> ObjectId {
    ObjectId::from_hash(&("properties-test-object", tag.0))
}

/// A transition that folds the sum of its dependencies' states into its
/// own; used only to exercise `compute_next_events`'s purity, not to model
/// anything domain-specific.
#[derive(Debug, Clone)]
struct Sum;

impl Transition<i32> for Sum {
    fn transition_id(&self) -> TransitionId {
        TransitionId(7)
    }

    fn compute_next_events(
        &self,
        event_id: StateId,
        dependent_states: &HashMap<ObjectId, i32>,
    ) -> Result<HashMap<ObjectId, Event<i32>>, EngineError> {
        let total: i32 = dependent_states.values().fold(0i32, |acc, v| acc.wrapping_add(*v));
        let successor = Event::new(
            StateId::new(
                event_id.object,
                SimTime::from_nanos(event_id.time.nanos().wrapping_add(1)),
            ),
            total,
            BTreeMap::new(),
            Arc::new(Sum),
        )?;
        Ok(HashMap::from([(event_id.object, successor)]))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

quickcheck! {
    /// Invariant 1: `Event::new` rejects any `next_deps` entry keyed by the
    /// event's own object, for arbitrary object/time combinations.
    fn event_new_rejects_self_dependency(object: SmallObjectId, time: i64, dep_time: i64) -> bool {
        let id = StateId::new(object_id(object), SimTime::from_nanos(time));
        let mut deps = BTreeMap::new();
        deps.insert(object_id(object), SimTime::from_nanos(dep_time));
        matches!(
            Event::new(id, 0i32, deps, Arc::new(Sum)),
            Err(EngineError::InvalidEventConfiguration(_))
        )
    }

    /// Invariant 2: `Event::new` rejects any dependency whose time is not
    /// strictly less than the event's own time, for arbitrary times.
    fn event_new_rejects_non_causal_dependency(
        object: SmallObjectId,
        other: SmallObjectId,
        time: i64,
        dep_time: i64
    ) -> bool {
        if object.0 == other.0 {
            return true; // covered by the self-dependency property above
        }
        let id = StateId::new(object_id(object), SimTime::from_nanos(time));
        let mut deps = BTreeMap::new();
        deps.insert(object_id(other), SimTime::from_nanos(dep_time));
        let result = Event::new(id, 0i32, deps, Arc::new(Sum));
        if dep_time < time {
            result.is_ok()
        } else {
            matches!(result, Err(EngineError::InvalidEventConfiguration(_)))
        }
    }

    /// Determinism law (§8): replaying the same event against the same
    /// dependency map twice yields equal output maps.
    fn compute_next_events_is_deterministic(
        object: SmallObjectId,
        time: i64,
        dep_values: Vec<(SmallObjectId, i32)>
    ) -> bool {
        let id = StateId::new(object_id(object), SimTime::from_nanos(time));
        let mut dependent_states = HashMap::new();
        for (dep, value) in dep_values {
            if dep.0 != object.0 {
                dependent_states.insert(object_id(dep), value);
            }
        }
        let first = Sum.compute_next_events(id, &dependent_states);
        let second = Sum.compute_next_events(id, &dependent_states);
        match (first, second) {
            (Ok(a), Ok(b)) => a == b,
            (Err(_), Err(_)) => true,
            _ => false,
        }
    }

    /// §3 invariant 5: the successor map always contains an entry for the
    /// triggering object, one event-time later.
    fn compute_next_events_always_advances_own_object(object: SmallObjectId, time: i64) -> bool {
        let id = StateId::new(object_id(object), SimTime::from_nanos(time));
        match Sum.compute_next_events(id, &HashMap::new()) {
            Ok(result) => match result.get(&object_id(object)) {
                Some(event) => event.time() == SimTime::from_nanos(time.wrapping_add(1)),
                None => false,
            },
            Err(_) => false,
        }
    }
}

/// Destruction events never carry dependencies or a transition, for any id.
#[test]
fn destruction_event_invariant_holds_for_any_id() {
    fn check(object: SmallObjectId, time: i64) -> bool {
        let ev = Event::<i32>::new_destruction(StateId::new(object_id(object), SimTime::from_nanos(time)));
        ev.is_destruction() && ev.next_deps().is_empty() && ev.transition().is_none()
    }
    quickcheck::QuickCheck::new().quickcheck(check as fn(SmallObjectId, i64) -> bool);
}
