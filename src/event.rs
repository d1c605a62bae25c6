//! `Event<S>` (§3, §4.A): an immutable record of one object's transition at
//! one simulated instant, plus the pure capability that computes what comes
//! next.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::ids::{ObjectId, SimTime, StateId};

/// Bound every user-supplied state value must satisfy. Blanket-implemented;
/// there is nothing to implement by hand.
pub trait State: Clone + Eq + fmt::Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + fmt::Debug + Send + Sync + 'static> State for T {}

/// Stable identifier for a `Transition<S>` implementation, used as the
/// discriminating tag in the persisted layout (§6), dispatched through a
/// single open registry (`crate::persistence`) rather than a compile-time
/// type list.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TransitionId(pub u64);

impl fmt::Debug for TransitionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TransitionId(0x{:016x})", self.0)
    }
}

/// The pure, user-supplied capability that computes an object's next
/// event(s) from the latest known states of its declared dependencies.
///
/// Implementors must be deterministic: the same `event_id` and the same
/// `dependent_states` map must always produce an equal result map,
/// including any object ids minted via [`ObjectId::derive`].
pub trait Transition<S: State>: Any + Send + Sync + fmt::Debug {
    /// A constant identifying this transition type, used for persistence.
    fn transition_id(&self) -> TransitionId;

    /// Compute the next event(s). `dependent_states` is restricted to the
    /// dependencies that exist (a missing key means "absent" at the
    /// requested time) -- see §4.D.2.
    fn compute_next_events(
        &self,
        event_id: StateId,
        dependent_states: &HashMap<ObjectId, S>,
    ) -> EngineResult<HashMap<ObjectId, Event<S>>>;

    fn as_any(&self) -> &dyn Any;
}

/// An immutable event: for one object, at one simulated time, the state it
/// holds as a result, the dependencies the *next* event will read, and the
/// transition that computes that next event.
#[derive(Clone, Debug)]
pub struct Event<S: State> {
    id: StateId,
    state: Option<S>,
    next_deps: BTreeMap<ObjectId, SimTime>,
    transition: Option<Arc<dyn Transition<S>>>,
}

impl<S: State> Event<S> {
    /// Construct a growing (non-destruction) event. Validates invariants
    /// 1 and 2 of §3.
    pub fn new(
        id: StateId,
        state: S,
        next_deps: BTreeMap<ObjectId, SimTime>,
        transition: Arc<dyn Transition<S>>,
    ) -> EngineResult<Self> {
        if next_deps.contains_key(&id.object) {
            return Err(EngineError::InvalidEventConfiguration(
                "next_deps may not depend on the event's own object".into(),
            ));
        }
        for (dep, t) in &next_deps {
            if *t >= id.time {
                return Err(EngineError::InvalidEventConfiguration(format!(
                    "dependency on {:?} at {:?} is not strictly before this event's time {:?}",
                    dep, t, id.time
                )));
            }
        }
        Ok(Event {
            id,
            state: Some(state),
            next_deps,
            transition: Some(transition),
        })
    }

    /// Construct a destruction event: absent state, no dependencies, no
    /// transition. Validates invariant 3 of §3.
    pub fn new_destruction(id: StateId) -> Self {
        Event {
            id,
            state: None,
            next_deps: BTreeMap::new(),
            transition: None,
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn object_id(&self) -> ObjectId {
        self.id.object
    }

    pub fn time(&self) -> SimTime {
        self.id.time
    }

    pub fn state(&self) -> Option<&S> {
        self.state.as_ref()
    }

    pub fn is_destruction(&self) -> bool {
        self.state.is_none()
    }

    pub fn next_deps(&self) -> &BTreeMap<ObjectId, SimTime> {
        &self.next_deps
    }

    pub fn transition(&self) -> Option<&Arc<dyn Transition<S>>> {
        self.transition.as_ref()
    }

    /// Compute this event's successor(s), enforcing the postconditions of
    /// §4.A/§8 that don't require knowledge of the rest of the universe
    /// (the "foreign ids must be unclaimed" check belongs to `Universe`,
    /// which is the only component that knows what's claimed).
    pub fn compute_next_events(
        &self,
        dependent_states: HashMap<ObjectId, S>,
    ) -> EngineResult<HashMap<ObjectId, Event<S>>> {
        if self.state.is_none() {
            return Err(EngineError::Resurrection(self.id.object));
        }
        let transition = self
            .transition
            .as_ref()
            .expect("a growing event always carries a transition");
        let result = transition.compute_next_events(self.id, &dependent_states)?;
        self.validate_successors(&result)?;
        Ok(result)
    }

    fn validate_successors(&self, result: &HashMap<ObjectId, Event<S>>) -> EngineResult<()> {
        let own = result.get(&self.id.object).ok_or_else(|| {
            EngineError::AdvanceFailed(
                "compute_next_events result is missing the event's own object".into(),
            )
        })?;
        let successor_time = own.id.time;
        if successor_time <= self.id.time {
            return Err(EngineError::AdvanceFailed(format!(
                "successor time {:?} does not exceed event time {:?}",
                successor_time, self.id.time
            )));
        }
        for (key, event) in result {
            if event.id.object != *key {
                return Err(EngineError::AdvanceFailed(format!(
                    "entry keyed by {:?} carries an event for {:?}",
                    key, event.id.object
                )));
            }
            if event.id.time != successor_time {
                return Err(EngineError::AdvanceFailed(
                    "all returned events must share the same successor time".into(),
                ));
            }
            if *key != self.id.object && event.is_destruction() {
                return Err(EngineError::AdvanceFailed(
                    "only the own-object entry may have an absent state".into(),
                ));
            }
        }
        Ok(())
    }
}

// Equality and hashing are defined on `id` alone (entity semantics): two
// concurrently constructed events that coincide in `id` are interchangeable.
impl<S: State> PartialEq for Event<S> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<S: State> Eq for Event<S> {}
impl<S: State> std::hash::Hash for Event<S> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}
