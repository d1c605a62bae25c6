//! The persisted layout described in §6, and the `TransitionRegistry` that
//! makes a `dyn Transition<S>` serializable.
//!
//! A trait object can't auto-derive `Serialize`/`Deserialize`, so both
//! directions go through a stable tag plus a small dispatch table: an
//! explicit, ordinary value (`TransitionRegistry`) that a host registers
//! concrete transitions into at startup, rather than a compile-time type
//! list or a derive macro.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::event::{Event, State, Transition, TransitionId};
use crate::ids::{ObjectId, SimTime, StateId};

type DecodeFn<S> = Arc<dyn Fn(&[u8]) -> EngineResult<Arc<dyn Transition<S>>> + Send + Sync>;
type EncodeFn<S> = Arc<dyn Fn(&dyn Any) -> EngineResult<Vec<u8>> + Send + Sync>;

/// Maps `TransitionId` tags to encoders/decoders for concrete `Transition<S>`
/// types, so a `ModifiableObjectHistory<S>` can round-trip through the
/// persisted layout. `dyn Transition<S>` itself carries no `Serialize`
/// bound (most transitions never need persisting), so both directions go
/// through `Any`: decoding produces a concrete `T` directly, and encoding
/// downcasts `Transition::as_any()`'s `&dyn Any` back to the concrete `T`
/// the registration closure was generated for.
#[derive(Default)]
pub struct TransitionRegistry<S: State> {
    decoders: HashMap<TransitionId, DecodeFn<S>>,
    encoders: HashMap<TransitionId, EncodeFn<S>>,
}

impl<S: State> TransitionRegistry<S> {
    pub fn new() -> Self {
        TransitionRegistry {
            decoders: HashMap::new(),
            encoders: HashMap::new(),
        }
    }

    /// Register a concrete transition type under its `TransitionId`. `T`
    /// must round-trip through bincode.
    pub fn register<T>(&mut self)
    where
        T: Transition<S> + Serialize + for<'de> Deserialize<'de> + Default + 'static,
    {
        let id = T::default().transition_id();
        self.decoders.insert(
            id,
            Arc::new(|bytes: &[u8]| -> EngineResult<Arc<dyn Transition<S>>> {
                let value: T = bincode::deserialize(bytes).map_err(|e| {
                    EngineError::InvalidEventConfiguration(format!(
                        "failed to decode transition: {e}"
                    ))
                })?;
                Ok(Arc::new(value))
            }),
        );
        self.encoders.insert(
            id,
            Arc::new(|any: &dyn Any| -> EngineResult<Vec<u8>> {
                let value = any.downcast_ref::<T>().ok_or_else(|| {
                    EngineError::InvalidEventConfiguration(
                        "transition's as_any() did not match its own registered type".into(),
                    )
                })?;
                bincode::serialize(value).map_err(|e| {
                    EngineError::InvalidEventConfiguration(format!(
                        "failed to encode transition: {e}"
                    ))
                })
            }),
        );
    }

    fn decode(&self, tag: TransitionId, bytes: &[u8]) -> EngineResult<Arc<dyn Transition<S>>> {
        let decoder = self.decoders.get(&tag).ok_or_else(|| {
            EngineError::InvalidEventConfiguration(format!(
                "no transition registered for tag {tag:?}"
            ))
        })?;
        decoder(bytes)
    }

    fn encode(&self, transition: &dyn Transition<S>) -> EngineResult<Vec<u8>> {
        let tag = transition.transition_id();
        let encoder = self.encoders.get(&tag).ok_or_else(|| {
            EngineError::InvalidEventConfiguration(format!(
                "no transition registered for tag {tag:?}"
            ))
        })?;
        encoder(transition.as_any())
    }
}

/// On-the-wire form of one `Event<S>`, matching §6's persisted layout.
#[derive(Serialize, Deserialize)]
struct PersistedEvent<S> {
    object: ObjectId,
    time: SimTime,
    state: Option<S>,
    next_deps: BTreeMap<ObjectId, SimTime>,
    transition: Option<PersistedTransition>,
}

#[derive(Serialize, Deserialize)]
struct PersistedTransition {
    tag: TransitionId,
    bytes: Vec<u8>,
}

/// On-the-wire form of a whole `ModifiableObjectHistory<S>`:
/// `{ previous_state_transitions, last_event }`.
#[derive(Serialize, Deserialize)]
pub struct PersistedHistory<S> {
    previous_state_transitions: Vec<PersistedEvent<S>>,
    last_event: PersistedEvent<S>,
}

fn encode_event<S: State>(
    event: &Event<S>,
    registry: &TransitionRegistry<S>,
) -> EngineResult<PersistedEvent<S>> {
    let transition = match event.transition() {
        Some(t) => Some(PersistedTransition {
            tag: t.transition_id(),
            bytes: registry.encode(t.as_ref())?,
        }),
        None => None,
    };
    Ok(PersistedEvent {
        object: event.object_id(),
        time: event.time(),
        state: event.state().cloned(),
        next_deps: event.next_deps().clone(),
        transition,
    })
}

fn decode_event<S: State>(
    persisted: PersistedEvent<S>,
    registry: &TransitionRegistry<S>,
) -> EngineResult<Event<S>> {
    let id = StateId::new(persisted.object, persisted.time);
    match (persisted.state, persisted.transition) {
        (None, None) => Ok(Event::new_destruction(id)),
        (Some(state), Some(PersistedTransition { tag, bytes })) => {
            let transition = registry.decode(tag, &bytes)?;
            Event::new(id, state, persisted.next_deps, transition)
        }
        _ => Err(EngineError::InvalidEventConfiguration(
            "persisted event has inconsistent state/transition presence".into(),
        )),
    }
}

/// Serialize a history's full transition log to the §6 layout.
pub fn serialize_history<S: State>(
    previous: &[Arc<Event<S>>],
    last: &Arc<Event<S>>,
    registry: &TransitionRegistry<S>,
) -> EngineResult<PersistedHistory<S>> {
    let previous_state_transitions = previous
        .iter()
        .map(|e| encode_event(e, registry))
        .collect::<EngineResult<_>>()?;
    Ok(PersistedHistory {
        previous_state_transitions,
        last_event: encode_event(last, registry)?,
    })
}

/// Deserialize the §6 layout back into the pieces `ModifiableObjectHistory::new_from` wants.
pub fn deserialize_history<S: State>(
    persisted: PersistedHistory<S>,
    registry: &TransitionRegistry<S>,
) -> EngineResult<(Vec<Event<S>>, Event<S>)> {
    let previous = persisted
        .previous_state_transitions
        .into_iter()
        .map(|e| decode_event(e, registry))
        .collect::<EngineResult<_>>()?;
    let last = decode_event(persisted.last_event, registry)?;
    Ok((previous, last))
}
