//! `Universe<S>` (§4.D): the registry of object histories, and the
//! optimistic, dependency-aware advancement protocol that ties the whole
//! engine together.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::event::{Event, State};
use crate::history::{ModifiableObjectHistory, ObjectHistory};
use crate::ids::ObjectId;

/// The registry of object histories. `DashMap` gives concurrent,
/// fine-grained-locked access so that many tasks can call `advance_state`
/// on different (or even the same) objects without a global lock -- the
/// only cross-object synchronization the engine needs is already provided
/// by each history's own CAS (§5: "no shared mutable state spans multiple
/// histories").
#[derive(Debug, Default)]
pub struct Universe<S: State> {
    objects: DashMap<ObjectId, Arc<ModifiableObjectHistory<S>>>,
}

impl<S: State> Universe<S> {
    pub fn new() -> Self {
        Universe {
            objects: DashMap::new(),
        }
    }

    /// Insert a fresh history seeded with `event`. Fails if the object
    /// already exists, or if the seed event's state is absent (you cannot
    /// seed a universe with a destruction, §4.D).
    pub fn add_object(&self, event: Event<S>) -> EngineResult<()> {
        if event.is_destruction() {
            return Err(EngineError::InvalidEventConfiguration(
                "cannot seed an object with a destruction event".into(),
            ));
        }
        let object_id = event.object_id();
        match self.objects.entry(object_id) {
            Entry::Occupied(_) => Err(EngineError::ObjectAlreadyExists(object_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(ModifiableObjectHistory::new(event)));
                Ok(())
            }
        }
    }

    /// All object ids currently registered (destroyed objects' sealed
    /// histories remain present and queryable, per §3's lifecycle note).
    pub fn objects(&self) -> Vec<ObjectId> {
        self.objects.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn history(&self, object: ObjectId) -> EngineResult<Arc<ModifiableObjectHistory<S>>> {
        self.objects
            .get(&object)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::ObjectUnknown(object))
    }

    /// Delegates to the object's history; fails synchronously (before any
    /// suspension) if the object is unknown.
    pub fn observe_state(
        &self,
        object: ObjectId,
        t: crate::ids::SimTime,
    ) -> EngineResult<impl Stream<Item = Option<S>> + Send + Unpin> {
        Ok(self.history(object)?.observe_state(t))
    }

    /// §4.D.2: the heart of the engine. Subscribes to each dependency's
    /// state observation stream, joins them by latest-per-source, and
    /// yields one candidate next-event map per dependency update.
    ///
    /// A dependency on an object this universe has never heard of is
    /// treated as a single immediate "absent" value, per step 3 of §4.D.2
    /// -- it is not an error, since an object legitimately may not exist
    /// yet at the depended-on time.
    pub fn observe_next_event(
        &self,
        event: Arc<Event<S>>,
    ) -> impl Stream<Item = EngineResult<HashMap<ObjectId, Event<S>>>> + Send + Unpin {
        if event.is_destruction() {
            return stream::once(async move { Err(EngineError::Resurrection(event.object_id())) })
                .boxed();
        }

        // `next_deps` is a `BTreeMap`, so this iterates in ObjectId order --
        // the deterministic enumeration order step 2 of §4.D.2 calls for.
        let deps: Vec<(ObjectId, crate::ids::SimTime)> = event
            .next_deps()
            .iter()
            .map(|(id, t)| (*id, *t))
            .collect();

        if deps.is_empty() {
            let event = event.clone();
            return stream::once(async move { event.compute_next_events(HashMap::new()) }).boxed();
        }

        let n = deps.len();
        let mut per_dep_streams = Vec::with_capacity(n);
        for (index, (dep_object, dep_time)) in deps.iter().enumerate() {
            let index = index;
            match self.objects.get(dep_object) {
                Some(history) => {
                    let s = history
                        .value()
                        .clone()
                        .observe_state(*dep_time)
                        .map(move |value| (index, value))
                        .boxed();
                    per_dep_streams.push(s);
                }
                None => {
                    per_dep_streams.push(stream::once(async move { (index, None) }).boxed());
                }
            }
        }
        let merged = stream::select_all(per_dep_streams);
        let latest: Vec<Option<S>> = vec![None; n];

        stream::unfold(
            (merged, latest, deps, event),
            |(mut merged, mut latest, deps, event)| async move {
                match merged.next().await {
                    Some((index, value)) => {
                        latest[index] = value;
                        let map: HashMap<ObjectId, S> = latest
                            .iter()
                            .zip(deps.iter())
                            .filter_map(|(value, (object, _))| {
                                value.clone().map(|state| (*object, state))
                            })
                            .collect();
                        let result = event.compute_next_events(map);
                        Some((result, (merged, latest, deps, event)))
                    }
                    None => None,
                }
            },
        )
        .boxed()
    }

    /// Reads the history's current `last_event`, subscribes to
    /// `observe_next_event`, and attempts `compare_and_append` for each
    /// candidate delivered. Returns `Ok(true)` if an append succeeded,
    /// `Ok(false)` if every candidate lost its race (the caller should
    /// retry), and `Err` for a genuine failure (§4.D, §7's `AdvanceFailed`).
    ///
    /// Once `compare_and_append` on `object`'s own successor succeeds, that
    /// advancement is final and this call will not return an error for it:
    /// registering the other, foreign creation entries happens afterward
    /// and is best-effort. Object ids minted by `ObjectId::derive` are
    /// deterministic, so if a foreign slot turns out to already be occupied
    /// here, the most likely explanation is that a concurrent advance of
    /// the same event already created the identical object -- this is
    /// treated as already done, not as a failure of this call.
    #[instrument(skip(self), fields(object = %object))]
    pub async fn advance_state(&self, object: ObjectId) -> EngineResult<bool> {
        let history = self.history(object)?;
        let last = history.last_event();
        if last.is_destruction() {
            return Err(EngineError::Resurrection(object));
        }

        let mut candidates = Box::pin(self.observe_next_event(last.clone()));
        while let Some(candidate) = candidates.next().await {
            let map = candidate?;
            self.validate_candidate_map(object, &last, &map)?;

            let own_event = map
                .get(&object)
                .expect("validate_candidate_map already checked this")
                .clone();

            if history.compare_and_append(&last, own_event)? {
                for (new_object, new_event) in map {
                    if new_object == object {
                        continue;
                    }
                    match self.objects.entry(new_object) {
                        Entry::Occupied(_) => {
                            warn!(
                                parent = %object, child = %new_object,
                                "advance_state's created object already existed, assuming a concurrent duplicate creation"
                            );
                        }
                        Entry::Vacant(slot) => {
                            debug!(parent = %object, child = %new_object, "advance_state created a new object");
                            slot.insert(Arc::new(ModifiableObjectHistory::new(new_event)));
                        }
                    }
                }
                return Ok(true);
            }
            warn!(object = %object, "advance_state candidate lost its compare_and_append race, trying the next one");
        }
        Ok(false)
    }

    /// The half of §4.D.2/§8's postconditions that only the universe can
    /// check before committing anything: foreign entries must name objects
    /// not already claimed. This is a best-effort, racy pre-check -- it
    /// lets an advance that's already predictably doomed fail before
    /// attempting a CAS, but the authoritative check happens at insertion
    /// time in `advance_state` itself, after the own successor is already
    /// committed.
    fn validate_candidate_map(
        &self,
        object: ObjectId,
        last: &Arc<Event<S>>,
        map: &HashMap<ObjectId, Event<S>>,
    ) -> EngineResult<()> {
        if !map.contains_key(&object) {
            return Err(EngineError::AdvanceFailed(
                "candidate map is missing the advancing object's own successor".into(),
            ));
        }
        for (new_object, new_event) in map {
            if *new_object == object {
                continue;
            }
            if new_event.time() <= last.time() {
                return Err(EngineError::AdvanceFailed(
                    "creation event does not strictly follow the advancing event".into(),
                ));
            }
            if self.objects.contains_key(new_object) {
                return Err(EngineError::ObjectAlreadyExists(*new_object));
            }
        }
        Ok(())
    }
}
