//! Philosophers who periodically shake hands, a worked example of the
//! dependency-driven advancement protocol. This engine only ever lets a
//! transition write its *own* object's next event (§3 invariant 5), so a
//! philosopher can't mutate the friend it shakes hands with directly;
//! instead it declares a dependency on that friend and reads its
//! last-known state when planning its own next handshake.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use siphasher::sip128::{Hasher128, SipHasher13};

use crate::error::EngineResult;
use crate::event::{Event, Transition, TransitionId};
use crate::ids::{ObjectId, SimTime, StateId};
use crate::universe::Universe;

pub const PHILOSOPHER_COUNT: u32 = 7;

/// One philosopher's observable state: how many handshakes it has
/// initiated so far, who it greeted most recently, and that friend's
/// handshake count as of the greeting (read, never written, by anyone but
/// the friend itself).
#[derive(Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct Philosopher {
    pub handshake_count: u32,
    pub last_friend: u32,
    pub last_friend_count: u32,
}

/// Deterministic id for philosopher `index`, stable across runs.
pub fn philosopher_id(index: u32) -> ObjectId {
    ObjectId::from_hash(&(0x2302c38efb47e0d0u64, index))
}

fn hash_u64<H: Hash>(value: H) -> u64 {
    let mut hasher = SipHasher13::new();
    value.hash(&mut hasher);
    hasher.finish128().h1
}

/// Pick a friend distinct from `index` (§3 invariant 1 forbids a
/// self-dependency) out of `PHILOSOPHER_COUNT - 1` candidates.
fn pick_friend<H: Hash>(index: u32, salt: H) -> u32 {
    let choice = (hash_u64(salt) % (PHILOSOPHER_COUNT - 1) as u64) as u32;
    if choice >= index {
        choice + 1
    } else {
        choice
    }
}

/// The pure rule governing one philosopher's handshakes. `friend` is the
/// philosopher this event's `next_deps` is watching -- carried here rather
/// than re-derived, so the key this transition looks up in
/// `dependent_states` always matches the key the event actually declared.
#[derive(Debug)]
pub struct HandshakeRule {
    pub index: u32,
    pub friend: u32,
    pub own_count: u32,
}

impl Transition<Philosopher> for HandshakeRule {
    fn transition_id(&self) -> TransitionId {
        TransitionId(0x4084d1501468b6dd)
    }

    fn compute_next_events(
        &self,
        event_id: StateId,
        dependent_states: &HashMap<ObjectId, Philosopher>,
    ) -> EngineResult<HashMap<ObjectId, Event<Philosopher>>> {
        let friend_count = dependent_states
            .get(&philosopher_id(self.friend))
            .map(|p| p.handshake_count)
            .unwrap_or(0);

        let index = self.index;
        let next_friend = pick_friend(index, &(event_id, "next_friend"));
        let delay_ns = 1 + (hash_u64(&(event_id, "delay")) % 5) as i64;
        let next_time = SimTime::from_nanos(event_id.time.nanos() + delay_ns);

        let mut next_deps = BTreeMap::new();
        next_deps.insert(philosopher_id(next_friend), event_id.time);

        let successor = Event::new(
            StateId::new(event_id.object, next_time),
            Philosopher {
                handshake_count: self.own_count + 1,
                last_friend: next_friend,
                last_friend_count: friend_count,
            },
            next_deps,
            Arc::new(HandshakeRule {
                index: self.index,
                friend: next_friend,
                own_count: self.own_count + 1,
            }),
        )?;

        let mut result = HashMap::new();
        result.insert(event_id.object, successor);
        Ok(result)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Build a `Universe` seeded with `PHILOSOPHER_COUNT` philosophers, each
/// about to initiate a handshake with a deterministically chosen friend at
/// t = 1.
pub fn seed_universe() -> EngineResult<Universe<Philosopher>> {
    let universe = Universe::new();
    for index in 0..PHILOSOPHER_COUNT {
        let seed_id = StateId::new(philosopher_id(index), SimTime::from_nanos(1));
        let friend = pick_friend(index, &(seed_id, "next_friend"));
        let mut next_deps = BTreeMap::new();
        next_deps.insert(philosopher_id(friend), SimTime::EPOCH);
        let seed = Event::new(
            seed_id,
            Philosopher {
                handshake_count: 0,
                last_friend: friend,
                last_friend_count: 0,
            },
            next_deps,
            Arc::new(HandshakeRule {
                index,
                friend,
                own_count: 0,
            }),
        )?;
        universe.add_object(seed)?;
    }
    Ok(universe)
}

/// Advance every philosopher `rounds` times, round-robin, retrying whenever
/// `advance_state` reports a lost compare-and-append race.
pub async fn run(rounds: usize) -> EngineResult<Universe<Philosopher>> {
    let universe = seed_universe()?;
    for _ in 0..rounds {
        for index in 0..PHILOSOPHER_COUNT {
            let id = philosopher_id(index);
            while !universe.advance_state(id).await? {}
        }
    }
    Ok(universe)
}
