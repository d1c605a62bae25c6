//! Identifiers and the simulated time axis.
//!
//! `ObjectId` is deliberately a thin wrapper around `uuid::Uuid` rather than
//! a bespoke random-bits type: it gets us `Ord`, `Hash`, and `serde` for
//! free, and a `Uuid` is exactly as opaque as an object id needs to be. The
//! one thing `Uuid::new_v4` can't give us is *determinism* -- invariant 4 on `Event`
//! requires that freshly minted object ids be reproducible from a replay of
//! the same inputs, so `ObjectId::derive` hashes the parent `StateId` (plus
//! a caller-chosen salt distinguishing multiple creations from one event)
//! with SipHash and folds the result into sixteen id bytes.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher13};
use uuid::Uuid;

/// Opaque identifier for a simulated object.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// A fresh, non-deterministic id, for seeding the very first objects a
    /// driver inserts into a `Universe` by fiat.
    pub fn new_random() -> Self {
        ObjectId(Uuid::new_v4())
    }

    /// Deterministically derive a new object id from a parent `StateId` and
    /// a salt. Two calls with equal arguments always produce equal ids,
    /// which is what lets a creation event be replayed and still mint the
    /// "same" new object (§3 invariant 4, §8 scenario 6).
    pub fn derive(parent: StateId, salt: u64) -> Self {
        Self::from_hash(&(parent, salt))
    }

    /// Deterministically derive an id from an arbitrary hashable seed, with
    /// no parent event -- the tool a driver reaches for to name its initial,
    /// fiat-seeded objects reproducibly.
    pub fn from_hash<H: Hash>(seed: H) -> Self {
        let mut hasher = SipHasher13::new();
        seed.hash(&mut hasher);
        let h = hasher.finish128();
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&h.h1.to_le_bytes());
        bytes[8..].copy_from_slice(&h.h2.to_le_bytes());
        ObjectId(Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A signed duration since an implicit shared epoch, nanosecond resolution.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(pub i64);

impl SimTime {
    pub const EPOCH: SimTime = SimTime(0);

    pub fn from_nanos(nanos: i64) -> Self {
        SimTime(nanos)
    }

    pub fn nanos(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SimTime({})", self.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl From<i64> for SimTime {
    fn from(nanos: i64) -> Self {
        SimTime(nanos)
    }
}

/// `(ObjectId, SimTime)`: identifies one object's state at one instant.
///
/// Field order mirrors the data model (`object` then `time`), but the total
/// order is time-first -- two events at the same instant on different
/// objects are adjacent in that order, which is what dependency enumeration
/// and history storage both want.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId {
    pub object: ObjectId,
    pub time: SimTime,
}

impl StateId {
    pub fn new(object: ObjectId, time: SimTime) -> Self {
        StateId { object, time }
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StateId({:?}@{:?})", self.object, self.time)
    }
}

impl PartialOrd for StateId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StateId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.object).cmp(&(other.time, other.object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let parent = StateId::new(ObjectId::new_random(), SimTime::from_nanos(5));
        let a = ObjectId::derive(parent, 0);
        let b = ObjectId::derive(parent, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn derive_distinguishes_salt() {
        let parent = StateId::new(ObjectId::new_random(), SimTime::from_nanos(5));
        assert_ne!(ObjectId::derive(parent, 0), ObjectId::derive(parent, 1));
    }

    #[test]
    fn state_id_orders_time_before_object() {
        let a = ObjectId::new_random();
        let b = ObjectId::new_random();
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let earlier_but_later_object = StateId::new(hi, SimTime::from_nanos(0));
        let later_but_earlier_object = StateId::new(lo, SimTime::from_nanos(1));
        assert!(earlier_but_later_object < later_but_earlier_object);
    }
}
