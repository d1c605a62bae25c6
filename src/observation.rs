//! The reactive state-observation primitive (§4.B.2).
//!
//! `tokio::sync::watch` is the substrate: it only ever holds the *latest*
//! value, which is precisely the "combine-latest, not zip" semantics §4.B.2
//! asks for, and `Receiver::changed()` is how a subscriber suspends between
//! updates without polling. We pair it with a plain snapshot accessor
//! (`state_at`) over the history's event vector, rather than trying to
//! maintain observer-specific incremental state, because recomputing a
//! binary search over an `Arc<[Event<S>]>` is cheap and keeps the
//! provisional/committed logic in one obviously-correct place.

use std::sync::Arc;

use futures::stream::{self, Stream};
use tokio::sync::watch;

use crate::event::{Event, State};
use crate::ids::SimTime;

/// The best currently-knowable state of an object at `t`, plus whether that
/// answer is final (§4.B.2's commitment condition): committed once the
/// history contains an event at a time strictly after `t` whose predecessor
/// is at a time `<= t` -- or, on a **sealed** history (last event is a
/// destruction), unconditionally, since a sealed history can never grow and
/// the absent value is therefore already final for any `t` at or after it.
pub fn state_at<S: State>(events: &[Arc<Event<S>>], t: SimTime) -> (Option<S>, bool) {
    let idx = events.partition_point(|e| e.time() <= t);
    let value = if idx == 0 {
        None
    } else {
        events[idx - 1].state().cloned()
    };
    let sealed = events.last().expect("history is never empty").is_destruction();
    let committed = idx < events.len() || sealed;
    (value, committed)
}

/// Build the finite observation stream described by §4.B.2: zero or more
/// provisional values (deduplicated against their predecessor), then
/// exactly one committed value, then completion. `snapshot` returns a fresh
/// clone of the history's current event vector; `changed` is a watch
/// receiver that resolves whenever the history might have grown.
pub fn observe_state<S, F>(
    t: SimTime,
    changed: watch::Receiver<u64>,
    snapshot: F,
) -> impl Stream<Item = Option<S>>
where
    S: State,
    F: Fn() -> Arc<Vec<Arc<Event<S>>>> + Send + Sync + 'static,
{
    stream::unfold(
        (changed, snapshot, None::<Option<S>>, false),
        move |(mut changed, snapshot, mut last_emitted, mut done)| async move {
            if done {
                return None;
            }
            loop {
                let events = snapshot();
                let (value, committed) = state_at(&events, t);
                if last_emitted.as_ref() != Some(&value) {
                    last_emitted = Some(value.clone());
                    done = committed;
                    return Some((value, (changed, snapshot, last_emitted, done)));
                }
                if committed {
                    return None;
                }
                if changed.changed().await.is_err() {
                    // The history (and its sender) has been dropped; there
                    // will never be another update, so end the stream with
                    // whatever we've already reported.
                    return None;
                }
            }
        },
    )
}
