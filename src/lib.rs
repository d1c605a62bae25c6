//! A reactive parallel discrete-event simulation engine.
//!
//! The engine coordinates the time-history of a collection of simulated
//! objects (§3): each object's state is a sequence of [`Event`]s, stored in
//! an [`ObjectHistory`], and advanced one event at a time by
//! [`Universe::advance_state`] -- an optimistic, dependency-aware protocol
//! that composes other objects' state observations into a candidate next
//! event and commits it with a compare-and-append.
//!
//! Four pieces, dependencies pointing downward:
//!
//! * [`event`] -- the immutable [`Event<S>`](event::Event) record and the
//!   user-supplied [`Transition<S>`](event::Transition) capability.
//! * [`history`] -- [`ObjectHistory<S>`](history::ObjectHistory), the
//!   read-only view, and
//!   [`ModifiableObjectHistory<S>`](history::ModifiableObjectHistory), the
//!   thread-safe log with `append`/`compare_and_append`.
//! * [`universe`] -- [`Universe<S>`](universe::Universe), the registry of
//!   histories and the `advance_state` protocol that ties everything
//!   together.
//! * [`observation`] -- the reactive state-observation stream primitive
//!   shared by `history` and `universe`.
//!
//! Plus the ambient pieces a production crate in this lineage carries
//! regardless of the core simulation semantics: [`ids`] (object/time
//! identifiers and deterministic id derivation), [`error`] (the
//! [`EngineError`](error::EngineError) taxonomy), and [`persistence`] (a
//! [`TransitionRegistry`](persistence::TransitionRegistry) plus the
//! serialized on-disk layout for a history).
//!
//! See `demos` (in the workspace, not part of this library) for a worked
//! end-to-end example.

pub mod demos;
pub mod error;
pub mod event;
pub mod history;
pub mod ids;
pub mod observation;
pub mod persistence;
pub mod universe;

pub use error::{EngineError, EngineResult};
pub use event::{Event, State, Transition, TransitionId};
pub use history::{ModifiableObjectHistory, ObjectHistory};
pub use ids::{ObjectId, SimTime, StateId};
pub use persistence::TransitionRegistry;
pub use universe::Universe;
