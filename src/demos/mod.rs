//! Worked, end-to-end examples exercising the full [`crate::Universe`] API.
//! These are ordinary library modules (not binaries) so that `tests/` can
//! drive them directly.

pub mod handshakes;
