//! Egress adapters.  The engine itself only knows sinks; these are
//! ready-made sinks for common downstream systems.

mod graphite;

pub use graphite::*;
