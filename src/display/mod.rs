//! Human-readable renderings of table state.
pub mod trace;
