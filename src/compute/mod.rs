//! Derivation of computed cells: kernels, reductions, dirty tracking and the engine driving them.
pub mod aggregate;
pub mod dirty;
pub mod engine;
pub mod kernel;

pub use dirty::DirtySet;
pub use engine::Engine;
