//! Schema validation and dependency ordering.
pub mod schema;
pub mod topology;

pub use topology::DependencyGraph;
