//! Model Registry & Loader, plus the built-in model implementations.

pub mod artifacts;
pub mod bert;
pub mod centroid;
pub mod handlers;
pub mod hashing;
pub mod loader;
pub mod model;
pub mod registry;
pub mod remote;

pub use model::TaskKind;
pub use registry::ModelRegistry;
