//! Incremental model-to-graph synchronisation.
//!
//! Parsed model files are kept in sync with a property graph reached through
//! the [`graph::GraphBackend`] port. See [`sync::ModelUpdater`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod graph;
pub mod model;
pub mod sync;
pub mod types;

pub use sync::{ModelUpdater, SyncError, SyncOptions};
