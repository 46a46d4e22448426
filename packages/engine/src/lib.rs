//! Batch update engine.
//!
//! Turns a queued job into per-field tracker writes:
//! - Loads the uploaded sheet through [`FileSource`]
//! - Resolves the identifier column and field types
//! - Applies rows in file order through a per-user rate-limited client
//! - Persists and broadcasts throttled progress

mod collaborators;
mod engine;
mod error;

pub use collaborators::{
    CollaboratorError, CustomFieldCatalogue, CustomFieldSource, FileSource, StaticUserConfig,
    UserConfig, UserConfigSource,
};
pub use engine::{
    BatchUpdateEngine, EngineConfig, IDENTIFIER_ALIASES, RunSummary, resolve_identifier,
};
pub use error::EngineError;
