// Public modules
pub mod conduit;
pub mod config;
pub mod credentials;
pub mod defaults;
pub mod error;
pub mod execution;
pub mod facility;
pub mod fleet;
pub mod host;
pub mod package;
pub mod runner;
pub mod step;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
