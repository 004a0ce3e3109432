//! GridRunner Common Library
//!
//! Shared types and the result store for the GridRunner orchestrator.

pub mod db;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use db::{ResultFilter, ResultStore, ResultSummary};
pub use error::{Error, Result, StepError};
pub use types::*;

/// GridRunner version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".gridrunner")
}

/// Default results database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("results.db")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
