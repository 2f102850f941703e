//! Configuration loading and management.
//!
//! Settings live in `.reelsmith/config.toml` under the project root. A
//! missing file yields the default configuration; a malformed file is a
//! structured error, never a silent fallback.

pub mod error;
pub mod loader;
pub mod models;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use models::{BackoffPolicy, EngineConfig, StageSettings, ValidationConfig};
