//! # reel-protocol
//!
//! Core protocol definitions and data models for reelsmith.
//!
//! This crate defines all shared data structures used for:
//! - Run state tracking and checkpoint serialization
//! - Background task handles for the interactive variant
//! - Inter-process communication between the CLI layer and the Core
//!
//! ## Modules
//!
//! - [`run_models`]: Run state, stage tags, artifacts, and review types
//! - [`task_models`]: Background task handles and their lifecycle status
//! - [`ipc`]: Operations and Events for Core-CLI communication
//!
//! ## Design Principles
//!
//! - Minimal dependencies: only serde, uuid, and chrono
//! - Stable serialization: these types form the on-disk checkpoint format
//! - Independent compilation: no dependencies on other reelsmith crates

pub mod ipc;
pub mod run_models;
pub mod task_models;

// Re-export all public types for convenience
pub use ipc::*;
pub use run_models::*;
pub use task_models::*;
