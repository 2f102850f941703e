//! # reel-core
//!
//! Core pipeline execution engine for reelsmith.
//!
//! This crate provides:
//! - Configuration loading from the `.reelsmith/` directory
//! - Collaborator abstraction layer (LLM, search, TTS, video, artifact writer)
//! - Per-API rate and concurrency governance
//! - Durable, versioned run checkpointing
//! - The stage state machine with validation gates and human-approval pauses
//! - A run/task registry exposing the start/status/review/resume interface
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`collaborators`]: External API traits and the artifact writer
//! - [`governor`]: Rate/concurrency limiter guarding named APIs
//! - [`checkpoint`]: Durable run state snapshots
//! - [`gate`]: Validation gates with bounded retry
//! - [`stages`]: The content-generation stages
//! - [`engine`]: The pipeline state machine and execution loop
//! - [`registry`]: Run and background-task registries

pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gate;
pub mod governor;
pub mod registry;
pub mod stages;
