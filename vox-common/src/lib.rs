//! Vox Common - shared foundation for the Vox voice stack.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types and handling utilities
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    LlmConfig, LoggingConfig, MemoryConfig, SecretsConfig, ServerConfig, SpeechConfig, VoxConfig,
};
pub use error::{Error, Result, ResultExt};
pub use logging::init_logging;
