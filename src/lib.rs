//! slurm-ops - Manage Slurm daemons on a single host.
//!
//! This library provides the core functionality for the `slurm-ops` CLI tool:
//! configuration file management (includes, snapshots, merging), the
//! `<SERVICE>_OPTIONS` codec, secret file rotation, and the apt/snap
//! installation backends that decide where all of those files live.

pub mod cli;
pub mod commands;
pub mod config;
pub mod env;
pub mod ops;
pub mod options;
pub mod scontrol;
pub mod secret;
pub mod sys;

use std::path::PathBuf;


/// Library-level error type for slurm-ops operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("Failed to serialize {}: {reason}", path.display())]
    Serialize { path: PathBuf, reason: String },

    #[error("Failed to apply ownership to {}: {reason}", path.display())]
    Permission { path: PathBuf, reason: String },

    #[error("Command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for slurm-ops operations.
pub type Result<T> = std::result::Result<T, Error>;
