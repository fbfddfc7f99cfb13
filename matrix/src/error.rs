//! Engine-level errors.
//!
//! Only failures that abort a run live here. Per-pair failures (a failing
//! executor or evaluator) are recorded inside the result data instead.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::state::RunPhase;
use crate::exit_codes;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Fatal errors that abort an experiment run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid experiment setup, detected before execution starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stored snapshot exists but cannot be used.
    #[error("checkpoint {path} unusable: {reason}")]
    CheckpointLoad { path: PathBuf, reason: String },

    /// The orchestrator attempted a transition outside the run lifecycle.
    #[error("illegal run transition {from:?} -> {to:?}")]
    Transition { from: RunPhase, to: RunPhase },

    /// An external collaborator (dataset reader, etc.) failed.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    /// Stable process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::CheckpointLoad { .. } => exit_codes::CHECKPOINT,
            EngineError::Configuration(_)
            | EngineError::Transition { .. }
            | EngineError::Collaborator(_) => exit_codes::INVALID,
        }
    }
}
