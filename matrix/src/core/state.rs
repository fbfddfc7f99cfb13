//! Run lifecycle.
//!
//! ```text
//! Init -> Enumerating -> LoadedFromCheckpoint ----------> Selecting -> Done
//!                     \-> Executing -> Aggregating ----/
//! ```
//! Any phase before `Selecting` may move to `Failed` on a fatal engine error.
//! Per-pair failures never change the phase.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Enumerating,
    LoadedFromCheckpoint,
    Executing,
    Aggregating,
    Selecting,
    Done,
    Failed,
}

impl RunPhase {
    pub fn can_advance_to(self, next: RunPhase) -> bool {
        use RunPhase::{
            Aggregating, Done, Enumerating, Executing, Failed, Init, LoadedFromCheckpoint,
            Selecting,
        };
        matches!(
            (self, next),
            (Init, Enumerating)
                | (Enumerating, LoadedFromCheckpoint)
                | (Enumerating, Executing)
                | (Executing, Aggregating)
                | (LoadedFromCheckpoint, Selecting)
                | (Aggregating, Selecting)
                | (Selecting, Done)
                | (Init | Enumerating | Executing | Aggregating | LoadedFromCheckpoint, Failed)
        )
    }
}

/// Phase tracker that records every transition of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    phase: RunPhase,
    history: Vec<RunPhase>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Init,
            history: vec![RunPhase::Init],
        }
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(EngineError::Transition {
                from: self.phase,
                to: next,
            });
        }
        tracing::info!(from = ?self.phase, to = ?next, "run phase");
        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    pub fn into_history(self) -> Vec<RunPhase> {
        self.history
    }
}
