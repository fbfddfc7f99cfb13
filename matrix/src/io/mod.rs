//! Side-effecting collaborators of the engine.

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod display;
pub mod process;
