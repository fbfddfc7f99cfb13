//! Deterministic, pure logic of the experiment engine.
//!
//! Core modules are free of I/O side effects. Executors, evaluators and
//! selection strategies are reached through traits so that every module can be
//! exercised in isolation with scripted doubles.

pub mod aggregate;
pub mod evaluate;
pub mod execute;
pub mod select;
pub mod state;
pub mod types;
pub mod variation;
