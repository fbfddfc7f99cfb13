//! Combinatorial experiment matrix engine.
//!
//! Every input item of a dataset is run against every combination of the
//! configured variation dimensions. Each output is scored by an ordered chain
//! of evaluators, the scored outputs are folded into one record per item, and
//! a selection strategy ranks the combinations. Completed runs are
//! checkpointed so a later run can skip recomputation.
//!
//! - **[`core`]**: Pure, deterministic logic (enumeration, execution loop,
//!   aggregation, selection). Collaborators are reached through traits only.
//! - **[`io`]**: Side-effecting collaborators (config files, datasets,
//!   checkpoints, display sinks, child processes).
//! - **[`plugins`]**: Built-in executors, evaluators and strategies.
//!
//! [`experiment`] ties the pieces together for a single run.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod experiment;
pub mod io;
pub mod logging;
pub mod plugins;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
