//! Reason-from-future controller for language-model driven search.
//!
//! A run alternates backward planning ("what must hold just before the
//! target?") with forward stepping ("produce that sub-result"), gated by a
//! cheap local check and a terminal verification. The crate is split like so:
//!
//! - **[`core`]**: Pure, deterministic values (workspace, targets, avoid-sets,
//!   frontier stack, iteration budget). No I/O, fully testable in isolation.
//! - **[`spec`]**: The [`spec::ProblemSpec`] capability contract a task
//!   implements. The controller knows nothing else about a task.
//! - **[`controller`]**: The DAG and tree state machines.
//! - **[`model`]**: The text-completion capability, its retry decorator, and a
//!   command-backed implementation.
//! - **[`tasks`]**: Concrete task specializations (24-game, word problems).
//!
//! [`config`], [`prompt`] and [`transcript`] provide the ambient pieces the
//! CLI and the eval harness share.

pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod model;
pub mod prompt;
pub mod spec;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transcript;
