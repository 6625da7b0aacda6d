//! Deterministic, pure values shared by the controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod avoid;
pub mod budget;
pub mod frontier;
pub mod types;
pub mod workspace;
