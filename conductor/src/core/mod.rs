//! Deterministic, pure logic shared by the conductor core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod checklist;
pub mod state;
pub mod transition;
pub mod types;
