//! Deterministic, pure logic shared by the repair cycle.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod diff;
pub mod fence;
pub mod machine;
pub mod types;
