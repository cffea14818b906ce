//! Single-shot, test-driven code repair cycle.
//!
//! One cycle runs a test suite, and if it fails, sends the failing source file
//! and the captured failure report to a code-repair oracle, writes the
//! returned source back, shows what changed, and runs the suite again.
//!
//! - **[`core`]**: Pure, deterministic logic (state machine, diff, fence stripping).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (reports on disk, child processes,
//!   the inference endpoint). Hidden behind traits so tests can script them.
//!
//! [`cycle`] ties the two together; [`console`] is the injectable output channel.

pub mod cancel;
pub mod console;
pub mod core;
pub mod cycle;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
