//! I/O adapters for the repair cycle.

pub mod atomic;
pub mod config;
pub mod lock;
pub mod oracle;
pub mod process;
pub mod prompt;
pub mod reports;
pub mod test_runner;
