//! Shared deterministic types for the repair cycle.
//!
//! These types define the contracts between the cycle stages. They do not
//! touch the filesystem or the network.

use serde::{Deserialize, Serialize};

/// Outcome of one test-engine invocation, derived purely from its exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
}

impl Verdict {
    /// `Passed` iff the engine exited with status 0. A missing code (signal,
    /// timeout kill) counts as a failure.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Verdict::Passed,
            _ => Verdict::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
        }
    }
}

/// The four ways a cycle can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    /// The initial run passed; no repair was attempted.
    Clean,
    /// The repair was applied and the final run passed.
    Success,
    /// The oracle could not produce or apply a patch; the final run never happened.
    RepairFailed,
    /// The repair was applied but the final run still failed.
    Regressed,
}

impl TerminalState {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalState::Clean => "clean",
            TerminalState::Success => "success",
            TerminalState::RepairFailed => "repair_failed",
            TerminalState::Regressed => "regressed",
        }
    }
}

/// Full content of the target file at one instant, as lines.
///
/// Line terminators are not part of the lines, so a file that differs only by
/// a trailing newline or CRLF endings snapshots identically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceSnapshot {
    lines: Vec<String>,
}

impl SourceSnapshot {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// What the repair oracle client reports back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchResult {
    pub success: bool,
    /// Source text written to the target file (fences already stripped).
    #[serde(skip)]
    pub patched_source: Option<String>,
    /// Classified, human-readable reason for a failure.
    pub diagnostic: Option<String>,
}

impl PatchResult {
    pub fn applied(source: String) -> Self {
        Self {
            success: true,
            patched_source: Some(source),
            diagnostic: None,
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            patched_source: None,
            diagnostic: Some(diagnostic.into()),
        }
    }
}
