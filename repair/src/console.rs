//! Product output for a repair cycle.
//!
//! Components never print directly; they hand a [`Notice`] to the
//! [`Reporter`] they were given. The binary renders notices to stdout with
//! [`ConsoleReporter`]; tests record them.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::core::types::{TerminalState, Verdict};

/// One user-visible event of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    CycleStarted,
    TestsStarted {
        report_name: String,
    },
    TestsFinished {
        report_name: String,
        verdict: Verdict,
        report_path: PathBuf,
    },
    /// The initial failure report, echoed before repair starts.
    FailureReport {
        text: String,
    },
    RepairStarted {
        source_path: PathBuf,
        model: String,
    },
    RepairApplied {
        source_path: PathBuf,
    },
    RepairFailed {
        diagnostic: String,
    },
    /// Unified diff of the repair.
    Diff {
        rendered: String,
    },
    /// The oracle reported success but the file did not change.
    NoTextualChange,
    Terminal {
        state: TerminalState,
        final_report: Option<PathBuf>,
    },
}

pub trait Reporter {
    fn emit(&self, notice: Notice);
}

/// Renders notices as plain text lines to a writer.
pub struct ConsoleReporter<W: Write> {
    out: Mutex<W>,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn emit(&self, notice: Notice) {
        let text = render(&notice);
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Console output is best-effort; a closed stdout must not abort a cycle.
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }
}

/// Human-readable text for a notice. Every terminal state has its own message.
pub fn render(notice: &Notice) -> String {
    match notice {
        Notice::CycleStarted => "Starting repair cycle...".to_string(),
        Notice::TestsStarted { report_name } => {
            format!("Running tests (report: {report_name})...")
        }
        Notice::TestsFinished {
            verdict: Verdict::Passed,
            report_path,
            ..
        } => format!("All tests passed. Report: {}", report_path.display()),
        Notice::TestsFinished {
            verdict: Verdict::Failed,
            report_path,
            ..
        } => format!("Tests failed. Report: {}", report_path.display()),
        Notice::FailureReport { text } => {
            format!("\nPRE-FIX TEST FAILURES:\n{}", text.trim_end())
        }
        Notice::RepairStarted { source_path, model } => format!(
            "\nSending {} and the failure report to the repair oracle ({model})...",
            source_path.display()
        ),
        Notice::RepairApplied { source_path } => {
            format!("Patched {} with the oracle's fix.", source_path.display())
        }
        Notice::RepairFailed { diagnostic } => format!("Repair failed: {diagnostic}"),
        Notice::Diff { rendered } => format!("\nREPAIR DIFF:\n{}", rendered.trim_end()),
        Notice::NoTextualChange => {
            "Advisory: the oracle reported success but made no textual change.".to_string()
        }
        Notice::Terminal { state, final_report } => match state {
            TerminalState::Clean => "CLEAN: all tests pass; nothing to repair.".to_string(),
            TerminalState::Success => {
                "SUCCESS: the repair was applied and all tests pass.".to_string()
            }
            TerminalState::RepairFailed => {
                "REPAIR FAILED: the oracle could not produce or apply a patch.".to_string()
            }
            TerminalState::Regressed => match final_report {
                Some(path) => format!(
                    "REGRESSED: tests still fail after the repair. See {}",
                    path.display()
                ),
                None => "REGRESSED: tests still fail after the repair.".to_string(),
            },
        },
    }
}
