//! Orchestration for a single repair cycle.
//!
//! Runs the suite, and on failure snapshots the target file, asks the oracle
//! for a fix, diffs the result, and runs the suite again. The cycle is
//! single-shot: no oracle retries and no second repair round.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::console::{Notice, Reporter};
use crate::core::diff::{DiffHunk, diff, render_unified, stats};
use crate::core::machine::{CycleEvent, CycleState, InvalidTransition, StateTrail};
use crate::core::types::{PatchResult, SourceSnapshot, TerminalState, Verdict};
use crate::error::StageError;
use crate::io::oracle::{Oracle, RepairClient};
use crate::io::reports::ReportStore;
use crate::io::test_runner::{TestRun, TestRunner, run_tests};

pub const INITIAL_REPORT: &str = "initial";
pub const FINAL_REPORT: &str = "final";
pub const DIFF_REPORT: &str = "repair.diff";
pub const SUMMARY_REPORT: &str = "cycle.json";

/// What one cycle operates on.
#[derive(Debug, Clone)]
pub struct CycleRequest {
    /// Suite directory handed to the test engine.
    pub tests_dir: PathBuf,
    /// The single file the oracle may rewrite.
    pub target_file: PathBuf,
}

/// A cycle that reached one of its terminal states.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub terminal: TerminalState,
    pub states: Vec<CycleState>,
    pub initial: TestRun,
    pub patch: Option<PatchResult>,
    /// Empty when there was no repair, or when the repair changed nothing.
    pub hunks: Vec<DiffHunk>,
    pub final_run: Option<TestRun>,
    pub summary_path: PathBuf,
}

/// Conditions that abort a cycle before it reaches a terminal state.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("cycle aborted in {state:?}: {source}")]
    Stage {
        state: CycleState,
        #[source]
        source: StageError,
    },
    #[error("cycle cancelled in {state:?}")]
    Cancelled { state: CycleState },
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

#[derive(Debug, Serialize)]
struct CycleSummary<'a> {
    terminal: TerminalState,
    states: &'a [CycleState],
    target_file: &'a Path,
    initial_report: &'a Path,
    initial_verdict: Verdict,
    final_report: Option<&'a Path>,
    final_verdict: Option<Verdict>,
    patch: Option<&'a PatchResult>,
    diff: DiffSummary,
}

#[derive(Debug, Serialize)]
struct DiffSummary {
    hunks: usize,
    added: usize,
    removed: usize,
}

/// Drives one cycle against injected collaborators.
pub struct Orchestrator<'a, R: TestRunner + ?Sized, O: Oracle> {
    pub runner: &'a R,
    pub repair: &'a RepairClient<O>,
    pub store: &'a ReportStore,
    pub reporter: &'a dyn Reporter,
    pub cancel: &'a CancelToken,
}

impl<R: TestRunner + ?Sized, O: Oracle> Orchestrator<'_, R, O> {
    #[instrument(skip_all, fields(target = %request.target_file.display()))]
    pub fn run(&self, request: &CycleRequest) -> Result<CycleOutcome, CycleError> {
        let mut trail = StateTrail::new();
        self.reporter.emit(Notice::CycleStarted);
        // A diff left by an earlier cycle must not pass for this one's.
        self.stage(&trail, || self.store.remove(DIFF_REPORT))?;

        self.checkpoint(&trail)?;
        trail.advance(CycleEvent::Start)?;
        let initial = self.stage(&trail, || {
            run_tests(
                self.runner,
                self.store,
                &request.tests_dir,
                INITIAL_REPORT,
                self.reporter,
            )
        })?;
        trail.advance(CycleEvent::InitialVerdict(initial.verdict))?;

        if trail.current() == CycleState::DoneClean {
            info!("initial run passed, nothing to repair");
            return self.finish(trail, request, initial, None, Vec::new(), None);
        }

        let failure_text = self.stage(&trail, || self.store.load(&initial.report_path))?;
        self.reporter.emit(Notice::FailureReport { text: failure_text });

        self.checkpoint(&trail)?;
        let before = self.stage(&trail, || snapshot(&request.target_file))?;
        let patch = self
            .repair
            .repair(&request.target_file, &initial.report_path, self.reporter);

        if !patch.success {
            warn!(diagnostic = ?patch.diagnostic, "repair failed, skipping final run");
            trail.advance(CycleEvent::PatchFailed)?;
            return self.finish(trail, request, initial, Some(patch), Vec::new(), None);
        }
        trail.advance(CycleEvent::PatchApplied)?;

        let after = self.stage(&trail, || snapshot(&request.target_file))?;
        let hunks = diff(before.lines(), after.lines());
        if hunks.is_empty() {
            warn!("oracle reported success but the file is unchanged");
            self.reporter.emit(Notice::NoTextualChange);
        } else {
            let name = file_label(&request.target_file);
            let rendered = render_unified(
                &hunks,
                &format!("{name} (before)"),
                &format!("{name} (after)"),
            );
            self.stage(&trail, || self.store.save(DIFF_REPORT, &rendered))?;
            self.reporter.emit(Notice::Diff { rendered });
        }

        self.checkpoint(&trail)?;
        trail.advance(CycleEvent::BeginFinalTest)?;
        let final_run = self.stage(&trail, || {
            run_tests(
                self.runner,
                self.store,
                &request.tests_dir,
                FINAL_REPORT,
                self.reporter,
            )
        })?;
        trail.advance(CycleEvent::FinalVerdict(final_run.verdict))?;

        self.finish(trail, request, initial, Some(patch), hunks, Some(final_run))
    }

    /// Cancellation is honored between stages.
    fn checkpoint(&self, trail: &StateTrail) -> Result<(), CycleError> {
        if self.cancel.is_cancelled() {
            warn!(state = ?trail.current(), "cycle cancelled");
            return Err(CycleError::Cancelled {
                state: trail.current(),
            });
        }
        Ok(())
    }

    fn stage<T>(
        &self,
        trail: &StateTrail,
        op: impl FnOnce() -> Result<T, StageError>,
    ) -> Result<T, CycleError> {
        op().map_err(|source| match source {
            StageError::Cancelled => CycleError::Cancelled {
                state: trail.current(),
            },
            source => CycleError::Stage {
                state: trail.current(),
                source,
            },
        })
    }

    fn finish(
        &self,
        trail: StateTrail,
        request: &CycleRequest,
        initial: TestRun,
        patch: Option<PatchResult>,
        hunks: Vec<DiffHunk>,
        final_run: Option<TestRun>,
    ) -> Result<CycleOutcome, CycleError> {
        let state = trail.current();
        let terminal = state.terminal().ok_or(InvalidTransition {
            from: state,
            event: CycleEvent::Start,
        })?;

        let diff_stats = stats(&hunks);
        let summary = CycleSummary {
            terminal,
            states: trail.states(),
            target_file: &request.target_file,
            initial_report: &initial.report_path,
            initial_verdict: initial.verdict,
            final_report: final_run.as_ref().map(|run| run.report_path.as_path()),
            final_verdict: final_run.as_ref().map(|run| run.verdict),
            patch: patch.as_ref(),
            diff: DiffSummary {
                hunks: diff_stats.hunks,
                added: diff_stats.added,
                removed: diff_stats.removed,
            },
        };
        let mut json = serde_json::to_string_pretty(&summary).map_err(|err| CycleError::Stage {
            state,
            source: StageError::io(self.store.dir().join(SUMMARY_REPORT), err.into()),
        })?;
        json.push('\n');
        let summary_path = self.stage(&trail, || self.store.save(SUMMARY_REPORT, &json))?;
        debug!(path = %summary_path.display(), "wrote cycle summary");

        info!(terminal = terminal.as_str(), "cycle finished");
        self.reporter.emit(Notice::Terminal {
            state: terminal,
            final_report: final_run.as_ref().map(|run| run.report_path.clone()),
        });

        Ok(CycleOutcome {
            terminal,
            states: trail.states().to_vec(),
            initial,
            patch,
            hunks,
            final_run,
            summary_path,
        })
    }
}

fn snapshot(path: &Path) -> Result<SourceSnapshot, StageError> {
    let text = fs::read_to_string(path).map_err(|err| StageError::io(path, err))?;
    Ok(SourceSnapshot::from_text(&text))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
