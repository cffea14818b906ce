//! End-to-end cycle scenarios with scripted test engine and oracle.
//!
//! Each test drives `Orchestrator::run` over a temporary project and checks
//! the terminal state, the report artifacts, and what the oracle was sent.

use std::fs;

use serde_json::Value;

use repair::cancel::CancelToken;
use repair::console::{Notice, Reporter};
use repair::core::diff::apply;
use repair::core::machine::CycleState;
use repair::core::types::{SourceSnapshot, TerminalState};
use repair::cycle::{
    CycleError, CycleOutcome, CycleRequest, DIFF_REPORT, FINAL_REPORT, INITIAL_REPORT,
    Orchestrator, SUMMARY_REPORT,
};
use repair::error::StageError;
use repair::io::oracle::{Oracle, RepairClient};
use repair::io::test_runner::TestRunner;
use repair::test_support::{
    BUGGY_SOURCE, FIXED_SOURCE, RecordingReporter, ScriptedOracle, ScriptedRun,
    ScriptedTestRunner, TestProject,
};

const FAILURE: &str = "FAILED tests/test_app.py::test_invalid_email\n\
E   AssertionError: Should reject invalid email format\n\
1 failed, 3 passed";

fn request(project: &TestProject) -> CycleRequest {
    CycleRequest {
        tests_dir: project.tests_dir(),
        target_file: project.target_file(),
    }
}

fn run_cycle<R: TestRunner, O: Oracle>(
    project: &TestProject,
    runner: &R,
    repair: &RepairClient<O>,
    reporter: &dyn Reporter,
    cancel: &CancelToken,
) -> Result<CycleOutcome, CycleError> {
    let store = project.store();
    Orchestrator {
        runner,
        repair,
        store: &store,
        reporter,
        cancel,
    }
    .run(&request(project))
}

fn summary(project: &TestProject) -> Value {
    let raw = project.store().load(SUMMARY_REPORT).expect("cycle summary");
    serde_json::from_str(&raw).expect("summary json")
}

fn state_names(summary: &Value) -> Vec<String> {
    summary["states"]
        .as_array()
        .expect("states array")
        .iter()
        .map(|state| state.as_str().expect("state name").to_string())
        .collect()
}

#[test]
fn passing_suite_ends_clean_and_never_calls_the_oracle() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![ScriptedRun::exit(0, "4 passed")]);
    let oracle = ScriptedOracle::new(vec![Ok(FIXED_SOURCE.to_string())]);
    let reporter = RecordingReporter::new();

    let outcome = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &reporter,
        &CancelToken::new(),
    )
    .expect("cycle");

    assert_eq!(outcome.terminal, TerminalState::Clean);
    assert!(oracle.prompts().is_empty());
    assert_eq!(runner.calls().len(), 1);
    assert_eq!(project.read_source().expect("source"), BUGGY_SOURCE);
    assert!(project.store().exists(INITIAL_REPORT));
    assert!(!project.store().exists(FINAL_REPORT));
    assert!(reporter.contains(|notice| matches!(
        notice,
        Notice::Terminal {
            state: TerminalState::Clean,
            final_report: None
        }
    )));

    let summary = summary(&project);
    assert_eq!(summary["terminal"], "clean");
    assert_eq!(state_names(&summary), ["init", "initial_test", "done_clean"]);
}

#[test]
fn fenced_fix_is_applied_diffed_and_verified() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![
        ScriptedRun::exit(1, FAILURE),
        ScriptedRun::exit(0, "4 passed"),
    ]);
    let oracle = ScriptedOracle::new(vec![Ok(format!("```python\n{FIXED_SOURCE}\n```"))]);
    let reporter = RecordingReporter::new();

    let outcome = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &reporter,
        &CancelToken::new(),
    )
    .expect("cycle");

    assert_eq!(outcome.terminal, TerminalState::Success);
    assert_eq!(
        outcome.states,
        [
            CycleState::Init,
            CycleState::InitialTest,
            CycleState::Repairing,
            CycleState::Repaired,
            CycleState::FinalTest,
            CycleState::DoneSuccess,
        ]
    );
    runner.assert_drained().expect("both runs used");
    assert_eq!(runner.calls(), [project.tests_dir(), project.tests_dir()]);

    // File holds the fence-stripped completion, byte for byte.
    assert_eq!(project.read_source().expect("source"), FIXED_SOURCE);

    // One request carrying both the buggy source and the failure report.
    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("def register_user(email, password, confirm_password):"));
    assert!(prompts[0].contains("AssertionError: Should reject invalid email format"));

    assert!(!outcome.hunks.is_empty());
    let before = SourceSnapshot::from_text(BUGGY_SOURCE);
    let after = SourceSnapshot::from_text(FIXED_SOURCE);
    assert_eq!(
        apply(before.lines(), &outcome.hunks).expect("apply"),
        after.lines()
    );

    let diff_text = project.store().load(DIFF_REPORT).expect("diff artifact");
    assert!(diff_text.contains("@@ "));
    assert!(diff_text.contains("+        return {\"status\": \"error\", \"message\": \"Invalid email format\"}"));
    assert!(reporter.contains(|notice| matches!(notice, Notice::Diff { .. })));
    assert!(reporter.contains(|notice| matches!(
        notice,
        Notice::FailureReport { text } if text.contains("test_invalid_email")
    )));

    let final_run = outcome.final_run.expect("final run");
    assert!(final_run.report_path.ends_with("final.txt"));
    let final_report = project.store().load(FINAL_REPORT).expect("final report");
    assert_eq!(final_report, "4 passed\n[exit status: 0]\n");

    let summary = summary(&project);
    assert_eq!(summary["terminal"], "success");
    assert_eq!(summary["final_verdict"], "passed");
    assert_eq!(summary["patch"]["success"], true);
    assert_eq!(summary["diff"]["added"], 3);
    assert_eq!(summary["diff"]["removed"], 0);
}

#[test]
fn transport_failure_halts_without_final_run() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![
        ScriptedRun::exit(1, FAILURE),
        ScriptedRun::exit(0, "should never run"),
    ]);
    let oracle = ScriptedOracle::new(vec![Err(StageError::Transport(
        "401 Unauthorized".to_string(),
    ))]);
    let reporter = RecordingReporter::new();

    let outcome = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &reporter,
        &CancelToken::new(),
    )
    .expect("cycle");

    assert_eq!(outcome.terminal, TerminalState::RepairFailed);
    assert_eq!(runner.calls().len(), 1);
    assert!(outcome.final_run.is_none());
    assert!(!project.store().exists(FINAL_REPORT));
    assert_eq!(project.read_source().expect("source"), BUGGY_SOURCE);

    let patch = outcome.patch.expect("patch result");
    assert!(!patch.success);
    assert!(patch.patched_source.is_none());
    assert!(
        patch
            .diagnostic
            .as_deref()
            .is_some_and(|diagnostic| diagnostic.contains("401 Unauthorized"))
    );
    assert!(reporter.contains(|notice| matches!(notice, Notice::RepairFailed { .. })));
    assert!(reporter.contains(|notice| matches!(
        notice,
        Notice::Terminal {
            state: TerminalState::RepairFailed,
            final_report: None
        }
    )));

    let summary = summary(&project);
    assert_eq!(summary["terminal"], "repair_failed");
    assert_eq!(summary["final_report"], Value::Null);
    assert_eq!(
        state_names(&summary).last().map(String::as_str),
        Some("repair_failed")
    );
}

#[test]
fn missing_credential_fails_repair_without_calling_oracle() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![ScriptedRun::exit(1, FAILURE)]);
    let repair = RepairClient::<ScriptedOracle>::from_setup(Err(StageError::Configuration(
        "GROQ_API_KEY is not set".to_string(),
    )));

    let outcome = run_cycle(
        &project,
        &runner,
        &repair,
        &RecordingReporter::new(),
        &CancelToken::new(),
    )
    .expect("cycle");

    assert_eq!(outcome.terminal, TerminalState::RepairFailed);
    let diagnostic = outcome.patch.and_then(|patch| patch.diagnostic);
    assert!(diagnostic.is_some_and(|text| text.contains("GROQ_API_KEY")));
    assert_eq!(project.read_source().expect("source"), BUGGY_SOURCE);
}

#[test]
fn empty_completion_is_malformed_and_leaves_source_untouched() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![ScriptedRun::exit(1, FAILURE)]);
    let oracle = ScriptedOracle::new(vec![Ok("```python\n```".to_string())]);

    let outcome = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &RecordingReporter::new(),
        &CancelToken::new(),
    )
    .expect("cycle");

    assert_eq!(outcome.terminal, TerminalState::RepairFailed);
    assert_eq!(project.read_source().expect("source"), BUGGY_SOURCE);
    assert!(!project.store().exists(FINAL_REPORT));
}

#[test]
fn unchanged_source_is_flagged_and_still_fails() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![
        ScriptedRun::exit(1, FAILURE),
        ScriptedRun::exit(1, FAILURE),
    ]);
    let oracle = ScriptedOracle::new(vec![Ok(BUGGY_SOURCE.to_string())]);
    let reporter = RecordingReporter::new();

    let outcome = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &reporter,
        &CancelToken::new(),
    )
    .expect("cycle");

    assert_eq!(outcome.terminal, TerminalState::Regressed);
    assert!(outcome.hunks.is_empty());
    assert!(reporter.contains(|notice| *notice == Notice::NoTextualChange));
    assert!(!reporter.contains(|notice| matches!(notice, Notice::Diff { .. })));
    assert!(!project.store().exists(DIFF_REPORT));
    assert!(project.store().exists(FINAL_REPORT));
}

#[test]
fn no_change_cycle_does_not_keep_an_earlier_diff() {
    let project = TestProject::new().expect("project");
    let first_runner = ScriptedTestRunner::new(vec![
        ScriptedRun::exit(1, FAILURE),
        ScriptedRun::exit(0, "4 passed"),
    ]);
    let first_oracle = ScriptedOracle::new(vec![Ok(FIXED_SOURCE.to_string())]);
    let first = run_cycle(
        &project,
        &first_runner,
        &RepairClient::new(&first_oracle),
        &RecordingReporter::new(),
        &CancelToken::new(),
    )
    .expect("first cycle");
    assert_eq!(first.terminal, TerminalState::Success);
    assert!(project.store().exists(DIFF_REPORT));

    project.write_source(BUGGY_SOURCE).expect("reintroduce bug");
    let second_runner = ScriptedTestRunner::new(vec![
        ScriptedRun::exit(1, FAILURE),
        ScriptedRun::exit(1, FAILURE),
    ]);
    let second_oracle = ScriptedOracle::new(vec![Ok(BUGGY_SOURCE.to_string())]);
    let second = run_cycle(
        &project,
        &second_runner,
        &RepairClient::new(&second_oracle),
        &RecordingReporter::new(),
        &CancelToken::new(),
    )
    .expect("second cycle");

    assert_eq!(second.terminal, TerminalState::Regressed);
    assert!(second.hunks.is_empty());
    assert!(!project.store().exists(DIFF_REPORT));
    assert_eq!(summary(&project)["diff"]["hunks"], 0);
}

#[test]
fn failed_repair_does_not_keep_an_earlier_diff() {
    let project = TestProject::new().expect("project");
    project.store().save(DIFF_REPORT, "--- old\n+++ new\n").expect("seed diff");
    let runner = ScriptedTestRunner::new(vec![ScriptedRun::exit(1, FAILURE)]);
    let oracle = ScriptedOracle::new(vec![Err(StageError::Transport("timed out".to_string()))]);

    let outcome = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &RecordingReporter::new(),
        &CancelToken::new(),
    )
    .expect("cycle");

    assert_eq!(outcome.terminal, TerminalState::RepairFailed);
    assert!(!project.store().exists(DIFF_REPORT));
}

#[test]
fn applied_fix_that_still_fails_is_regressed() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![
        ScriptedRun::exit(1, FAILURE),
        ScriptedRun::exit(1, "1 failed, 3 passed"),
    ]);
    let oracle = ScriptedOracle::new(vec![Ok("def register_user(*args):\n    return None".to_string())]);
    let reporter = RecordingReporter::new();

    let outcome = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &reporter,
        &CancelToken::new(),
    )
    .expect("cycle");

    assert_eq!(outcome.terminal, TerminalState::Regressed);
    assert!(!outcome.hunks.is_empty());
    let final_path = project.store().path_for(FINAL_REPORT).expect("final path");
    assert!(reporter.contains(|notice| matches!(
        notice,
        Notice::Terminal {
            state: TerminalState::Regressed,
            final_report: Some(path),
        } if *path == final_path
    )));
    assert_eq!(summary(&project)["terminal"], "regressed");
}

#[test]
fn launch_failure_aborts_before_any_repair() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![ScriptedRun::LaunchFailure]);
    let oracle = ScriptedOracle::new(vec![Ok(FIXED_SOURCE.to_string())]);

    let err = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &RecordingReporter::new(),
        &CancelToken::new(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        CycleError::Stage {
            state: CycleState::InitialTest,
            source: StageError::Launch { .. },
        }
    ));
    assert!(oracle.prompts().is_empty());
    assert!(!project.store().exists(INITIAL_REPORT));
    assert!(!project.store().exists(SUMMARY_REPORT));
}

#[test]
fn final_run_launch_failure_aborts_after_the_patch() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![
        ScriptedRun::exit(1, FAILURE),
        ScriptedRun::LaunchFailure,
    ]);
    let oracle = ScriptedOracle::new(vec![Ok(FIXED_SOURCE.to_string())]);

    let err = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &RecordingReporter::new(),
        &CancelToken::new(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        CycleError::Stage {
            state: CycleState::FinalTest,
            ..
        }
    ));
    assert_eq!(project.read_source().expect("source"), FIXED_SOURCE);
}

/// Cancels the cycle as soon as the first test run is reported.
struct CancelAfterFirstRun<'a> {
    cancel: &'a CancelToken,
}

impl Reporter for CancelAfterFirstRun<'_> {
    fn emit(&self, notice: Notice) {
        if matches!(notice, Notice::TestsFinished { .. }) {
            self.cancel.cancel();
        }
    }
}

#[test]
fn cancellation_between_stages_stops_before_the_oracle() {
    let project = TestProject::new().expect("project");
    let runner = ScriptedTestRunner::new(vec![ScriptedRun::exit(1, FAILURE)]);
    let oracle = ScriptedOracle::new(vec![Ok(FIXED_SOURCE.to_string())]);
    let cancel = CancelToken::new();
    let reporter = CancelAfterFirstRun { cancel: &cancel };

    let err = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &reporter,
        &cancel,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        CycleError::Cancelled {
            state: CycleState::Repairing
        }
    ));
    assert!(oracle.prompts().is_empty());
    assert_eq!(project.read_source().expect("source"), BUGGY_SOURCE);
}

#[test]
fn missing_target_file_is_an_io_abort() {
    let project = TestProject::new().expect("project");
    fs::remove_file(project.target_file()).expect("remove target");
    let runner = ScriptedTestRunner::new(vec![ScriptedRun::exit(1, FAILURE)]);
    let oracle = ScriptedOracle::new(vec![Ok(FIXED_SOURCE.to_string())]);

    let err = run_cycle(
        &project,
        &runner,
        &RepairClient::new(&oracle),
        &RecordingReporter::new(),
        &CancelToken::new(),
    )
    .unwrap_err();

    match err {
        CycleError::Stage { state, source } => {
            assert_eq!(state, CycleState::Repairing);
            assert_eq!(source.kind(), "io");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(oracle.prompts().is_empty());
}
