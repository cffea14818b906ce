//! Test Execution Adapter: run the suite, persist the report, derive the verdict.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::console::{Notice, Reporter};
use crate::core::types::Verdict;
use crate::error::StageError;
use crate::io::config::TestConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::reports::ReportStore;

/// Raw result of one suite invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteOutput {
    /// `None` when the engine was killed (timeout) or died from a signal.
    pub exit_code: Option<i32>,
    /// stdout followed by stderr.
    pub output: String,
}

/// Anything that can run a test suite directory and report how it went.
pub trait TestRunner {
    fn run(&self, target_dir: &Path) -> Result<SuiteOutput, StageError>;
}

impl<T: TestRunner + ?Sized> TestRunner for &T {
    fn run(&self, target_dir: &Path) -> Result<SuiteOutput, StageError> {
        (**self).run(target_dir)
    }
}

/// Runs an external test engine as `<command...> <target_dir>`.
#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub cancel: CancelToken,
}

impl CommandTestRunner {
    /// Build from config; `command[0]` is the program, the rest are leading arguments.
    pub fn from_config(cfg: &TestConfig, workdir: &Path, cancel: CancelToken) -> Self {
        let (program, args) = match cfg.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args,
            workdir: workdir.to_path_buf(),
            timeout: cfg.timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
            cancel,
        }
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(program = %self.program, target_dir = %target_dir.display()))]
    fn run(&self, target_dir: &Path) -> Result<SuiteOutput, StageError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(target_dir).current_dir(&self.workdir);

        let output =
            run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes, &self.cancel)?;

        let mut combined = String::new();
        combined.push_str(&String::from_utf8_lossy(&output.stdout));
        combined.push_str(&output.stdout_truncated_notice("test engine"));
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        combined.push_str(&output.stderr_truncated_notice("test engine"));
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "test run timed out");
            combined.push_str(&format!(
                "\n[test engine timed out after {}s]\n",
                self.timeout.as_secs()
            ));
        }

        Ok(SuiteOutput {
            exit_code: output.exit_code(),
            output: combined,
        })
    }
}

/// Outcome of one adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub verdict: Verdict,
    pub exit_code: Option<i32>,
    pub report_path: PathBuf,
}

/// Run the suite in `target_dir`, save the combined output as report
/// `report_name`, and classify the run by exit status alone.
///
/// The saved report ends with an `[exit status: N]` trailer. Launch failures
/// and report write failures are returned as errors; a failing suite is not
/// an error.
#[instrument(skip_all, fields(report_name, target_dir = %target_dir.display()))]
pub fn run_tests<R: TestRunner + ?Sized>(
    runner: &R,
    store: &ReportStore,
    target_dir: &Path,
    report_name: &str,
    reporter: &dyn Reporter,
) -> Result<TestRun, StageError> {
    reporter.emit(Notice::TestsStarted {
        report_name: report_name.to_string(),
    });

    let suite = runner.run(target_dir)?;
    let report = with_exit_trailer(&suite.output, suite.exit_code);
    let report_path = store.save(report_name, &report)?;
    let verdict = Verdict::from_exit_code(suite.exit_code);
    info!(verdict = verdict.as_str(), exit_code = ?suite.exit_code, "test run finished");

    reporter.emit(Notice::TestsFinished {
        report_name: report_name.to_string(),
        verdict,
        report_path: report_path.clone(),
    });

    Ok(TestRun {
        verdict,
        exit_code: suite.exit_code,
        report_path,
    })
}

fn with_exit_trailer(output: &str, exit_code: Option<i32>) -> String {
    let mut report = output.to_string();
    if !report.is_empty() && !report.ends_with('\n') {
        report.push('\n');
    }
    match exit_code {
        Some(code) => report.push_str(&format!("[exit status: {code}]\n")),
        None => report.push_str("[exit status: none (killed)]\n"),
    }
    report
}
