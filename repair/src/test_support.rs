//! Test-only doubles for the cycle's external collaborators.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::console::{Notice, Reporter};
use crate::error::StageError;
use crate::io::config::RepairConfig;
use crate::io::oracle::Oracle;
use crate::io::reports::ReportStore;
use crate::io::test_runner::{SuiteOutput, TestRunner};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One scripted suite invocation.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Finished { exit_code: Option<i32>, output: String },
    LaunchFailure,
}

impl ScriptedRun {
    pub fn exit(code: i32, output: &str) -> Self {
        Self::Finished {
            exit_code: Some(code),
            output: output.to_string(),
        }
    }

    pub fn killed(output: &str) -> Self {
        Self::Finished {
            exit_code: None,
            output: output.to_string(),
        }
    }
}

/// Test runner that replays a queue of results and records each target dir.
pub struct ScriptedTestRunner {
    queue: Mutex<VecDeque<ScriptedRun>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedTestRunner {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            queue: Mutex::new(runs.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        lock(&self.calls).clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let remaining = lock(&self.queue).len();
        if remaining > 0 {
            return Err(anyhow!("{remaining} scripted test runs were never used"));
        }
        Ok(())
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, target_dir: &Path) -> Result<SuiteOutput, StageError> {
        lock(&self.calls).push(target_dir.to_path_buf());
        let next = lock(&self.queue).pop_front();
        match next {
            Some(ScriptedRun::Finished { exit_code, output }) => Ok(SuiteOutput { exit_code, output }),
            Some(ScriptedRun::LaunchFailure) => Err(StageError::Launch {
                program: "scripted-engine".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted launch failure"),
            }),
            None => Err(StageError::Launch {
                program: "scripted-engine".to_string(),
                source: io::Error::other("no scripted test run left"),
            }),
        }
    }
}

/// Oracle that replays a queue of completions and records every prompt.
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<Result<String, StageError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(responses: Vec<Result<String, StageError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl Oracle for ScriptedOracle {
    fn model(&self) -> &str {
        "scripted-model"
    }

    fn complete(&self, prompt: &str) -> Result<String, StageError> {
        lock(&self.prompts).push(prompt.to_string());
        lock(&self.responses).pop_front().unwrap_or_else(|| {
            Err(StageError::Transport(
                "no scripted oracle response left".to_string(),
            ))
        })
    }
}

/// Reporter that keeps every notice for later assertions.
#[derive(Default)]
pub struct RecordingReporter {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        lock(&self.notices).clone()
    }

    pub fn contains<F: Fn(&Notice) -> bool>(&self, predicate: F) -> bool {
        lock(&self.notices).iter().any(predicate)
    }
}

impl Reporter for RecordingReporter {
    fn emit(&self, notice: Notice) {
        lock(&self.notices).push(notice);
    }
}

/// Buggy target used across cycle tests.
pub const BUGGY_SOURCE: &str = "\
def register_user(email, password, confirm_password):
    if not email or not password or not confirm_password:
        return {\"status\": \"error\", \"message\": \"All fields are required\"}

    if password != confirm_password:
        return {\"status\": \"error\", \"message\": \"Passwords do not match\"}

    return {\"status\": \"success\", \"message\": \"User registered\"}
";

/// `BUGGY_SOURCE` with the missing email check restored.
pub const FIXED_SOURCE: &str = "\
def register_user(email, password, confirm_password):
    if not email or not password or not confirm_password:
        return {\"status\": \"error\", \"message\": \"All fields are required\"}

    if \"@\" not in email:
        return {\"status\": \"error\", \"message\": \"Invalid email format\"}

    if password != confirm_password:
        return {\"status\": \"error\", \"message\": \"Passwords do not match\"}

    return {\"status\": \"success\", \"message\": \"User registered\"}";

/// Temporary project laid out like the default config (`app/`, `tests/`, `reports/`).
pub struct TestProject {
    dir: tempfile::TempDir,
    config: RepairConfig,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let config = RepairConfig::default();
        let paths = config.paths(dir.path());
        fs::create_dir_all(&paths.app_dir)?;
        fs::create_dir_all(&paths.tests_dir)?;
        fs::write(&paths.target_file, BUGGY_SOURCE)?;
        Ok(Self { dir, config })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    pub fn target_file(&self) -> PathBuf {
        self.config.paths(self.root()).target_file
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.config.paths(self.root()).tests_dir
    }

    pub fn store(&self) -> ReportStore {
        ReportStore::new(self.config.paths(self.root()).reports_dir)
    }

    pub fn read_source(&self) -> Result<String> {
        Ok(fs::read_to_string(self.target_file())?)
    }

    pub fn write_source(&self, contents: &str) -> Result<()> {
        fs::write(self.target_file(), contents)?;
        Ok(())
    }
}
