//! Repair configuration stored in `repair.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::atomic::write_atomic;

pub const CONFIG_FILE: &str = "repair.toml";

/// Repairs need near-deterministic completions.
pub const MAX_TEMPERATURE: f64 = 0.5;

/// Repair configuration (TOML).
///
/// Missing fields default to values matching the conventional `app/` +
/// `tests/` project layout and a Groq-hosted, OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    /// Directory holding the application code, relative to the project root.
    pub app_dir: PathBuf,

    /// Test suite directory, passed as the single argument to the test engine.
    pub tests_dir: PathBuf,

    /// The one file the oracle is allowed to rewrite.
    pub target_file: PathBuf,

    /// Where test reports, the diff, and the cycle summary are written.
    pub reports_dir: PathBuf,

    pub test: TestConfig,

    pub oracle: OracleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    /// Test engine command; the tests directory is appended as the last argument.
    pub command: Vec<String>,

    /// Wall-clock limit for one suite run. A run that hits it is killed and counts as failed.
    pub timeout_secs: u64,

    /// Bytes kept from each of stdout and stderr.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended).
    pub base_url: String,

    pub model: String,

    pub temperature: f64,

    pub timeout_secs: u64,

    /// Environment variable holding the API credential.
    pub api_key_env: String,

    /// Environment variable that, when set, overrides `model`.
    pub model_env: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: vec!["python".to_string(), "-m".to_string(), "pytest".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama3-8b-8192".to_string(),
            temperature: 0.1,
            timeout_secs: 120,
            api_key_env: "GROQ_API_KEY".to_string(),
            model_env: "GROQ_MODEL".to_string(),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("app"),
            tests_dir: PathBuf::from("tests"),
            target_file: PathBuf::from("app/buggy_app.py"),
            reports_dir: PathBuf::from("reports"),
            test: TestConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

impl TestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RepairConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_file.as_os_str().is_empty() {
            return Err(anyhow!("target_file must be set"));
        }
        if self.tests_dir.as_os_str().is_empty() {
            return Err(anyhow!("tests_dir must be set"));
        }
        if self.reports_dir.as_os_str().is_empty() {
            return Err(anyhow!("reports_dir must be set"));
        }
        if self.test.command.is_empty() || self.test.command[0].trim().is_empty() {
            return Err(anyhow!("test.command must be a non-empty array"));
        }
        if self.test.timeout_secs == 0 {
            return Err(anyhow!("test.timeout_secs must be > 0"));
        }
        if self.test.output_limit_bytes == 0 {
            return Err(anyhow!("test.output_limit_bytes must be > 0"));
        }
        if self.oracle.base_url.trim().is_empty() {
            return Err(anyhow!("oracle.base_url must be set"));
        }
        if self.oracle.model.trim().is_empty() {
            return Err(anyhow!("oracle.model must be set"));
        }
        if !(0.0..=MAX_TEMPERATURE).contains(&self.oracle.temperature) {
            return Err(anyhow!(
                "oracle.temperature must be within 0.0..={MAX_TEMPERATURE}"
            ));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.api_key_env.trim().is_empty() {
            return Err(anyhow!("oracle.api_key_env must be set"));
        }
        Ok(())
    }

    /// Resolve the configured relative paths against `root`.
    pub fn paths(&self, root: &Path) -> ProjectPaths {
        let reports_dir = root.join(&self.reports_dir);
        ProjectPaths {
            root: root.to_path_buf(),
            app_dir: root.join(&self.app_dir),
            tests_dir: root.join(&self.tests_dir),
            target_file: root.join(&self.target_file),
            lock_path: reports_dir.join("cycle.lock"),
            reports_dir,
        }
    }
}

/// Absolute (root-joined) locations used by one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub app_dir: PathBuf,
    pub tests_dir: PathBuf,
    pub target_file: PathBuf,
    pub reports_dir: PathBuf,
    pub lock_path: PathBuf,
}

/// Credential and model override read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleCredentials {
    pub api_key: Option<String>,
    pub model_override: Option<String>,
}

impl OracleCredentials {
    /// Look up the configured variables through `lookup`; blank values count as unset.
    pub fn resolve<F>(cfg: &OracleConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            if name.trim().is_empty() {
                return None;
            }
            lookup(name).filter(|value| !value.trim().is_empty())
        };
        Self {
            api_key: read(&cfg.api_key_env),
            model_override: read(&cfg.model_env),
        }
    }

    pub fn from_env(cfg: &OracleConfig) -> Self {
        Self::resolve(cfg, |name| std::env::var(name).ok())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RepairConfig::default()`.
pub fn load_config(path: &Path) -> Result<RepairConfig> {
    if !path.exists() {
        let cfg = RepairConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RepairConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RepairConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf).with_context(|| format!("write {}", path.display()))
}
