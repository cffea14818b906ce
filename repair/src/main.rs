//! Single-shot test-driven repair cycle.
//!
//! Runs the project's test suite, asks a code-repair oracle to fix the target
//! file when the suite fails, shows the diff, and runs the suite again.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use repair::cancel::CancelToken;
use repair::console::ConsoleReporter;
use repair::core::types::TerminalState;
use repair::cycle::{CycleError, CycleRequest, Orchestrator};
use repair::exit_codes;
use repair::io::config::{CONFIG_FILE, OracleCredentials, RepairConfig, load_config, write_config};
use repair::io::lock::CycleLock;
use repair::io::oracle::{ChatOracle, RepairClient};
use repair::io::reports::ReportStore;
use repair::io::test_runner::CommandTestRunner;
use repair::logging;

#[derive(Parser)]
#[command(
    name = "repair",
    version,
    about = "Run tests, repair the failing file with an LLM, and verify the fix"
)]
struct Cli {
    /// Project root holding the app, tests, and reports directories.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Config file (defaults to `<root>/repair.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the full cycle: test, repair on failure, diff, re-test (default).
    Cycle,
    /// Repair one file from an existing failure report, without running tests.
    Fix {
        /// Source file to overwrite with the oracle's fix.
        source: PathBuf,
        /// Failure report handed to the oracle.
        report: PathBuf,
    },
    /// Write `repair.toml` with default settings and create the reports directory.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let _ = dotenvy::dotenv();
    logging::init();

    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join(CONFIG_FILE));

    match cli.command.unwrap_or(Command::Cycle) {
        Command::Cycle => cmd_cycle(&cli.root, &config_path),
        Command::Fix { source, report } => cmd_fix(&cli.root, &config_path, &source, &report),
        Command::Init { force } => cmd_init(&cli.root, &config_path, force),
    }
}

fn cmd_cycle(root: &Path, config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let paths = cfg.paths(root);
    let lock = CycleLock::acquire(&paths.lock_path).context("acquire cycle lock")?;
    debug!(lock = %lock.path().display(), "holding cycle lock");
    let cancel = cancel_on_interrupt()?;

    let runner = CommandTestRunner::from_config(&cfg.test, &paths.root, cancel.clone());
    let repair = repair_client(&cfg);
    let store = ReportStore::new(&paths.reports_dir);
    let reporter = ConsoleReporter::stdout();
    let request = CycleRequest {
        tests_dir: paths.tests_dir.clone(),
        target_file: paths.target_file.clone(),
    };

    let result = Orchestrator {
        runner: &runner,
        repair: &repair,
        store: &store,
        reporter: &reporter,
        cancel: &cancel,
    }
    .run(&request);

    match result {
        Ok(outcome) => Ok(terminal_exit_code(outcome.terminal)),
        Err(CycleError::Cancelled { state }) => {
            eprintln!("cancelled in {state:?}");
            Ok(exit_codes::CANCELLED)
        }
        Err(err) => Err(err).context("repair cycle aborted"),
    }
}

fn cmd_fix(root: &Path, config_path: &Path, source: &Path, report: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let paths = cfg.paths(root);
    let lock = CycleLock::acquire(&paths.lock_path).context("acquire cycle lock")?;
    debug!(lock = %lock.path().display(), "holding cycle lock");

    let repair = repair_client(&cfg);
    let patch = repair.repair(source, report, &ConsoleReporter::stdout());
    if patch.success {
        Ok(exit_codes::SUCCESS)
    } else {
        Ok(exit_codes::REPAIR_FAILED)
    }
}

fn cmd_init(root: &Path, config_path: &Path, force: bool) -> Result<i32> {
    let cfg = if force || !config_path.exists() {
        let cfg = RepairConfig::default();
        write_config(config_path, &cfg)?;
        println!("Wrote {}", config_path.display());
        cfg
    } else {
        println!("{} already exists (use --force to overwrite)", config_path.display());
        load_config(config_path)?
    };

    let reports_dir = cfg.paths(root).reports_dir;
    fs::create_dir_all(&reports_dir)
        .with_context(|| format!("create {}", reports_dir.display()))?;
    Ok(exit_codes::SUCCESS)
}

/// Build the oracle client. A missing credential is not fatal here: the
/// client is kept in a failed state and every repair fails immediately.
fn repair_client(cfg: &RepairConfig) -> RepairClient<ChatOracle> {
    let credentials = OracleCredentials::from_env(&cfg.oracle);
    let setup = ChatOracle::new(&cfg.oracle, &credentials);
    if let Err(err) = &setup {
        warn!(err = %err, "oracle unavailable, repairs will fail");
    }
    RepairClient::from_setup(setup)
}

fn cancel_on_interrupt() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, cancelling cycle");
        handler.cancel();
    })
    .context("install interrupt handler")?;
    Ok(cancel)
}

fn terminal_exit_code(state: TerminalState) -> i32 {
    match state {
        TerminalState::Clean => exit_codes::CLEAN,
        TerminalState::Success => exit_codes::SUCCESS,
        TerminalState::RepairFailed => exit_codes::REPAIR_FAILED,
        TerminalState::Regressed => exit_codes::REGRESSED,
    }
}
