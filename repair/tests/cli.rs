//! CLI tests for the `repair` binary.
//!
//! Spawns the binary against temporary projects and checks exit codes and
//! on-disk effects. No test reaches the network: the credential variable is
//! always removed, so every repair fails at configuration.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use repair::exit_codes;
use repair::io::config::{CONFIG_FILE, RepairConfig, load_config, write_config};
use repair::test_support::{BUGGY_SOURCE, TestProject};

fn repair_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_repair"));
    cmd.current_dir(dir)
        .env_remove("GROQ_API_KEY")
        .env_remove("GROQ_MODEL")
        .env_remove("RUST_LOG");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("spawn repair")
}

fn with_test_command(project: &TestProject, command: &[&str]) {
    let mut cfg = project.config().clone();
    cfg.test.command = command.iter().map(|part| part.to_string()).collect();
    write_config(&project.root().join(CONFIG_FILE), &cfg).expect("write config");
}

#[test]
fn init_writes_default_config_and_reports_dir() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = run(repair_cmd(temp.path()).arg("init"));

    assert_eq!(output.status.code(), Some(exit_codes::SUCCESS));
    let cfg = load_config(&temp.path().join(CONFIG_FILE)).expect("load config");
    assert_eq!(cfg, RepairConfig::default());
    assert!(temp.path().join("reports").is_dir());
}

#[test]
fn init_keeps_existing_config_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join(CONFIG_FILE);
    fs::write(&path, "reports_dir = \"out\"\n").expect("seed config");

    let output = run(repair_cmd(temp.path()).arg("init"));

    assert_eq!(output.status.code(), Some(exit_codes::SUCCESS));
    assert_eq!(
        fs::read_to_string(&path).expect("config"),
        "reports_dir = \"out\"\n"
    );
    assert!(temp.path().join("out").is_dir());

    let output = run(repair_cmd(temp.path()).args(["init", "--force"]));
    assert_eq!(output.status.code(), Some(exit_codes::SUCCESS));
    assert_eq!(
        load_config(&path).expect("config").reports_dir,
        RepairConfig::default().reports_dir
    );
}

#[test]
fn fix_without_credential_fails_and_leaves_source() {
    let project = TestProject::new().expect("project");
    let report = project.root().join("failure.txt");
    fs::write(&report, "E   AssertionError\n").expect("seed report");

    let output = run(repair_cmd(project.root()).args(["fix", "app/buggy_app.py", "failure.txt"]));

    assert_eq!(output.status.code(), Some(exit_codes::REPAIR_FAILED));
    assert_eq!(project.read_source().expect("source"), BUGGY_SOURCE);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("GROQ_API_KEY"), "stdout: {stdout}");
}

#[test]
fn invalid_config_exits_invalid() {
    let project = TestProject::new().expect("project");
    fs::write(project.root().join(CONFIG_FILE), "[test]\ncommand = []\n").expect("seed config");

    let output = run(repair_cmd(project.root()).arg("cycle"));

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(!project.store().exists("initial"));
}

#[test]
fn missing_test_engine_exits_invalid() {
    let project = TestProject::new().expect("project");
    with_test_command(&project, &["repair-test-engine-that-does-not-exist"]);

    let output = run(&mut repair_cmd(project.root()));

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("repair-test-engine-that-does-not-exist"), "stderr: {stderr}");
    assert_eq!(project.read_source().expect("source"), BUGGY_SOURCE);
}

#[cfg(unix)]
#[test]
fn passing_suite_exits_clean() {
    let project = TestProject::new().expect("project");
    with_test_command(&project, &["sh", "-c", "echo '4 passed'", "sh"]);

    let output = run(repair_cmd(project.root()).arg("cycle"));

    assert_eq!(output.status.code(), Some(exit_codes::CLEAN));
    let report = project.store().load("initial").expect("initial report");
    assert_eq!(report, "4 passed\n[exit status: 0]\n");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("CLEAN"), "stdout: {stdout}");
}

#[cfg(unix)]
#[test]
fn failing_suite_without_credential_exits_repair_failed() {
    let project = TestProject::new().expect("project");
    // The suite directory is passed as "$1".
    with_test_command(
        &project,
        &["sh", "-c", "echo \"FAILED $1\"; exit 1", "sh"],
    );

    let output = run(&mut repair_cmd(project.root()));

    assert_eq!(output.status.code(), Some(exit_codes::REPAIR_FAILED));
    assert_eq!(project.read_source().expect("source"), BUGGY_SOURCE);
    assert!(!project.store().exists("final"));
    let initial = project.store().load("initial").expect("initial report");
    assert!(initial.starts_with("FAILED "));
    assert!(initial.ends_with("[exit status: 1]\n"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("REPAIR FAILED"), "stdout: {stdout}");
}
