//! Helpers for running child processes with timeouts, cancellation and bounded output.

use std::io::{self, Read};
use std::mem;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;
use crate::error::StageError;

/// How often a running child is checked for timeout or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to keep reading after the child is gone. Descendants that
/// inherited the pipes can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }

    /// Exit code, or `None` when the child was killed (timeout or signal).
    pub fn exit_code(&self) -> Option<i32> {
        if self.timed_out {
            return None;
        }
        self.status.code()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// A child that outlives `timeout` is killed and reported with `timed_out`. If `cancel` fires
/// while the child runs, the child is killed and `StageError::Cancelled` is returned.
#[instrument(skip_all, fields(program = %program_name(&cmd), timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput, StageError> {
    let program = program_name(&cmd);
    let workdir = cmd
        .get_current_dir()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if cancel.is_cancelled() {
        return Err(StageError::Cancelled);
    }

    isolate_process_group(&mut cmd);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(StageError::Launch { program, source: e });
        }
    };

    let stdout = child.stdout.take().ok_or_else(|| not_piped(&workdir, "stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| not_piped(&workdir, "stderr"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, output_limit_bytes, done_tx);

    let waited = wait_with_deadline(&mut child, timeout, cancel)
        .map_err(|err| StageError::io(&workdir, err))?;

    let (status, timed_out) = match waited {
        Waited::Exited(status) => (status, false),
        Waited::TimedOut(status) => (status, true),
        Waited::Cancelled => return Err(StageError::Cancelled),
    };

    drain_readers(&done_rx, 2).map_err(|err| StageError::io(&workdir, err))?;
    let (stdout, stdout_truncated) = take_capture(&stdout_capture);
    let (stderr, stderr_truncated) = take_capture(&stderr_capture);

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

enum Waited {
    Exited(ExitStatus),
    TimedOut(ExitStatus),
    Cancelled,
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> io::Result<Waited> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Some(status) = child.wait_timeout(remaining.min(POLL_INTERVAL))? {
            return Ok(Waited::Exited(status));
        }
        if cancel.is_cancelled() {
            warn!("cancellation requested, killing child");
            kill_process_tree(child)?;
            child.wait()?;
            return Ok(Waited::Cancelled);
        }
        if Instant::now() >= deadline {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_process_tree(child)?;
            return Ok(Waited::TimedOut(child.wait()?));
        }
    }
}

/// Put the child at the head of its own process group so a kill reaches
/// everything it started.
#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

fn kill_process_tree(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-s", "KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match killed {
            Ok(status) if status.success() => debug!(group = %group, "killed process group"),
            Ok(status) => debug!(group = %group, ?status, "process group kill failed"),
            Err(err) => debug!(group = %group, err = %err, "could not run kill"),
        }
    }
    child.kill()
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn not_piped(workdir: &Path, stream: &str) -> StageError {
    StageError::io(
        workdir,
        io::Error::other(format!("{stream} was not piped")),
    )
}

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

fn lock_capture(capture: &SharedCapture) -> std::sync::MutexGuard<'_, Capture> {
    match capture.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Read `reader` to EOF on a background thread. Bytes land in the returned
/// capture as they arrive; completion is signalled on `done`.
fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    done: mpsc::Sender<io::Result<()>>,
) -> SharedCapture {
    let capture = SharedCapture::default();
    let sink = Arc::clone(&capture);
    thread::spawn(move || {
        let result = read_stream_limited(reader, limit, &sink);
        // The receiver is gone once the drain grace has passed.
        let _ = done.send(result);
    });
    capture
}

/// Wait for `readers` completions, giving up after `DRAIN_GRACE`. Readers
/// still blocked after that are left detached; what they captured so far is kept.
fn drain_readers(done: &Receiver<io::Result<()>>, readers: usize) -> io::Result<()> {
    let deadline = Instant::now() + DRAIN_GRACE;
    for _ in 0..readers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(result) => result?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("output pipes still open after the child exited, abandoning readers");
                return Ok(());
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(io::Error::other("output reader thread panicked"));
            }
        }
    }
    Ok(())
}

fn take_capture(capture: &SharedCapture) -> (Vec<u8>, usize) {
    let mut guard = lock_capture(capture);
    (mem::take(&mut guard.bytes), guard.truncated)
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize, sink: &SharedCapture) -> io::Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        let mut capture = lock_capture(sink);
        let remaining = limit.saturating_sub(capture.bytes.len());
        let keep = n.min(remaining);
        capture.bytes.extend_from_slice(&chunk[..keep]);
        capture.truncated += n - keep;
    }
}
