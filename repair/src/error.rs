//! Error taxonomy shared by the cycle stages.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Classified failure of a single stage.
///
/// The oracle client downgrades every variant to a failed `PatchResult`;
/// the test adapter and report store surface `Launch` and `Io` to the
/// orchestrator, which aborts the cycle on them.
#[derive(Debug, Error)]
pub enum StageError {
    /// Missing credential or model, or the oracle client could not be built.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The test engine process could not be started.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Reading or writing a report or source file failed.
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Network, timeout, or authentication failure talking to the oracle.
    #[error("transport error: {0}")]
    Transport(String),

    /// The oracle answered, but with nothing usable.
    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),

    /// Cancellation was observed while the stage was running.
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Stable label used in diagnostics and the cycle summary.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Launch { .. } => "launch",
            Self::Io { .. } => "io",
            Self::Transport(_) => "transport",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Cancelled => "cancelled",
        }
    }
}
