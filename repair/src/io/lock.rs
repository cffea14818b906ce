//! Advisory lock that keeps two cycles off the same project at once.
//!
//! The oracle client does a read-modify-overwrite of the target file that is
//! not isolated, so concurrent cycles must be serialized by the caller.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::StageError;

/// Exclusive lock held for the lifetime of the value.
#[derive(Debug)]
pub struct CycleLock {
    file: File,
    path: PathBuf,
}

impl CycleLock {
    /// Take the lock without waiting. Fails if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self, StageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StageError::io(parent, err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|err| StageError::io(path, err))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock || is_contended(&err) => {
                return Err(StageError::Configuration(format!(
                    "another repair cycle holds {}",
                    path.display()
                )));
            }
            Err(err) => return Err(StageError::io(path, err)),
        }

        debug!(path = %path.display(), "acquired cycle lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
