//! Report Store: named text artifacts under the reports directory.
//!
//! A report is written whole and never appended to; saving the same name
//! again replaces it.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::StageError;
use crate::io::atomic::write_atomic;

const DEFAULT_EXTENSION: &str = "txt";

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic path for a report name.
    ///
    /// Names without an extension get `.txt` (`"initial"` -> `initial.txt`);
    /// names with one are used as-is (`"cycle.json"`). Names must be a single
    /// plain file name.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StageError> {
        let candidate = Path::new(name);
        let mut components = candidate.components();
        let valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !valid {
            return Err(StageError::io(
                self.dir.join(name),
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid report name {name:?}"),
                ),
            ));
        }
        let file = if candidate.extension().is_some() {
            candidate.to_path_buf()
        } else {
            candidate.with_extension(DEFAULT_EXTENSION)
        };
        Ok(self.dir.join(file))
    }

    /// Write `content` as the complete report `name`, creating the reports
    /// directory if needed.
    pub fn save(&self, name: &str, content: &str) -> Result<PathBuf, StageError> {
        let path = self.path_for(name)?;
        write_atomic(&path, content).map_err(|err| StageError::io(&path, err))?;
        debug!(path = %path.display(), bytes = content.len(), "saved report");
        Ok(path)
    }

    /// Read a report by name, or by path when given one.
    pub fn load(&self, name_or_path: impl AsRef<Path>) -> Result<String, StageError> {
        let path = self.resolve(name_or_path.as_ref())?;
        fs::read_to_string(&path).map_err(|err| StageError::io(&path, err))
    }

    /// Delete report `name`. A report that does not exist counts as removed.
    pub fn remove(&self, name: &str) -> Result<(), StageError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed report");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StageError::io(&path, err)),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|path| path.is_file()).unwrap_or(false)
    }

    fn resolve(&self, name_or_path: &Path) -> Result<PathBuf, StageError> {
        if name_or_path.is_absolute() || name_or_path.components().count() > 1 {
            return Ok(name_or_path.to_path_buf());
        }
        let name = name_or_path
            .file_name()
            .and_then(OsStr::to_str)
            .unwrap_or_default();
        self.path_for(name)
    }
}
