//! Whole-file replacement that never leaves a half-written file behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Write `contents` to a sibling temp file, then rename it over `path`.
///
/// Readers observe either the old content or the new content. On error the
/// temp file is removed and `path` is untouched. An existing file keeps its
/// permissions, and a symlinked `path` has its target replaced, not the link.
pub fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let path = resolve_symlink(path)?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let permissions = fs::metadata(&path)
        .ok()
        .filter(fs::Metadata::is_file)
        .map(|meta| meta.permissions());

    let tmp_path = temp_path_for(&path);
    let written = fs::write(&tmp_path, contents).and_then(|()| match permissions {
        Some(permissions) => fs::set_permissions(&tmp_path, permissions),
        None => Ok(()),
    });
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp_path, &path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

fn resolve_symlink(path: &Path) -> io::Result<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::canonicalize(path),
        _ => Ok(path.to_path_buf()),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}
