use std::fs::{OpenOptions, create_dir_all};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::{Error, Result};

/// Serialize `value` as YAML and replace `path` with it atomically.
pub fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_yaml::to_string(value)?;
    write_bytes_atomic(path, data.as_bytes())
}

/// Replace `path` with `data` so readers observe either the old or the new
/// content, never a truncated file.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> Result<()> {
    replace_atomic(path, |tmp_path| write_file(tmp_path, data).map_err(Error::from))
}

/// Let `fill` produce the new content of `path` in a sibling temp file, then
/// rename it into place. The temp file is removed if `fill` fails.
pub fn replace_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            create_dir_all(parent)?;
        }
    }

    let tmp_path = temp_path(path)?;
    let filled = fill(&tmp_path)
        .and_then(|()| std::fs::File::open(&tmp_path)?.sync_all().map_err(Error::from))
        .and_then(|()| std::fs::rename(&tmp_path, path).map_err(Error::from));
    if let Err(err) = filled {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            sync_dir(parent)?;
        }
    }

    Ok(())
}

/// Append `line` plus a newline with a single write call.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(buf.as_bytes())?;
    Ok(())
}

fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    file.write_all(data)
}

// Unique per writer so two processes never share a temp file.
fn temp_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidName(path.display().to_string()))?;
    let tmp_name = format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    );
    Ok(path.with_file_name(tmp_name))
}

#[cfg(unix)]
fn sync_dir(path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(path)?;
    dir.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
