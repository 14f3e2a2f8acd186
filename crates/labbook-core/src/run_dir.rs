use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

pub const METADATA_DIR: &str = "metadata";
pub const METRICS_DIR: &str = "metrics";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const KEYS_DIR: &str = ".keys";

/// Extension of metadata documents and key registries.
pub const YAML_EXT: &str = "yaml";
/// Extension of metric streams (one JSON object per line).
pub const METRICS_EXT: &str = "json";

/// Resolved layout of one run directory.
///
/// Every writer receives this handle instead of joining paths itself, so
/// there is a single place that decides where things live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectoryHandle {
    pub log_id: u64,
    pub log_dir: PathBuf,
    pub metadata_dir: PathBuf,
    pub metrics_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

impl RunDirectoryHandle {
    fn new(parent_dir: &Path, log_id: u64) -> Result<Self> {
        let log_dir = std::path::absolute(parent_dir)?.join(log_id.to_string());
        Ok(Self {
            log_id,
            metadata_dir: log_dir.join(METADATA_DIR),
            metrics_dir: log_dir.join(METRICS_DIR),
            artifacts_dir: log_dir.join(ARTIFACTS_DIR),
            log_dir,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.metadata_dir.join(format!("config.{YAML_EXT}"))
    }

    pub fn info_path(&self) -> PathBuf {
        self.metadata_dir.join(format!("info.{YAML_EXT}"))
    }

    pub fn framework_path(&self) -> PathBuf {
        self.metadata_dir.join(format!("framework.{YAML_EXT}"))
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.metrics_dir.join(KEYS_DIR)
    }

    pub fn metrics_path(&self, log_name: &str) -> Result<PathBuf> {
        validate_name(log_name)?;
        Ok(self.metrics_dir.join(format!("{log_name}.{METRICS_EXT}")))
    }

    pub fn keys_path(&self, log_name: &str) -> Result<PathBuf> {
        validate_name(log_name)?;
        Ok(self.keys_dir().join(format!("{log_name}.{YAML_EXT}")))
    }

    pub fn artifact_type_dir(&self, type_name: &str) -> Result<PathBuf> {
        validate_name(type_name)?;
        Ok(self.artifacts_dir.join(type_name))
    }

    pub fn artifact_path(&self, type_name: &str, log_name: &str) -> Result<PathBuf> {
        validate_name(log_name)?;
        Ok(self.artifact_type_dir(type_name)?.join(log_name))
    }
}

/// Create `parent_dir/<log_id>/{metadata,metrics,artifacts}`.
///
/// Idempotent: existing directories and their content are left untouched,
/// which is what resuming a forced id relies on.
pub fn materialize(parent_dir: &Path, log_id: u64) -> Result<RunDirectoryHandle> {
    let handle = RunDirectoryHandle::new(parent_dir, log_id)?;
    for dir in [&handle.metadata_dir, &handle.metrics_dir, &handle.artifacts_dir] {
        std::fs::create_dir_all(dir)?;
    }
    debug!(log_id, log_dir = %handle.log_dir.display(), "run directory materialized");
    Ok(handle)
}

/// Resolve the handle of a run that must already exist.
pub fn open(parent_dir: &Path, log_id: u64) -> Result<RunDirectoryHandle> {
    let handle = RunDirectoryHandle::new(parent_dir, log_id)?;
    if !handle.metadata_dir.is_dir() {
        return Err(Error::NotFound {
            path: handle.log_dir,
        });
    }
    Ok(handle)
}

/// Names become single path components, so separators and dot entries are
/// rejected.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_parent() -> PathBuf {
        std::env::temp_dir().join(format!("labbook_run_dir_{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn materialize_creates_layout_and_is_idempotent() {
        let parent = temp_parent().join("nested").join("logs");
        let handle = materialize(&parent, 3).expect("materialize");

        assert!(handle.log_dir.is_absolute());
        assert!(handle.metadata_dir.is_dir());
        assert!(handle.metrics_dir.is_dir());
        assert!(handle.artifacts_dir.is_dir());

        std::fs::write(handle.metrics_dir.join("train.json"), "{}\n").expect("seed");
        let again = materialize(&parent, 3).expect("materialize again");
        assert_eq!(again, handle);
        assert!(handle.metrics_dir.join("train.json").exists());
    }

    #[test]
    fn open_requires_existing_run() {
        let parent = temp_parent();
        let err = open(&parent, 9).expect_err("run 9 does not exist");
        assert!(err.is_not_found());

        materialize(&parent, 9).expect("materialize");
        assert_eq!(open(&parent, 9).expect("open").log_id, 9);
    }

    #[test]
    fn rejects_names_that_escape_their_directory() {
        for bad in ["", ".", "..", "a/b", "..\\x"] {
            assert!(matches!(validate_name(bad), Err(Error::InvalidName(_))), "{bad:?}");
        }
        validate_name("train.loss").expect("dots inside names are fine");
    }
}
