//! Run id allocation.
//!
//! Ids are re-derived from the parent directory listing on every call, so
//! they stay consistent across process restarts. Uniqueness between
//! concurrent processes is arbitrated by `create_dir`, which fails with
//! `AlreadyExists` for every caller but one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{Error, Result};

/// Collisions tolerated before giving up on a fresh id.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// Outcome of [`RunIdAllocator::allocate_or_resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// A new id whose directory this call created.
    Fresh(u64),
    /// A caller-forced id; its directory may or may not hold prior data.
    Resumed(u64),
}

impl Allocation {
    pub fn id(self) -> u64 {
        match self {
            Self::Fresh(id) | Self::Resumed(id) => id,
        }
    }

    pub fn is_fresh(self) -> bool {
        matches!(self, Self::Fresh(_))
    }
}

/// Hands out log ids under one parent log directory.
#[derive(Debug, Clone)]
pub struct RunIdAllocator {
    parent: PathBuf,
    max_attempts: u32,
}

impl RunIdAllocator {
    pub fn new(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: parent.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Return `forced_id` unchanged when it is positive, otherwise reserve
    /// the next id above every existing run directory.
    pub fn allocate_or_resume(&self, forced_id: Option<i64>) -> Result<Allocation> {
        if let Some(id) = forced_id.filter(|id| *id > 0) {
            // i64 > 0 always fits in u64.
            let id = id.unsigned_abs();
            info!(log_id = id, parent = %self.parent.display(), "resuming forced run id");
            return Ok(Allocation::Resumed(id));
        }
        self.allocate().map(Allocation::Fresh)
    }

    fn allocate(&self) -> Result<u64> {
        std::fs::create_dir_all(&self.parent)?;
        let mut candidate = next_log_id(list_entry_names(&self.parent)?);

        for attempt in 1..=self.max_attempts {
            match std::fs::create_dir(self.parent.join(candidate.to_string())) {
                Ok(()) => {
                    info!(log_id = candidate, parent = %self.parent.display(), "allocated run id");
                    return Ok(candidate);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    debug!(log_id = candidate, attempt, "run id taken, retrying");
                    candidate = match candidate.checked_add(1) {
                        Some(next) => next,
                        None => break,
                    };
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::Allocation {
            parent: self.parent.clone(),
            attempts: self.max_attempts,
        })
    }
}

/// Smallest id greater than every run id among `names`.
pub fn next_log_id<I, S>(names: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| parse_log_id(name.as_ref()))
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// Parse a canonical run directory name (`"12"`, not `"012"` or `"0"`).
pub fn parse_log_id(name: &str) -> Option<u64> {
    let id: u64 = name.parse().ok()?;
    (id > 0 && id.to_string() == name).then_some(id)
}

fn list_entry_names(path: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_id_skips_non_run_entries() {
        assert_eq!(next_log_id(Vec::<String>::new()), 1);
        assert_eq!(next_log_id(["1", "2", "7"]), 8);
        assert_eq!(next_log_id(["scratch", "0", "007", "3"]), 4);
    }

    #[test]
    fn parses_only_canonical_ids() {
        assert_eq!(parse_log_id("42"), Some(42));
        assert_eq!(parse_log_id("0"), None);
        assert_eq!(parse_log_id("-3"), None);
        assert_eq!(parse_log_id("042"), None);
        assert_eq!(parse_log_id("+4"), None);
    }

    #[test]
    fn forced_ids_are_returned_unchanged() {
        let allocator = RunIdAllocator::new("/nonexistent/labbook");
        let allocation = allocator.allocate_or_resume(Some(12)).expect("resume");
        assert_eq!(allocation, Allocation::Resumed(12));
        assert!(!allocation.is_fresh());
    }

    #[test]
    fn non_positive_forced_ids_allocate_fresh() {
        let parent = std::env::temp_dir().join(format!("labbook_alloc_{}", uuid::Uuid::new_v4()));
        let allocator = RunIdAllocator::new(&parent);

        let first = allocator.allocate_or_resume(Some(0)).expect("allocate");
        let second = allocator.allocate_or_resume(Some(-5)).expect("allocate");

        assert_eq!(first, Allocation::Fresh(1));
        assert_eq!(second, Allocation::Fresh(2));
        assert!(parent.join("2").is_dir());
    }

    #[test]
    fn gives_up_after_bounded_collisions() {
        let parent = std::env::temp_dir().join(format!("labbook_alloc_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(parent.join("1")).expect("seed run 1");
        // Plain files are not runs, but they still occupy the names.
        std::fs::write(parent.join("2"), b"").expect("seed file 2");
        std::fs::write(parent.join("3"), b"").expect("seed file 3");

        let err = RunIdAllocator::new(&parent)
            .with_max_attempts(2)
            .allocate_or_resume(None)
            .expect_err("both candidates are taken");
        assert!(matches!(err, Error::Allocation { attempts: 2, .. }));

        let allocation = RunIdAllocator::new(&parent)
            .allocate_or_resume(None)
            .expect("third candidate is free");
        assert_eq!(allocation.id(), 4);
    }
}
