use std::path::Path;
use std::process::Command;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Code snapshot recorded in the `framework` document for reproducibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VersionInfo {
    pub commit_hash: Option<String>,
    pub dirty: Option<bool>,
    pub repo_path: Option<String>,
}

impl VersionInfo {
    /// Ask git about the repository containing the current directory.
    pub fn collect() -> Self {
        Self::collect_in(Path::new("."))
    }

    /// Missing git or a directory outside any repository yields empty
    /// fields rather than an error.
    pub fn collect_in(dir: &Path) -> Self {
        let repo_path = git_stdout(dir, &["rev-parse", "--show-toplevel"]);
        if repo_path.is_none() {
            return Self {
                commit_hash: None,
                dirty: None,
                repo_path: None,
            };
        }

        let commit_hash = git_stdout(dir, &["rev-parse", "HEAD"]);
        let dirty = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(dir)
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| !output.stdout.is_empty());

        Self {
            commit_hash,
            dirty,
            repo_path,
        }
    }
}

fn git_stdout(dir: &Path, args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_a_repository_everything_is_empty() {
        let dir = std::env::temp_dir().join(format!("labbook_version_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");

        let info = VersionInfo::collect_in(&dir);
        // The temp dir could sit inside a checkout on some machines.
        if info.repo_path.is_none() {
            assert_eq!(info.commit_hash, None);
            assert_eq!(info.dirty, None);
        }
    }
}
