//! Run metadata documents.
//!
//! `metadata/` holds three YAML documents: `config` (what the run was asked
//! to do), `info` (runtime facts and lifecycle status) and `framework`
//! (settings and code snapshot used to produce the run). Only `info` is
//! rewritten after start, always through a temp file and a rename.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Local};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::atomic::write_yaml_atomic;
use crate::run_dir::RunDirectoryHandle;
use crate::settings::FrameworkDocument;
use crate::{Error, Result};

const DATE_FORMAT: &str = "%d/%m/%Y";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Complete,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(Self::Running),
            "COMPLETE" => Ok(Self::Complete),
            "FAILED" => Ok(Self::Failed),
            "INTERRUPTED" => Ok(Self::Interrupted),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// The `info` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunInfo {
    pub executable: String,
    pub cmd: String,
    pub end_date: Option<String>,
    pub end_time: Option<String>,
    pub current_file_path: String,
    pub log_dir: String,
    pub log_id: u64,
    pub process_id: u32,
    pub start_date: String,
    pub start_time: String,
    pub status: RunStatus,
    pub user: String,
    pub work_dir: String,
}

impl RunInfo {
    /// Snapshot the current process as a freshly started run.
    pub fn capture(handle: &RunDirectoryHandle) -> Self {
        let started = Local::now();
        let args: Vec<String> = std::env::args().collect();
        let executable = std::env::current_exe()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        let work_dir = std::env::current_dir()
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        Self {
            executable,
            cmd: args.join(" "),
            end_date: None,
            end_time: None,
            current_file_path: args.first().cloned().unwrap_or_default(),
            log_dir: handle.log_dir.display().to_string(),
            log_id: handle.log_id,
            process_id: std::process::id(),
            start_date: started.format(DATE_FORMAT).to_string(),
            start_time: started.format(TIME_FORMAT).to_string(),
            status: RunStatus::Running,
            user: current_user(),
            work_dir,
        }
    }

    /// Record a launched program instead of this process's own arguments.
    pub fn with_command(mut self, command: &[String]) -> Self {
        if let Some(program) = command.first() {
            self.current_file_path = program.clone();
        }
        self.cmd = command.join(" ");
        self
    }

    fn terminate(&mut self, status: RunStatus, ended: DateTime<Local>) {
        self.status = status;
        self.end_date = Some(ended.format(DATE_FORMAT).to_string());
        self.end_time = Some(ended.format(TIME_FORMAT).to_string());
    }
}

fn current_user() -> String {
    ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Write the three metadata documents of a starting run.
///
/// `info` is written last so a reader that sees a RUNNING `info` can rely
/// on `config` and `framework` being present.
pub fn write_initial(
    handle: &RunDirectoryHandle,
    config: &serde_json::Value,
    runtime_info: &RunInfo,
    framework: &FrameworkDocument,
) -> Result<()> {
    write_yaml_atomic(&handle.config_path(), config)?;
    write_yaml_atomic(&handle.framework_path(), framework)?;
    write_yaml_atomic(&handle.info_path(), runtime_info)?;
    info!(log_id = handle.log_id, status = %runtime_info.status, "metadata written");
    Ok(())
}

pub fn read_info(handle: &RunDirectoryHandle) -> Result<RunInfo> {
    let path = handle.info_path();
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound { path });
        }
        Err(err) => return Err(err.into()),
    };
    serde_yaml::from_str(&content).map_err(|err| Error::corrupt(&path, err))
}

pub fn read_framework(handle: &RunDirectoryHandle) -> Result<FrameworkDocument> {
    let path = handle.framework_path();
    if !path.exists() {
        return Err(Error::NotFound { path });
    }
    let content = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&content).map_err(|err| Error::corrupt(&path, err))
}

/// Move the run from RUNNING to a terminal status.
///
/// IO failures are retried once before being returned. The rewrite goes
/// through a temp file, so a crash at any point leaves either the previous
/// RUNNING document or the final one.
pub fn update_status(
    handle: &RunDirectoryHandle,
    status: RunStatus,
    end_time: Option<DateTime<Local>>,
) -> Result<RunInfo> {
    update_status_with(handle, status, end_time, write_yaml_atomic::<RunInfo>)
}

/// Like [`update_status`] but never fails: the error is logged and the
/// persisted document stays RUNNING, which marks the run as orphaned.
pub fn update_status_quietly(handle: &RunDirectoryHandle, status: RunStatus) -> Option<RunInfo> {
    settle_quietly(handle, status, update_status(handle, status, None))
}

fn update_status_with<W>(
    handle: &RunDirectoryHandle,
    status: RunStatus,
    end_time: Option<DateTime<Local>>,
    write: W,
) -> Result<RunInfo>
where
    W: Fn(&Path, &RunInfo) -> Result<()>,
{
    let ended = end_time.unwrap_or_else(Local::now);
    match rewrite_status(handle, status, ended, &write) {
        Err(Error::Io(err)) => {
            warn!(log_id = handle.log_id, error = %err, "status update failed, retrying once");
            rewrite_status(handle, status, ended, &write)
        }
        other => other,
    }
}

fn settle_quietly(
    handle: &RunDirectoryHandle,
    status: RunStatus,
    result: Result<RunInfo>,
) -> Option<RunInfo> {
    match result {
        Ok(info) => Some(info),
        Err(err) => {
            error!(
                log_id = handle.log_id,
                status = %status,
                error = %err,
                "final status update failed; run left as RUNNING"
            );
            None
        }
    }
}

fn rewrite_status<W>(
    handle: &RunDirectoryHandle,
    status: RunStatus,
    ended: DateTime<Local>,
    write: &W,
) -> Result<RunInfo>
where
    W: Fn(&Path, &RunInfo) -> Result<()>,
{
    let mut info = read_info(handle)?;
    if info.status.is_terminal() || !status.is_terminal() {
        return Err(Error::InvalidStatusTransition {
            from: info.status,
            to: status,
        });
    }
    info.terminate(status, ended);
    write(&handle.info_path(), &info)?;
    info!(log_id = handle.log_id, status = %status, "run status updated");
    Ok(info)
}
