use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::allocator::{Allocation, RunIdAllocator};
use crate::artifacts::{self, Artifact};
use crate::metadata::{self, RunInfo, RunStatus};
use crate::metrics::{self, MetricRecord, MetricsWriter};
use crate::run_dir::{self, RunDirectoryHandle};
use crate::settings::{FrameworkDocument, FrameworkSettings};
use crate::version::VersionInfo;
use crate::Result;

/// Options for starting a run beyond the framework settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Configuration snapshot written to `metadata/config.yaml`.
    pub config: serde_json::Value,
    /// Launched program and its arguments, when the run wraps a child process.
    pub command: Option<Vec<String>>,
    /// Code snapshot for the `framework` document.
    pub code: Option<VersionInfo>,
}

impl RunOptions {
    pub fn with_config(config: serde_json::Value) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }
}

/// One run: its directory, metadata and writers.
#[derive(Debug)]
pub struct Logger {
    handle: RunDirectoryHandle,
    metrics: MetricsWriter,
    resumed: bool,
}

impl Logger {
    /// Allocate (or resume) a run id, lay out its directory and write the
    /// initial metadata with status RUNNING.
    ///
    /// When a freshly allocated run cannot be set up, its directory is
    /// removed before the error is returned. Resumed directories are never
    /// removed.
    pub fn new(settings: &FrameworkSettings, options: RunOptions) -> Result<Self> {
        let parent = &settings.logger.parent_log_dir;
        let allocation = RunIdAllocator::new(parent)
            .with_max_attempts(settings.allocator.max_attempts)
            .allocate_or_resume(settings.logger.forced_log_id)?;

        match Self::start(parent, allocation.id(), settings, options) {
            Ok(handle) => {
                info!(log_id = handle.log_id, log_dir = %handle.log_dir.display(), "run started");
                Ok(Self {
                    metrics: MetricsWriter::new(handle.clone()),
                    handle,
                    resumed: matches!(allocation, Allocation::Resumed(_)),
                })
            }
            Err(err) => {
                if allocation.is_fresh() {
                    let reserved = parent.join(allocation.id().to_string());
                    if let Err(cleanup) = std::fs::remove_dir_all(&reserved) {
                        warn!(path = %reserved.display(), error = %cleanup, "could not remove partial run directory");
                    }
                }
                Err(err)
            }
        }
    }

    fn start(
        parent: &Path,
        log_id: u64,
        settings: &FrameworkSettings,
        options: RunOptions,
    ) -> Result<RunDirectoryHandle> {
        let handle = run_dir::materialize(parent, log_id)?;
        let mut info = RunInfo::capture(&handle);
        if let Some(command) = &options.command {
            info = info.with_command(command);
        }
        let config = if options.config.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            options.config
        };
        let framework = FrameworkDocument::new(settings.clone(), options.code);
        metadata::write_initial(&handle, &config, &info, &framework)?;
        Ok(handle)
    }

    pub fn log_id(&self) -> u64 {
        self.handle.log_id
    }

    pub fn log_dir(&self) -> &Path {
        &self.handle.log_dir
    }

    pub fn handle(&self) -> &RunDirectoryHandle {
        &self.handle
    }

    /// True when the run id was forced rather than freshly allocated.
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn log_metrics(&mut self, record: &MetricRecord, log_name: &str) -> Result<()> {
        self.metrics.log_metrics(record, log_name)
    }

    /// Store `artifact` under its own type name.
    pub fn log_artifact<A: Artifact>(&self, artifact: &A, log_name: &str) -> Result<()> {
        artifacts::log_artifacts(&self.handle, artifact, log_name, A::TYPE_NAME)
    }

    pub fn load_artifact<A: Artifact>(&self, log_name: &str) -> Result<A> {
        artifacts::load_artifacts(&self.handle, log_name, A::TYPE_NAME)
    }

    pub fn log_checkpoint<T: Serialize>(&self, value: &T, log_name: &str) -> Result<()> {
        artifacts::log_checkpoint(&self.handle, value, log_name)
    }

    pub fn load_checkpoint<T: DeserializeOwned>(&self, log_name: &str) -> Result<T> {
        artifacts::load_checkpoint(&self.handle, log_name)
    }

    pub fn read_metrics(&self, log_name: &str) -> Result<Vec<MetricRecord>> {
        metrics::read_metrics(&self.handle, log_name)
    }

    pub fn registered_keys(&self, log_name: &str) -> Result<BTreeSet<String>> {
        metrics::registered_keys(&self.handle, log_name)
    }

    pub fn info(&self) -> Result<RunInfo> {
        metadata::read_info(&self.handle)
    }

    /// Set the terminal status, surfacing any failure.
    pub fn finish(self, status: RunStatus) -> Result<RunInfo> {
        metadata::update_status(&self.handle, status, None)
    }

    /// Set the terminal status; failures are logged and the run stays
    /// RUNNING on disk.
    pub fn finish_quietly(self, status: RunStatus) -> Option<RunInfo> {
        metadata::update_status_quietly(&self.handle, status)
    }
}

/// Error from [`launch`]: either the run could not start, or the job failed.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError<E> {
    #[error("run setup failed: {0}")]
    Setup(#[source] crate::Error),
    #[error("job failed: {0}")]
    Job(E),
}

/// Run `job` inside a new run and record how it ended.
///
/// `Ok` marks the run COMPLETE, `Err` marks it FAILED, a panic marks it
/// FAILED and then resumes unwinding. The final status update never changes
/// what `job` returned.
pub fn launch<T, E, F>(
    settings: &FrameworkSettings,
    options: RunOptions,
    job: F,
) -> std::result::Result<T, LaunchError<E>>
where
    F: FnOnce(&mut Logger) -> std::result::Result<T, E>,
{
    let mut logger = Logger::new(settings, options).map_err(LaunchError::Setup)?;
    let outcome = catch_unwind(AssertUnwindSafe(|| job(&mut logger)));
    match outcome {
        Ok(Ok(value)) => {
            logger.finish_quietly(RunStatus::Complete);
            Ok(value)
        }
        Ok(Err(err)) => {
            logger.finish_quietly(RunStatus::Failed);
            Err(LaunchError::Job(err))
        }
        Err(panic) => {
            logger.finish_quietly(RunStatus::Failed);
            resume_unwind(panic)
        }
    }
}
