//! Run logging for parameterized training jobs.
//!
//! Each run gets a numbered directory under a parent log directory:
//!
//! ```text
//! <parent>/<log_id>/
//!   metadata/{config,info,framework}.yaml
//!   metrics/<log_name>.json        one record per line
//!   metrics/.keys/<log_name>.yaml  keys seen in that stream
//!   artifacts/<type_name>/<log_name>
//! ```
//!
//! [`Logger`] drives the lifecycle; the per-concern modules can also be used
//! directly with a [`RunDirectoryHandle`].

pub mod allocator;
pub mod artifacts;
pub mod atomic;
pub mod error;
pub mod logger;
pub mod metadata;
pub mod metrics;
pub mod run_dir;
pub mod settings;
pub mod version;

pub use allocator::{Allocation, RunIdAllocator};
pub use artifacts::{
    Artifact, CHECKPOINT_TYPE, Checkpoint, JsonArtifact, list_artifacts, load_artifacts,
    load_checkpoint, log_artifacts, log_checkpoint,
};
pub use error::{Error, Result};
pub use logger::{LaunchError, Logger, RunOptions, launch};
pub use metadata::{RunInfo, RunStatus, read_info, update_status, write_initial};
pub use metrics::{MetricRecord, MetricsWriter, Scalar, log_metrics, read_metrics, registered_keys};
pub use run_dir::{RunDirectoryHandle, materialize};
pub use settings::{FrameworkDocument, FrameworkSettings, load_settings};
pub use version::VersionInfo;
