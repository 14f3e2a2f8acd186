//! Append-only metric streams.
//!
//! Each stream `metrics/<log_name>.json` holds one JSON object per line, in
//! call order. `metrics/.keys/<log_name>.yaml` lists every key the stream
//! has ever contained, so readers learn the schema without scanning the log.
//!
//! One writer per stream is assumed. Two processes appending to the same
//! stream may interleave lines and race on the key registry; that is the
//! caller's responsibility to avoid.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::atomic::{append_line, write_yaml_atomic};
use crate::run_dir::{METRICS_EXT, RunDirectoryHandle};
use crate::{Error, Result};

/// A scalar metric value.
///
/// Non-finite floats are stored as JSON `null` and read back as [`Scalar::Null`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for Scalar {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or(Self::Float(value as f64), Self::Int)
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// One flat metric record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricRecord(BTreeMap<String, Scalar>);

impl MetricRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Scalar>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for MetricRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// Appends records to the streams of one run and keeps their key registries.
///
/// Registries are loaded lazily on the first record of a stream and only
/// rewritten when a record brings a key not seen before. Each rewrite merges
/// with the registry on disk, so writers sharing a stream in one process
/// never drop each other's keys.
#[derive(Debug)]
pub struct MetricsWriter {
    handle: RunDirectoryHandle,
    known_keys: HashMap<String, BTreeSet<String>>,
}

impl MetricsWriter {
    pub fn new(handle: RunDirectoryHandle) -> Self {
        Self {
            handle,
            known_keys: HashMap::new(),
        }
    }

    pub fn log_metrics(&mut self, record: &MetricRecord, log_name: &str) -> Result<()> {
        let log_path = self.handle.metrics_path(log_name)?;
        if !self.known_keys.contains_key(log_name) {
            let keys = registered_keys(&self.handle, log_name)?;
            self.known_keys.insert(log_name.to_string(), keys);
        }
        let keys = self
            .known_keys
            .entry(log_name.to_string())
            .or_default();

        // Registry first: a key present in the log is always in the registry.
        if record.keys().any(|key| !keys.contains(key)) {
            // Another writer may have registered keys since the cache was loaded.
            let mut merged = registered_keys(&self.handle, log_name)?;
            merged.extend(keys.iter().cloned());
            merged.extend(record.keys().map(str::to_string));
            write_keys(&self.handle, log_name, &merged)?;
            debug!(log_name, keys = merged.len(), "key registry updated");
            *keys = merged;
        }

        append_line(&log_path, &serde_json::to_string(record)?)
    }
}

/// Stateless form of [`MetricsWriter::log_metrics`]: reads, merges and
/// rewrites the registry on every call.
pub fn log_metrics(handle: &RunDirectoryHandle, record: &MetricRecord, log_name: &str) -> Result<()> {
    MetricsWriter::new(handle.clone()).log_metrics(record, log_name)
}

/// Keys ever logged to `log_name`; empty when the stream does not exist.
pub fn registered_keys(handle: &RunDirectoryHandle, log_name: &str) -> Result<BTreeSet<String>> {
    let path = handle.keys_path(log_name)?;
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let content = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&content).map_err(|err| Error::corrupt(&path, err))
}

fn write_keys(handle: &RunDirectoryHandle, log_name: &str, keys: &BTreeSet<String>) -> Result<()> {
    write_yaml_atomic(&handle.keys_path(log_name)?, keys)
}

/// Records of `log_name` in the order they were appended.
///
/// A final line without its newline is the trace of an interrupted append
/// and is skipped; any other unreadable line is an error.
pub fn read_metrics(handle: &RunDirectoryHandle, log_name: &str) -> Result<Vec<MetricRecord>> {
    let path = handle.metrics_path(log_name)?;
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound { path });
        }
        Err(err) => return Err(err.into()),
    };

    let complete = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let mut records = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MetricRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) if !complete && idx + 1 == lines.len() => {
                warn!(log_name, error = %err, "skipping torn trailing metric line");
            }
            Err(err) => {
                return Err(Error::corrupt(&path, format!("line {}: {err}", idx + 1)));
            }
        }
    }
    Ok(records)
}

/// Names of the metric streams present in the run, sorted.
pub fn list_streams(handle: &RunDirectoryHandle) -> Result<Vec<String>> {
    let suffix = format!(".{METRICS_EXT}");
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&handle.metrics_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str().and_then(|n| n.strip_suffix(&suffix)) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}
