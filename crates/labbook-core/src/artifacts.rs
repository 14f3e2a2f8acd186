//! Typed artifacts stored under `artifacts/<type_name>/<log_name>`.
//!
//! The store only decides placement and atomic replacement; the encoding
//! belongs to each [`Artifact`] implementation. Writing the same pair again
//! replaces the previous content, no history is kept.

use std::io::{Read, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::atomic::replace_atomic;
use crate::run_dir::RunDirectoryHandle;
use crate::{Error, Result};

pub const CHECKPOINT_TYPE: &str = "Checkpoint";

const CHECKPOINT_MAGIC: &[u8; 4] = b"LBCK";
const CHECKPOINT_VERSION: u32 = 1;
const CHECKPOINT_HEADER_SIZE: usize = 4 + 4;

/// An object that knows how to persist itself.
///
/// `save` writes to the path it is given (the store hands it a temp file
/// and renames it afterwards). `load` must report undecodable content as
/// [`Error::Deserialization`].
pub trait Artifact: Sized {
    /// Directory name under `artifacts/`.
    const TYPE_NAME: &'static str;

    fn save(&self, path: &Path) -> Result<()>;

    fn load(path: &Path) -> Result<Self>;
}

/// Resumable run state, encoded as compact JSON behind a small header.
///
/// Non-finite floats are written as `null` and do not load back into `f64`
/// fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint<T>(pub T);

impl<T: Serialize + DeserializeOwned> Artifact for Checkpoint<T> {
    const TYPE_NAME: &'static str = CHECKPOINT_TYPE;

    fn save(&self, path: &Path) -> Result<()> {
        encode_checkpoint(path, &self.0)
    }

    fn load(path: &Path) -> Result<Self> {
        decode_checkpoint(path).map(Checkpoint)
    }
}

/// Any serde value stored as pretty JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonArtifact<T>(pub T);

impl<T: Serialize + DeserializeOwned> Artifact for JsonArtifact<T> {
    const TYPE_NAME: &'static str = "JsonArtifact";

    fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.0)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)
            .map(JsonArtifact)
            .map_err(|err| Error::corrupt(path, err))
    }
}

fn encode_checkpoint<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload =
        serde_json::to_vec(value).map_err(|err| Error::Serialization(err.to_string()))?;
    let mut file = std::fs::File::create(path)?;
    file.write_all(CHECKPOINT_MAGIC)?;
    file.write_all(&CHECKPOINT_VERSION.to_le_bytes())?;
    file.write_all(&payload)?;
    Ok(())
}

fn decode_checkpoint<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut bytes = Vec::new();
    std::fs::File::open(path)?.read_to_end(&mut bytes)?;

    if bytes.len() < CHECKPOINT_HEADER_SIZE || &bytes[..4] != CHECKPOINT_MAGIC {
        return Err(Error::corrupt(path, "missing checkpoint header"));
    }
    let mut version = [0_u8; 4];
    version.copy_from_slice(&bytes[4..CHECKPOINT_HEADER_SIZE]);
    let version = u32::from_le_bytes(version);
    if version != CHECKPOINT_VERSION {
        return Err(Error::corrupt(
            path,
            format!("unsupported checkpoint version {version}"),
        ));
    }
    serde_json::from_slice(&bytes[CHECKPOINT_HEADER_SIZE..]).map_err(|err| Error::corrupt(path, err))
}

/// Persist `artifact` at `artifacts/<type_name>/<log_name>`, replacing any
/// previous content atomically. `type_name` must be the artifact's own
/// [`Artifact::TYPE_NAME`].
pub fn log_artifacts<A: Artifact>(
    handle: &RunDirectoryHandle,
    artifact: &A,
    log_name: &str,
    type_name: &str,
) -> Result<()> {
    check_type_name::<A>(type_name)?;
    let path = handle.artifact_path(type_name, log_name)?;
    replace_atomic(&path, |tmp_path| artifact.save(tmp_path))?;
    info!(log_id = handle.log_id, type_name, log_name, "artifact saved");
    Ok(())
}

/// Read back an artifact written with [`log_artifacts`].
pub fn load_artifacts<A: Artifact>(
    handle: &RunDirectoryHandle,
    log_name: &str,
    type_name: &str,
) -> Result<A> {
    check_type_name::<A>(type_name)?;
    let path = handle.artifact_path(type_name, log_name)?;
    if !path.is_file() {
        return Err(Error::NotFound { path });
    }
    A::load(&path)
}

fn check_type_name<A: Artifact>(type_name: &str) -> Result<()> {
    if type_name != A::TYPE_NAME {
        return Err(Error::ArtifactType {
            declared: A::TYPE_NAME,
            requested: type_name.to_string(),
        });
    }
    Ok(())
}

pub fn log_checkpoint<T: Serialize>(
    handle: &RunDirectoryHandle,
    value: &T,
    log_name: &str,
) -> Result<()> {
    let path = handle.artifact_path(CHECKPOINT_TYPE, log_name)?;
    replace_atomic(&path, |tmp_path| encode_checkpoint(tmp_path, value))?;
    info!(log_id = handle.log_id, log_name, "checkpoint saved");
    Ok(())
}

/// Latest checkpoint written under `log_name`.
///
/// [`Error::NotFound`] means no checkpoint exists yet and starting fresh is
/// safe; [`Error::Deserialization`] means one exists but is unreadable.
pub fn load_checkpoint<T: DeserializeOwned>(handle: &RunDirectoryHandle, log_name: &str) -> Result<T> {
    let path = handle.artifact_path(CHECKPOINT_TYPE, log_name)?;
    if !path.is_file() {
        return Err(Error::NotFound { path });
    }
    decode_checkpoint(&path)
}

/// Names stored under `type_name`, sorted. Temp files are not listed.
pub fn list_artifacts(handle: &RunDirectoryHandle, type_name: &str) -> Result<Vec<String>> {
    let dir = handle.artifact_type_dir(type_name)?;
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) if !name.starts_with('.') => names.push(name.to_string()),
            _ => {}
        }
    }
    names.sort();
    Ok(names)
}
