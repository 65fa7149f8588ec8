//! Durable per-user state for Cabin environments.
//!
//! This crate provides the storage layer: `StoreLayout` for the config root
//! directory structure, `RuntimeConfigStore` for the residual configuration
//! each successful build leaves behind, `ImageRegistry` for the mapping from
//! environment names to definition directories, and `Settings` for user
//! preferences. All writes are atomic (temp file, fsync, rename, dir fsync).

pub mod images;
pub mod layout;
pub mod runtime_config;
pub mod settings;

pub use images::{ImageRecord, ImageRegistry};
pub use layout::{StoreLayout, CONFIG_DIR_ENV, STORE_FORMAT_VERSION};
pub use runtime_config::{RuntimeConfig, RuntimeConfigStore, RUNTIME_CONFIG_VERSION};
pub use settings::{Settings, DEFAULT_STOP_TIMEOUT_SECS, ENGINE_ENV};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `dest` with `content` atomically.
pub(crate) fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for runtime config '{name}': expected {expected}, got {actual}")]
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("no runtime config for environment '{0}'")]
    ConfigNotFound(String),
    #[error("no image named '{0}'")]
    ImageNotFound(String),
    #[error("an image named '{0}' already exists")]
    NameConflict(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    ParseSettings(#[from] toml::de::Error),
}
