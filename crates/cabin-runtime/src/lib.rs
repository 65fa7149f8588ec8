//! Container engine layer for Cabin environments.
//!
//! Everything here speaks to a container engine through the `RuntimeBackend`
//! trait: the Docker/Podman CLI backend, an in-process mock used by tests, the
//! engine-neutral build script, prerequisite checks, and terminal helpers.

pub mod backend;
pub mod buildfile;
pub mod docker;
pub mod mock;
pub mod prereq;
pub mod terminal;

pub use backend::{select_backend, ExecRequest, InstanceSpec, RuntimeBackend};
pub use buildfile::{
    materialize_context, BuildRequest, BuildScript, BuildStep, ContextFile, ContextSource,
    Instruction, Stage, BUILD_FILE_NAME, SESSION_BINARY_PATH,
};
pub use docker::DockerBackend;
pub use mock::{MockBackend, MockCall};
pub use prereq::{check_engine_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("instance '{0}' is not running")]
    NotRunning(String),
    #[error("instance '{0}' is already running")]
    AlreadyRunning(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("building image '{tag}' failed with exit code {code}")]
    BuildFailed { tag: String, code: i32 },
    #[error("interrupted")]
    Interrupted,
    #[error("engine state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
