//! Core orchestration for Cabin environments.
//!
//! This crate ties the definition schema, the side-store and the engine
//! backends together: the compiler turning an `EnvironmentSpec` into a build
//! script and runtime config, and the `Manager` driving each environment
//! through `absent -> built -> running`, dispatching commands and hooks.

pub mod compiler;
pub mod concurrency;
pub mod hooks;
pub mod lifecycle;
pub mod manager;
pub mod workdir;

pub use compiler::{compile, CompileOptions, CompiledBuild};
pub use concurrency::{install_signal_handler, shutdown_requested, EnvLock, ForwardGuard};
pub use hooks::run_runtime_hooks;
pub use lifecycle::{validate_transition, EnvState};
pub use manager::{
    parse_env_assignments, BuildOptions, BuildOutcome, ImageSummary, Manager, RunRequest,
    StatusReport,
};
pub use workdir::{resolve_workdir, translate_path, CdMode};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("definition error: {0}")]
    Declaration(#[from] cabin_schema::DeclarationError),
    #[error("store error: {0}")]
    Store(#[from] cabin_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] cabin_runtime::RuntimeError),
    #[error("build of '{name}' failed (engine exit code {code})")]
    BuildFailed { name: String, code: i32 },
    #[error("environment '{0}' is not built, run 'cabin build {0}' first")]
    NotBuilt(String),
    #[error("current directory {} is not shared with the environment (use --no-cd or --auto-cd)", .path.display())]
    PathNotShared { path: PathBuf },
    #[error("environment '{0}' is running, stop it first or use --force")]
    StillRunning(String),
    #[error("session binary not found at {}", .0.display())]
    SessionBinaryNotFound(PathBuf),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
