//! Environment definitions for Cabin.
//!
//! This crate defines the schema layer: the `cabin.toml` declaration format
//! (`DefinitionFile`), the typed builder declarations apply themselves to
//! (`DefinitionBuilder`), relative-path resolution against the declaring file,
//! and the frozen, validated `EnvironmentSpec` that the compiler consumes.

pub mod builder;
pub mod declaration;
pub mod definition;
pub mod host;
pub mod types;

pub use builder::{normalize_lexically, DefinitionBuilder, MAX_IMPORT_DEPTH};
pub use declaration::{
    parse_definition_file, parse_definition_str, Declaration, DefinitionFile, DefinitionLoader,
    FileLoader, HookCommand, LoadedDefinition, DEFINITION_FILE, DEFINITION_TEMPLATE,
};
pub use definition::{
    Architecture, Consistency, CopiedFile, Distro, EnvironmentSpec, HookPhase, HookTable,
    PackageFamily, PathMapping, SudoMode,
};
pub use host::HostSystem;
pub use types::{EnvName, ImageTag};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("failed to read definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse definition: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("no definition found at {}", .0.display())]
    DefinitionNotFound(PathBuf),
    #[error("invalid environment name {0}")]
    InvalidName(String),
    #[error("unsupported distro '{0}' (expected one of: ubuntu, debian, fedora, centos)")]
    UnsupportedDistro(String),
    #[error("invalid {field}: '{value}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("architecture {architecture} is not available for {distro}")]
    UnsupportedArchitecture {
        distro: String,
        architecture: Architecture,
    },
    #[error("guest path must be absolute: {}", .0.display())]
    RelativeGuestPath(PathBuf),
    #[error("invalid home share '{}': {reason}", .path.display())]
    InvalidHomeShare { path: PathBuf, reason: &'static str },
    #[error("the host home directory {} cannot be shared directly, use share_whole_home", .0.display())]
    HostHomeShared(PathBuf),
    #[error("guest path {} is shared more than once", .0.display())]
    DuplicateGuestPath(PathBuf),
    #[error("guest path {} is the user home, which is already mapped", .0.display())]
    GuestPathIsUserHome(PathBuf),
    #[error("mounted path {} contains ':', which engine volume options cannot express", .0.display())]
    ColonInMountPath(PathBuf),
    #[error("empty command for {0} hook")]
    EmptyCommand(HookPhase),
    #[error("definition import cycle through {}", .0.display())]
    ImportCycle(PathBuf),
    #[error("definition imports nested deeper than {0} levels")]
    ImportTooDeep(usize),
}
