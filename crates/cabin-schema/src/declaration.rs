//! Declarations: anything able to apply itself to a [`DefinitionBuilder`].
//!
//! The on-disk form is `cabin.toml`, a data-only file, so evaluating a
//! definition never runs user code on the host.

use crate::builder::DefinitionBuilder;
use crate::definition::{Architecture, Consistency, HookPhase, SudoMode};
use crate::DeclarationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of a definition inside its directory.
pub const DEFINITION_FILE: &str = "cabin.toml";

pub trait Declaration {
    fn setup(&self, def: &mut DefinitionBuilder) -> Result<(), DeclarationError>;
}

impl<F> Declaration for F
where
    F: Fn(&mut DefinitionBuilder) -> Result<(), DeclarationError>,
{
    fn setup(&self, def: &mut DefinitionBuilder) -> Result<(), DeclarationError> {
        self(def)
    }
}

/// A declaration together with the file it was read from.
pub struct LoadedDefinition {
    pub path: PathBuf,
    pub declaration: Box<dyn Declaration>,
}

/// Finds the definition stored in a directory.
pub trait DefinitionLoader {
    fn load(&self, dir: &Path) -> Result<LoadedDefinition, DeclarationError>;
}

impl<F> DefinitionLoader for F
where
    F: Fn(&Path) -> Result<LoadedDefinition, DeclarationError>,
{
    fn load(&self, dir: &Path) -> Result<LoadedDefinition, DeclarationError> {
        self(dir)
    }
}

/// Reads `<dir>/cabin.toml`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl DefinitionLoader for FileLoader {
    fn load(&self, dir: &Path) -> Result<LoadedDefinition, DeclarationError> {
        let path = dir.join(DEFINITION_FILE);
        if !path.is_file() {
            return Err(DeclarationError::DefinitionNotFound(path));
        }
        let file = parse_definition_file(&path)?;
        Ok(LoadedDefinition {
            path,
            declaration: Box::new(file),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DefinitionFile {
    #[serde(default)]
    pub import: Vec<PathBuf>,
    pub distro: Option<String>,
    pub architecture: Option<Architecture>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub additional_archs: Vec<String>,
    pub username: Option<String>,
    pub uid: Option<u32>,
    pub user_home: Option<PathBuf>,
    pub hostname: Option<String>,
    pub sudo: Option<SudoMode>,
    pub maintainer: Option<String>,
    pub default_consistency: Option<Consistency>,
    pub image_home_path_on_host: Option<PathBuf>,
    #[serde(default)]
    pub share_whole_home: bool,
    #[serde(default)]
    pub share: Vec<ShareEntry>,
    #[serde(default)]
    pub share_in_home: Vec<HomeShareEntry>,
    #[serde(default)]
    pub copy: Vec<CopyEntry>,
    #[serde(default)]
    pub hook: Vec<HookEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ShareEntry {
    pub host: PathBuf,
    pub guest: Option<PathBuf>,
    pub consistency: Option<Consistency>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HomeShareEntry {
    pub path: PathBuf,
    pub consistency: Option<Consistency>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CopyEntry {
    pub src: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HookEntry {
    pub when: HookPhase,
    pub command: HookCommand,
}

/// A hook is either an argument vector or a single shell snippet.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum HookCommand {
    Argv(Vec<String>),
    Shell(String),
}

impl HookCommand {
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            Self::Argv(argv) => argv.clone(),
            Self::Shell(script) => vec!["/bin/sh".to_owned(), "-c".to_owned(), script.clone()],
        }
    }
}

impl Declaration for DefinitionFile {
    fn setup(&self, def: &mut DefinitionBuilder) -> Result<(), DeclarationError> {
        for dir in &self.import {
            def.import_definition(dir)?;
        }

        if let Some(distro) = &self.distro {
            def.set_distro(distro)?;
        }
        if let Some(arch) = self.architecture {
            def.set_architecture(arch);
        }
        if let Some(username) = &self.username {
            def.set_username(username)?;
        }
        if let Some(uid) = self.uid {
            def.set_uid(uid);
        }
        if let Some(home) = &self.user_home {
            def.set_user_home(home)?;
        }
        if let Some(hostname) = &self.hostname {
            def.set_hostname(hostname);
        }
        if let Some(sudo) = self.sudo {
            def.set_sudo(sudo);
        }
        if let Some(maintainer) = &self.maintainer {
            def.set_maintainer(maintainer);
        }
        if let Some(consistency) = self.default_consistency {
            def.set_default_consistency(consistency);
        }
        if let Some(path) = &self.image_home_path_on_host {
            def.set_image_home_path_on_host(path);
        }
        if self.share_whole_home {
            def.share_whole_home();
        }

        def.add_packages(&self.packages);
        for arch in &self.additional_archs {
            def.add_additional_arch(arch)?;
        }
        for share in &self.share {
            def.share_path(&share.host, share.guest.as_deref(), share.consistency)?;
        }
        for share in &self.share_in_home {
            def.share_path_in_home(&share.path, share.consistency)?;
        }
        for copy in &self.copy {
            def.copy(&copy.src, &copy.dest)?;
        }
        for hook in &self.hook {
            def.run_command(hook.when, hook.command.to_argv())?;
        }
        Ok(())
    }
}

pub fn parse_definition_str(input: &str) -> Result<DefinitionFile, DeclarationError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_definition_file(path: impl AsRef<Path>) -> Result<DefinitionFile, DeclarationError> {
    let content = fs::read_to_string(path)?;
    parse_definition_str(&content)
}

/// Starter definition written by `cabin image create`.
pub const DEFINITION_TEMPLATE: &str = r#"# Cabin environment definition.
#
# Relative paths are resolved against the directory containing this file.

distro = "ubuntu:latest"
# architecture = "native"        # native | armv7 | aarch64

packages = [
    "build-essential",
    "git",
]

# sudo = "passwordless"          # passwordless | password | none
# default_consistency = "consistent"

# Share ~/src with the environment; it appears under the guest home.
[[share_in_home]]
path = "src"

# [[share]]
# host = "/srv/data"
# guest = "/data"

# [[copy]]
# src = "files/bashrc"
# dest = "/etc/bash.bashrc"

# [[hook]]
# when = "at-start"
# command = "echo started"
"#;
