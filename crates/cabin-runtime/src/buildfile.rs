//! Engine-neutral image build script and its build context.

use crate::RuntimeError;
use cabin_schema::HookPhase;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Write as _};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Where the in-environment session binary lives inside every image.
pub const SESSION_BINARY_PATH: &str = "/usr/local/lib/cabin/cabin-session";

/// Name of the rendered build script inside a build context.
pub const BUILD_FILE_NAME: &str = "Dockerfile";

/// Phase of the build a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Base,
    Hook(HookPhase),
    Bootstrap,
    UserSetup,
    Sudo,
    Packages,
    Copy,
    Finalize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Comment(String),
    From(String),
    Label { key: String, value: String },
    /// Shell-form `RUN`.
    Run(String),
    /// Exec-form `RUN`, no shell involved.
    RunExec(Vec<String>),
    /// `src` is relative to the build context.
    Copy { src: String, dest: String },
    Env { key: String, value: String },
    Workdir(String),
    Entrypoint(Vec<String>),
}

impl Instruction {
    pub fn render(&self) -> String {
        match self {
            Self::Comment(text) => format!("# {text}"),
            Self::From(image) => format!("FROM {image}"),
            Self::Label { key, value } => format!("LABEL {key}={}", json_string(value)),
            Self::Run(cmd) => format!("RUN {cmd}"),
            Self::RunExec(argv) => format!("RUN {}", json_array(argv)),
            Self::Copy { src, dest } => format!("COPY {}", json_array(&[src.clone(), dest.clone()])),
            Self::Env { key, value } => format!("ENV {key}={}", json_string(value)),
            Self::Workdir(dir) => format!("WORKDIR {dir}"),
            Self::Entrypoint(argv) => format!("ENTRYPOINT {}", json_array(argv)),
        }
    }
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

fn json_array(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| json_string(s)).collect();
    format!("[{}]", quoted.join(", "))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    pub stage: Stage,
    pub instruction: Instruction,
}

/// Ordered instruction list. Rendering is deterministic: the same script
/// always yields byte-identical text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildScript {
    steps: Vec<BuildStep>,
}

impl BuildScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage, instruction: Instruction) {
        self.steps.push(BuildStep { stage, instruction });
    }

    pub fn steps(&self) -> &[BuildStep] {
        &self.steps
    }

    pub fn contains_stage(&self, stage: Stage) -> bool {
        self.steps.iter().any(|s| s.stage == stage)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            let _ = writeln!(out, "{}", step.instruction.render());
        }
        out
    }

    /// blake3 of the rendered script.
    pub fn digest(&self) -> String {
        blake3::hash(self.render().as_bytes()).to_hex().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSource {
    Host(PathBuf),
    Inline(Vec<u8>),
}

/// A file placed in the build context under `name`, for a `COPY` to pick up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    pub name: String,
    pub source: ContextSource,
}

/// Everything an engine needs to build one image.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub tag: &'a str,
    pub script: &'a BuildScript,
    pub context_files: &'a [ContextFile],
    pub context_dir: &'a Path,
    pub no_cache: bool,
}

/// Write the build script and all context files into `dir`, replacing any
/// previous content.
pub fn materialize_context(
    dir: &Path,
    script: &BuildScript,
    files: &[ContextFile],
) -> Result<(), RuntimeError> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    fs::write(dir.join(BUILD_FILE_NAME), script.render())?;

    for file in files {
        let dest = dir.join(&file.name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        match &file.source {
            ContextSource::Host(src) => copy_host_path(src, &dest)?,
            ContextSource::Inline(bytes) => fs::write(&dest, bytes)?,
        }
    }
    Ok(())
}

fn copy_error(src: &Path, e: impl Display) -> RuntimeError {
    RuntimeError::ExecFailed(format!("cannot copy {}: {e}", src.display()))
}

/// Copy a host file, or a whole directory tree, to `dest`. Links inside a
/// tree are followed.
fn copy_host_path(src: &Path, dest: &Path) -> Result<(), RuntimeError> {
    if !src.is_dir() {
        fs::copy(src, dest).map_err(|e| copy_error(src, e))?;
        return Ok(());
    }
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| copy_error(src, e))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| copy_error(src, e))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| copy_error(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_docker_syntax() {
        let mut script = BuildScript::new();
        script.push(Stage::Base, Instruction::From("ubuntu:latest".to_owned()));
        script.push(
            Stage::Hook(HookPhase::AtBuildStart),
            Instruction::RunExec(vec!["sh".to_owned(), "-c".to_owned(), "echo \"hi\"".to_owned()]),
        );
        script.push(
            Stage::Copy,
            Instruction::Copy {
                src: "files/000-motd".to_owned(),
                dest: "/etc/motd".to_owned(),
            },
        );
        script.push(
            Stage::Finalize,
            Instruction::Env {
                key: "USER".to_owned(),
                value: "alice".to_owned(),
            },
        );
        assert_eq!(
            script.render(),
            "FROM ubuntu:latest\n\
             RUN [\"sh\", \"-c\", \"echo \\\"hi\\\"\"]\n\
             COPY [\"files/000-motd\", \"/etc/motd\"]\n\
             ENV USER=\"alice\"\n"
        );
    }

    #[test]
    fn digest_tracks_content() {
        let mut a = BuildScript::new();
        a.push(Stage::Base, Instruction::From("debian:latest".to_owned()));
        let b = a.clone();
        assert_eq!(a.digest(), b.digest());
        a.push(Stage::Packages, Instruction::Run("true".to_owned()));
        assert_ne!(a.digest(), b.digest());
        assert!(a.contains_stage(Stage::Packages));
        assert!(!b.contains_stage(Stage::Packages));
    }

    #[test]
    fn materialize_writes_script_and_files() {
        let src_dir = tempfile::tempdir().unwrap();
        let host_file = src_dir.path().join("bashrc");
        fs::write(&host_file, "alias ll='ls -l'\n").unwrap();

        let ctx = tempfile::tempdir().unwrap();
        let dir = ctx.path().join("build");
        let mut script = BuildScript::new();
        script.push(Stage::Base, Instruction::From("ubuntu:latest".to_owned()));
        let files = vec![
            ContextFile {
                name: "files/000-bashrc".to_owned(),
                source: ContextSource::Host(host_file),
            },
            ContextFile {
                name: "sudoers".to_owned(),
                source: ContextSource::Inline(b"root ALL=(ALL) ALL\n".to_vec()),
            },
        ];
        materialize_context(&dir, &script, &files).unwrap();

        assert_eq!(
            fs::read_to_string(dir.join(BUILD_FILE_NAME)).unwrap(),
            "FROM ubuntu:latest\n"
        );
        assert!(dir.join("files/000-bashrc").is_file());
        assert!(dir.join("sudoers").is_file());
    }

    #[test]
    fn materialize_copies_directory_trees() {
        let src_dir = tempfile::tempdir().unwrap();
        let dotfiles = src_dir.path().join("dotfiles");
        fs::create_dir_all(dotfiles.join("nvim")).unwrap();
        fs::write(dotfiles.join("gitconfig"), "[user]\n").unwrap();
        fs::write(dotfiles.join("nvim").join("init.lua"), "-- init\n").unwrap();

        let ctx = tempfile::tempdir().unwrap();
        let files = vec![ContextFile {
            name: "files/000-dotfiles".to_owned(),
            source: ContextSource::Host(dotfiles),
        }];
        materialize_context(ctx.path(), &BuildScript::new(), &files).unwrap();

        let copied = ctx.path().join("files/000-dotfiles");
        assert_eq!(fs::read_to_string(copied.join("gitconfig")).unwrap(), "[user]\n");
        assert_eq!(
            fs::read_to_string(copied.join("nvim").join("init.lua")).unwrap(),
            "-- init\n"
        );
    }

    #[test]
    fn materialize_reports_missing_host_file() {
        let ctx = tempfile::tempdir().unwrap();
        let files = vec![ContextFile {
            name: "files/000-gone".to_owned(),
            source: ContextSource::Host(PathBuf::from("/nonexistent/cabin/file")),
        }];
        let err = materialize_context(ctx.path(), &BuildScript::new(), &files).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cabin/file"));
    }
}
