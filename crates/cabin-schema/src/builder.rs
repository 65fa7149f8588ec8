//! Mutable view of an environment definition handed to declarations.
//!
//! Relative paths resolve against the definition currently being evaluated.
//! That location is tracked as an explicit stack, pushed and popped around
//! every nested [`import_definition`](DefinitionBuilder::import_definition).

use crate::declaration::{Declaration, DefinitionLoader, FileLoader};
use crate::definition::{
    Architecture, Consistency, CopiedFile, Distro, EnvironmentSpec, HookPhase, HookTable,
    PackageFamily, PathMapping, SudoMode,
};
use crate::host::HostSystem;
use crate::types::EnvName;
use crate::DeclarationError;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Nesting limit for `import_definition`.
pub const MAX_IMPORT_DEPTH: usize = 16;

#[derive(Debug, Clone)]
enum PendingShare {
    Direct {
        host: PathBuf,
        guest: PathBuf,
        consistency: Option<Consistency>,
    },
    /// Resolved against the final `user_home` in [`DefinitionBuilder::finish`].
    InHome {
        relative: PathBuf,
        consistency: Option<Consistency>,
    },
}

pub struct DefinitionBuilder {
    name: EnvName,
    host: HostSystem,
    config_root: PathBuf,
    fallback_dir: PathBuf,
    context: Vec<PathBuf>,
    loader: Box<dyn DefinitionLoader>,
    root_definition: Option<PathBuf>,

    distro: Distro,
    architecture: Architecture,
    packages: Vec<String>,
    additional_archs: Vec<String>,
    username: Option<String>,
    uid: Option<u32>,
    user_home: Option<PathBuf>,
    hostname: Option<String>,
    sudo: SudoMode,
    maintainer: Option<String>,
    default_consistency: Consistency,
    shares: Vec<PendingShare>,
    copied_files: Vec<CopiedFile>,
    hooks: HookTable,
    image_home_path_on_host: Option<PathBuf>,
    share_whole_home: bool,
}

impl DefinitionBuilder {
    /// Start a definition for `name`. `config_root` hosts the default
    /// persistent home directory (`<config_root>/home-dirs/<name>`).
    pub fn new(name: EnvName, host: HostSystem, config_root: impl Into<PathBuf>) -> Self {
        Self {
            name,
            host,
            config_root: config_root.into(),
            fallback_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            context: Vec::new(),
            loader: Box::new(FileLoader),
            root_definition: None,
            distro: Distro::default(),
            architecture: Architecture::default(),
            packages: Vec::new(),
            additional_archs: Vec::new(),
            username: None,
            uid: None,
            user_home: None,
            hostname: None,
            sudo: SudoMode::default(),
            maintainer: None,
            default_consistency: Consistency::default(),
            shares: Vec::new(),
            copied_files: Vec::new(),
            hooks: HookTable::default(),
            image_home_path_on_host: None,
            share_whole_home: false,
        }
    }

    #[must_use]
    pub fn with_loader(mut self, loader: impl DefinitionLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn name(&self) -> &EnvName {
        &self.name
    }

    pub fn host(&self) -> &HostSystem {
        &self.host
    }

    pub fn distro(&self) -> &Distro {
        &self.distro
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.host.username)
    }

    /// Guest home directory as currently declared.
    pub fn user_home(&self) -> &Path {
        self.user_home.as_deref().unwrap_or(&self.host.home)
    }

    /// Directory of the definition being evaluated right now.
    pub fn current_dir(&self) -> &Path {
        self.context
            .last()
            .and_then(|p| p.parent())
            .unwrap_or(&self.fallback_dir)
    }

    /// Absolute paths come back unchanged; relative ones are joined to the
    /// directory of the current definition and lexically normalized.
    pub fn abspath(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            normalize_lexically(&self.current_dir().join(path))
        }
    }

    /// Evaluate `declaration` as if it were read from `definition_path`.
    pub fn evaluate(
        &mut self,
        definition_path: impl AsRef<Path>,
        declaration: &dyn Declaration,
    ) -> Result<(), DeclarationError> {
        let path = self.abspath(definition_path);
        if self.context.contains(&path) {
            return Err(DeclarationError::ImportCycle(path));
        }
        if self.context.len() >= MAX_IMPORT_DEPTH {
            return Err(DeclarationError::ImportTooDeep(MAX_IMPORT_DEPTH));
        }
        if self.root_definition.is_none() {
            self.root_definition = Some(path.clone());
        }

        self.context.push(path);
        let result = declaration.setup(self);
        self.context.pop();
        result
    }

    /// Load the definition stored in `dir` and apply it to this builder.
    /// Composition only: list entries accumulate, scalars are overwritten.
    pub fn import_definition(&mut self, dir: impl AsRef<Path>) -> Result<(), DeclarationError> {
        let dir = self.abspath(dir);
        let loaded = self.loader.load(&dir)?;
        self.evaluate(&loaded.path, loaded.declaration.as_ref())
    }

    pub fn set_distro(&mut self, distro: &str) -> Result<(), DeclarationError> {
        self.distro = Distro::parse(distro)?;
        Ok(())
    }

    pub fn set_architecture(&mut self, architecture: Architecture) {
        self.architecture = architecture;
    }

    pub fn add_packages<I, S>(&mut self, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.packages.extend(
            packages
                .into_iter()
                .map(|p| p.as_ref().trim().to_owned())
                .filter(|p| !p.is_empty()),
        );
    }

    pub fn add_additional_arch(&mut self, arch: &str) -> Result<(), DeclarationError> {
        if arch != "i386" {
            return Err(DeclarationError::InvalidValue {
                field: "additional_archs",
                value: arch.to_owned(),
            });
        }
        self.additional_archs.push(arch.to_owned());
        Ok(())
    }

    pub fn set_username(&mut self, username: &str) -> Result<(), DeclarationError> {
        let valid = !username.is_empty()
            && !username.starts_with('-')
            && username
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
        if !valid {
            return Err(DeclarationError::InvalidValue {
                field: "username",
                value: username.to_owned(),
            });
        }
        self.username = Some(username.to_owned());
        Ok(())
    }

    pub fn set_uid(&mut self, uid: u32) {
        self.uid = Some(uid);
    }

    pub fn set_user_home(&mut self, home: impl AsRef<Path>) -> Result<(), DeclarationError> {
        let home = home.as_ref();
        if !home.is_absolute() {
            return Err(DeclarationError::RelativeGuestPath(home.to_path_buf()));
        }
        self.user_home = Some(home.to_path_buf());
        Ok(())
    }

    pub fn set_hostname(&mut self, hostname: &str) {
        self.hostname = Some(hostname.to_owned());
    }

    pub fn set_sudo(&mut self, sudo: SudoMode) {
        self.sudo = sudo;
    }

    pub fn set_maintainer(&mut self, maintainer: &str) {
        self.maintainer = Some(maintainer.to_owned());
    }

    pub fn set_default_consistency(&mut self, consistency: Consistency) {
        self.default_consistency = consistency;
    }

    pub fn set_image_home_path_on_host(&mut self, path: impl AsRef<Path>) {
        self.image_home_path_on_host = Some(self.abspath(path));
    }

    /// Use the host home directory itself as the guest home. Cannot be undone.
    pub fn share_whole_home(&mut self) {
        self.share_whole_home = true;
    }

    pub fn share_path(
        &mut self,
        host_path: impl AsRef<Path>,
        guest_path: Option<&Path>,
        consistency: Option<Consistency>,
    ) -> Result<(), DeclarationError> {
        let host = self.abspath(host_path);
        let guest = match guest_path {
            Some(g) if g.is_absolute() => g.to_path_buf(),
            Some(g) => return Err(DeclarationError::RelativeGuestPath(g.to_path_buf())),
            None => host.clone(),
        };
        self.shares.push(PendingShare::Direct {
            host,
            guest,
            consistency,
        });
        Ok(())
    }

    /// Share `host_home/relative` as `user_home/relative`. The guest side is
    /// computed when the definition is finished, so later `user_home`
    /// changes are honoured.
    pub fn share_path_in_home(
        &mut self,
        relative: impl AsRef<Path>,
        consistency: Option<Consistency>,
    ) -> Result<(), DeclarationError> {
        let relative = normalize_home_relative(relative.as_ref())?;
        self.shares.push(PendingShare::InHome {
            relative,
            consistency,
        });
        Ok(())
    }

    /// Copy a host file or directory into the image at build time. Copies are
    /// owned by root.
    pub fn copy(
        &mut self,
        src: impl AsRef<Path>,
        dest: impl AsRef<Path>,
    ) -> Result<(), DeclarationError> {
        let dest = dest.as_ref();
        if !dest.is_absolute() {
            return Err(DeclarationError::RelativeGuestPath(dest.to_path_buf()));
        }
        let host_path = self.abspath(src);
        self.copied_files.push(CopiedFile {
            host_path,
            guest_path: dest.to_path_buf(),
        });
        Ok(())
    }

    pub fn run_command(
        &mut self,
        phase: HookPhase,
        command: Vec<String>,
    ) -> Result<(), DeclarationError> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(DeclarationError::EmptyCommand(phase));
        }
        self.hooks.push(phase, command);
        Ok(())
    }

    /// Validate and freeze the accumulated definition.
    pub fn finish(self) -> Result<EnvironmentSpec, DeclarationError> {
        if !self.architecture.supports(&self.distro) {
            return Err(DeclarationError::UnsupportedArchitecture {
                distro: self.distro.to_string(),
                architecture: self.architecture,
            });
        }
        if !self.additional_archs.is_empty() && self.distro.family() != PackageFamily::DebianLike
        {
            return Err(DeclarationError::InvalidValue {
                field: "additional_archs",
                value: format!("{} (only supported on debian-like distros)", self.distro),
            });
        }

        let user_home = self
            .user_home
            .clone()
            .unwrap_or_else(|| self.host.home.clone());
        let image_home_path_on_host = if self.share_whole_home {
            self.host.home.clone()
        } else {
            let path = self.image_home_path_on_host.clone().unwrap_or_else(|| {
                self.config_root
                    .join("home-dirs")
                    .join(self.name.as_str())
            });
            if path == self.host.home {
                return Err(DeclarationError::HostHomeShared(path));
            }
            path
        };
        reject_colon(&image_home_path_on_host)?;

        let mut guests = HashSet::new();
        let mut path_mappings = Vec::with_capacity(self.shares.len());
        for share in &self.shares {
            let (host_path, guest_path, consistency) = match share {
                PendingShare::Direct {
                    host,
                    guest,
                    consistency,
                } => (host.clone(), guest.clone(), *consistency),
                PendingShare::InHome {
                    relative,
                    consistency,
                } => (
                    self.host.home.join(relative),
                    user_home.join(relative),
                    *consistency,
                ),
            };
            if host_path == self.host.home {
                return Err(DeclarationError::HostHomeShared(host_path));
            }
            if guest_path == user_home {
                return Err(DeclarationError::GuestPathIsUserHome(guest_path));
            }
            reject_colon(&host_path)?;
            reject_colon(&guest_path)?;
            if !guests.insert(guest_path.clone()) {
                return Err(DeclarationError::DuplicateGuestPath(guest_path));
            }
            path_mappings.push(PathMapping {
                host_path,
                guest_path,
                consistency: consistency.unwrap_or(self.default_consistency),
            });
        }

        let hostname = self
            .hostname
            .clone()
            .unwrap_or_else(|| format!("{}-on-{}", self.name, self.host.hostname));

        Ok(EnvironmentSpec {
            username: self.username().to_owned(),
            uid: self.uid.unwrap_or(self.host.uid),
            name: self.name,
            distro: self.distro,
            architecture: self.architecture,
            packages: dedup_keep_first(self.packages),
            additional_archs: dedup_keep_first(self.additional_archs),
            user_home,
            hostname,
            sudo: self.sudo,
            maintainer: self.maintainer,
            default_consistency: self.default_consistency,
            path_mappings,
            copied_files: self.copied_files,
            hooks: self.hooks,
            image_home_path_on_host,
            share_whole_home: self.share_whole_home,
            definition_file_path: self.root_definition,
        })
    }
}

/// Mounts are passed to the engine as `host:guest[:options]`.
fn reject_colon(path: &Path) -> Result<(), DeclarationError> {
    if path.to_string_lossy().contains(':') {
        return Err(DeclarationError::ColonInMountPath(path.to_path_buf()));
    }
    Ok(())
}

/// Resolve `.` and `..` components without touching the filesystem.
/// `..` never climbs above the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn normalize_home_relative(relative: &Path) -> Result<PathBuf, DeclarationError> {
    let invalid = |reason: &'static str| DeclarationError::InvalidHomeShare {
        path: relative.to_path_buf(),
        reason,
    };
    if relative.is_absolute() {
        return Err(invalid("must be relative to the home directory"));
    }
    let mut out = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(invalid("escapes the home directory"));
                }
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(invalid("must be relative to the home directory"));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(invalid("refers to the home directory itself, use share_whole_home"));
    }
    Ok(out)
}

fn dedup_keep_first(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::LoadedDefinition;

    fn host() -> HostSystem {
        HostSystem {
            username: "alice".to_owned(),
            uid: 1000,
            home: PathBuf::from("/home/alice"),
            hostname: "laptop".to_owned(),
        }
    }

    fn decl<F>(f: F) -> F
    where
        F: Fn(&mut DefinitionBuilder) -> Result<(), DeclarationError>,
    {
        f
    }

    fn builder() -> DefinitionBuilder {
        DefinitionBuilder::new(EnvName::parse("dev").unwrap(), host(), "/home/alice/.cabin")
    }

    #[test]
    fn defaults_follow_host_identity() {
        let spec = builder().finish().unwrap();
        assert_eq!(spec.username, "alice");
        assert_eq!(spec.uid, 1000);
        assert_eq!(spec.user_home, PathBuf::from("/home/alice"));
        assert_eq!(spec.hostname, "dev-on-laptop");
        assert_eq!(spec.distro.to_string(), "ubuntu:latest");
        assert_eq!(spec.sudo, SudoMode::Passwordless);
        assert_eq!(
            spec.image_home_path_on_host,
            PathBuf::from("/home/alice/.cabin/home-dirs/dev")
        );
    }

    #[test]
    fn abspath_resolves_against_current_definition() {
        let mut b = builder();
        b.evaluate("/defs/web/cabin.toml", &decl(|b| {
            assert_eq!(b.abspath("src/../lib"), PathBuf::from("/defs/web/lib"));
            assert_eq!(b.abspath("/opt/./x"), PathBuf::from("/opt/./x"));
            Ok(())
        }))
        .unwrap();
    }

    #[test]
    fn abspath_is_idempotent() {
        let mut b = builder();
        b.evaluate("/defs/web/cabin.toml", &decl(|b| {
            for p in ["a/b", "../up", "./x/./y", "/abs/path", "."] {
                let once = b.abspath(p);
                assert_eq!(b.abspath(&once), once, "not idempotent for {p}");
            }
            Ok(())
        }))
        .unwrap();
    }

    #[test]
    fn normalize_never_climbs_above_root() {
        assert_eq!(normalize_lexically(Path::new("/a/../../b")), PathBuf::from("/b"));
        assert_eq!(normalize_lexically(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn share_path_defaults_guest_to_host() {
        let mut b = builder();
        b.share_path("/srv/data", None, None).unwrap();
        b.share_path("/tmp/x", Some(Path::new("/x")), Some(Consistency::Cached))
            .unwrap();
        let spec = b.finish().unwrap();
        assert_eq!(spec.path_mappings[0].guest_path, PathBuf::from("/srv/data"));
        assert_eq!(spec.path_mappings[0].consistency, Consistency::Consistent);
        assert_eq!(spec.path_mappings[1].consistency, Consistency::Cached);
    }

    #[test]
    fn default_consistency_applies_to_unspecified_shares() {
        let mut b = builder();
        b.share_path("/srv/data", None, None).unwrap();
        b.set_default_consistency(Consistency::Delegated);
        let spec = b.finish().unwrap();
        assert_eq!(spec.path_mappings[0].consistency, Consistency::Delegated);
    }

    #[test]
    fn share_in_home_resolves_lazily() {
        let mut b = builder();
        b.share_path_in_home("src", None).unwrap();
        b.set_user_home("/home/dev").unwrap();
        let spec = b.finish().unwrap();
        let mapping = &spec.path_mappings[0];
        assert_eq!(mapping.host_path, PathBuf::from("/home/alice/src"));
        assert_eq!(mapping.guest_path, PathBuf::from("/home/dev/src"));
    }

    #[test]
    fn share_in_home_rejects_escapes() {
        let mut b = builder();
        assert!(b.share_path_in_home("../etc", None).is_err());
        assert!(b.share_path_in_home("/abs", None).is_err());
        assert!(b.share_path_in_home("a/../..", None).is_err());
        assert!(b.share_path_in_home(".", None).is_err());
        assert!(b.share_path_in_home("a/../b", None).is_ok());
    }

    #[test]
    fn sharing_host_home_is_rejected() {
        let mut b = builder();
        b.share_path("/home/alice", Some(Path::new("/h")), None)
            .unwrap();
        assert!(matches!(
            b.finish(),
            Err(DeclarationError::HostHomeShared(_))
        ));

        let mut b = builder();
        b.set_image_home_path_on_host("/home/alice");
        assert!(matches!(
            b.finish(),
            Err(DeclarationError::HostHomeShared(_))
        ));
    }

    #[test]
    fn share_whole_home_uses_host_home() {
        let mut b = builder();
        b.share_whole_home();
        let spec = b.finish().unwrap();
        assert_eq!(spec.image_home_path_on_host, PathBuf::from("/home/alice"));
        assert!(spec.share_whole_home);
    }

    #[test]
    fn duplicate_and_home_guest_paths_rejected() {
        let mut b = builder();
        b.share_path("/a", Some(Path::new("/data")), None).unwrap();
        b.share_path("/b", Some(Path::new("/data")), None).unwrap();
        assert!(matches!(
            b.finish(),
            Err(DeclarationError::DuplicateGuestPath(_))
        ));

        let mut b = builder();
        b.share_path("/a", Some(Path::new("/home/alice")), None)
            .unwrap();
        assert!(matches!(
            b.finish(),
            Err(DeclarationError::GuestPathIsUserHome(_))
        ));
    }

    #[test]
    fn colons_in_mounted_paths_rejected() {
        let mut b = builder();
        b.share_path("/srv/a:b", Some(Path::new("/data")), None)
            .unwrap();
        assert!(matches!(
            b.finish(),
            Err(DeclarationError::ColonInMountPath(p)) if p == Path::new("/srv/a:b")
        ));

        let mut b = builder();
        b.share_path("/srv/data", Some(Path::new("/mnt/x:y")), None)
            .unwrap();
        assert!(matches!(
            b.finish(),
            Err(DeclarationError::ColonInMountPath(_))
        ));

        let b = DefinitionBuilder::new(EnvName::parse("dev").unwrap(), host(), "/tmp/odd:root");
        assert!(matches!(
            b.finish(),
            Err(DeclarationError::ColonInMountPath(_))
        ));
    }

    #[test]
    fn nested_under_user_home_is_allowed() {
        let mut b = builder();
        b.share_path("/a", Some(Path::new("/home/alice/a")), None)
            .unwrap();
        assert!(b.finish().is_ok());
    }

    #[test]
    fn packages_are_trimmed_and_deduplicated() {
        let mut b = builder();
        b.add_packages(["git", " gcc ", "", "git"]);
        b.add_packages(vec!["make".to_owned(), "gcc".to_owned()]);
        let spec = b.finish().unwrap();
        assert_eq!(spec.packages, vec!["git", "gcc", "make"]);
    }

    #[test]
    fn invalid_architecture_fails_before_compilation() {
        let mut b = builder();
        b.set_distro("fedora:40").unwrap();
        b.set_architecture(Architecture::Armv7);
        assert!(matches!(
            b.finish(),
            Err(DeclarationError::UnsupportedArchitecture { .. })
        ));
    }

    #[test]
    fn additional_archs_require_debian_family() {
        let mut b = builder();
        assert!(b.add_additional_arch("amd64").is_err());
        b.add_additional_arch("i386").unwrap();
        b.set_distro("centos").unwrap();
        assert!(b.finish().is_err());
    }

    #[test]
    fn copy_requires_absolute_destination() {
        let mut b = builder();
        assert!(b.copy("/etc/hosts", "etc/hosts").is_err());
        b.evaluate("/defs/cabin.toml", &decl(|b| {
            b.copy("files/bashrc", "/etc/bash.bashrc")
        }))
        .unwrap();
        let spec = b.finish().unwrap();
        assert_eq!(
            spec.copied_files[0].host_path,
            PathBuf::from("/defs/files/bashrc")
        );
    }

    #[test]
    fn empty_hook_command_rejected() {
        let mut b = builder();
        assert!(b.run_command(HookPhase::AtStart, Vec::new()).is_err());
        assert!(b
            .run_command(HookPhase::AtStart, vec![" ".to_owned()])
            .is_err());
    }

    #[test]
    fn import_switches_context_and_restores_it() {
        let loader = |dir: &Path| -> Result<LoadedDefinition, DeclarationError> {
            Ok(LoadedDefinition {
                path: dir.join("cabin.toml"),
                declaration: Box::new(decl(|b| {
                    b.share_path("shared", None, None)?;
                    b.add_packages(["from-base"]);
                    Ok(())
                })),
            })
        };
        let mut b = builder().with_loader(loader);
        b.evaluate("/defs/app/cabin.toml", &decl(|b| {
            b.add_packages(["first"]);
            b.import_definition("../base")?;
            assert_eq!(b.current_dir(), Path::new("/defs/app"));
            b.share_path("local", None, None)
        }))
        .unwrap();
        let spec = b.finish().unwrap();
        assert_eq!(spec.packages, vec!["first", "from-base"]);
        assert_eq!(spec.path_mappings[0].host_path, PathBuf::from("/defs/base/shared"));
        assert_eq!(spec.path_mappings[1].host_path, PathBuf::from("/defs/app/local"));
        assert_eq!(
            spec.definition_file_path,
            Some(PathBuf::from("/defs/app/cabin.toml"))
        );
    }

    #[test]
    fn import_cycle_detected_and_context_unwound() {
        let loader = |dir: &Path| -> Result<LoadedDefinition, DeclarationError> {
            Ok(LoadedDefinition {
                path: dir.join("cabin.toml"),
                declaration: Box::new(decl(|b| b.import_definition("."))),
            })
        };
        let mut b = builder().with_loader(loader);
        let err = b.import_definition("/defs/loop").unwrap_err();
        assert!(matches!(err, DeclarationError::ImportCycle(_)));
        assert_eq!(b.current_dir(), b.fallback_dir.as_path());
    }
}
