use crate::types::EnvName;
use crate::DeclarationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_DISTRO: &str = "ubuntu";
pub const LATEST_TAG: &str = "latest";

/// Package-manager family of a base distribution. Derived from the distro name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFamily {
    DebianLike,
    RpmLike,
    Other,
}

/// Base image as `(name, tag)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distro {
    pub name: String,
    pub tag: String,
}

impl Distro {
    pub const SUPPORTED: [&'static str; 4] = ["ubuntu", "debian", "fedora", "centos"];

    pub fn parse(input: &str) -> Result<Self, DeclarationError> {
        let input = input.trim();
        let (name, tag) = match input.split_once(':') {
            Some((name, tag)) => (name, tag),
            None => (input, LATEST_TAG),
        };
        if !Self::SUPPORTED.contains(&name) {
            return Err(DeclarationError::UnsupportedDistro(input.to_owned()));
        }
        if tag.is_empty() || tag.contains(|c: char| c.is_whitespace() || c == '/' || c == ':') {
            return Err(DeclarationError::InvalidValue {
                field: "distro",
                value: input.to_owned(),
            });
        }
        Ok(Self {
            name: name.to_owned(),
            tag: tag.to_owned(),
        })
    }

    pub fn family(&self) -> PackageFamily {
        match self.name.as_str() {
            "ubuntu" | "debian" => PackageFamily::DebianLike,
            "fedora" | "centos" => PackageFamily::RpmLike,
            _ => PackageFamily::Other,
        }
    }
}

impl Default for Distro {
    fn default() -> Self {
        Self {
            name: DEFAULT_DISTRO.to_owned(),
            tag: LATEST_TAG.to_owned(),
        }
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    #[serde(alias = "x86_64")]
    Native,
    Armv7,
    Aarch64,
}

impl Architecture {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Armv7 => "armv7",
            Self::Aarch64 => "aarch64",
        }
    }

    /// Repository prefix selecting the architecture-specific variant of an
    /// official base image.
    pub fn image_prefix(self) -> &'static str {
        match self {
            Self::Native => "",
            Self::Armv7 => "arm32v7/",
            Self::Aarch64 => "arm64v8/",
        }
    }

    pub fn supports(self, distro: &Distro) -> bool {
        match distro.family() {
            PackageFamily::DebianLike => true,
            PackageFamily::RpmLike => matches!(self, Self::Native | Self::Aarch64),
            PackageFamily::Other => self == Self::Native,
        }
    }
}

impl FromStr for Architecture {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" | "x86_64" => Ok(Self::Native),
            "armv7" => Ok(Self::Armv7),
            "aarch64" => Ok(Self::Aarch64),
            other => Err(DeclarationError::InvalidValue {
                field: "architecture",
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SudoMode {
    #[default]
    Passwordless,
    Password,
    None,
}

/// Staleness tolerated between host and guest views of a shared path.
/// Only honoured by engines whose file sharing is not consistent already.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    #[default]
    Consistent,
    Cached,
    Delegated,
}

impl Consistency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Consistent => "consistent",
            Self::Cached => "cached",
            Self::Delegated => "delegated",
        }
    }
}

/// Lifecycle points at which user hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    AtBuildStart,
    AtBuildBeforeUserPkgs,
    AtBuildEnd,
    AtStart,
    BeforeCommand,
    AfterCommand,
    AtStop,
}

impl HookPhase {
    pub const ALL: [HookPhase; 7] = [
        Self::AtBuildStart,
        Self::AtBuildBeforeUserPkgs,
        Self::AtBuildEnd,
        Self::AtStart,
        Self::BeforeCommand,
        Self::AfterCommand,
        Self::AtStop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AtBuildStart => "at-build-start",
            Self::AtBuildBeforeUserPkgs => "at-build-before-user-pkgs",
            Self::AtBuildEnd => "at-build-end",
            Self::AtStart => "at-start",
            Self::BeforeCommand => "before-command",
            Self::AfterCommand => "after-command",
            Self::AtStop => "at-stop",
        }
    }

    /// Build-phase hooks are baked into the image; a failure aborts the build.
    pub fn is_build_phase(self) -> bool {
        matches!(
            self,
            Self::AtBuildStart | Self::AtBuildBeforeUserPkgs | Self::AtBuildEnd
        )
    }
}

impl FromStr for HookPhase {
    type Err = DeclarationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| DeclarationError::InvalidValue {
                field: "hook phase",
                value: s.to_owned(),
            })
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered hook commands, keyed by phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookTable(BTreeMap<HookPhase, Vec<Vec<String>>>);

impl HookTable {
    pub fn push(&mut self, phase: HookPhase, command: Vec<String>) {
        self.0.entry(phase).or_default().push(command);
    }

    pub fn get(&self, phase: HookPhase) -> &[Vec<String>] {
        self.0.get(&phase).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Hooks that outlive the build and must be carried into the runtime config.
    pub fn runtime_only(&self) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(phase, _)| !phase.is_build_phase())
                .map(|(phase, cmds)| (*phase, cmds.clone()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub host_path: PathBuf,
    pub guest_path: PathBuf,
    #[serde(default)]
    pub consistency: Consistency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedFile {
    pub host_path: PathBuf,
    pub guest_path: PathBuf,
}

/// Validated result of evaluating a definition. Frozen: produced only by
/// [`DefinitionBuilder::finish`](crate::DefinitionBuilder::finish).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: EnvName,
    pub distro: Distro,
    pub architecture: Architecture,
    pub packages: Vec<String>,
    pub additional_archs: Vec<String>,
    pub username: String,
    pub uid: u32,
    pub user_home: PathBuf,
    pub hostname: String,
    pub sudo: SudoMode,
    pub maintainer: Option<String>,
    pub default_consistency: Consistency,
    pub path_mappings: Vec<PathMapping>,
    pub copied_files: Vec<CopiedFile>,
    pub hooks: HookTable,
    pub image_home_path_on_host: PathBuf,
    pub share_whole_home: bool,
    pub definition_file_path: Option<PathBuf>,
}

impl EnvironmentSpec {
    pub fn package_family(&self) -> PackageFamily {
        self.distro.family()
    }

    /// Fully qualified base image reference, including the architecture prefix.
    pub fn base_image(&self) -> String {
        format!("{}{}", self.architecture.image_prefix(), self.distro)
    }

    pub fn definition_file_dir(&self) -> Option<&Path> {
        self.definition_file_path.as_deref().and_then(Path::parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distro_parse_defaults_tag() {
        let d = Distro::parse("debian").unwrap();
        assert_eq!(d.name, "debian");
        assert_eq!(d.tag, LATEST_TAG);
        assert_eq!(d.to_string(), "debian:latest");
    }

    #[test]
    fn distro_parse_with_tag() {
        let d = Distro::parse("ubuntu:22.04").unwrap();
        assert_eq!(d.tag, "22.04");
        assert_eq!(d.family(), PackageFamily::DebianLike);
        assert_eq!(Distro::parse("fedora:40").unwrap().family(), PackageFamily::RpmLike);
    }

    #[test]
    fn distro_rejects_unknown_and_malformed() {
        assert!(matches!(
            Distro::parse("arch"),
            Err(DeclarationError::UnsupportedDistro(_))
        ));
        assert!(Distro::parse("ubuntu:").is_err());
        assert!(Distro::parse("ubuntu:a:b").is_err());
    }

    #[test]
    fn architecture_support_matrix() {
        let ubuntu = Distro::parse("ubuntu").unwrap();
        let centos = Distro::parse("centos").unwrap();
        assert!(Architecture::Armv7.supports(&ubuntu));
        assert!(Architecture::Aarch64.supports(&centos));
        assert!(!Architecture::Armv7.supports(&centos));
    }

    #[test]
    fn hook_phase_strings_roundtrip() {
        for phase in HookPhase::ALL {
            assert_eq!(phase.as_str().parse::<HookPhase>().unwrap(), phase);
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase.as_str()));
        }
        assert!("at-lunch".parse::<HookPhase>().is_err());
    }

    #[test]
    fn hook_table_keeps_order_and_filters_build_phases() {
        let mut hooks = HookTable::default();
        hooks.push(HookPhase::AtStart, vec!["first".into()]);
        hooks.push(HookPhase::AtBuildEnd, vec!["baked".into()]);
        hooks.push(HookPhase::AtStart, vec!["second".into()]);

        let runtime = hooks.runtime_only();
        assert_eq!(
            runtime.get(HookPhase::AtStart),
            &[vec!["first".to_owned()], vec!["second".to_owned()]]
        );
        assert!(runtime.get(HookPhase::AtBuildEnd).is_empty());
        assert!(HookTable::default().is_empty());
    }
}
