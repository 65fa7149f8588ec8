use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use cabin_schema::{Consistency, EnvName, HookPhase, HookTable, ImageTag, PathMapping};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const RUNTIME_CONFIG_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    RUNTIME_CONFIG_VERSION
}

/// Everything about an environment that cannot be baked into its image.
///
/// Written once per successful build and replaced wholesale by the next one.
/// Unknown fields are ignored and optional ones default, so configs written
/// by newer versions that only add fields remain readable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub name: EnvName,
    pub image_tag: ImageTag,
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
    #[serde(default)]
    pub hooks: HookTable,
    pub username: String,
    pub uid: u32,
    pub user_home: PathBuf,
    pub hostname: String,
    pub image_home_path_on_host: PathBuf,
    #[serde(default)]
    pub content_dir: Option<PathBuf>,
    #[serde(default)]
    pub built_with_version: String,
    #[serde(default)]
    pub built_at: String,
    /// blake3 of the rendered build script.
    #[serde(default)]
    pub build_digest: String,
    /// blake3 checksum for integrity verification. `None` for hand-written configs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl RuntimeConfig {
    /// All bind mounts of an instance: the persistent home first, then the
    /// declared mappings in order.
    pub fn mounts(&self) -> Vec<PathMapping> {
        let mut mounts = Vec::with_capacity(self.path_mappings.len() + 1);
        mounts.push(PathMapping {
            host_path: self.image_home_path_on_host.clone(),
            guest_path: self.user_home.clone(),
            consistency: Consistency::default(),
        });
        mounts.extend(self.path_mappings.iter().cloned());
        mounts
    }

    pub fn hooks_for(&self, phase: HookPhase) -> &[Vec<String>] {
        self.hooks.get(phase)
    }

    /// Compute the checksum over the config content (excluding the checksum field itself).
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

pub struct RuntimeConfigStore {
    layout: StoreLayout,
}

impl RuntimeConfigStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn put(&self, config: &RuntimeConfig) -> Result<(), StoreError> {
        let mut with_checksum = config.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;

        fs::create_dir_all(self.layout.runtime_dir())?;
        write_atomic(
            &self.layout.runtime_config(config.name.as_str()),
            content.as_bytes(),
        )
    }

    pub fn get(&self, name: &str) -> Result<RuntimeConfig, StoreError> {
        let path = self.layout.runtime_config(name);
        if !path.exists() {
            return Err(StoreError::ConfigNotFound(name.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let config: RuntimeConfig = serde_json::from_str(&content)?;

        if let Some(ref expected) = config.checksum {
            let actual = config.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    name: name.to_owned(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(config)
    }

    /// Like [`get`](Self::get), but a missing config is `Ok(None)`.
    pub fn try_get(&self, name: &str) -> Result<Option<RuntimeConfig>, StoreError> {
        match self.get(name) {
            Ok(config) => Ok(Some(config)),
            Err(StoreError::ConfigNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout.runtime_config(name).exists()
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.layout.runtime_config(name);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
