use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current config-root format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Environment variable overriding the default config root.
pub const CONFIG_DIR_ENV: &str = "CABIN_CONFIG_DIR";

/// Directory layout of the per-user Cabin config root.
///
/// ```text
/// <root>/images/<name>.json    registered definitions
/// <root>/runtime/<name>.json   runtime config of the last successful build
/// <root>/home-dirs/<name>/     persistent guest home directories
/// <root>/locks/<name>.lock     per-environment lifecycle locks
/// <root>/build/<name>/         transient build contexts
/// <root>/settings.toml         user settings
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$CABIN_CONFIG_DIR`, else `~/.cabin`.
    pub fn default_root() -> PathBuf {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
            return PathBuf::from(dir);
        }
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/"), PathBuf::from);
        home.join(".cabin")
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    #[inline]
    pub fn image_record(&self, name: &str) -> PathBuf {
        self.images_dir().join(format!("{name}.json"))
    }

    #[inline]
    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join("runtime")
    }

    #[inline]
    pub fn runtime_config(&self, name: &str) -> PathBuf {
        self.runtime_dir().join(format!("{name}.json"))
    }

    #[inline]
    pub fn home_dirs_dir(&self) -> PathBuf {
        self.root.join("home-dirs")
    }

    #[inline]
    pub fn home_dir(&self, name: &str) -> PathBuf {
        self.home_dirs_dir().join(name)
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    #[inline]
    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{name}.lock"))
    }

    /// Scratch build context handed to the engine; removed after each build.
    #[inline]
    pub fn build_dir(&self, name: &str) -> PathBuf {
        self.root.join("build").join(name)
    }

    #[inline]
    pub fn settings_file(&self) -> PathBuf {
        self.root.join("settings.toml")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.images_dir())?;
        fs::create_dir_all(self.runtime_dir())?;
        fs::create_dir_all(self.home_dirs_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        fs::create_dir_all(self.root.join("build"))?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            write_atomic(&version_path, content.as_bytes())?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
