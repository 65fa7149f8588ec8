use crate::layout::StoreLayout;
use crate::StoreError;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Environment variable overriding the configured engine.
pub const ENGINE_ENV: &str = "CABIN_ENGINE";

/// User settings from `<root>/settings.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// `auto`, `docker`, `podman` or `mock`.
    pub engine: Option<String>,
    pub stop_timeout_secs: Option<u64>,
    /// Overrides where the in-environment session binary is taken from.
    pub session_binary: Option<PathBuf>,
}

impl Settings {
    pub fn load(layout: &StoreLayout) -> Result<Self, StoreError> {
        let path = layout.settings_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(toml::from_str(&content)?)
    }

    /// `$CABIN_ENGINE`, then the configured engine, then `auto`.
    pub fn engine(&self) -> String {
        std::env::var(ENGINE_ENV)
            .ok()
            .filter(|e| !e.is_empty())
            .or_else(|| self.engine.clone())
            .unwrap_or_else(|| "auto".to_owned())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS))
    }
}
