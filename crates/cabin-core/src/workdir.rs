use crate::CoreError;
use cabin_schema::PathMapping;
use cabin_store::RuntimeConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// How a command's working directory inside the instance is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CdMode {
    /// Translate the host directory; fail if it is not shared.
    #[default]
    Translate,
    /// Always start in the guest home.
    NoCd,
    /// Translate the host directory, falling back to the guest home.
    Auto,
}

/// Map a host path to its guest counterpart. The mapping with the longest
/// host path containing `host_path` wins. Each mapping matches both as
/// written and with links resolved, since `getcwd` reports resolved paths.
pub fn translate_path(host_path: &Path, mappings: &[PathMapping]) -> Option<PathBuf> {
    mappings
        .iter()
        .filter_map(|m| {
            host_prefixes(&m.host_path).into_iter().find_map(|prefix| {
                host_path
                    .strip_prefix(&prefix)
                    .ok()
                    .map(|rest| (prefix.components().count(), m.guest_path.join(rest)))
            })
        })
        .max_by_key(|(depth, _)| *depth)
        .map(|(_, guest)| guest)
}

fn host_prefixes(host: &Path) -> Vec<PathBuf> {
    let mut prefixes = vec![host.to_path_buf()];
    if let Ok(resolved) = fs::canonicalize(host) {
        if resolved != host {
            prefixes.push(resolved);
        }
    }
    prefixes
}

pub fn resolve_workdir(
    mode: CdMode,
    host_cwd: &Path,
    config: &RuntimeConfig,
) -> Result<PathBuf, CoreError> {
    match mode {
        CdMode::NoCd => Ok(config.user_home.clone()),
        CdMode::Translate => translate_path(host_cwd, &config.mounts()).ok_or_else(|| {
            CoreError::PathNotShared {
                path: host_cwd.to_path_buf(),
            }
        }),
        CdMode::Auto => Ok(translate_path(host_cwd, &config.mounts())
            .unwrap_or_else(|| config.user_home.clone())),
    }
}
