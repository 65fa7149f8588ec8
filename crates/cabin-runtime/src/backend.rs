use crate::buildfile::BuildRequest;
use crate::RuntimeError;
use cabin_schema::PathMapping;
use std::path::Path;
use std::time::Duration;

/// How to launch the single long-lived instance of an environment.
#[derive(Debug, Clone)]
pub struct InstanceSpec<'a> {
    /// Container name; the only identity an instance has.
    pub name: &'a str,
    pub image: &'a str,
    pub hostname: &'a str,
    pub mounts: &'a [PathMapping],
}

/// A command dispatched into a running instance.
#[derive(Debug, Clone)]
pub struct ExecRequest<'a> {
    pub instance: &'a str,
    pub user: &'a str,
    pub cwd: &'a Path,
    pub argv: &'a [String],
    pub env: &'a [(String, String)],
    /// Attach stdin and allocate a terminal.
    pub interactive: bool,
}

/// Container engine capability consumed by the lifecycle manager.
///
/// Instances are addressed by name only, so a second process can always
/// find the instance a first one started.
pub trait RuntimeBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Build and tag an image. A failing step aborts the build and nothing
    /// is tagged.
    fn build_image(&self, request: &BuildRequest<'_>) -> Result<(), RuntimeError>;

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    fn remove_image(&self, image: &str) -> Result<(), RuntimeError>;

    fn run_instance(&self, spec: &InstanceSpec<'_>) -> Result<(), RuntimeError>;

    /// Run a command inside the instance and return its exit code. A command
    /// killed by signal `n` reports `128 + n`.
    fn exec_in_instance(&self, request: &ExecRequest<'_>) -> Result<i32, RuntimeError>;

    fn stop_instance(&self, instance: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// Delete a leftover instance that holds the name without running.
    /// Succeeds when no such instance exists.
    fn remove_instance(&self, instance: &str) -> Result<(), RuntimeError>;

    fn is_running(&self, instance: &str) -> Result<bool, RuntimeError>;
}

/// Pick an engine by name. `auto` probes docker, then podman, then
/// `sudo -n docker`. `mock` keeps its state under `state_dir`.
pub fn select_backend(
    name: &str,
    state_dir: &Path,
) -> Result<Box<dyn RuntimeBackend>, RuntimeError> {
    match name {
        "auto" => crate::docker::DockerBackend::detect()
            .map(|b| Box::new(b) as Box<dyn RuntimeBackend>)
            .ok_or_else(|| RuntimeError::BackendUnavailable("docker or podman".to_owned())),
        "docker" => Ok(Box::new(crate::docker::DockerBackend::new(&["docker"]))),
        "podman" => Ok(Box::new(crate::docker::DockerBackend::new(&["podman"]))),
        "mock" => Ok(Box::new(crate::mock::MockBackend::with_state_file(
            crate::mock::mock_state_file(state_dir),
        ))),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(select_backend("docker", dir.path()).unwrap().name(), "docker");
        assert_eq!(select_backend("podman", dir.path()).unwrap().name(), "podman");
        assert_eq!(select_backend("mock", dir.path()).unwrap().name(), "mock");
    }

    #[test]
    fn select_invalid_backend_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            select_backend("lxc", dir.path()),
            Err(RuntimeError::BackendUnavailable(_))
        ));
    }
}
