//! Backend driving the `docker` or `podman` command line.

use crate::backend::{ExecRequest, InstanceSpec, RuntimeBackend};
use crate::buildfile::{materialize_context, BuildRequest, BUILD_FILE_NAME, SESSION_BINARY_PATH};
use crate::{terminal, RuntimeError};
use cabin_schema::PathMapping;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;
use tracing::debug;

pub struct DockerBackend {
    /// Program plus leading arguments, e.g. `["sudo", "-n", "docker"]`.
    program: Vec<String>,
}

impl DockerBackend {
    pub fn new(program: &[&str]) -> Self {
        Self {
            program: program.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// First working engine among docker, podman and `sudo -n docker`.
    pub fn detect() -> Option<Self> {
        let candidates: [&[&str]; 3] = [&["docker"], &["podman"], &["sudo", "-n", "docker"]];
        candidates
            .iter()
            .map(|c| Self::new(c))
            .find(|b| b.available())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program[0]);
        cmd.args(&self.program[1..]);
        cmd
    }

    fn quiet(&self, args: &[&str]) -> Result<std::process::Output, RuntimeError> {
        debug!("{} {}", self.program.join(" "), args.join(" "));
        self.command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RuntimeError::ExecFailed(format!("{}: {e}", self.program.join(" "))))
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 1,
    }
}

fn stderr_text(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_owned()
}

/// `host:guest`, plus the consistency flag on macOS where the engine honours it.
pub(crate) fn volume_arg(mapping: &PathMapping) -> String {
    let base = format!(
        "{}:{}",
        mapping.host_path.display(),
        mapping.guest_path.display()
    );
    if cfg!(target_os = "macos") {
        format!("{base}:{}", mapping.consistency.as_str())
    } else {
        base
    }
}

/// Arguments for `exec` that hand the command to the in-instance session.
pub(crate) fn exec_args(request: &ExecRequest<'_>, tty: bool) -> Vec<String> {
    let mut args = vec!["exec".to_owned()];
    if request.interactive {
        args.push("-i".to_owned());
        if tty {
            args.push("-t".to_owned());
        }
    }
    args.push(request.instance.to_owned());
    args.push(SESSION_BINARY_PATH.to_owned());
    args.push("exec".to_owned());
    args.push("--user".to_owned());
    args.push(request.user.to_owned());
    args.push("--cwd".to_owned());
    args.push(request.cwd.display().to_string());
    for (key, value) in request.env {
        args.push("--env".to_owned());
        args.push(format!("{key}={value}"));
    }
    args.push("--".to_owned());
    args.extend(request.argv.iter().cloned());
    args
}

impl RuntimeBackend for DockerBackend {
    fn name(&self) -> &str {
        self.program.last().map_or("docker", String::as_str)
    }

    fn available(&self) -> bool {
        self.command()
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    fn build_image(&self, request: &BuildRequest<'_>) -> Result<(), RuntimeError> {
        materialize_context(request.context_dir, request.script, request.context_files)?;

        let mut cmd = self.command();
        cmd.arg("build").arg("--tag").arg(request.tag);
        if request.no_cache {
            cmd.arg("--no-cache");
        }
        cmd.arg("-f")
            .arg(request.context_dir.join(BUILD_FILE_NAME))
            .arg(request.context_dir);
        debug!("building {} in {}", request.tag, request.context_dir.display());

        let status = cmd
            .stdin(Stdio::null())
            .status()
            .map_err(|e| RuntimeError::ExecFailed(format!("failed to run engine build: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::BuildFailed {
                tag: request.tag.to_owned(),
                code: exit_code(status),
            })
        }
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.quiet(&["image", "inspect", image])?.status.success())
    }

    fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        let output = self.quiet(&["rmi", image])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::ExecFailed(format!(
                "removing image {image}: {}",
                stderr_text(&output)
            )))
        }
    }

    fn run_instance(&self, spec: &InstanceSpec<'_>) -> Result<(), RuntimeError> {
        let mut args = vec![
            "run".to_owned(),
            "--detach".to_owned(),
            "--rm".to_owned(),
            "--name".to_owned(),
            spec.name.to_owned(),
            "--hostname".to_owned(),
            spec.hostname.to_owned(),
        ];
        for mapping in spec.mounts {
            args.push("--volume".to_owned());
            args.push(volume_arg(mapping));
        }
        args.push(spec.image.to_owned());

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.quiet(&refs)?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_text(&output);
        if stderr.contains("already in use") {
            Err(RuntimeError::AlreadyRunning(spec.name.to_owned()))
        } else {
            Err(RuntimeError::ExecFailed(format!(
                "starting {}: {stderr}",
                spec.name
            )))
        }
    }

    fn exec_in_instance(&self, request: &ExecRequest<'_>) -> Result<i32, RuntimeError> {
        let args = exec_args(request, terminal::is_interactive());
        debug!("{} {}", self.program.join(" "), args.join(" "));

        let mut cmd = self.command();
        cmd.args(&args);
        if !request.interactive {
            cmd.stdin(Stdio::null());
        }
        let status = cmd
            .status()
            .map_err(|e| RuntimeError::ExecFailed(format!("exec in {}: {e}", request.instance)))?;
        Ok(exit_code(status))
    }

    fn stop_instance(&self, instance: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let secs = timeout.as_secs().to_string();
        let output = self.quiet(&["stop", "--time", &secs, instance])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_text(&output);
        if stderr.contains("No such container") || stderr.contains("no container with name") {
            Err(RuntimeError::NotRunning(instance.to_owned()))
        } else {
            Err(RuntimeError::ExecFailed(format!(
                "stopping {instance}: {stderr}"
            )))
        }
    }

    fn remove_instance(&self, instance: &str) -> Result<(), RuntimeError> {
        let output = self.quiet(&["rm", "--force", instance])?;
        let stderr = stderr_text(&output);
        if output.status.success()
            || stderr.contains("No such container")
            || stderr.contains("no container with name")
        {
            Ok(())
        } else {
            Err(RuntimeError::ExecFailed(format!(
                "removing {instance}: {stderr}"
            )))
        }
    }

    fn is_running(&self, instance: &str) -> Result<bool, RuntimeError> {
        let output = self.quiet(&["inspect", "--format", "{{.State.Running}}", instance])?;
        if !output.status.success() {
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }
}
