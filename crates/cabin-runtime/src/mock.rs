use crate::backend::{ExecRequest, InstanceSpec, RuntimeBackend};
use crate::buildfile::{BuildRequest, BuildStep, ContextSource, Instruction};
use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One engine operation as observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Build {
        tag: String,
        /// Steps that reached the engine, in order, including a failing one.
        executed: Vec<BuildStep>,
        failed: Option<i32>,
    },
    Run {
        instance: String,
    },
    Exec {
        instance: String,
        argv: Vec<String>,
        cwd: PathBuf,
        user: String,
    },
    Stop {
        instance: String,
    },
    RemoveInstance {
        instance: String,
    },
    RemoveImage {
        tag: String,
    },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EngineState {
    images: BTreeSet<String>,
    running: BTreeSet<String>,
    /// Instances that exist but are not running, holding on to their name.
    #[serde(default)]
    stale: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy)]
enum ExecFault {
    Interrupt,
    Error,
}

#[derive(Debug, Default)]
struct Inner {
    engine: EngineState,
    calls: Vec<MockCall>,
    next_exec_fault: Option<ExecFault>,
}

/// Engine stand-in. Commands are never really executed: `false` exits 1,
/// `sh -c "exit N"` exits N, anything else succeeds.
///
/// Clones share state. With a state file, images and running instances
/// survive across processes, which lets CLI tests drive a whole lifecycle.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<Inner>>,
    state_file: Option<PathBuf>,
}

/// Exit status the mock assigns to a command line.
pub fn simulated_exit(argv: &[String]) -> i32 {
    match argv {
        [cmd] if cmd == "false" => 1,
        [sh, flag, script] if sh.ends_with("sh") && flag == "-c" => simulated_shell_exit(script),
        _ => 0,
    }
}

fn simulated_shell_exit(script: &str) -> i32 {
    let script = script.trim();
    if script == "false" {
        return 1;
    }
    script
        .strip_prefix("exit ")
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_file(path: PathBuf) -> Self {
        Self {
            inner: Arc::default(),
            state_file: Some(path),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, RuntimeError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        if let Some(path) = &self.state_file {
            if path.exists() {
                inner.engine = serde_json::from_str(&fs::read_to_string(path)?)?;
            }
        }
        Ok(inner)
    }

    fn save(&self, inner: &Inner) -> Result<(), RuntimeError> {
        if let Some(path) = &self.state_file {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_string_pretty(&inner.engine)?)?;
        }
        Ok(())
    }

    /// Every call made so far by this process, oldest first.
    pub fn calls(&self) -> Vec<MockCall> {
        self.inner
            .lock()
            .map(|inner| inner.calls.clone())
            .unwrap_or_default()
    }

    /// Number of instances ever launched by this process.
    pub fn run_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Run { .. }))
            .count()
    }

    pub fn exec_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Exec { .. }))
            .count()
    }

    /// Argument vectors of all exec calls, oldest first.
    pub fn exec_argvs(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Exec { argv, .. } => Some(argv),
                _ => None,
            })
            .collect()
    }

    /// The next exec behaves as if the user pressed Ctrl-C.
    pub fn interrupt_next_exec(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.next_exec_fault = Some(ExecFault::Interrupt);
        }
    }

    /// The next exec fails inside the engine.
    pub fn fail_next_exec(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.next_exec_fault = Some(ExecFault::Error);
        }
    }

    /// Leave a created-but-stopped instance behind, as a failed start does.
    pub fn leave_stale_instance(&self, instance: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock()?;
        inner.engine.running.remove(instance);
        inner.engine.stale.insert(instance.to_owned());
        self.save(&inner)
    }

    /// Drop an instance behind the manager's back, like a crashed container.
    pub fn kill_instance(&self, instance: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock()?;
        inner.engine.running.remove(instance);
        self.save(&inner)
    }
}

fn step_exit(step: &BuildStep) -> i32 {
    match &step.instruction {
        Instruction::RunExec(argv) => simulated_exit(argv),
        Instruction::Run(script) => simulated_shell_exit(script),
        _ => 0,
    }
}

impl RuntimeBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn build_image(&self, request: &BuildRequest<'_>) -> Result<(), RuntimeError> {
        for file in request.context_files {
            if let ContextSource::Host(src) = &file.source {
                if !src.exists() {
                    return Err(RuntimeError::ExecFailed(format!(
                        "cannot copy {}: no such file or directory",
                        src.display()
                    )));
                }
            }
        }

        let mut inner = self.lock()?;
        let mut executed = Vec::new();
        let mut failed = None;
        for step in request.script.steps() {
            executed.push(step.clone());
            let code = step_exit(step);
            if code != 0 {
                failed = Some(code);
                break;
            }
        }
        inner.calls.push(MockCall::Build {
            tag: request.tag.to_owned(),
            executed,
            failed,
        });

        if let Some(code) = failed {
            return Err(RuntimeError::BuildFailed {
                tag: request.tag.to_owned(),
                code,
            });
        }
        inner.engine.images.insert(request.tag.to_owned());
        self.save(&inner)
    }

    fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.lock()?.engine.images.contains(image))
    }

    fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock()?;
        inner.calls.push(MockCall::RemoveImage {
            tag: image.to_owned(),
        });
        if !inner.engine.images.remove(image) {
            return Err(RuntimeError::ImageNotFound(image.to_owned()));
        }
        self.save(&inner)
    }

    fn run_instance(&self, spec: &InstanceSpec<'_>) -> Result<(), RuntimeError> {
        let mut inner = self.lock()?;
        if inner.engine.running.contains(spec.name) || inner.engine.stale.contains(spec.name) {
            return Err(RuntimeError::AlreadyRunning(spec.name.to_owned()));
        }
        if !inner.engine.images.contains(spec.image) {
            return Err(RuntimeError::ImageNotFound(spec.image.to_owned()));
        }
        inner.calls.push(MockCall::Run {
            instance: spec.name.to_owned(),
        });
        inner.engine.running.insert(spec.name.to_owned());
        self.save(&inner)
    }

    fn exec_in_instance(&self, request: &ExecRequest<'_>) -> Result<i32, RuntimeError> {
        let mut inner = self.lock()?;
        if !inner.engine.running.contains(request.instance) {
            return Err(RuntimeError::NotRunning(request.instance.to_owned()));
        }
        inner.calls.push(MockCall::Exec {
            instance: request.instance.to_owned(),
            argv: request.argv.to_vec(),
            cwd: request.cwd.to_path_buf(),
            user: request.user.to_owned(),
        });
        match inner.next_exec_fault.take() {
            Some(ExecFault::Interrupt) => return Err(RuntimeError::Interrupted),
            Some(ExecFault::Error) => {
                return Err(RuntimeError::ExecFailed("simulated engine failure".to_owned()))
            }
            None => {}
        }
        drop(inner);

        let env: Vec<String> = request.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!(
            "mock-exec: {} (user={}, cwd={}, env=[{}])",
            request.argv.join(" "),
            request.user,
            request.cwd.display(),
            env.join(" ")
        );
        Ok(simulated_exit(request.argv))
    }

    fn stop_instance(&self, instance: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut inner = self.lock()?;
        if !inner.engine.running.remove(instance) {
            return Err(RuntimeError::NotRunning(instance.to_owned()));
        }
        inner.calls.push(MockCall::Stop {
            instance: instance.to_owned(),
        });
        self.save(&inner)
    }

    fn remove_instance(&self, instance: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock()?;
        inner.calls.push(MockCall::RemoveInstance {
            instance: instance.to_owned(),
        });
        inner.engine.stale.remove(instance);
        inner.engine.running.remove(instance);
        self.save(&inner)
    }

    fn is_running(&self, instance: &str) -> Result<bool, RuntimeError> {
        Ok(self.lock()?.engine.running.contains(instance))
    }
}

/// Where a state-file backed mock keeps its state under `dir`.
pub fn mock_state_file(dir: &Path) -> PathBuf {
    dir.join("mock-engine.json")
}
