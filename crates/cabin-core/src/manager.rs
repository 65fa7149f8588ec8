use crate::compiler::{compile, CompileOptions};
use crate::concurrency::{shutdown_requested, EnvLock, ForwardGuard};
use crate::hooks::run_runtime_hooks;
use crate::lifecycle::{validate_transition, EnvState};
use crate::workdir::{resolve_workdir, CdMode};
use crate::CoreError;
use cabin_runtime::{BuildRequest, ExecRequest, InstanceSpec, RuntimeBackend, RuntimeError};
use cabin_schema::{
    DeclarationError, DefinitionBuilder, EnvName, EnvironmentSpec, HookPhase, HostSystem,
    ImageTag, PathMapping, DEFINITION_FILE, DEFINITION_TEMPLATE,
};
use cabin_store::{
    ImageRecord, ImageRegistry, RuntimeConfig, RuntimeConfigStore, Settings, StoreError,
    StoreLayout,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the session binary looked up next to the running executable.
const SESSION_BINARY_NAME: &str = "cabin-session";

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub no_cache: bool,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub image_tag: ImageTag,
    pub build_digest: String,
    /// The instance was running and has been stopped for the rebuild.
    pub stopped_running: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cd_mode: CdMode,
    pub host_cwd: PathBuf,
    pub interactive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub state: EnvState,
    pub content_dir: PathBuf,
    pub image_tag: Option<String>,
    pub hostname: Option<String>,
    pub built_at: Option<String>,
    pub built_with_version: Option<String>,
    pub path_mappings: Vec<PathMapping>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub name: String,
    pub content_dir: PathBuf,
    pub state: EnvState,
}

/// Split leading `NAME=VALUE` words off a command line. A `--` ends the
/// assignments and is dropped.
pub fn parse_env_assignments(args: &[String]) -> (Vec<(String, String)>, Vec<String>) {
    let mut env = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        if arg == "--" {
            return (env, args[i + 1..].to_vec());
        }
        match arg.split_once('=') {
            Some((key, value)) if is_env_name(key) => env.push((key.to_owned(), value.to_owned())),
            _ => return (env, args[i..].to_vec()),
        }
    }
    (env, Vec::new())
}

fn is_env_name(s: &str) -> bool {
    let mut bytes = s.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic() || b == b'_')
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Lifecycle manager for all environments under one config root.
///
/// Holds no per-environment state of its own: every operation reads the
/// runtime config fresh and asks the engine whether the instance runs.
pub struct Manager {
    layout: StoreLayout,
    backend: Box<dyn RuntimeBackend>,
    settings: Settings,
    host: HostSystem,
    configs: RuntimeConfigStore,
    images: ImageRegistry,
}

impl Manager {
    pub fn new(layout: StoreLayout, backend: Box<dyn RuntimeBackend>, settings: Settings) -> Self {
        Self {
            configs: RuntimeConfigStore::new(layout.clone()),
            images: ImageRegistry::new(layout.clone()),
            layout,
            backend,
            settings,
            host: HostSystem::detect(),
        }
    }

    /// Replace the detected host identity.
    #[must_use]
    pub fn with_host(mut self, host: HostSystem) -> Self {
        self.host = host;
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn backend(&self) -> &dyn RuntimeBackend {
        self.backend.as_ref()
    }

    fn env_name(name: &str) -> Result<EnvName, CoreError> {
        Ok(EnvName::parse(name)?)
    }

    fn lock(&self, name: &EnvName) -> Result<EnvLock, CoreError> {
        EnvLock::acquire(&self.layout.lock_file(name.as_str()))
    }

    /// Host path of the session binary: the configured override, else the
    /// file installed next to the running executable.
    fn session_binary(&self) -> Result<PathBuf, CoreError> {
        let path = match &self.settings.session_binary {
            Some(p) => p.clone(),
            None => std::env::current_exe()?
                .parent()
                .map_or_else(|| PathBuf::from(SESSION_BINARY_NAME), |d| d.join(SESSION_BINARY_NAME)),
        };
        if path.is_file() {
            Ok(path)
        } else {
            Err(CoreError::SessionBinaryNotFound(path))
        }
    }

    fn compile_options(session_binary: PathBuf) -> CompileOptions {
        CompileOptions {
            session_binary,
            version: VERSION.to_owned(),
            built_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Evaluate the registered definition of `record`.
    pub fn evaluate(&self, record: &ImageRecord) -> Result<EnvironmentSpec, CoreError> {
        let mut def =
            DefinitionBuilder::new(record.name.clone(), self.host.clone(), self.layout.root());
        def.import_definition(&record.content_dir)?;
        Ok(def.finish()?)
    }

    fn reconcile(&self, config: &RuntimeConfig) -> Result<EnvState, CoreError> {
        if self.backend.is_running(&config.name.instance_name())? {
            Ok(EnvState::Running)
        } else if self.backend.image_exists(config.image_tag.as_str())? {
            Ok(EnvState::Built)
        } else {
            Ok(EnvState::Absent)
        }
    }

    pub fn state(&self, name: &str) -> Result<EnvState, CoreError> {
        match self.configs.try_get(name)? {
            Some(config) => self.reconcile(&config),
            None => Ok(EnvState::Absent),
        }
    }

    pub fn build(&self, name: &str, options: BuildOptions) -> Result<BuildOutcome, CoreError> {
        let name = Self::env_name(name)?;
        self.layout.initialize()?;
        let record = self.images.get(name.as_str())?;
        info!("building {name} from {}", record.content_dir.display());

        let spec = self.evaluate(&record)?;
        let compiled = compile(&spec, &Self::compile_options(self.session_binary()?))?;
        debug!("build script:\n{}", compiled.script.render());

        let _lock = self.lock(&name)?;
        let state = self.state(name.as_str())?;
        validate_transition(state, EnvState::Built)?;

        let mut stopped_running = false;
        if state == EnvState::Running {
            if let Some(old) = self.configs.try_get(name.as_str())? {
                info!("stopping running instance of {name} before rebuilding");
                self.stop_locked(&old)?;
                stopped_running = true;
            }
        }

        let config = compiled.runtime_config;
        let context_dir = self.layout.build_dir(name.as_str());
        let result = self.backend.build_image(&BuildRequest {
            tag: config.image_tag.as_str(),
            script: &compiled.script,
            context_files: &compiled.context_files,
            context_dir: &context_dir,
            no_cache: options.no_cache,
        });
        if context_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&context_dir) {
                warn!("failed to remove build context {}: {e}", context_dir.display());
            }
        }
        match result {
            Ok(()) => {}
            // Ctrl-C reaches the engine's build too; report it as such.
            Err(RuntimeError::BuildFailed { .. }) if shutdown_requested() => {
                return Err(CoreError::Interrupted)
            }
            Err(RuntimeError::BuildFailed { code, .. }) => {
                return Err(CoreError::BuildFailed {
                    name: name.to_string(),
                    code,
                })
            }
            Err(e) => return Err(e.into()),
        }

        self.configs.put(&config)?;
        info!("built {} ({})", config.image_tag, config.build_digest);
        Ok(BuildOutcome {
            image_tag: config.image_tag,
            build_digest: config.build_digest,
            stopped_running,
        })
    }

    /// Start the instance if it is built. Returns whether an instance was
    /// launched; an already running one is left alone.
    pub fn start(&self, name: &str) -> Result<bool, CoreError> {
        let name = Self::env_name(name)?;
        let _lock = self.lock(&name)?;
        self.start_locked(&name).map(|(_, started)| started)
    }

    /// Like [`start`](Self::start), returning the config the instance runs
    /// with. Never builds.
    pub fn ensure_started(&self, name: &str) -> Result<RuntimeConfig, CoreError> {
        let name = Self::env_name(name)?;
        let _lock = self.lock(&name)?;
        self.start_locked(&name).map(|(config, _)| config)
    }

    fn start_locked(&self, name: &EnvName) -> Result<(RuntimeConfig, bool), CoreError> {
        let Some(config) = self.configs.try_get(name.as_str())? else {
            return Err(CoreError::NotBuilt(name.to_string()));
        };
        match self.reconcile(&config)? {
            EnvState::Absent => return Err(CoreError::NotBuilt(name.to_string())),
            EnvState::Running => return Ok((config, false)),
            EnvState::Built => validate_transition(EnvState::Built, EnvState::Running)?,
        }

        info!("starting {name}");
        fs::create_dir_all(&config.image_home_path_on_host)?;
        for mapping in &config.path_mappings {
            if !mapping.host_path.exists() {
                warn!(
                    "shared path {} does not exist on the host",
                    mapping.host_path.display()
                );
            }
        }

        let instance = name.instance_name();
        let mounts = config.mounts();
        let spec = InstanceSpec {
            name: &instance,
            image: config.image_tag.as_str(),
            hostname: &config.hostname,
            mounts: &mounts,
        };
        match self.backend.run_instance(&spec) {
            Ok(()) => {}
            Err(RuntimeError::AlreadyRunning(_)) => {
                // The name may be held by a leftover instance that is not running.
                if self.backend.is_running(&instance)? {
                    debug!("{instance} was started concurrently");
                    return Ok((config, false));
                }
                warn!("removing stale instance {instance}");
                self.backend.remove_instance(&instance)?;
                self.backend.run_instance(&spec)?;
            }
            Err(e) => return Err(e.into()),
        }

        run_runtime_hooks(self.backend.as_ref(), &config, HookPhase::AtStart);
        Ok((config, true))
    }

    /// Run a command in the environment and return its exit code.
    ///
    /// The working directory is translated before the engine is touched.
    /// `after-command` hooks run whatever happens to the command.
    pub fn run(&self, name: &str, request: &RunRequest) -> Result<i32, CoreError> {
        let env_name = Self::env_name(name)?;
        let Some(config) = self.configs.try_get(env_name.as_str())? else {
            return Err(CoreError::NotBuilt(env_name.to_string()));
        };
        let cwd = resolve_workdir(request.cd_mode, &request.host_cwd, &config)?;

        let config = self.ensure_started(name)?;
        info!("run in {env_name}: {:?} (cwd {})", request.argv, cwd.display());
        run_runtime_hooks(self.backend.as_ref(), &config, HookPhase::BeforeCommand);

        let instance = env_name.instance_name();
        let result = {
            let _forward = ForwardGuard::new();
            self.backend.exec_in_instance(&ExecRequest {
                instance: &instance,
                user: &config.username,
                cwd: &cwd,
                argv: &request.argv,
                env: &request.env,
                interactive: request.interactive,
            })
        };

        run_runtime_hooks(self.backend.as_ref(), &config, HookPhase::AfterCommand);

        match result {
            // The engine client only relays the exit status of a command
            // that Ctrl-C ended, so the signal flag tells the two apart.
            Ok(code) if code != 0 && shutdown_requested() => Err(CoreError::Interrupted),
            Ok(code) => Ok(code),
            Err(RuntimeError::Interrupted) => Err(CoreError::Interrupted),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop the instance. Returns whether one was running.
    pub fn stop(&self, name: &str) -> Result<bool, CoreError> {
        let name = Self::env_name(name)?;
        let _lock = self.lock(&name)?;
        let Some(config) = self.configs.try_get(name.as_str())? else {
            return Ok(false);
        };
        if self.reconcile(&config)? != EnvState::Running {
            debug!("{name} is not running");
            return Ok(false);
        }
        validate_transition(EnvState::Running, EnvState::Built)?;
        self.stop_locked(&config)?;
        Ok(true)
    }

    fn stop_locked(&self, config: &RuntimeConfig) -> Result<(), CoreError> {
        info!("stopping {}", config.name);
        run_runtime_hooks(self.backend.as_ref(), config, HookPhase::AtStop);
        match self
            .backend
            .stop_instance(&config.name.instance_name(), self.settings.stop_timeout())
        {
            Ok(()) | Err(RuntimeError::NotRunning(_)) => Ok(()),
            Err(e) => {
                warn!("stopping {} failed: {e}", config.name);
                Err(e.into())
            }
        }
    }

    pub fn status(&self, name: &str) -> Result<StatusReport, CoreError> {
        let name = Self::env_name(name)?;
        let record = self.images.get(name.as_str())?;
        let config = self.configs.try_get(name.as_str())?;
        let state = match &config {
            Some(c) => self.reconcile(c)?,
            None => EnvState::Absent,
        };

        let mut warnings = Vec::new();
        if EnvLock::try_acquire(&self.layout.lock_file(name.as_str()))?.is_none() {
            warnings.push(format!("another cabin command is currently working on '{name}'"));
        }
        if let Some(c) = &config {
            if !c.built_with_version.is_empty() && c.built_with_version != VERSION {
                warnings.push(format!(
                    "image was built by cabin {} (this is {VERSION}), rebuild with 'cabin build {name}'",
                    c.built_with_version
                ));
            }
            let session_binary = self.settings.session_binary.clone().unwrap_or_default();
            match self
                .evaluate(&record)
                .and_then(|spec| compile(&spec, &Self::compile_options(session_binary)))
            {
                Ok(fresh) if fresh.runtime_config.build_digest != c.build_digest => {
                    warnings.push(format!(
                        "definition changed since the last build, rebuild with 'cabin build {name}'"
                    ));
                }
                Ok(_) => {}
                Err(e) => warnings.push(format!("definition no longer evaluates: {e}")),
            }
        }

        Ok(StatusReport {
            name: name.to_string(),
            state,
            content_dir: record.content_dir,
            image_tag: config.as_ref().map(|c| c.image_tag.to_string()),
            hostname: config.as_ref().map(|c| c.hostname.clone()),
            built_at: config.as_ref().map(|c| c.built_at.clone()),
            built_with_version: config.as_ref().map(|c| c.built_with_version.clone()),
            path_mappings: config.map(|c| c.mounts()).unwrap_or_default(),
            warnings,
        })
    }

    /// Register `name` with a new definition directory holding a starter
    /// `cabin.toml`.
    pub fn image_create(&self, name: &str, dir: &Path) -> Result<ImageRecord, CoreError> {
        let name = Self::env_name(name)?;
        self.layout.initialize()?;
        if self.images.exists(name.as_str()) {
            return Err(StoreError::NameConflict(name.to_string()).into());
        }
        let definition = dir.join(DEFINITION_FILE);
        if definition.exists() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists, use 'image import'", definition.display()),
            )));
        }
        fs::create_dir_all(dir)?;
        fs::write(&definition, DEFINITION_TEMPLATE)?;
        self.register(name, dir)
    }

    /// Register an existing definition directory as `name`.
    pub fn image_import(&self, name: &str, dir: &Path) -> Result<ImageRecord, CoreError> {
        let name = Self::env_name(name)?;
        self.layout.initialize()?;
        if self.images.exists(name.as_str()) {
            return Err(StoreError::NameConflict(name.to_string()).into());
        }
        let definition = dir.join(DEFINITION_FILE);
        if !definition.is_file() {
            return Err(DeclarationError::DefinitionNotFound(definition).into());
        }
        self.register(name, dir)
    }

    fn register(&self, name: EnvName, dir: &Path) -> Result<ImageRecord, CoreError> {
        let record = ImageRecord {
            name,
            content_dir: fs::canonicalize(dir)?,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.images.add(&record)?;
        info!(
            "registered {} at {}",
            record.name,
            record.content_dir.display()
        );
        Ok(record)
    }

    pub fn image_list(&self) -> Result<Vec<ImageSummary>, CoreError> {
        self.images
            .list()?
            .into_iter()
            .map(|record| -> Result<ImageSummary, CoreError> {
                Ok(ImageSummary {
                    state: self.state(record.name.as_str())?,
                    name: record.name.into_inner(),
                    content_dir: record.content_dir,
                })
            })
            .collect()
    }

    /// Forget an environment: its instance, engine image, runtime config and
    /// registration. The definition directory and the persistent home are
    /// left on disk.
    pub fn image_remove(&self, name: &str, force: bool) -> Result<(), CoreError> {
        let name = Self::env_name(name)?;
        let _lock = self.lock(&name)?;
        self.images.get(name.as_str())?;

        if let Some(config) = self.configs.try_get(name.as_str())? {
            if self.backend.is_running(&name.instance_name())? {
                if !force {
                    return Err(CoreError::StillRunning(name.to_string()));
                }
                self.stop_locked(&config)?;
            }
            if self.backend.image_exists(config.image_tag.as_str())? {
                self.backend.remove_image(config.image_tag.as_str())?;
            }
            self.configs.remove(name.as_str())?;
        }
        self.images.remove(name.as_str())?;
        info!("removed {name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::request_shutdown;
    use cabin_runtime::MockBackend;
    use std::time::Duration;

    /// Engine whose commands see a Ctrl-C while running, reported only
    /// through their exit status as `docker exec` does.
    struct CtrlCDuringExec(MockBackend);

    impl RuntimeBackend for CtrlCDuringExec {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn available(&self) -> bool {
            true
        }
        fn build_image(&self, request: &BuildRequest<'_>) -> Result<(), RuntimeError> {
            self.0.build_image(request)
        }
        fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
            self.0.image_exists(image)
        }
        fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
            self.0.remove_image(image)
        }
        fn run_instance(&self, spec: &InstanceSpec<'_>) -> Result<(), RuntimeError> {
            self.0.run_instance(spec)
        }
        fn exec_in_instance(&self, request: &ExecRequest<'_>) -> Result<i32, RuntimeError> {
            request_shutdown();
            self.0.exec_in_instance(request)
        }
        fn stop_instance(&self, instance: &str, timeout: Duration) -> Result<(), RuntimeError> {
            self.0.stop_instance(instance, timeout)
        }
        fn remove_instance(&self, instance: &str) -> Result<(), RuntimeError> {
            self.0.remove_instance(instance)
        }
        fn is_running(&self, instance: &str) -> Result<bool, RuntimeError> {
            self.0.is_running(instance)
        }
    }

    #[test]
    fn ctrl_c_during_a_failing_command_reports_interrupted() {
        let root = tempfile::tempdir().unwrap();
        let home = root.path().join("home");
        fs::create_dir_all(home.join("src")).unwrap();
        let definition_dir = root.path().join("defs");
        fs::create_dir_all(&definition_dir).unwrap();
        fs::write(
            definition_dir.join(DEFINITION_FILE),
            "[[share_in_home]]\npath = \"src\"\n",
        )
        .unwrap();
        let session_binary = root.path().join("cabin-session");
        fs::write(&session_binary, "").unwrap();

        let mock = MockBackend::new();
        let settings = Settings {
            engine: None,
            stop_timeout_secs: Some(1),
            session_binary: Some(session_binary),
        };
        let manager = Manager::new(
            StoreLayout::new(root.path().join("config")),
            Box::new(CtrlCDuringExec(mock.clone())),
            settings,
        )
        .with_host(HostSystem {
            username: "alice".to_owned(),
            uid: 1000,
            home: home.clone(),
            hostname: "laptop".to_owned(),
        });
        manager.image_import("dev", &definition_dir).unwrap();
        manager.build("dev", BuildOptions::default()).unwrap();

        let request = |argv: &[&str]| RunRequest {
            argv: words(argv),
            env: Vec::new(),
            cd_mode: CdMode::NoCd,
            host_cwd: home.clone(),
            interactive: false,
        };
        assert!(matches!(
            manager.run("dev", &request(&["false"])),
            Err(CoreError::Interrupted)
        ));
        // A command that handles Ctrl-C and succeeds keeps its status.
        assert_eq!(manager.run("dev", &request(&["true"])).unwrap(), 0);
        assert_eq!(mock.exec_count(), 2);
    }

    fn words(s: &[&str]) -> Vec<String> {
        s.iter().map(|w| (*w).to_owned()).collect()
    }

    #[test]
    fn env_assignments_are_split_off() {
        let (env, argv) = parse_env_assignments(&words(&["CC=clang", "DEBUG=", "make", "X=1"]));
        assert_eq!(
            env,
            vec![
                ("CC".to_owned(), "clang".to_owned()),
                ("DEBUG".to_owned(), String::new())
            ]
        );
        assert_eq!(argv, words(&["make", "X=1"]));
    }

    #[test]
    fn double_dash_ends_assignments() {
        let (env, argv) = parse_env_assignments(&words(&["A=1", "--", "B=2", "env"]));
        assert_eq!(env, vec![("A".to_owned(), "1".to_owned())]);
        assert_eq!(argv, words(&["B=2", "env"]));
    }

    #[test]
    fn invalid_names_are_commands() {
        let (env, argv) = parse_env_assignments(&words(&["1A=x", "ls"]));
        assert!(env.is_empty());
        assert_eq!(argv, words(&["1A=x", "ls"]));
        let (env, argv) = parse_env_assignments(&words(&["./configure", "--prefix=/usr"]));
        assert!(env.is_empty());
        assert_eq!(argv.len(), 2);
    }
}
