use cabin_runtime::{ExecRequest, RuntimeBackend};
use cabin_schema::HookPhase;
use cabin_store::RuntimeConfig;
use tracing::{debug, warn};

/// Run the runtime hooks of `phase` inside the instance, in declaration
/// order, from the guest home. Failures are logged and never escalated.
/// Returns how many hooks failed.
pub fn run_runtime_hooks(
    backend: &dyn RuntimeBackend,
    config: &RuntimeConfig,
    phase: HookPhase,
) -> usize {
    let instance = config.name.instance_name();
    let mut failures = 0;
    for argv in config.hooks_for(phase) {
        debug!("{phase} hook: {argv:?}");
        let request = ExecRequest {
            instance: &instance,
            user: &config.username,
            cwd: &config.user_home,
            argv,
            env: &[],
            interactive: false,
        };
        match backend.exec_in_instance(&request) {
            Ok(0) => {}
            Ok(code) => {
                failures += 1;
                warn!("{phase} hook {argv:?} exited with code {code}");
            }
            Err(e) => {
                failures += 1;
                warn!("{phase} hook {argv:?} failed: {e}");
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use cabin_runtime::{BuildRequest, BuildScript, InstanceSpec, MockBackend};
    use cabin_schema::{EnvName, HookTable};
    use std::path::PathBuf;

    fn running_mock(config: &RuntimeConfig) -> MockBackend {
        let backend = MockBackend::new();
        let dir = tempfile::tempdir().unwrap();
        backend
            .build_image(&BuildRequest {
                tag: config.image_tag.as_str(),
                script: &BuildScript::new(),
                context_files: &[],
                context_dir: dir.path(),
                no_cache: false,
            })
            .unwrap();
        backend
            .run_instance(&InstanceSpec {
                name: &config.name.instance_name(),
                image: config.image_tag.as_str(),
                hostname: &config.hostname,
                mounts: &[],
            })
            .unwrap();
        backend
    }

    fn config_with(hooks: HookTable) -> RuntimeConfig {
        let name = EnvName::parse("dev").unwrap();
        RuntimeConfig {
            format_version: 1,
            image_tag: name.image_tag(),
            name,
            path_mappings: Vec::new(),
            hooks,
            username: "alice".to_owned(),
            uid: 1000,
            user_home: PathBuf::from("/home/alice"),
            hostname: "dev-on-laptop".to_owned(),
            image_home_path_on_host: PathBuf::from("/tmp/home"),
            content_dir: None,
            built_with_version: String::new(),
            built_at: String::new(),
            build_digest: String::new(),
            checksum: None,
        }
    }

    #[test]
    fn hooks_run_in_order_and_failures_are_counted() {
        let mut hooks = HookTable::default();
        hooks.push(HookPhase::AtStart, vec!["first".to_owned()]);
        hooks.push(HookPhase::AtStart, vec!["false".to_owned()]);
        hooks.push(HookPhase::AtStart, vec!["third".to_owned()]);
        hooks.push(HookPhase::AtStop, vec!["never".to_owned()]);
        let config = config_with(hooks);
        let backend = running_mock(&config);

        let failures = run_runtime_hooks(&backend, &config, HookPhase::AtStart);
        assert_eq!(failures, 1);
        assert_eq!(
            backend.exec_argvs(),
            vec![
                vec!["first".to_owned()],
                vec!["false".to_owned()],
                vec!["third".to_owned()]
            ]
        );
    }

    #[test]
    fn engine_errors_are_swallowed() {
        let mut hooks = HookTable::default();
        hooks.push(HookPhase::BeforeCommand, vec!["x".to_owned()]);
        let config = config_with(hooks);
        let backend = MockBackend::new();
        // No instance is running, so every exec fails.
        assert_eq!(
            run_runtime_hooks(&backend, &config, HookPhase::BeforeCommand),
            1
        );
    }
}
