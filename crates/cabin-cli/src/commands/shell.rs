use super::run::{current_dir, execute};
use cabin_core::{CdMode, Manager, RunRequest};
use cabin_runtime::terminal;
use cabin_store::RuntimeConfigStore;

const SHELL: [&str; 2] = ["/bin/bash", "--login"];

pub fn run(manager: &Manager, name: &str, cd_mode: CdMode) -> Result<u8, String> {
    let hostname = RuntimeConfigStore::new(manager.layout().clone())
        .try_get(name)
        .map_err(|e| format!("store error: {e}"))?
        .map_or_else(|| name.to_owned(), |config| config.hostname);

    let request = RunRequest {
        argv: SHELL.iter().map(|s| (*s).to_owned()).collect(),
        env: Vec::new(),
        cd_mode,
        host_cwd: current_dir()?,
        interactive: true,
    };
    terminal::print_shell_banner(name, &hostname);
    let result = execute(manager, name, &request);
    terminal::print_shell_exit(name);
    result
}
