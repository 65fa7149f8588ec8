use super::{command_exit_code, EXIT_INTERRUPTED};
use cabin_core::{parse_env_assignments, CdMode, CoreError, Manager, RunRequest};
use std::fs;
use std::io::{stdin, IsTerminal};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

pub fn run(manager: &Manager, name: &str, cd_mode: CdMode, command: &[String]) -> Result<u8, String> {
    let (env, argv) = parse_env_assignments(command);
    if argv.is_empty() {
        return Err("no command given after the environment assignments".to_owned());
    }
    let request = RunRequest {
        argv,
        env,
        cd_mode,
        host_cwd: current_dir()?,
        interactive: stdin().is_terminal(),
    };
    execute(manager, name, &request)
}

/// The working directory, preferring `$PWD` over the link-resolved `getcwd`
/// result when both name the same directory.
pub(super) fn current_dir() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("cannot determine the current directory: {e}"))?;
    Ok(std::env::var_os("PWD")
        .map(PathBuf::from)
        .filter(|pwd| pwd.is_absolute() && same_directory(pwd, &cwd))
        .unwrap_or(cwd))
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

/// Run `request` and turn the outcome into the process exit status: the
/// command's own status, or 130 when it was interrupted.
pub(super) fn execute(manager: &Manager, name: &str, request: &RunRequest) -> Result<u8, String> {
    match manager.run(name, request) {
        Ok(code) => Ok(command_exit_code(code)),
        Err(CoreError::Interrupted) => {
            eprintln!("interrupted");
            Ok(EXIT_INTERRUPTED)
        }
        Err(e) => Err(e.to_string()),
    }
}
