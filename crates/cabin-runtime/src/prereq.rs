use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

const DOCKER_HINT: &str =
    "apt install docker.io | dnf install moby-engine | pacman -S docker | https://docs.docker.com/get-docker/";
const PODMAN_HINT: &str = "apt install podman | dnf install podman | pacman -S podman";

/// Check that the engine named by the settings can be found.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_engine_prereqs(engine: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    match engine {
        "docker" if !command_exists("docker") => missing.push(MissingPrereq {
            name: "docker",
            purpose: "building images and running environments",
            install_hint: DOCKER_HINT,
        }),
        "podman" if !command_exists("podman") => missing.push(MissingPrereq {
            name: "podman",
            purpose: "building images and running environments",
            install_hint: PODMAN_HINT,
        }),
        "auto" if !command_exists("docker") && !command_exists("podman") => {
            missing.push(MissingPrereq {
                name: "container engine",
                purpose: "building images and running environments",
                install_hint: "install docker or podman",
            });
        }
        _ => {}
    }
    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nCabin needs a container engine to build and run environments.");
    msg
}
