//! Compile an `EnvironmentSpec` into an image build script plus the runtime
//! config that the image cannot carry.

use crate::CoreError;
use cabin_runtime::{BuildScript, ContextFile, ContextSource, Instruction, Stage, SESSION_BINARY_PATH};
use cabin_schema::{DeclarationError, EnvironmentSpec, HookPhase, PackageFamily, SudoMode};
use cabin_store::{RuntimeConfig, RUNTIME_CONFIG_VERSION};
use std::path::{Path, PathBuf};

/// Context file name of the session binary.
const SESSION_CONTEXT_NAME: &str = "cabin-session";
const SUDOERS_CONTEXT_NAME: &str = "sudoers";
const SECURE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Host path of the `cabin-session` binary copied into the image.
    pub session_binary: PathBuf,
    pub version: String,
    /// RFC 3339 timestamp recorded in the runtime config, never in the script.
    pub built_at: String,
}

#[derive(Debug, Clone)]
pub struct CompiledBuild {
    pub script: BuildScript,
    pub context_files: Vec<ContextFile>,
    pub runtime_config: RuntimeConfig,
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn shell_quote_path(p: &Path) -> String {
    shell_quote(&p.to_string_lossy())
}

/// Package-manager invocations for one distro family.
struct PackageManager {
    family: PackageFamily,
    tool: &'static str,
}

impl PackageManager {
    fn for_spec(spec: &EnvironmentSpec) -> Result<Self, CoreError> {
        let tool = match (spec.package_family(), spec.distro.name.as_str()) {
            (PackageFamily::DebianLike, _) => "apt-get",
            (PackageFamily::RpmLike, "centos") => "yum",
            (PackageFamily::RpmLike, _) => "dnf",
            (PackageFamily::Other, _) => {
                return Err(DeclarationError::UnsupportedDistro(spec.distro.to_string()).into())
            }
        };
        Ok(Self {
            family: spec.package_family(),
            tool,
        })
    }

    /// Refresh package lists and install in one step, so a cached earlier
    /// layer never pairs with stale lists.
    fn install(&self, packages: &[String]) -> String {
        let quoted: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
        let what = quoted.join(" ");
        match self.family {
            PackageFamily::DebianLike => format!(
                "export DEBIAN_FRONTEND=noninteractive && apt-get update -qqy && \
                 apt-get install -qqy -o=Dpkg::Use-Pty=0 --no-install-recommends {what}"
            ),
            _ => format!("{} makecache && {} install -y {what}", self.tool, self.tool),
        }
    }

    fn clean(&self) -> String {
        match self.family {
            PackageFamily::DebianLike => {
                "apt-get clean -qq && rm -rf /var/lib/apt/lists/*".to_owned()
            }
            _ => format!("{} clean all", self.tool),
        }
    }
}

fn sudoers(username: &str, mode: SudoMode) -> String {
    let nopasswd = if mode == SudoMode::Passwordless {
        "NOPASSWD: "
    } else {
        ""
    };
    format!(
        "root ALL=(ALL) ALL\n\
         {username} ALL=(ALL) {nopasswd}ALL\n\
         Defaults    env_reset\n\
         Defaults    secure_path=\"{SECURE_PATH}\"\n"
    )
}

fn copied_file_name(index: usize, host_path: &Path) -> String {
    let base = host_path
        .file_name()
        .map_or_else(|| "file".to_owned(), |n| n.to_string_lossy().into_owned());
    format!("files/{index:03}-{base}")
}

fn emit_hooks(script: &mut BuildScript, spec: &EnvironmentSpec, phase: HookPhase) {
    for argv in spec.hooks.get(phase) {
        script.push(Stage::Hook(phase), Instruction::RunExec(argv.clone()));
    }
}

/// Translate an evaluated environment into a build. Pure: the same
/// environment and session binary path always yield a byte-identical script.
pub fn compile(spec: &EnvironmentSpec, options: &CompileOptions) -> Result<CompiledBuild, CoreError> {
    let pm = PackageManager::for_spec(spec)?;
    let mut script = BuildScript::new();
    let mut context_files = Vec::new();

    // Base
    script.push(
        Stage::Base,
        Instruction::Comment(format!("Cabin environment {}.", spec.name)),
    );
    script.push(Stage::Base, Instruction::From(spec.base_image()));
    if let Some(maintainer) = &spec.maintainer {
        script.push(
            Stage::Base,
            Instruction::Label {
                key: "maintainer".to_owned(),
                value: maintainer.clone(),
            },
        );
    }
    if !spec.additional_archs.is_empty() {
        let cmds: Vec<String> = spec
            .additional_archs
            .iter()
            .map(|a| format!("dpkg --add-architecture {}", shell_quote(a)))
            .collect();
        script.push(Stage::Base, Instruction::Run(cmds.join(" && ")));
    }

    emit_hooks(&mut script, spec, HookPhase::AtBuildStart);

    // Bootstrap: what the session and user setup need.
    let mut bootstrap: Vec<String> = Vec::new();
    match pm.family {
        PackageFamily::DebianLike => {
            bootstrap.extend(["apt-utils", "locales", "passwd"].map(str::to_owned));
        }
        _ => bootstrap.push("shadow-utils".to_owned()),
    }
    if spec.sudo != SudoMode::None {
        bootstrap.push("sudo".to_owned());
    }
    script.push(Stage::Bootstrap, Instruction::Run(pm.install(&bootstrap)));
    context_files.push(ContextFile {
        name: SESSION_CONTEXT_NAME.to_owned(),
        source: ContextSource::Host(options.session_binary.clone()),
    });
    script.push(
        Stage::Bootstrap,
        Instruction::Copy {
            src: SESSION_CONTEXT_NAME.to_owned(),
            dest: SESSION_BINARY_PATH.to_owned(),
        },
    );
    script.push(
        Stage::Bootstrap,
        Instruction::RunExec(vec![
            "chmod".to_owned(),
            "0755".to_owned(),
            SESSION_BINARY_PATH.to_owned(),
        ]),
    );

    // UserSetup. A base image may already own the uid (ubuntu ships one at
    // 1000); that account is dropped first.
    let home = shell_quote_path(&spec.user_home);
    let user = shell_quote(&spec.username);
    let uid = spec.uid;
    script.push(
        Stage::UserSetup,
        Instruction::Run(format!(
            "existing=$(getent passwd {uid} | cut -d: -f1) && \
             if [ -n \"$existing\" ]; then userdel \"$existing\"; fi && \
             mkdir -p \"$(dirname {home})\" && \
             useradd -m -s /bin/bash --home-dir {home} --uid {uid} {user} && \
             chown {user} {home}"
        )),
    );

    if spec.sudo != SudoMode::None {
        context_files.push(ContextFile {
            name: SUDOERS_CONTEXT_NAME.to_owned(),
            source: ContextSource::Inline(sudoers(&spec.username, spec.sudo).into_bytes()),
        });
        script.push(
            Stage::Sudo,
            Instruction::Copy {
                src: SUDOERS_CONTEXT_NAME.to_owned(),
                dest: "/etc/sudoers".to_owned(),
            },
        );
        script.push(
            Stage::Sudo,
            Instruction::RunExec(vec![
                "chmod".to_owned(),
                "0440".to_owned(),
                "/etc/sudoers".to_owned(),
            ]),
        );
    }

    emit_hooks(&mut script, spec, HookPhase::AtBuildBeforeUserPkgs);

    if !spec.packages.is_empty() {
        script.push(Stage::Packages, Instruction::Run(pm.install(&spec.packages)));
    }
    script.push(Stage::Packages, Instruction::Run(pm.clean()));

    for (index, file) in spec.copied_files.iter().enumerate() {
        let name = copied_file_name(index, &file.host_path);
        context_files.push(ContextFile {
            name: name.clone(),
            source: ContextSource::Host(file.host_path.clone()),
        });
        script.push(
            Stage::Copy,
            Instruction::Copy {
                src: name,
                dest: file.guest_path.to_string_lossy().into_owned(),
            },
        );
    }

    emit_hooks(&mut script, spec, HookPhase::AtBuildEnd);

    // Finalize. The entrypoint stays root: the session drops privileges per command.
    script.push(
        Stage::Finalize,
        Instruction::Env {
            key: "USER".to_owned(),
            value: spec.username.clone(),
        },
    );
    script.push(
        Stage::Finalize,
        Instruction::Workdir(spec.user_home.to_string_lossy().into_owned()),
    );
    script.push(
        Stage::Finalize,
        Instruction::Entrypoint(vec![SESSION_BINARY_PATH.to_owned(), "keep-alive".to_owned()]),
    );

    let runtime_config = RuntimeConfig {
        format_version: RUNTIME_CONFIG_VERSION,
        name: spec.name.clone(),
        image_tag: spec.name.image_tag(),
        path_mappings: spec.path_mappings.clone(),
        hooks: spec.hooks.runtime_only(),
        username: spec.username.clone(),
        uid: spec.uid,
        user_home: spec.user_home.clone(),
        hostname: spec.hostname.clone(),
        image_home_path_on_host: spec.image_home_path_on_host.clone(),
        content_dir: spec.definition_file_dir().map(Path::to_path_buf),
        built_with_version: options.version.clone(),
        built_at: options.built_at.clone(),
        build_digest: script.digest(),
        checksum: None,
    };

    Ok(CompiledBuild {
        script,
        context_files,
        runtime_config,
    })
}
