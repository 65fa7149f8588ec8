use cabin_session::{
    exec_failure_code, lookup_user, parse_env_arg, session_env, supplementary_groups,
    SessionError, PASSWD_FILE, PID_FILE,
};
use clap::{Parser, Subcommand};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// How often the idle entrypoint wakes up to reap children.
const IDLE_TICK: Duration = Duration::from_millis(500);

static TERMINATE: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Parser)]
#[command(
    name = "cabin-session",
    version,
    about = "Session helper running inside Cabin instances"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Keep the instance alive until it is stopped.
    KeepAlive,
    /// Run a command as an environment user.
    Exec {
        /// User to run the command as.
        #[arg(long)]
        user: String,
        /// Working directory inside the instance.
        #[arg(long)]
        cwd: PathBuf,
        /// Extra environment variables.
        #[arg(long = "env", value_name = "NAME=VALUE")]
        env: Vec<String>,
        /// Command and arguments (after --).
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
}

#[allow(unsafe_code)]
fn current_uid() -> u32 {
    // SAFETY: getuid() takes no arguments and cannot fail.
    unsafe { libc::getuid() }
}

#[allow(unsafe_code)]
fn ignore_sigint() {
    // SAFETY: installs the predefined SIG_IGN disposition, no handler code runs.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
}

/// Collect every exited child without blocking.
#[allow(unsafe_code)]
fn reap_children() {
    loop {
        let mut status = 0;
        // SAFETY: `status` is a valid out pointer for the duration of the call.
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        debug!("reaped child {pid}");
    }
}

/// Switch the child to `uid`/`gid` with the given group list right before
/// it execs. `Command::uid` would clear the supplementary groups instead.
#[allow(unsafe_code)]
fn switch_user(cmd: &mut Command, uid: u32, gid: u32, groups: Vec<libc::gid_t>) {
    // SAFETY: the closure runs between fork and exec and only makes
    // async-signal-safe syscalls on memory allocated before the fork.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setgroups(groups.len() as _, groups.as_ptr()) != 0
                || libc::setgid(gid) != 0
                || libc::setuid(uid) != 0
            {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

fn keep_alive() -> Result<(), SessionError> {
    // The termination feature routes SIGTERM and SIGHUP here as well.
    ctrlc::set_handler(|| TERMINATE.store(true, Ordering::SeqCst))
        .map_err(|e| SessionError::Signal(e.to_string()))?;
    // Registered after the handler so Ctrl-C in an attached terminal does
    // not take the instance down.
    ignore_sigint();

    let pid = std::process::id();
    println!("Started with PID {pid}");
    std::fs::write(PID_FILE, pid.to_string())?;

    while !TERMINATE.load(Ordering::SeqCst) {
        reap_children();
        std::thread::sleep(IDLE_TICK);
    }
    println!("Terminating the instance.");
    Ok(())
}

/// Replace this process with `command`. Only returns on failure.
fn exec(
    user: &str,
    cwd: &Path,
    env: &[String],
    command: &[String],
) -> Result<std::convert::Infallible, SessionError> {
    let entry = lookup_user(Path::new(PASSWD_FILE), user)?;
    if !cwd.is_dir() {
        return Err(SessionError::BadWorkdir(cwd.to_path_buf()));
    }
    let extra = env
        .iter()
        .map(|e| parse_env_arg(e))
        .collect::<Result<Vec<_>, _>>()?;
    let (program, args) = command.split_first().ok_or(SessionError::NoCommand)?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .envs(session_env(&entry, &extra));
    if current_uid() != entry.uid {
        let groups = supplementary_groups(&entry.name, entry.gid)?;
        switch_user(&mut cmd, entry.uid, entry.gid, groups);
    }
    info!("exec {program} as {user} in {}", cwd.display());
    let source = cmd.exec();
    Err(SessionError::Exec {
        command: program.clone(),
        source,
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CABIN_SESSION_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::KeepAlive => keep_alive().map(|()| ExitCode::SUCCESS),
        Commands::Exec {
            user,
            cwd,
            env,
            command,
        } => exec(&user, &cwd, &env, &command).map(|never| -> ExitCode { match never {} }),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("cabin-session: {e}");
            match &e {
                SessionError::Exec { source, .. } => ExitCode::from(exec_failure_code(source)),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
