//! Helpers for `cabin-session`, the binary that runs inside every Cabin
//! instance.
//!
//! The binary has two roles. As the entrypoint it keeps the instance alive
//! and reaps orphans. As `exec` it becomes the requested command, running as
//! the environment user in the translated working directory.

use std::ffi::CString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where the keep-alive role records its pid.
pub const PID_FILE: &str = "/tmp/cabin-session.pid";

pub const PASSWD_FILE: &str = "/etc/passwd";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no user named '{0}' in {PASSWD_FILE}")]
    UnknownUser(String),
    #[error("malformed passwd entry: {0}")]
    MalformedPasswd(String),
    #[error("invalid environment assignment '{0}', expected NAME=VALUE")]
    InvalidEnv(String),
    #[error(
        "cannot change directory to {}; the instance may have lost its mounts, try 'cabin stop' and run the command again",
        .0.display()
    )]
    BadWorkdir(PathBuf),
    #[error("cannot list the groups of '{0}'")]
    Groups(String),
    #[error("cannot install signal handler: {0}")]
    Signal(String),
    #[error("no command given")]
    NoCommand,
    #[error("cannot execute '{command}': {source}")]
    Exec {
        command: String,
        source: std::io::Error,
    },
}

/// One line of `/etc/passwd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: String,
}

impl PasswdEntry {
    pub fn parse(line: &str) -> Result<Self, SessionError> {
        let malformed = || SessionError::MalformedPasswd(line.to_owned());
        let fields: Vec<&str> = line.split(':').collect();
        let [name, _, uid, gid, _, home, shell] = fields.as_slice() else {
            return Err(malformed());
        };
        Ok(Self {
            name: (*name).to_owned(),
            uid: uid.parse().map_err(|_| malformed())?,
            gid: gid.parse().map_err(|_| malformed())?,
            home: PathBuf::from(home),
            shell: (*shell).to_owned(),
        })
    }
}

/// Find `user` in the contents of a passwd file. Comments, blank lines and
/// malformed entries of other users are skipped.
pub fn find_user(contents: &str, user: &str) -> Result<PasswdEntry, SessionError> {
    for line in contents.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.split(':').next() != Some(user) {
            continue;
        }
        return PasswdEntry::parse(line);
    }
    Err(SessionError::UnknownUser(user.to_owned()))
}

pub fn lookup_user(passwd: &Path, user: &str) -> Result<PasswdEntry, SessionError> {
    find_user(&fs::read_to_string(passwd)?, user)
}

pub fn parse_env_arg(arg: &str) -> Result<(String, String), SessionError> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(SessionError::InvalidEnv(arg.to_owned())),
    }
}

/// Environment for a command run as `user`: the identity variables first,
/// then the caller's assignments, which may override them.
pub fn session_env(user: &PasswdEntry, extra: &[(String, String)]) -> Vec<(String, String)> {
    let mut env = vec![
        ("HOME".to_owned(), user.home.display().to_string()),
        ("USER".to_owned(), user.name.clone()),
        ("LOGNAME".to_owned(), user.name.clone()),
    ];
    if !user.shell.is_empty() {
        env.push(("SHELL".to_owned(), user.shell.clone()));
    }
    for (key, value) in extra {
        env.retain(|(k, _)| k != key);
        env.push((key.clone(), value.clone()));
    }
    env
}

/// Upper bound on the group list; Linux allows 65536 supplementary groups.
const MAX_GROUPS: usize = 65_536;

/// Every group `user` belongs to, `gid` included, as `id -G` reports them.
#[allow(unsafe_code)]
pub fn supplementary_groups(user: &str, gid: u32) -> Result<Vec<libc::gid_t>, SessionError> {
    let name = CString::new(user).map_err(|_| SessionError::Groups(user.to_owned()))?;
    let mut groups: Vec<libc::gid_t> = vec![0; 32];
    loop {
        let mut count = groups.len() as libc::c_int;
        // SAFETY: `name` is NUL-terminated and `groups` has room for `count` entries.
        let rc = unsafe { libc::getgrouplist(name.as_ptr(), gid, groups.as_mut_ptr(), &mut count) };
        if rc >= 0 {
            groups.truncate(count.max(0) as usize);
            return Ok(groups);
        }
        // Too small; glibc reports the needed size in `count`.
        let needed = (count.max(0) as usize).max(groups.len() * 2);
        if needed > MAX_GROUPS {
            return Err(SessionError::Groups(user.to_owned()));
        }
        groups.resize(needed, 0);
    }
}

/// Exit status reported when the command cannot be started, following the
/// shell convention.
pub fn exec_failure_code(err: &std::io::Error) -> u8 {
    if err.kind() == std::io::ErrorKind::NotFound {
        127
    } else {
        126
    }
}
