use std::path::PathBuf;

/// Identity of the invoking host user. Supplies the defaults for the
/// environment's user, home directory and hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSystem {
    pub username: String,
    pub uid: u32,
    pub home: PathBuf,
    pub hostname: String,
}

impl HostSystem {
    pub fn detect() -> Self {
        let username = std::env::var("USER").unwrap_or_else(|_| "user".to_owned());
        let home =
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| format!("/home/{username}")));
        Self {
            username,
            uid: current_uid(),
            home,
            hostname: current_hostname().unwrap_or_else(|| "localhost".to_owned()),
        }
    }
}

/// Safe wrapper around libc::getuid().
#[allow(unsafe_code)]
fn current_uid() -> u32 {
    // SAFETY: getuid() is always safe: no arguments, no side effects, cannot fail.
    unsafe { libc::getuid() }
}

#[allow(unsafe_code)]
fn current_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid writable buffer and its length is passed alongside it.
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if ret != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_owned();
    // Short host name only.
    let short = name.split('.').next().unwrap_or_default().to_owned();
    (!short.is_empty()).then_some(short)
}
