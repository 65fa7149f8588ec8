use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive per-environment lock, held across a check-then-act sequence.
pub struct EnvLock {
    lock_file: File,
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl EnvLock {
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e)))?;
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for EnvLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static FORWARDING: AtomicBool = AtomicBool::new(false);

/// Trap SIGINT, SIGTERM and SIGHUP. The first signal only sets a flag; a
/// second one exits, unless a command is in the foreground (see
/// [`ForwardGuard`]), in which case the command alone reacts to it.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if FORWARDING.load(Ordering::SeqCst) {
            request_shutdown();
            return;
        }
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        request_shutdown();
        eprintln!("\nshutdown requested, finishing current operation...");
    });
}

pub(crate) fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// While alive, signals are left to the foreground command sharing our
/// terminal and never terminate this process.
pub struct ForwardGuard(());

impl ForwardGuard {
    pub fn new() -> Self {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        FORWARDING.store(true, Ordering::SeqCst);
        Self(())
    }
}

impl Default for ForwardGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ForwardGuard {
    fn drop(&mut self) {
        FORWARDING.store(false, Ordering::SeqCst);
    }
}
