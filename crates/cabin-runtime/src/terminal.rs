const BANNER: &str = "\x1b[1;36m[cabin]\x1b[0m";

pub fn print_shell_banner(name: &str, hostname: &str) {
    if stderr_is_terminal() {
        eprintln!("{BANNER} entering \x1b[1m{name}\x1b[0m as \x1b[1m{hostname}\x1b[0m");
    }
}

pub fn print_shell_exit(name: &str) {
    if stderr_is_terminal() {
        eprintln!("{BANNER} left {name}");
    }
}

/// Both stdin and stdout are terminals, so the engine should allocate a tty.
#[allow(unsafe_code)]
pub fn is_interactive() -> bool {
    // SAFETY: isatty() only inspects the descriptor; no side effects.
    unsafe { libc::isatty(libc::STDIN_FILENO) != 0 && libc::isatty(libc::STDOUT_FILENO) != 0 }
}

#[allow(unsafe_code)]
fn stderr_is_terminal() -> bool {
    // SAFETY: see is_interactive.
    unsafe { libc::isatty(libc::STDERR_FILENO) != 0 }
}
