use super::EXIT_SUCCESS;
use clap::CommandFactory;
use std::path::Path;

/// Render `cmd` as `<prefix>.1` and recurse into its subcommands, so nested
/// commands such as `image create` get `cabin-image-create.1`.
fn render(cmd: &clap::Command, prefix: &str, dir: &Path) -> Result<usize, String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd.clone())
        .title(prefix)
        .render(&mut buf)
        .map_err(|e| format!("man page render failed: {e}"))?;
    let path = dir.join(format!("{prefix}.1"));
    std::fs::write(&path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))?;

    let mut written = 1;
    for sub in cmd.get_subcommands().filter(|s| s.get_name() != "help") {
        written += render(sub, &format!("{prefix}-{}", sub.get_name()), dir)?;
    }
    Ok(written)
}

pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("failed to create dir: {e}"))?;
    let count = render(&C::command(), "cabin", dir)?;
    println!("{count} man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}
