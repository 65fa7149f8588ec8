mod commands;

use cabin_core::{install_signal_handler, CdMode, Manager};
use cabin_runtime::{check_engine_prereqs, format_missing, select_backend};
use cabin_store::{Settings, StoreLayout};
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{error_exit_code, EXIT_FAILURE};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cabin",
    version,
    about = "Declarative, always-on development environments backed by a container engine"
)]
struct Cli {
    /// Configuration directory (default: $CABIN_CONFIG_DIR or ~/.cabin).
    #[arg(long, global = true)]
    config_dir: Option<String>,

    /// Container engine: auto, docker, podman or mock.
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct CdArgs {
    /// Start in the guest home instead of the current directory.
    #[arg(long, default_value_t = false, conflicts_with = "auto_cd")]
    no_cd: bool,
    /// Use the current directory if it is shared, else the guest home.
    #[arg(long, default_value_t = false)]
    auto_cd: bool,
}

impl CdArgs {
    fn mode(&self) -> CdMode {
        if self.no_cd {
            CdMode::NoCd
        } else if self.auto_cd {
            CdMode::Auto
        } else {
            CdMode::Translate
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build (or rebuild) an environment's image from its definition.
    Build {
        /// Environment name.
        name: String,
        /// Ask the engine not to reuse cached layers.
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },
    /// Start a built environment.
    Start {
        /// Environment name.
        name: String,
    },
    /// Stop a running environment.
    Stop {
        /// Environment name.
        name: String,
    },
    /// Run a command inside an environment, starting it if needed.
    Run {
        /// Environment name.
        name: String,
        #[command(flatten)]
        cd: CdArgs,
        /// Optional VAR=VALUE assignments followed by the command.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Open an interactive shell inside an environment.
    Shell {
        /// Environment name.
        name: String,
        #[command(flatten)]
        cd: CdArgs,
    },
    /// Show the state of an environment.
    Status {
        /// Environment name.
        name: String,
    },
    /// Manage registered environment definitions.
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum ImageCommands {
    /// Create a definition directory with a starter cabin.toml and register it.
    Create {
        /// Environment name.
        name: String,
        /// Directory that will hold the definition.
        dir: String,
    },
    /// Register an existing definition directory.
    Import {
        /// Environment name.
        name: String,
        /// Directory containing cabin.toml.
        dir: String,
    },
    /// List registered environments.
    List,
    /// Forget an environment and delete its engine image.
    Remove {
        /// Environment name.
        name: String,
        /// Stop the environment first if it is running.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

impl Commands {
    /// Whether the command talks to the container engine.
    fn needs_engine(&self) -> bool {
        !matches!(
            self,
            Commands::Completions { .. }
                | Commands::ManPages { .. }
                | Commands::Image {
                    command: ImageCommands::Create { .. } | ImageCommands::Import { .. }
                }
        )
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CABIN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = match &cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(*shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(dir),
        _ => dispatch(&cli),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(error_exit_code(&msg))
        }
    }
}

fn dispatch(cli: &Cli) -> Result<u8, String> {
    install_signal_handler();

    let root = cli
        .config_dir
        .as_deref()
        .map_or_else(StoreLayout::default_root, expand_tilde);
    let layout = StoreLayout::new(root);
    let settings = Settings::load(&layout).map_err(|e| format!("store error: {e}"))?;
    let engine = cli.engine.clone().unwrap_or_else(|| settings.engine());
    tracing::debug!("config root {}, engine {engine}", layout.root().display());

    if cli.command.needs_engine() && std::env::var("CABIN_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = check_engine_prereqs(&engine);
        if !missing.is_empty() {
            eprintln!("error: {}", format_missing(&missing));
            return Ok(EXIT_FAILURE);
        }
    }

    // Create and import never reach the engine, so skip probing for one.
    let backend_name = if cli.command.needs_engine() {
        engine.as_str()
    } else {
        "docker"
    };
    let backend =
        select_backend(backend_name, layout.root()).map_err(|e| format!("runtime error: {e}"))?;
    let manager = Manager::new(layout, backend, settings);
    let json = cli.json;

    match &cli.command {
        Commands::Build { name, no_cache } => commands::build::run(&manager, name, *no_cache, json),
        Commands::Start { name } => commands::start::run(&manager, name, json),
        Commands::Stop { name } => commands::stop::run(&manager, name, json),
        Commands::Run { name, cd, command } => {
            commands::run::run(&manager, name, cd.mode(), command)
        }
        Commands::Shell { name, cd } => commands::shell::run(&manager, name, cd.mode()),
        Commands::Status { name } => commands::status::run(&manager, name, json),
        Commands::Image { command } => match command {
            ImageCommands::Create { name, dir } => {
                commands::image::create(&manager, name, &expand_tilde(dir), json)
            }
            ImageCommands::Import { name, dir } => {
                commands::image::import(&manager, name, &expand_tilde(dir), json)
            }
            ImageCommands::List => commands::image::list(&manager, json),
            ImageCommands::Remove { name, force } => {
                commands::image::remove(&manager, name, *force, json)
            }
        },
        Commands::Completions { .. } | Commands::ManPages { .. } => Ok(commands::EXIT_SUCCESS),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn run_collects_command_after_flags() {
        let cli = Cli::parse_from(["cabin", "run", "dev", "--auto-cd", "CC=clang", "make", "-j4"]);
        let Commands::Run { name, cd, command } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(name, "dev");
        assert_eq!(cd.mode(), CdMode::Auto);
        assert_eq!(command, vec!["CC=clang", "make", "-j4"]);
    }

    #[test]
    fn cd_flags_conflict() {
        assert!(Cli::try_parse_from(["cabin", "run", "dev", "--no-cd", "--auto-cd", "ls"]).is_err());
    }

    #[test]
    fn image_create_needs_no_engine() {
        let cli = Cli::parse_from(["cabin", "image", "create", "dev", "/tmp/dev"]);
        assert!(!cli.command.needs_engine());
        let cli = Cli::parse_from(["cabin", "image", "list"]);
        assert!(cli.command.needs_engine());
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = std::env::var("HOME").unwrap_or_default();
        if !home.is_empty() {
            assert_eq!(expand_tilde("~/defs"), PathBuf::from(home).join("defs"));
        }
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }
}
