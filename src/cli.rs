use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubestrap")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Provision a Kubernetes stack onto this host", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Settings file (default: <config dir>/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding the state ledger
    #[arg(long, global = true, value_name = "PATH")]
    pub state_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the pre-flight checks only
    Validate,

    /// Install modules and everything they depend on
    Install(InstallArgs),

    /// Show what install would do, without touching the host
    Plan {
        /// Modules to plan (default: the whole catalog)
        modules: Vec<String>,
    },

    /// Show the state ledger
    Status,

    /// List the module catalog
    Modules,

    /// Inspect or edit the state ledger
    #[command(subcommand)]
    State(StateCommand),

    /// Write a settings file with every default spelled out
    GenerateConfig {
        /// Output path (default: <config dir>/config.toml)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct InstallArgs {
    /// Modules to install
    #[arg(required = true)]
    pub modules: Vec<String>,

    /// Skip the pre-flight checks
    #[arg(long)]
    pub skip_preflight: bool,

    /// Attempts per module, overriding the settings file
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub attempts: Option<u32>,

    /// Per-attempt timeout in seconds, overriding the settings file
    #[arg(
        long,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..=crate::config::MAX_DURATION_SECS)
    )]
    pub timeout: Option<u64>,

    /// Echo each command as it runs
    #[arg(long)]
    pub echo: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// Print the raw ledger entries
    Show {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop a module's ledger entry so the next install re-applies it
    Forget {
        /// Module name
        module: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
