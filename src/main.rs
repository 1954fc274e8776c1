mod catalog;
mod cli;
mod commands;
mod config;
mod paths;
mod probe;
mod progress;
mod runner;
mod signals;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Environment variable overriding the log filter (env_logger syntax)
const ENV_LOG: &str = "KUBESTRAP_LOG";

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub state_dir: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .parse_env(env_logger::Env::new().filter(ENV_LOG))
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        state_dir: cli.state_dir,
    };
    log::trace!("verbosity {}, quiet {}", ctx.verbose, ctx.quiet);

    match dispatch(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::from(exit_code(&e))
        }
    }
}

fn dispatch(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Validate => commands::validate::run(ctx),
        Command::Install(args) => commands::install::run(ctx, args),
        Command::Plan { modules } => commands::plan::run(ctx, &modules),
        Command::Status => commands::status::run(ctx),
        Command::Modules => commands::modules::run(ctx),
        Command::State(cmd) => commands::state::run(ctx, cmd),
        Command::GenerateConfig { output, force } => commands::generate_config::run(output, force),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "kubestrap", &mut io::stdout());
            Ok(())
        }
    }
}

/// 2 for bad settings, catalog or request; 1 for everything else
fn exit_code(error: &anyhow::Error) -> u8 {
    if error.downcast_ref::<config::ConfigError>().is_some() {
        return 2;
    }
    match error.downcast_ref::<orchestrator::Error>() {
        Some(e) if e.is_configuration() => 2,
        _ => 1,
    }
}
