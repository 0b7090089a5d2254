//! # pbisect CLI
//!
//! Parallel first-bad-revision search over a git history.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pbisect_config::logging::{init_logging, LogLevel};
use pbisect_config::{log_cli_debug, Config};

mod bisect;
mod clean;
mod progress;
mod status;

/// pbisect - find the first bad revision by probing many revisions at once
#[derive(Parser)]
#[command(name = "pbisect")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Storage root for the CAS and run workspaces
    #[arg(long, global = true, value_name = "DIR")]
    base_path: Option<PathBuf>,

    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search good..bad for the first revision the command fails on
    Bisect(bisect::BisectArgs),

    /// Show CAS and workspace usage
    Status,

    /// Delete run workspaces
    Clean(clean::CleanArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file locations
    Path,
}

fn main() -> Result<ExitCode> {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = Cli::parse();
    init_logging(LogLevel::from_verbosity(cli.verbose));

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(base) = &cli.base_path {
        config.storage.base_path = base.clone();
    }
    log_cli_debug!(
        "Configuration loaded",
        base_path = tracing::field::display(config.storage.base_path.display()),
    );

    match cli.command {
        Commands::Bisect(args) => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            rt.block_on(bisect::run(config, args))
        }
        Commands::Status => {
            status::run(&config.layout())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Clean(args) => {
            clean::run(&config.layout(), args)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => {
                    let toml = toml::to_string_pretty(&config)
                        .context("Failed to serialize configuration")?;
                    print!("{toml}");
                }
                ConfigCommands::Path => {
                    match Config::global_config_path() {
                        Some(path) => println!("Global:  {}", path.display()),
                        None => println!("Global:  (no home directory)"),
                    }
                    println!("Project: {}", Config::project_config_path().display());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
