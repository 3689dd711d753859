//! bscan - Batch-scan repository commits with a static-analysis tool.
//!
//! Progress is kept in a checkpoint file, so an interrupted run resumes
//! without re-scanning finished work.

use std::path::PathBuf;

use anyhow::Result;
use batch_scan_ops::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{checkpoint, config as config_cmd, doctor, scan, serve, status};

/// bscan - Resumable batch commit scanning.
///
/// Run `bscan scan commits.csv` to scan every pending row of a CSV.
#[derive(Parser, Debug)]
#[command(
    name = "bscan",
    author,
    version,
    about = "bscan: Resumable batch static analysis of repository commits",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan every pending row of an input CSV.
    ///
    /// Rows already processed in the checkpoint are skipped. Ctrl+C stops
    /// dispatching new items and waits for in-flight scans.
    Scan {
        /// Input CSV (repo_url/gh_project_name, commit_sha/git_trigger_commit).
        input: PathBuf,

        /// Concurrent scans (overrides config).
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Rows read per chunk (overrides config).
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run the REST API with a background batch runner.
    Serve {
        /// Port to listen on.
        #[arg(short, long, env = "PORT", default_value_t = 8080)]
        port: u16,
    },

    /// Show checkpoint totals.
    Status {
        /// List failed items with their error detail.
        #[arg(long)]
        failed: bool,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or edit the checkpoint.
    #[command(subcommand)]
    Checkpoint(CheckpointCommands),

    /// Manage configuration.
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Check that external tools are available.
    Doctor,
}

/// Checkpoint subcommands.
#[derive(Subcommand, Debug)]
enum CheckpointCommands {
    /// Mark a commit processed without scanning it.
    Mark {
        /// Repository clone URL.
        repo: String,
        /// Commit hash.
        commit: String,
        /// Analyzer project key to record.
        #[arg(long)]
        project_key: Option<String>,
    },

    /// Fold another checkpoint file into the active one.
    Merge {
        /// Checkpoint file to merge.
        source: PathBuf,
    },

    /// Per-repository totals.
    Repos,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration.
    Show,

    /// Set a configuration value.
    Set {
        /// Configuration key.
        key: String,
        /// Configuration value.
        value: String,
    },

    /// Get a configuration value.
    Get {
        /// Configuration key.
        key: String,
    },

    /// Reset configuration to defaults.
    Reset,

    /// Show path to config file.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment from .env applies to config overrides and RUST_LOG alike.
    let _ = dotenvy::dotenv();
    init_tracing(cli.verbose, cli.quiet, cli.log_json);

    match cli.command {
        Commands::Scan {
            input,
            concurrency,
            batch_size,
            json,
        } => {
            scan::execute(Config::load()?, input, concurrency, batch_size, json).await?;
        }

        Commands::Serve { port } => {
            serve::execute(Config::load()?, port).await?;
        }

        Commands::Status { failed, json } => {
            status::execute(Config::load()?, failed, json).await?;
        }

        Commands::Checkpoint(checkpoint_cmd) => {
            let config = Config::load()?;
            match checkpoint_cmd {
                CheckpointCommands::Mark {
                    repo,
                    commit,
                    project_key,
                } => {
                    checkpoint::mark(config, repo, commit, project_key).await?;
                }
                CheckpointCommands::Merge { source } => {
                    checkpoint::merge(config, source).await?;
                }
                CheckpointCommands::Repos => {
                    checkpoint::repos(config).await?;
                }
            }
        }

        Commands::Config(config_cmd_inner) => match config_cmd_inner {
            ConfigCommands::Show => {
                config_cmd::show(&Config::load()?)?;
            }
            ConfigCommands::Set { key, value } => {
                // Saved settings only; environment overrides stay out of the file.
                let mut config = Config::from_file()?;
                config_cmd::set(&mut config, &key, &value)?;
            }
            ConfigCommands::Get { key } => {
                config_cmd::get(&Config::load()?, &key)?;
            }
            ConfigCommands::Reset => {
                config_cmd::reset()?;
            }
            ConfigCommands::Path => {
                if let Some(path) = Config::config_file_path() {
                    println!("{}", path.display());
                } else {
                    println!("(no config file path available)");
                }
            }
        },

        Commands::Doctor => {
            doctor::execute(&Config::load()?)?;
        }
    }

    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the verbosity flags.
fn init_tracing(verbose: bool, quiet: bool, json: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so `--json` output on stdout stays parseable.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
