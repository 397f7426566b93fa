//! # Jira Harvest CLI (`jharvest`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `jharvest init` | Create the SQLite database and run schema migrations |
//! | `jharvest serve` | Start the collector HTTP server |
//! | `jharvest assess <file> --url <url>` | Classify a saved page |
//! | `jharvest extract <file> --url <url>` | Print the entities extracted from a saved page |
//! | `jharvest fetch --jql <jql>` | Pull issues from the Jira REST API into the store |
//! | `jharvest stats` | Summarize the store |
//! | `jharvest clear <tickets\|projects\|all>` | Delete stored entities |
//!
//! ## Examples
//!
//! ```bash
//! jharvest init --config ./config/jharvest.toml
//! jharvest serve --config ./config/jharvest.toml
//! jharvest assess page.html --url https://acme.atlassian.net/browse/ABC-1
//! jharvest extract board.html --url https://acme.atlassian.net/jira/software/projects/ABC/boards/1
//! jharvest fetch --jql "project = ABC AND updated >= -7d"
//! ```

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use jira_harvest::config::{self, ExtractionConfig};
use jira_harvest::{commands, migrate, server, stats};

/// Jira Harvest: classify captured Jira pages, extract tickets and
/// projects, and keep a versioned local store.
#[derive(Parser, Debug)]
#[command(name = "jharvest", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/jharvest.toml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the collector HTTP server on `[server].bind`.
    Serve,

    /// Classify a saved HTML page and print the verdict.
    Assess {
        /// HTML file to classify.
        file: PathBuf,

        /// URL the page was captured from.
        #[arg(long, default_value = "")]
        url: String,
    },

    /// Extract and normalize a saved HTML page without storing anything.
    Extract {
        /// HTML file to extract.
        file: PathBuf,

        /// URL the page was captured from; relative links resolve against it.
        #[arg(long, default_value = "")]
        url: String,

        /// Skip classification and extract as this page type
        /// (`issue`, `issueList`, `board`, `search`, `projectsList`).
        #[arg(long)]
        page_type: Option<String>,
    },

    /// Fetch issues matching a JQL query through the REST API.
    Fetch {
        #[arg(long)]
        jql: String,
    },

    /// Show store statistics.
    Stats,

    /// Delete stored entities: `tickets`, `projects`, or `all`.
    Clear { what: String },
}

/// Extraction settings for the offline commands: the config file when it
/// exists, built-in defaults otherwise.
fn offline_extraction(path: &Path) -> Result<ExtractionConfig> {
    if path.exists() {
        Ok(config::load_config(path)?.extraction)
    } else {
        Ok(ExtractionConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    // Commands that don't require a config file
    match &cli.command {
        Commands::Assess { file, url } => {
            let extraction = offline_extraction(&cli.config)?;
            return commands::run_assess(&extraction, file, url);
        }
        Commands::Extract {
            file,
            url,
            page_type,
        } => {
            let extraction = offline_extraction(&cli.config)?;
            return commands::run_extract(&extraction, file, url, page_type.as_deref());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Fetch { jql } => {
            commands::run_fetch(&cfg, &jql).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Clear { what } => {
            commands::run_clear(&cfg, &what).await?;
        }
        Commands::Assess { .. } | Commands::Extract { .. } => {}
    }

    Ok(())
}
