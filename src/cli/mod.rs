//! CLI parser and command dispatch.

mod commands;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "mailverify")]
#[command(about = "Verification pipeline for virtual-mailbox listings")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve,

    /// Crawl ATMB listings once and wait for the run to finish
    Crawl {
        /// Detail or listing URLs to crawl (defaults to CRAWL_LINK_SEEDS)
        links: Vec<String>,
    },

    /// Crawl iPost1 locations once and wait for the run to finish
    CrawlIpost1,

    /// Re-parse stored page bodies against the current parser
    Reprocess {
        /// Parser version to stamp (defaults to the built-in version)
        #[arg(long)]
        target_version: Option<String>,
        /// Only touch records not yet at the target version
        #[arg(long)]
        only_outdated: bool,
        /// Re-validate even when parsed fields are unchanged
        #[arg(long)]
        force_revalidate: bool,
    },

    /// Show recent runs and system stats
    Status,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Serve => commands::serve(&config).await,
        Commands::Crawl { links } => commands::crawl(&config, links).await,
        Commands::CrawlIpost1 => commands::crawl_ipost1(&config).await,
        Commands::Reprocess {
            target_version,
            only_outdated,
            force_revalidate,
        } => {
            commands::reprocess(&config, target_version, only_outdated, force_revalidate).await
        }
        Commands::Status => commands::status(&config),
    }
}
