//! mailverify - verification pipeline for virtual-mailbox listings.
//!
//! Crawls listing providers, extracts postal addresses, enriches them with
//! CMRA/RDI flags from a CASS/DPV address validator, and persists the
//! results for the dashboard API.

mod cli;
mod config;
mod crawler;
mod models;
mod repository;
mod server;
mod util;
mod validator;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "mailverify=debug"
    } else {
        "mailverify=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
