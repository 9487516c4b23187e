//! Command implementations: each one-shot command drives the same service
//! layer the HTTP API uses, then polls the run record until it is terminal.

use std::time::Duration;

use anyhow::Context;
use console::style;

use crate::config::Config;
use crate::crawler::ReprocessOptions;
use crate::models::RunStatus;
use crate::server::{self, AppState};

pub async fn serve(config: &Config) -> anyhow::Result<()> {
    server::serve(config).await
}

pub async fn crawl(config: &Config, links: Vec<String>) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let run_id = state.service.start_crawl(links)?;
    println!("started crawl {}", style(&run_id).cyan());
    wait_for_run(&state, &run_id).await
}

pub async fn crawl_ipost1(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let run_id = state.service.start_ipost1_crawl()?;
    println!("started iPost1 crawl {}", style(&run_id).cyan());
    wait_for_run(&state, &run_id).await
}

pub async fn reprocess(
    config: &Config,
    target_version: Option<String>,
    only_outdated: bool,
    force_revalidate: bool,
) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let run_id = state.service.start_reprocess(ReprocessOptions {
        target_version,
        only_outdated,
        force_revalidate,
        since_time: None,
    })?;
    println!("started reprocess {}", style(&run_id).cyan());
    wait_for_run(&state, &run_id).await
}

pub fn status(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;

    match state.stats.get_system_stats() {
        Ok(stats) => {
            println!("{}", style("System").bold());
            println!(
                "  mailboxes: {} (commercial {}, residential {}), avg price ${:.2}",
                stats.total_mailboxes,
                stats.total_commercial,
                stats.total_residential,
                stats.avg_price
            );
        }
        Err(_) => println!("{}", style("System stats not computed yet").dim()),
    }

    let runs = state.runs.list_runs(20).context("list runs")?;
    println!("{}", style("Recent runs").bold());
    if runs.is_empty() {
        println!("  none");
    }
    for run in runs {
        println!(
            "  {} {} [{}] found={} validated={} skipped={} failed={}",
            run.run_id,
            run.source,
            styled_status(run.status),
            run.stats.found,
            run.stats.validated,
            run.stats.skipped,
            run.stats.failed
        );
    }
    Ok(())
}

/// Poll the run record until it reaches a terminal status.
async fn wait_for_run(state: &AppState, run_id: &str) -> anyhow::Result<()> {
    loop {
        tokio::time::sleep(Duration::from_secs(2)).await;
        let run = state.runs.get_run(run_id)?;

        if !run.status.is_terminal() {
            println!(
                "  running: found={} validated={} skipped={} failed={}",
                run.stats.found, run.stats.validated, run.stats.skipped, run.stats.failed
            );
            continue;
        }

        println!(
            "{} [{}] found={} validated={} skipped={} failed={}",
            run.run_id,
            styled_status(run.status),
            run.stats.found,
            run.stats.validated,
            run.stats.skipped,
            run.stats.failed
        );
        for sample in &run.errors_sample {
            println!("  {} {}", style("error:").red(), sample.reason);
        }
        if run.status != RunStatus::Success {
            anyhow::bail!("run {} finished with status {}", run.run_id, run.status.as_str());
        }
        return Ok(());
    }
}

fn styled_status(status: RunStatus) -> console::StyledObject<&'static str> {
    let s = status.as_str();
    match status {
        RunStatus::Success => style(s).green(),
        RunStatus::Running => style(s).cyan(),
        RunStatus::Cancelled | RunStatus::PartialHalt | RunStatus::Timeout => style(s).yellow(),
        RunStatus::Failed => style(s).red(),
    }
}
