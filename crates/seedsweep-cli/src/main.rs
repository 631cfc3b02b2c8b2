mod commands;
mod logging;
mod progress;
mod report;

use std::path::Path;
use std::process;

use anyhow::Context;
use chrono::Utc;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use seedsweep_core::paths;
use seedsweep_core::remote::DelugeClient;
use seedsweep_core::storage::{ActionOutcome, Database, Source};
use seedsweep_core::{AppConfig, CancelToken, ScanEngine};
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match seedsweep_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Could not install Ctrl-C handler: {}", err);
    }

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::Scan { skip_media, json }) => {
            run_scan(config, skip_media, json.as_deref(), &cancel)
        }
        Some(Commands::PruneCache) => {
            info!("Pruning hash cache...");
            ScanEngine::new(config)
                .prune_hash_cache()
                .map(|removed| println!("Removed {} stale cache entries", removed))
                .map_err(Into::into)
        }
        Some(Commands::CountHashCache) => {
            info!("Counting content cache hash...");
            ScanEngine::new(config)
                .count_hash_cache()
                .map(|count| println!("{} entries in hash cache", count))
                .map_err(Into::into)
        }
        Some(Commands::History { limit }) => run_history(&config, limit),
        Some(Commands::ShowLast) => run_show_last(&config),
        Some(Commands::Marked) => run_marked(&config),
        Some(Commands::RecordOutcome {
            path,
            outcome,
            source,
        }) => run_record_outcome(&config, &path, source.into(), outcome.into()),
        Some(Commands::PrintConfig) => toml::to_string_pretty(&config.redacted())
            .map(|text| println!("{}", text))
            .map_err(Into::into),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }

    Ok(())
}

fn run_scan(
    mut config: AppConfig,
    skip_media: bool,
    json: Option<&Path>,
    cancel: &CancelToken,
) -> anyhow::Result<()> {
    if skip_media {
        config.skip_media_check = true;
    }
    config.validate().context("invalid configuration")?;

    let client = DelugeClient::connect(config.daemon_settings())?;
    let engine = ScanEngine::new(config);
    let reporter = CliReporter::new();
    let result = engine.run(&client, &reporter, cancel);
    client.close();
    let report = result?;

    report::print_run(&report);
    if let Some(path) = json {
        report::write_json(&report, path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    println!();
    info!(
        "{} orphans, {} media orphans, {} mismatched, {} newly marked",
        format!("{}", report.classification.orphans.len()).red(),
        format!("{}", report.classification.media_orphans.len()).cyan(),
        format!("{}", report.classification.mismatched.len()).yellow(),
        format!("{}", report.eligible_for_action.len()).red(),
    );

    Ok(())
}

fn run_history(config: &AppConfig, limit: usize) -> anyhow::Result<()> {
    let db = Database::open(&config.sqlite_cache_path)?;
    report::print_history(&db.list_scan_runs(limit)?);
    Ok(())
}

fn run_show_last(config: &AppConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.sqlite_cache_path)?;
    match db.latest_scan_report()? {
        Some((run, rows)) => report::print_stored_run(&run, &rows),
        None => println!("No scan runs recorded yet"),
    }
    Ok(())
}

fn run_marked(config: &AppConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.sqlite_cache_path)?;
    let marked = db.files_marked_for_deletion()?;
    let stale = db.stale_marked_files()?;

    if marked.is_empty() {
        println!("Nothing is marked for deletion");
    } else {
        println!("{}", format!("{} files marked for deletion", marked.len()).bold());
        for row in &marked {
            report::print_tracked(row);
        }
    }

    if !stale.is_empty() {
        println!();
        println!(
            "{}",
            format!("{} marked files were not orphans in the latest run, do not delete", stale.len())
                .yellow()
        );
        for row in &stale {
            report::print_tracked(row);
        }
    }
    Ok(())
}

fn run_record_outcome(
    config: &AppConfig,
    path: &str,
    source: Source,
    outcome: ActionOutcome,
) -> anyhow::Result<()> {
    let path = paths::normalize(path)
        .with_context(|| format!("{} is not a path relative to the scanned root", path))?;
    let db = Database::open(&config.sqlite_cache_path)?;
    let row = db.record_action_outcome(&path, source, outcome, Utc::now())?;
    println!("{} is now {}", row.path, row.status.to_string().green());
    Ok(())
}
