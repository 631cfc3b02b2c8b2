use std::fs;
use std::path::Path;

use colored::*;
use indicatif::HumanBytes;
use seedsweep_core::storage::{ScanRunSummary, TrackedFile};
use seedsweep_core::{ClassifiedFile, RunReport};

/// Files listed per category before the rest is summarized as "... and N more".
const LIST_LIMIT: usize = 25;

pub fn print_run(report: &RunReport) {
    let c = &report.classification;

    println!();
    println!("{} #{}", "Scan run".bold(), report.scan_id);
    println!(
        "  host {}  started {}",
        report.run.remote_host_identity.cyan(),
        report.run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  fetch {:.2}s, torrents {:.2}s, media {:.2}s, reconcile {:.2}s, db {:.2}s",
        report.timings.fetch_secs,
        report.timings.torrent_scan_secs,
        report.timings.media_scan_secs,
        report.timings.reconcile_secs,
        report.timings.record_secs,
    );

    print_files(
        &format!("Orphans ({}, {})", c.orphans.len(), HumanBytes(c.orphan_bytes()).to_string()),
        &c.orphans,
        |f| HumanBytes(f.size_bytes).to_string().red(),
    );

    let reported: Vec<ClassifiedFile> = c
        .torrents_present
        .iter()
        .filter(|f| f.include_in_report)
        .cloned()
        .collect();
    print_files(
        &format!(
            "Seeding but not in the library ({} of {})",
            reported.len(),
            c.torrents_present.len()
        ),
        &reported,
        |f| HumanBytes(f.size_bytes).to_string().yellow(),
    );

    if c.media_scanned {
        print_files(
            &format!("Media orphans ({})", c.media_orphans.len()),
            &c.media_orphans,
            |f| HumanBytes(f.size_bytes).to_string().cyan(),
        );
        if !c.mismatched.is_empty() {
            println!();
            println!("{}", format!("Mismatched ({})", c.mismatched.len()).bold());
            for m in c.mismatched.iter().take(LIST_LIMIT) {
                println!(
                    "  {}  torrent {} ({})  media {} ({})",
                    m.path,
                    m.torrent_digest,
                    HumanBytes(m.torrent_size).to_string(),
                    m.media_digest,
                    HumanBytes(m.media_size).to_string()
                );
            }
        }
    } else {
        println!();
        println!("{}", "Media folder not scanned".dimmed());
    }

    if !report.eligible_for_action.is_empty() {
        println!();
        println!(
            "{}",
            format!("Newly marked for deletion ({})", report.eligible_for_action.len())
                .red()
                .bold()
        );
        for row in &report.eligible_for_action {
            print_tracked(row);
        }
    }

    if !report.fetch_warnings.is_empty() || !report.skipped_files.is_empty() {
        println!();
        println!(
            "{} {} items dropped from the fetch, {} files unreadable",
            "Warnings:".yellow().bold(),
            report.fetch_warnings.len(),
            report.skipped_files.len()
        );
        for w in &report.fetch_warnings {
            println!("  {} {}", w.item_id, w.reason.dimmed());
        }
        for s in &report.skipped_files {
            println!("  {} {}", s.path.display(), s.reason.dimmed());
        }
    }
}

fn print_files<F>(title: &str, files: &[ClassifiedFile], size: F)
where
    F: Fn(&ClassifiedFile) -> ColoredString,
{
    println!();
    println!("{}", title.bold());
    for f in files.iter().take(LIST_LIMIT) {
        let label = f.label.as_deref().unwrap_or("-");
        println!("  {:>14}  {}  {}", size(f), f.path, label.dimmed());
    }
    if files.len() > LIST_LIMIT {
        println!("  ... and {} more", files.len() - LIST_LIMIT);
    }
}

pub fn print_tracked(row: &TrackedFile) {
    println!(
        "  {}  {} [{}] seen {} times since {}",
        row.path,
        HumanBytes(row.size_bytes).to_string().red(),
        row.source,
        row.consecutive_scans,
        row.first_seen_at.format("%Y-%m-%d")
    );
}

pub fn print_history(runs: &[ScanRunSummary]) {
    if runs.is_empty() {
        println!("No scan runs recorded yet");
        return;
    }
    for run in runs {
        println!(
            "#{:<5} {}  {}  orphans {}  present {}  media {}  mismatched {}  touched {}",
            run.id,
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.remote_host_identity.cyan(),
            run.orphan_count.to_string().red(),
            run.torrent_count,
            run.media_count,
            run.mismatch_count,
            run.files_touched,
        );
    }
}

pub fn write_json(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)?;
    Ok(())
}

/// A stored run as `show-last` prints it: the run line plus its reportable rows.
pub fn print_stored_run(run: &ScanRunSummary, rows: &[TrackedFile]) {
    print_history(std::slice::from_ref(run));
    println!(
        "  finished {}  scanned {}",
        run.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        run.paths_scanned.join(", ")
    );
    if rows.is_empty() {
        println!("  no reportable files");
        return;
    }
    for row in rows {
        print_tracked(row);
    }
}
