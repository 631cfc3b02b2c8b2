use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use seedsweep_core::ProgressReporter;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Fetch and scan phases: spinner (no total known upfront)
/// - Hash phase: progress bar (total known once the walk is done)
/// - DB write phase: spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICKS);
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_fetch_start(&self, host: &str) {
        self.set_bar(Self::spinner(format!("Fetching inventory from {}...", host)));
    }

    fn on_fetch_complete(&self, items: usize, files: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Fetch complete: {} items, {} files in {:.2}s",
            items, files, duration_secs
        );
    }

    fn on_scan_start(&self, root: &str) {
        self.set_bar(Self::spinner(format!("Scanning {}...", root)));
    }

    fn on_scan_progress(&self, files_found: usize, _current_path: &str) {
        self.with_bar(|pb| pb.set_message(format!("Scanning... {} files found", files_found)));
    }

    fn on_scan_complete(&self, total_files: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} files in {:.2}s",
            total_files, duration_secs
        );
    }

    fn on_hash_start(&self, total_files: usize) {
        let pb = ProgressBar::new(total_files as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} Hashing [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining)",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICKS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_hash_progress(&self, files_hashed: usize, total_files: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total_files as u64) {
                pb.set_length(total_files as u64);
            }
            pb.set_position(files_hashed as u64);
        });
    }

    fn on_hash_complete(&self, hashed: usize, skipped: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Hash complete: {} files, {} skipped in {:.2}s",
            hashed, skipped, duration_secs
        );
    }

    fn on_db_write_start(&self) {
        self.set_bar(Self::spinner("Updating lifecycle records...".to_string()));
    }

    fn on_db_write_complete(&self, rows: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  \x1b[32m✓\x1b[0m Database write complete: {} records in {:.2}s",
            rows, duration_secs
        );
    }
}
