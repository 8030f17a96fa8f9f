use colored::*;
use dcmsort_core::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Discovery: spinner (number of sessions unknown upfront)
/// - Sessions: one bar over all study sessions, its message tracking the
///   items converted in the current session
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
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

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .progress_chars("━╸─")
        .tick_chars(TICKS)
}

impl ProgressReporter for CliReporter {
    fn on_discover_start(&self) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(style("{spinner:.cyan} {msg}"));
        pb.set_message("Grouping inputs into study sessions...");
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_discover_complete(&self, study_sessions: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Found {} study sessions in {:.2}s",
            "✓".green(),
            study_sessions,
            duration_secs
        );
        let pb = ProgressBar::new(study_sessions as u64);
        pb.set_style(style(
            "  {spinner:.cyan} Sessions [{bar:30.cyan/dim}] {pos}/{len} {msg}",
        ));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_unit_start(&self, _index: usize, _total: usize, label: &str) {
        self.with_bar(|pb| pb.set_message(label.to_string()));
    }

    fn on_item_converted(&self, done: usize, total: usize) {
        self.with_bar(|pb| pb.set_message(format!("converted {}/{}", done, total)));
    }

    fn on_unit_complete(&self, index: usize, _total: usize, _items: usize) {
        self.with_bar(|pb| pb.set_position(index as u64 + 1));
    }

    fn on_unit_failed(&self, label: &str, error: &str) {
        self.with_bar(|pb| {
            pb.println(format!("  {} {}: {}", "✗".red(), label, error));
            pb.inc(1);
        });
    }

    fn on_run_complete(&self, duration_secs: f64) {
        self.finish_bar();
        eprintln!("  {} Done in {:.2}s", "✓".green(), duration_secs);
    }
}
