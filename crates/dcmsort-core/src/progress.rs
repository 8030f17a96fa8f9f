/// Trait for reporting run progress.
///
/// The CLI implements it with indicatif; library callers can pass
/// `SilentReporter`. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_discover_start(&self) {}
    fn on_discover_complete(&self, _study_sessions: usize, _duration_secs: f64) {}
    fn on_unit_start(&self, _index: usize, _total: usize, _label: &str) {}
    fn on_unit_complete(&self, _index: usize, _total: usize, _items: usize) {}
    fn on_unit_failed(&self, _label: &str, _error: &str) {}
    fn on_item_converted(&self, _done: usize, _total: usize) {}
    fn on_run_complete(&self, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
