use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Running totals over every call attached to it.
///
/// Created by whoever owns a group of calls (usually a
/// [`BufferedExecutor`](crate::executor::BufferedExecutor)) and shared through
/// an `Arc`. Only used for reporting.
#[derive(Debug, Default)]
pub struct CallStats {
    calls_started: AtomicU64,
    calls_executed: AtomicU64,
    total_execution_nanos: AtomicU64,
}

impl CallStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.calls_executed.fetch_add(1, Ordering::Relaxed);
        self.total_execution_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Calls that entered `Running`.
    pub fn calls_started(&self) -> u64 {
        self.calls_started.load(Ordering::Relaxed)
    }

    /// Calls that reached `Completed`.
    pub fn calls_executed(&self) -> u64 {
        self.calls_executed.load(Ordering::Relaxed)
    }

    pub fn total_execution_seconds(&self) -> f64 {
        Duration::from_nanos(self.total_execution_nanos.load(Ordering::Relaxed)).as_secs_f64()
    }

    /// Average duration of a completed call, 0 when none completed.
    pub fn mean_execution_seconds(&self) -> f64 {
        match self.calls_executed() {
            0 => 0.0,
            n => self.total_execution_seconds() / n as f64,
        }
    }
}
