//! Progress tracking

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub identified: usize,
}

impl ProgressSnapshot {
    pub fn unidentified(&self) -> usize {
        self.completed - self.identified
    }
}

#[derive(Default)]
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    identified: AtomicUsize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting a new job.
    pub fn reset(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.identified.store(0, Ordering::Relaxed);
    }

    pub fn record(&self, identified: bool) {
        if identified {
            self.identified.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            identified: self.identified.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let snap = self.snapshot();
        info!(
            total = snap.total,
            identified = snap.identified,
            unidentified = snap.unidentified(),
            "scan summary"
        );
        if snap.total > 0 {
            info!("identification rate: {:.1}%", (snap.identified as f64 / snap.total as f64) * 100.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_outcomes() {
        let progress = ProgressTracker::new();
        progress.reset(3);
        progress.record(true);
        progress.record(false);
        let snap = progress.snapshot();
        assert_eq!(snap, ProgressSnapshot { total: 3, completed: 2, identified: 1 });
        assert_eq!(snap.unidentified(), 1);

        progress.reset(1);
        assert_eq!(progress.snapshot().completed, 0);
    }
}
