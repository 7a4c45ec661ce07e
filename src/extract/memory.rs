//! Outstanding-byte accounting for one extraction run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::warn;

/// Fraction of the limit at which the warning callback fires.
pub const WARNING_THRESHOLD: f64 = 0.8;

/// Point-in-time view of attributed memory usage.
#[derive(Debug, Clone)]
pub struct MemoryUsageSnapshot {
    pub current_bytes: u64,
    pub limit_bytes: u64,
    /// `current_bytes / limit_bytes`, in [0, ∞) — may exceed 1.0
    /// transiently before the extractor reacts.
    pub percentage: f64,
    pub timestamp: SystemTime,
}

type WarningCallback = Box<dyn Fn(&MemoryUsageSnapshot) + Send + Sync>;

/// Accounting ledger for bytes the extractor has buffered.
///
/// This tracks only bytes it has been told about, not process memory.
/// It has no idea why memory is held; the extractor consults it before
/// each allocation decision and reacts to the answers. One monitor per
/// run — monitors are never shared, unlike the buffer pool.
pub struct MemoryMonitor {
    current: AtomicU64,
    peak: AtomicU64,
    limit: u64,
    warned: AtomicBool,
    on_warning: Option<WarningCallback>,
}

impl MemoryMonitor {
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            limit: limit_bytes,
            warned: AtomicBool::new(false),
            on_warning: None,
        }
    }

    /// Install a callback fired once when usage first crosses the
    /// warning threshold.
    pub fn with_warning_callback(
        mut self,
        callback: impl Fn(&MemoryUsageSnapshot) + Send + Sync + 'static,
    ) -> Self {
        self.on_warning = Some(Box::new(callback));
        self
    }

    pub fn record_allocation(&self, bytes: u64) {
        let now = self.current.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak.fetch_max(now, Ordering::Relaxed);

        if now as f64 >= self.limit as f64 * WARNING_THRESHOLD
            && !self.warned.swap(true, Ordering::Relaxed)
        {
            let snapshot = self.snapshot();
            warn!(
                current = snapshot.current_bytes,
                limit = snapshot.limit_bytes,
                "memory usage crossed warning threshold"
            );
            if let Some(cb) = &self.on_warning {
                cb(&snapshot);
            }
        }
    }

    pub fn record_release(&self, bytes: u64) {
        // Saturating: a mismatched release should not wrap the counter.
        let mut cur = self.current.load(Ordering::Relaxed);
        loop {
            let next = cur.saturating_sub(bytes);
            match self.current.compare_exchange_weak(
                cur,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn snapshot(&self) -> MemoryUsageSnapshot {
        let current = self.current.load(Ordering::Relaxed);
        MemoryUsageSnapshot {
            current_bytes: current,
            limit_bytes: self.limit,
            percentage: if self.limit > 0 {
                current as f64 / self.limit as f64
            } else {
                0.0
            },
            timestamp: SystemTime::now(),
        }
    }

    pub fn is_limit_exceeded(&self) -> bool {
        self.current.load(Ordering::Relaxed) >= self.limit
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit
    }

    pub fn current_bytes(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Highest usage observed since construction, as a fraction of the
    /// limit.
    pub fn peak_percentage(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.peak.load(Ordering::Relaxed) as f64 / self.limit as f64
    }
}
