//! Adaptive pacing between archive reads and the write sink.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use crate::error::{ExtractError, Result};
use crate::extract::memory::{MemoryUsageSnapshot, WARNING_THRESHOLD};

/// Tuning knobs for the backpressure controller.
#[derive(Debug, Clone)]
pub struct BackpressurePolicy {
    /// First backoff step when the sink reports not-ready.
    pub base_delay: Duration,
    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,
    /// Total delay the controller may impose across consecutive
    /// not-ready cycles before it gives up with a timeout. A sink that
    /// recovers resets the budget.
    pub wait_budget: Duration,
    /// Throughput samples kept for the rolling average.
    pub max_samples: usize,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(500),
            wait_budget: Duration::from_secs(30),
            max_samples: 20,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ThroughputSample {
    bytes: u64,
    elapsed: Duration,
}

/// Computes the delay to apply before each read/write cycle.
///
/// Exponential backoff while the sink is not ready, plus a
/// multiplicative penalty when memory usage sits above the warning
/// threshold. Delays accumulate against a wait budget only while the
/// sink stays not-ready; routine high-water-mark pacing, where the
/// sink recovers after each flush, never counts against it. Exhausting
/// the budget surfaces a timeout for the current entry only.
pub struct BackpressureController {
    policy: BackpressurePolicy,
    samples: VecDeque<ThroughputSample>,
    consecutive_not_ready: u32,
    waited: Duration,
}

impl BackpressureController {
    pub fn new(policy: BackpressurePolicy) -> Self {
        Self {
            policy,
            samples: VecDeque::new(),
            consecutive_not_ready: 0,
            waited: Duration::ZERO,
        }
    }

    /// Record a completed transfer for the rolling throughput average.
    pub fn record_throughput(&mut self, bytes: u64, elapsed: Duration) {
        if self.samples.len() == self.policy.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(ThroughputSample { bytes, elapsed });
    }

    /// Rolling average throughput in bytes per millisecond, if any
    /// samples have been recorded. The backoff computation compares
    /// the latest sample against this average to detect a slowing
    /// sink.
    pub fn average_throughput(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let bytes: u64 = self.samples.iter().map(|s| s.bytes).sum();
        let millis: f64 = self
            .samples
            .iter()
            .map(|s| s.elapsed.as_secs_f64() * 1000.0)
            .sum();
        if millis <= 0.0 {
            return None;
        }
        Some(bytes as f64 / millis)
    }

    /// The most recent transfer ran at less than half the rolling
    /// average, suggesting the sink is slowing down rather than
    /// momentarily busy.
    fn sink_slowing(&self) -> bool {
        let Some(avg) = self.average_throughput() else {
            return false;
        };
        let Some(last) = self.samples.back() else {
            return false;
        };
        let millis = last.elapsed.as_secs_f64() * 1000.0;
        if millis <= 0.0 {
            return false;
        }
        last.bytes as f64 / millis < avg * 0.5
    }

    /// Reset the per-entry wait budget and backoff state. Called by
    /// the extractor between entries.
    pub fn reset_entry(&mut self) {
        self.consecutive_not_ready = 0;
        self.waited = Duration::ZERO;
    }

    /// Compute the delay to apply before the next cycle.
    ///
    /// Zero when the sink is ready and memory is below the warning
    /// threshold. Errors with [`ExtractError::StreamTimeout`] once the
    /// per-entry wait budget is exhausted.
    pub fn next_delay(
        &mut self,
        sink_ready: bool,
        memory: &MemoryUsageSnapshot,
        entry_name: &str,
    ) -> Result<Duration> {
        let mut delay = if sink_ready {
            // A recovered sink clears both the backoff streak and the
            // budget: the timeout is for a sink that stays unready, not
            // for accumulated routine pacing.
            self.consecutive_not_ready = 0;
            self.waited = Duration::ZERO;
            Duration::ZERO
        } else {
            self.consecutive_not_ready = self.consecutive_not_ready.saturating_add(1);
            let exp = self.consecutive_not_ready.min(16) - 1;
            let mut backoff = self.policy.base_delay.saturating_mul(1u32 << exp.min(10));
            if self.sink_slowing() {
                backoff = backoff.saturating_mul(2);
            }
            backoff.min(self.policy.max_delay)
        };

        // Above the warning threshold, scale the delay with how far
        // over it usage is; at the hard limit the multiplier reaches
        // its maximum. A zero backoff still gets a base delay here so
        // memory pressure alone slows the producer down.
        if memory.percentage > WARNING_THRESHOLD {
            let over = ((memory.percentage - WARNING_THRESHOLD) / (1.0 - WARNING_THRESHOLD))
                .clamp(0.0, 1.0);
            let penalty = 1.0 + 3.0 * over;
            let base = if delay.is_zero() {
                self.policy.base_delay
            } else {
                delay
            };
            delay = base.mul_f64(penalty).min(self.policy.max_delay);
        }

        if !delay.is_zero() {
            self.waited += delay;
            if self.waited > self.policy.wait_budget {
                return Err(ExtractError::StreamTimeout {
                    scope: entry_name.to_string(),
                    waited: self.waited,
                    budget: self.policy.wait_budget,
                });
            }
            debug!(
                entry = entry_name,
                delay_ms = delay.as_millis() as u64,
                not_ready_streak = self.consecutive_not_ready,
                memory_pct = memory.percentage,
                "applying backpressure delay"
            );
        }

        Ok(delay)
    }
}
