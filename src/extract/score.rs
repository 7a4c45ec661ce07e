//! Deterministic run-quality scoring.

use std::time::SystemTime;

/// Raw counters accumulated over one run, the scorer's only input.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    /// Entries successfully written.
    pub extracted: u64,
    /// Entries skipped because of an error (corrupt, unsupported,
    /// I/O, timeout). Intentional filter/security skips do not count
    /// against accuracy.
    pub error_skips: u64,
    /// Entries skipped by filters, security, or overwrite policy.
    pub filter_skips: u64,
    pub crc_passed: u64,
    pub crc_failures: u64,
    /// Entries whose declared uncompressed size matched bytes written.
    pub size_matched: u64,
    /// Peak memory usage as a fraction of the run's limit.
    pub peak_memory_pct: f64,
    pub total_bytes: u64,
    pub processing_time_ms: u64,
}

/// Weighted quality summary of a completed run. All sub-metrics and
/// the overall score are in [0, 1].
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub overall_score: f64,
    pub accuracy: f64,
    pub integrity: f64,
    pub efficiency: f64,
    pub resource_usage: f64,
    pub consistency: f64,
    pub processing_time_ms: u64,
    pub timestamp: SystemTime,
}

// Fixed metric weights; they sum to 1.0.
const WEIGHT_ACCURACY: f64 = 0.30;
const WEIGHT_INTEGRITY: f64 = 0.25;
const WEIGHT_EFFICIENCY: f64 = 0.20;
const WEIGHT_RESOURCE_USAGE: f64 = 0.15;
const WEIGHT_CONSISTENCY: f64 = 0.10;

/// Pure scoring function over [`RunStats`]. Never mutates its inputs
/// and has no side effects; the same stats always produce the same
/// report (modulo the timestamp).
pub struct VerificationScorer {
    /// Throughput (bytes per millisecond) that earns a full
    /// efficiency score.
    baseline_bytes_per_ms: f64,
}

impl VerificationScorer {
    pub fn new(baseline_bytes_per_ms: f64) -> Self {
        Self {
            baseline_bytes_per_ms,
        }
    }

    pub fn score(&self, stats: &RunStats) -> VerificationReport {
        let accuracy = ratio(stats.extracted, stats.extracted + stats.error_skips);
        let integrity = ratio(stats.crc_passed, stats.crc_passed + stats.crc_failures);
        let efficiency = self.efficiency(stats);
        let resource_usage = (1.0 - stats.peak_memory_pct).max(0.0);
        let consistency = ratio(stats.size_matched, stats.extracted);

        let overall_score = WEIGHT_ACCURACY * accuracy
            + WEIGHT_INTEGRITY * integrity
            + WEIGHT_EFFICIENCY * efficiency
            + WEIGHT_RESOURCE_USAGE * resource_usage
            + WEIGHT_CONSISTENCY * consistency;

        VerificationReport {
            overall_score,
            accuracy,
            integrity,
            efficiency,
            resource_usage,
            consistency,
            processing_time_ms: stats.processing_time_ms,
            timestamp: SystemTime::now(),
        }
    }

    fn efficiency(&self, stats: &RunStats) -> f64 {
        if stats.total_bytes == 0 {
            // Nothing was transferred; neither reward nor punish.
            return 1.0;
        }
        if self.baseline_bytes_per_ms <= 0.0 {
            return 1.0;
        }
        let throughput = stats.total_bytes as f64 / stats.processing_time_ms.max(1) as f64;
        (throughput / self.baseline_bytes_per_ms).min(1.0)
    }
}

/// `numerator / denominator`, treating an empty denominator as a
/// perfect score (no opportunities to fail).
fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_stats() -> RunStats {
        RunStats {
            extracted: 10,
            error_skips: 0,
            filter_skips: 0,
            crc_passed: 10,
            crc_failures: 0,
            size_matched: 10,
            peak_memory_pct: 0.4,
            total_bytes: 100_000_000,
            processing_time_ms: 1_000,
        }
    }

    #[test]
    fn clean_run_scores_at_least_point_nine() {
        let scorer = VerificationScorer::new(10_000.0);
        let report = scorer.score(&clean_stats());
        assert!(
            report.overall_score >= 0.9,
            "score was {}",
            report.overall_score
        );
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.integrity, 1.0);
        assert_eq!(report.consistency, 1.0);
    }

    #[test]
    fn filter_skips_do_not_hurt_accuracy() {
        let mut stats = clean_stats();
        stats.filter_skips = 50;
        let report = VerificationScorer::new(10_000.0).score(&stats);
        assert_eq!(report.accuracy, 1.0);
    }

    #[test]
    fn error_skips_reduce_accuracy() {
        let mut stats = clean_stats();
        stats.error_skips = 10;
        let report = VerificationScorer::new(10_000.0).score(&stats);
        assert!((report.accuracy - 0.5).abs() < 1e-9);
    }

    #[test]
    fn crc_failures_reduce_integrity() {
        let mut stats = clean_stats();
        stats.crc_failures = 10;
        let report = VerificationScorer::new(10_000.0).score(&stats);
        assert!((report.integrity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn slow_run_reduces_efficiency() {
        let mut stats = clean_stats();
        stats.total_bytes = 1_000;
        stats.processing_time_ms = 10_000;
        let report = VerificationScorer::new(10_000.0).score(&stats);
        assert!(report.efficiency < 0.01);
    }

    #[test]
    fn efficiency_is_capped_at_one() {
        let report = VerificationScorer::new(0.001).score(&clean_stats());
        assert_eq!(report.efficiency, 1.0);
    }

    #[test]
    fn resource_usage_floors_at_zero() {
        let mut stats = clean_stats();
        stats.peak_memory_pct = 1.5;
        let report = VerificationScorer::new(10_000.0).score(&stats);
        assert_eq!(report.resource_usage, 0.0);
    }

    #[test]
    fn empty_run_is_vacuously_clean() {
        let stats = RunStats::default();
        let report = VerificationScorer::new(10_000.0).score(&stats);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.integrity, 1.0);
        assert_eq!(report.consistency, 1.0);
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = WEIGHT_ACCURACY
            + WEIGHT_INTEGRITY
            + WEIGHT_EFFICIENCY
            + WEIGHT_RESOURCE_USAGE
            + WEIGHT_CONSISTENCY;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = VerificationScorer::new(10_000.0);
        let a = scorer.score(&clean_stats());
        let b = scorer.score(&clean_stats());
        assert_eq!(a.overall_score, b.overall_score);
    }
}
