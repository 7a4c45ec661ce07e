//! The extraction engine.
//!
//! [`StreamingExtractor`] orchestrates the per-run state machine;
//! the supporting pieces are deliberately small and separately
//! testable:
//!
//! - [`filter`]: mandatory path-security gate + configurable checks
//! - [`pool`]: size-classed buffer pool, shared across runs
//! - [`memory`]: per-run outstanding-byte ledger
//! - [`backpressure`]: adaptive read/write pacing
//! - [`chunked`]: bounded-chunk payload processing
//! - [`score`]: deterministic run-quality report

pub mod backpressure;
pub mod chunked;
pub mod filter;
pub mod memory;
pub mod pool;
pub mod score;

mod extractor;

pub use backpressure::{BackpressureController, BackpressurePolicy};
pub use extractor::{
    ExtractOptions, ExtractionRequest, ExtractionResult, ExtractorState, RunOutcome,
    StreamingExtractor, list_entries,
};
pub use memory::{MemoryMonitor, MemoryUsageSnapshot};
pub use pool::{BufferPool, PooledBuffer, SizeClass};
pub use score::{RunStats, VerificationReport, VerificationScorer};
