//! # zipstream
//!
//! Streaming, memory-bounded ZIP extraction with adaptive backpressure.
//!
//! The engine extracts from a ZIP container (stored and deflate
//! methods) into a destination directory while guaranteeing that
//! buffered memory stays bounded regardless of archive size. Entry
//! names pass a mandatory path-security gate before they can become
//! filesystem paths, per-entry filters decide what gets extracted, and
//! every run can produce a deterministic quality score.
//!
//! Archives are read through the [`ReadAt`] abstraction, so local
//! files and remote HTTP sources (via Range requests) stream through
//! the same engine.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use zipstream::{BufferPool, ExtractionRequest, LocalFileReader, StreamingExtractor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new(Path::new("archive.zip"))?);
//!     let pool = Arc::new(BufferPool::default());
//!     let mut extractor = StreamingExtractor::new(reader, pool);
//!
//!     let result = extractor.extract(ExtractionRequest::new("out/")).await;
//!     println!(
//!         "{} extracted, {} skipped, {} bytes",
//!         result.extracted_count, result.skipped_count, result.total_bytes
//!     );
//!     for warning in &result.warnings {
//!         eprintln!("warning: {}", warning);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod extract;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{ExtractError, Result};
pub use extract::{
    BackpressureController, BackpressurePolicy, BufferPool, ExtractOptions, ExtractionRequest,
    ExtractionResult, ExtractorState, MemoryMonitor, MemoryUsageSnapshot, RunOutcome,
    StreamingExtractor, VerificationReport, VerificationScorer, list_entries,
};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use zip::{ArchiveEntry, ArchiveReader, CompressionMethod};
