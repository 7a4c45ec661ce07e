//! Run orchestration: the extraction state machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{ExtractError, Result};
use crate::io::ReadAt;
use crate::zip::{ArchiveEntry, ArchiveReader, CompressionMethod};

use super::backpressure::{BackpressureController, BackpressurePolicy};
use super::chunked::ChunkedProcessor;
use super::filter::{FilterVerdict, should_extract};
use super::memory::MemoryMonitor;
use super::pool::BufferPool;
use super::score::{RunStats, VerificationReport, VerificationScorer};

type EntryPredicate = Box<dyn Fn(&ArchiveEntry) -> bool + Send + Sync>;
type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;
type EntryCallback = Box<dyn Fn(&ArchiveEntry) + Send + Sync>;

/// Tunables for one extraction run.
pub struct ExtractOptions {
    /// Entries larger than this are skipped with a warning.
    pub max_entry_size: Option<u64>,
    /// Ceiling for bytes the run may hold in buffers at once.
    pub memory_limit_bytes: u64,
    /// Replace files that already exist under the destination root.
    pub overwrite: bool,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Lowercase-insensitive extension allow-list; `None` allows all.
    pub allowed_extensions: Option<Vec<String>>,
    /// MIME-type allow-list (derived from extensions); `None` allows all.
    pub allowed_content_types: Option<Vec<String>>,
    /// Count directory entries in `extracted_count`. Directories named
    /// by accepted entries are created either way.
    pub include_directories: bool,
    /// Bound on a single read/decompress/write cycle.
    pub chunk_size: usize,
    /// Unflushed output bytes after which the sink reports not-ready.
    pub high_water_mark: u64,
    /// Overall run deadline; expiry aborts the run.
    pub run_timeout: Option<Duration>,
    pub backpressure: BackpressurePolicy,
    /// Baseline throughput (bytes per millisecond) the efficiency
    /// metric normalizes against.
    pub efficiency_baseline: f64,
    /// Compute a [`VerificationReport`] during finalization.
    pub score_run: bool,
    /// Final accept/reject say after all built-in filters.
    pub custom_filter: Option<EntryPredicate>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_entry_size: None,
            memory_limit_bytes: 64 * 1024 * 1024,
            overwrite: false,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            allowed_extensions: None,
            allowed_content_types: None,
            include_directories: false,
            chunk_size: 64 * 1024,
            high_water_mark: 1024 * 1024,
            run_timeout: None,
            backpressure: BackpressurePolicy::default(),
            efficiency_baseline: 10_000.0, // ~10 MB/s
            score_run: false,
            custom_filter: None,
        }
    }
}

/// One extraction run's inputs. Owned exclusively by that run;
/// concurrent runs each build their own.
pub struct ExtractionRequest {
    pub destination_root: PathBuf,
    pub options: ExtractOptions,
    /// Invoked synchronously from the processing loop with percent
    /// complete in [0, 100].
    pub on_progress: Option<ProgressCallback>,
    /// Invoked synchronously after each successfully written entry.
    pub on_entry_extracted: Option<EntryCallback>,
    /// Checked at the top of each entry iteration; set to cancel.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl ExtractionRequest {
    pub fn new(destination_root: impl Into<PathBuf>) -> Self {
        Self {
            destination_root: destination_root.into(),
            options: ExtractOptions::default(),
            on_progress: None,
            on_entry_extracted: None,
            cancel: None,
        }
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(f64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn on_entry_extracted(
        mut self,
        callback: impl Fn(&ArchiveEntry) + Send + Sync + 'static,
    ) -> Self {
        self.on_entry_extracted = Some(Box::new(callback));
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// How a run ended. Fatal errors travel here, separate from the
/// per-entry warnings list, so callers always get the best-effort
/// result alongside the abort cause.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Aborted(ExtractError),
}

impl RunOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, RunOutcome::Aborted(_))
    }
}

/// Accumulated result of one run. Mutated only by the extractor while
/// the run is live; frozen once returned.
#[derive(Debug)]
pub struct ExtractionResult {
    pub extracted_count: u64,
    pub skipped_count: u64,
    /// Sum of uncompressed bytes actually written, independent of
    /// compression method.
    pub total_bytes: u64,
    /// Accepted entries, in archive directory order.
    pub entries: Vec<ArchiveEntry>,
    /// Per-entry warnings, in the order they occurred.
    pub warnings: Vec<String>,
    pub outcome: RunOutcome,
    pub report: Option<VerificationReport>,
}

impl ExtractionResult {
    fn empty() -> Self {
        Self {
            extracted_count: 0,
            skipped_count: 0,
            total_bytes: 0,
            entries: Vec::new(),
            warnings: Vec::new(),
            outcome: RunOutcome::Completed,
            report: None,
        }
    }
}

/// Extraction run states. Entries are only ever processed in
/// `ProcessingEntries`; both terminal states keep whatever was already
/// written on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    Idle,
    ReadingDirectory,
    ProcessingEntries,
    Finalizing,
    Completed,
    Aborted,
}

/// Orchestrates one archive's extraction: directory parse, per-entry
/// filtering, chunked writing under memory supervision, finalization.
///
/// A single extractor processes entries sequentially; that is what
/// makes the memory bound enforceable, since only one entry's buffers
/// are live at a time. Run several extractors concurrently for
/// parallelism — they may share one [`BufferPool`], but each run owns
/// its request and its [`MemoryMonitor`].
pub struct StreamingExtractor<R: ReadAt> {
    reader: ArchiveReader<R>,
    pool: Arc<BufferPool>,
    state: ExtractorState,
}

impl<R: ReadAt> StreamingExtractor<R> {
    pub fn new(source: Arc<R>, pool: Arc<BufferPool>) -> Self {
        Self {
            reader: ArchiveReader::new(source),
            pool,
            state: ExtractorState::Idle,
        }
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    /// Non-extracting preview of the archive's entries.
    pub async fn list_entries(&self) -> Result<Vec<ArchiveEntry>> {
        self.reader.list_entries().await
    }

    /// Extract the archive into the request's destination root.
    ///
    /// Always returns a best-effort [`ExtractionResult`]; a fatal
    /// error lands in [`ExtractionResult::outcome`] rather than an
    /// `Err` so partial progress is never lost to the caller.
    pub async fn extract(&mut self, request: ExtractionRequest) -> ExtractionResult {
        self.run(request, false).await
    }

    /// Like [`extract`](Self::extract), but forces the chunked,
    /// backpressure-paced path for every entry regardless of size.
    pub async fn extract_streaming(&mut self, request: ExtractionRequest) -> ExtractionResult {
        self.run(request, true).await
    }

    async fn run(&mut self, request: ExtractionRequest, force_streaming: bool) -> ExtractionResult {
        let started = Instant::now();
        let mut result = ExtractionResult::empty();
        let mut stats = RunStats::default();

        self.state = ExtractorState::ReadingDirectory;
        let entries = match self.reader.list_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                // Directory parse failure: nothing can be processed.
                self.state = ExtractorState::Aborted;
                result.outcome = RunOutcome::Aborted(err);
                return result;
            }
        };
        debug!(entries = entries.len(), "central directory parsed");

        self.state = ExtractorState::ProcessingEntries;
        let monitor = MemoryMonitor::new(request.options.memory_limit_bytes);
        let mut controller = BackpressureController::new(request.options.backpressure.clone());
        let deadline = request.options.run_timeout.map(|t| started + t);

        let total = entries.len();
        let mut abort: Option<ExtractError> = None;

        for (index, entry) in entries.iter().enumerate() {
            if let Some(cancel) = &request.cancel {
                if cancel.load(Ordering::Relaxed) {
                    abort = Some(ExtractError::Cancelled);
                    break;
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    abort = Some(ExtractError::StreamTimeout {
                        scope: "run".into(),
                        waited: started.elapsed(),
                        budget: request.options.run_timeout.unwrap_or_default(),
                    });
                    break;
                }
            }

            controller.reset_entry();
            match self
                .process_entry(
                    entry,
                    &request,
                    &monitor,
                    &mut controller,
                    &mut result,
                    &mut stats,
                    force_streaming,
                )
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    abort = Some(err);
                    break;
                }
                Err(err) => {
                    // Per-entry failure: record and continue.
                    stats.error_skips += 1;
                    result.skipped_count += 1;
                    result.warnings.push(err.to_string());
                    warn!(entry = %entry.name, error = %err, "entry skipped");
                }
            }

            if let Some(cb) = &request.on_progress {
                cb((index + 1) as f64 / total.max(1) as f64 * 100.0);
            }
        }

        self.state = ExtractorState::Finalizing;
        stats.peak_memory_pct = monitor.peak_percentage();
        stats.processing_time_ms = started.elapsed().as_millis() as u64;
        stats.total_bytes = result.total_bytes;

        if request.options.score_run {
            let scorer = VerificationScorer::new(request.options.efficiency_baseline);
            result.report = Some(scorer.score(&stats));
        }

        match abort {
            Some(err) => {
                // Partial output stays on disk; the error is carried in
                // the outcome, distinct from per-entry warnings.
                self.state = ExtractorState::Aborted;
                warn!(error = %err, "run aborted");
                result.outcome = RunOutcome::Aborted(err);
            }
            None => {
                self.state = ExtractorState::Completed;
                info!(
                    extracted = result.extracted_count,
                    skipped = result.skipped_count,
                    bytes = result.total_bytes,
                    "run completed"
                );
            }
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_entry(
        &self,
        entry: &ArchiveEntry,
        request: &ExtractionRequest,
        monitor: &MemoryMonitor,
        controller: &mut BackpressureController,
        result: &mut ExtractionResult,
        stats: &mut RunStats,
        force_streaming: bool,
    ) -> Result<()> {
        match should_extract(entry, &request.options) {
            FilterVerdict::Accept => {}
            FilterVerdict::SecurityReject { reason } => {
                // Never fatal, never written: warn and move on.
                let err = ExtractError::PathSecurity {
                    name: entry.name.clone(),
                    reason,
                };
                stats.filter_skips += 1;
                result.skipped_count += 1;
                result.warnings.push(err.to_string());
                warn!(entry = %entry.name, "path security rejection");
                return Ok(());
            }
            FilterVerdict::RejectOversize { size, limit } => {
                let err = ExtractError::SizeLimit {
                    name: entry.name.clone(),
                    size,
                    limit,
                };
                stats.filter_skips += 1;
                result.skipped_count += 1;
                result.warnings.push(err.to_string());
                debug!(entry = %entry.name, size, limit, "entry over size limit");
                return Ok(());
            }
            FilterVerdict::Reject { reason } => {
                stats.filter_skips += 1;
                result.skipped_count += 1;
                result
                    .warnings
                    .push(format!("skipped '{}': {}", entry.name, reason));
                debug!(entry = %entry.name, reason, "filtered out");
                return Ok(());
            }
        }

        // The name has passed the security gate; it may now become a
        // path. Keep a defense-in-depth containment check anyway.
        let dest = request.destination_root.join(&entry.name);
        if !dest.starts_with(&request.destination_root) {
            let err = ExtractError::PathSecurity {
                name: entry.name.clone(),
                reason: "resolved path escapes destination root".into(),
            };
            stats.filter_skips += 1;
            result.skipped_count += 1;
            result.warnings.push(err.to_string());
            return Ok(());
        }

        if entry.is_directory {
            fs::create_dir_all(&dest).await?;
            if request.options.include_directories {
                result.extracted_count += 1;
                result.entries.push(entry.clone());
                stats.extracted += 1;
                if let Some(cb) = &request.on_entry_extracted {
                    cb(entry);
                }
            }
            return Ok(());
        }

        // Known from metadata; rejecting here avoids creating an empty
        // destination file for an entry that can never be decoded.
        if let CompressionMethod::Unknown(method) = entry.method {
            return Err(ExtractError::UnsupportedCompression {
                name: entry.name.clone(),
                method,
            });
        }

        if dest.exists() && !request.options.overwrite {
            result.skipped_count += 1;
            stats.filter_skips += 1;
            result
                .warnings
                .push(format!("skipped '{}': already exists", entry.name));
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let processor = ChunkedProcessor::new(
            &self.reader,
            &self.pool,
            monitor,
            request.options.chunk_size,
            request.options.high_water_mark,
        );

        let mut file = fs::File::create(&dest).await?;
        let processed = if !force_streaming && Self::fits_one_chunk(entry, &request.options) {
            processor.process_small(entry, &mut file).await
        } else {
            processor.process(entry, &mut file, controller).await
        };
        // The handle closes when it drops here, on success and error
        // alike; a failed entry leaves a partial file (no rollback).
        let outcome = match processed {
            Ok(outcome) => outcome,
            Err(err @ ExtractError::CorruptEntry { .. }) => {
                stats.crc_failures += 1;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        stats.extracted += 1;
        stats.crc_passed += 1;
        if outcome.size_matched {
            stats.size_matched += 1;
        }

        result.extracted_count += 1;
        result.total_bytes += outcome.bytes_written;
        result.entries.push(entry.clone());
        if let Some(cb) = &request.on_entry_extracted {
            cb(entry);
        }
        debug!(entry = %entry.name, bytes = outcome.bytes_written, "entry extracted");

        Ok(())
    }

    fn fits_one_chunk(entry: &ArchiveEntry, options: &ExtractOptions) -> bool {
        entry.compressed_size <= options.chunk_size as u64
            && entry.uncompressed_size <= options.chunk_size as u64
    }
}

/// Convenience preview without constructing an extractor by hand.
pub async fn list_entries(source_path: &Path) -> Result<Vec<ArchiveEntry>> {
    let reader = Arc::new(crate::io::LocalFileReader::new(source_path)?);
    ArchiveReader::new(reader).list_entries().await
}
