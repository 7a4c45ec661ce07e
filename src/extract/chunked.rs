//! Bounded-chunk entry processing.
//!
//! One entry at a time, one chunk at a time: compressed bytes are read
//! into a pool buffer, inflated (or copied, for stored entries) into a
//! second pool buffer, CRC-checked, and written to the destination
//! file. The backpressure controller is consulted before every write,
//! and every buffer is registered with the memory monitor for the time
//! it is held, so a run's footprint stays at two chunk buffers no
//! matter how large the entry is.

use flate2::{Crc, Decompress, FlushDecompress};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{ExtractError, Result};
use crate::io::ReadAt;
use crate::zip::{ArchiveEntry, ArchiveReader, CompressionMethod};

use super::backpressure::BackpressureController;
use super::memory::MemoryMonitor;
use super::pool::BufferPool;

/// What happened to one entry's payload.
#[derive(Debug, Clone, Copy)]
pub struct EntryOutcome {
    pub bytes_written: u64,
    /// Declared uncompressed size matched the bytes actually written.
    pub size_matched: bool,
}

pub struct ChunkedProcessor<'a, R: ReadAt> {
    reader: &'a ArchiveReader<R>,
    pool: &'a BufferPool,
    monitor: &'a MemoryMonitor,
    chunk_size: usize,
    high_water_mark: u64,
}

impl<'a, R: ReadAt> ChunkedProcessor<'a, R> {
    pub fn new(
        reader: &'a ArchiveReader<R>,
        pool: &'a BufferPool,
        monitor: &'a MemoryMonitor,
        chunk_size: usize,
        high_water_mark: u64,
    ) -> Self {
        Self {
            reader,
            pool,
            monitor,
            chunk_size,
            high_water_mark,
        }
    }

    /// Stream one entry's payload into `file`.
    ///
    /// The file is flushed on every exit path, success or error;
    /// buffers are always returned to the pool and deregistered from
    /// the monitor. Errors are per-entry except
    /// [`ExtractError::MemoryLimit`], which the orchestrator treats as
    /// fatal to the run.
    pub async fn process(
        &self,
        entry: &ArchiveEntry,
        file: &mut File,
        controller: &mut BackpressureController,
    ) -> Result<EntryOutcome> {
        match entry.method {
            CompressionMethod::Stored | CompressionMethod::Deflate => {}
            CompressionMethod::Unknown(method) => {
                return Err(ExtractError::UnsupportedCompression {
                    name: entry.name.clone(),
                    method,
                });
            }
        }

        let data_offset = self.reader.data_offset(entry).await?;

        let mut in_buf = self.pool.acquire(self.chunk_size);
        self.monitor.record_allocation(in_buf.capacity() as u64);

        let result = match entry.method {
            CompressionMethod::Stored => {
                self.copy_stored(entry, data_offset, in_buf.as_mut_slice(), file, controller)
                    .await
            }
            CompressionMethod::Deflate => {
                let mut out_buf = self.pool.acquire(self.chunk_size);
                self.monitor.record_allocation(out_buf.capacity() as u64);
                let result = self
                    .inflate(
                        entry,
                        data_offset,
                        in_buf.as_mut_slice(),
                        out_buf.as_mut_slice(),
                        file,
                        controller,
                    )
                    .await;
                self.monitor.record_release(out_buf.capacity() as u64);
                self.pool.release(out_buf);
                result
            }
            CompressionMethod::Unknown(_) => unreachable!(),
        };

        self.monitor.record_release(in_buf.capacity() as u64);
        self.pool.release(in_buf);

        // Flush once more so error paths leave no bytes stranded in
        // the writer; the close itself happens when the caller drops
        // the handle.
        let flush = file.flush().await;
        let outcome = result?;
        flush?;

        Ok(outcome)
    }

    /// Fast path for entries whose compressed and uncompressed sizes
    /// both fit a single chunk: one read, one inflate, one write, no
    /// pacing. `extract_streaming` never takes this path.
    pub async fn process_small(&self, entry: &ArchiveEntry, file: &mut File) -> Result<EntryOutcome> {
        if let CompressionMethod::Unknown(method) = entry.method {
            return Err(ExtractError::UnsupportedCompression {
                name: entry.name.clone(),
                method,
            });
        }

        let data_offset = self.reader.data_offset(entry).await?;

        let mut in_buf = self.pool.acquire(entry.compressed_size.max(1) as usize);
        self.monitor.record_allocation(in_buf.capacity() as u64);

        let result = async {
            let want = entry.compressed_size as usize;
            let mut got = 0usize;
            while got < want {
                let n = self
                    .reader
                    .source()
                    .read_at(data_offset + got as u64, &mut in_buf.as_mut_slice()[got..want])
                    .await?;
                if n == 0 {
                    return Err(ExtractError::CorruptEntry {
                        name: entry.name.clone(),
                        reason: "unexpected end of archive data".into(),
                    });
                }
                got += n;
            }

            let mut crc = Crc::new();
            let written;
            match entry.method {
                CompressionMethod::Stored => {
                    crc.update(&in_buf.as_slice()[..want]);
                    file.write_all(&in_buf.as_slice()[..want]).await?;
                    written = want as u64;
                }
                CompressionMethod::Deflate => {
                    let mut out_buf = self.pool.acquire(entry.uncompressed_size.max(1) as usize);
                    self.monitor.record_allocation(out_buf.capacity() as u64);
                    let inflated = (|| {
                        let mut inflater = Decompress::new(false);
                        inflater
                            .decompress(
                                &in_buf.as_slice()[..want],
                                out_buf.as_mut_slice(),
                                FlushDecompress::Finish,
                            )
                            .map_err(|e| ExtractError::CorruptEntry {
                                name: entry.name.clone(),
                                reason: format!("deflate stream error: {}", e),
                            })?;
                        Ok(inflater.total_out())
                    })();
                    let inflated = match inflated {
                        Ok(n) => n,
                        Err(e) => {
                            self.monitor.record_release(out_buf.capacity() as u64);
                            self.pool.release(out_buf);
                            return Err(e);
                        }
                    };
                    crc.update(&out_buf.as_slice()[..inflated as usize]);
                    let write = file.write_all(&out_buf.as_slice()[..inflated as usize]).await;
                    self.monitor.record_release(out_buf.capacity() as u64);
                    self.pool.release(out_buf);
                    write?;
                    written = inflated;
                }
                CompressionMethod::Unknown(_) => unreachable!(),
            }

            self.finish(entry, crc, written)
        }
        .await;

        self.monitor.record_release(in_buf.capacity() as u64);
        self.pool.release(in_buf);

        let flush = file.flush().await;
        let outcome = result?;
        flush?;
        Ok(outcome)
    }

    /// One backpressure cycle before a write: report sink readiness,
    /// honor memory pressure, flush when the high-water mark is hit.
    ///
    /// A sustained memory-limit excess (still over the limit after one
    /// controller-imposed delay) escalates to a fatal
    /// [`ExtractError::MemoryLimit`].
    async fn pace_write(
        &self,
        entry_name: &str,
        unflushed: &mut u64,
        file: &mut File,
        controller: &mut BackpressureController,
    ) -> Result<()> {
        let sink_ready = *unflushed < self.high_water_mark;
        let delay = controller.next_delay(sink_ready, &self.monitor.snapshot(), entry_name)?;

        if !sink_ready {
            file.flush().await?;
            *unflushed = 0;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.monitor.is_limit_exceeded() {
            // One more delay cycle, then give up if usage is still at
            // the ceiling.
            let delay =
                controller.next_delay(false, &self.monitor.snapshot(), entry_name)?;
            tokio::time::sleep(delay).await;
            if self.monitor.is_limit_exceeded() {
                let snap = self.monitor.snapshot();
                return Err(ExtractError::MemoryLimit {
                    current: snap.current_bytes,
                    limit: snap.limit_bytes,
                });
            }
        }

        Ok(())
    }

    async fn copy_stored(
        &self,
        entry: &ArchiveEntry,
        data_offset: u64,
        buf: &mut [u8],
        file: &mut File,
        controller: &mut BackpressureController,
    ) -> Result<EntryOutcome> {
        let mut crc = Crc::new();
        let mut remaining = entry.compressed_size;
        let mut offset = data_offset;
        let mut written = 0u64;
        let mut unflushed = 0u64;

        while remaining > 0 {
            let want = (buf.len() as u64).min(remaining) as usize;
            let started = Instant::now();
            let got = self.reader.source().read_at(offset, &mut buf[..want]).await?;
            if got == 0 {
                return Err(ExtractError::CorruptEntry {
                    name: entry.name.clone(),
                    reason: "unexpected end of archive data".into(),
                });
            }

            crc.update(&buf[..got]);
            self.pace_write(&entry.name, &mut unflushed, file, controller)
                .await?;
            file.write_all(&buf[..got]).await?;
            controller.record_throughput(got as u64, started.elapsed());

            offset += got as u64;
            remaining -= got as u64;
            written += got as u64;
            unflushed += got as u64;
        }

        self.finish(entry, crc, written)
    }

    async fn inflate(
        &self,
        entry: &ArchiveEntry,
        data_offset: u64,
        in_buf: &mut [u8],
        out_buf: &mut [u8],
        file: &mut File,
        controller: &mut BackpressureController,
    ) -> Result<EntryOutcome> {
        // Raw deflate stream: ZIP payloads carry no zlib header.
        let mut inflater = Decompress::new(false);
        let mut crc = Crc::new();
        let mut remaining = entry.compressed_size;
        let mut offset = data_offset;
        let mut written = 0u64;
        let mut unflushed = 0u64;
        let mut finished = false;

        while remaining > 0 && !finished {
            let want = (in_buf.len() as u64).min(remaining) as usize;
            let started = Instant::now();
            let got = self
                .reader
                .source()
                .read_at(offset, &mut in_buf[..want])
                .await?;
            if got == 0 {
                return Err(ExtractError::CorruptEntry {
                    name: entry.name.clone(),
                    reason: "unexpected end of archive data".into(),
                });
            }
            offset += got as u64;
            remaining -= got as u64;

            // One compressed chunk can inflate to many output chunks;
            // keep draining until the inflater has consumed it all.
            let mut consumed = 0usize;
            while consumed < got {
                let before_in = inflater.total_in();
                let before_out = inflater.total_out();
                let flush = if remaining == 0 {
                    FlushDecompress::Finish
                } else {
                    FlushDecompress::None
                };
                let status = inflater
                    .decompress(&in_buf[consumed..got], out_buf, flush)
                    .map_err(|e| ExtractError::CorruptEntry {
                        name: entry.name.clone(),
                        reason: format!("deflate stream error: {}", e),
                    })?;

                consumed += (inflater.total_in() - before_in) as usize;
                let produced = (inflater.total_out() - before_out) as usize;

                if produced > 0 {
                    crc.update(&out_buf[..produced]);
                    self.pace_write(&entry.name, &mut unflushed, file, controller)
                        .await?;
                    file.write_all(&out_buf[..produced]).await?;
                    written += produced as u64;
                    unflushed += produced as u64;

                    if written > entry.uncompressed_size {
                        return Err(ExtractError::CorruptEntry {
                            name: entry.name.clone(),
                            reason: format!(
                                "inflated size exceeds declared {} bytes",
                                entry.uncompressed_size
                            ),
                        });
                    }
                }

                if status == flate2::Status::StreamEnd {
                    finished = true;
                    break;
                }
                if produced == 0 && consumed == got {
                    break;
                }
            }
            controller.record_throughput(got as u64, started.elapsed());
        }

        self.finish(entry, crc, written)
    }

    fn finish(&self, entry: &ArchiveEntry, crc: Crc, written: u64) -> Result<EntryOutcome> {
        if crc.sum() != entry.crc32 {
            return Err(ExtractError::CorruptEntry {
                name: entry.name.clone(),
                reason: format!(
                    "CRC mismatch: computed {:08x}, expected {:08x}",
                    crc.sum(),
                    entry.crc32
                ),
            });
        }

        Ok(EntryOutcome {
            bytes_written: written,
            size_matched: written == entry.uncompressed_size,
        })
    }
}
