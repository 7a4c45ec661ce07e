//! CLI entry point: list or extract local and remote ZIP archives.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zipstream::{
    ArchiveEntry, BufferPool, Cli, ExtractOptions, ExtractionRequest, ExtractionResult,
    HttpRangeReader, LocalFileReader, ReadAt, RunOutcome, StreamingExtractor, VerificationReport,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.is_http_url() {
        let reader = HttpRangeReader::new(cli.file.clone()).await?;
        let transferred_before = reader.transferred_bytes();
        let reader = Arc::new(reader);

        process_zip(reader.clone(), &cli).await?;

        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.file))?);
        process_zip(reader, &cli).await?;
    }

    Ok(())
}

async fn process_zip<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let pool = Arc::new(BufferPool::default());
    let mut extractor = StreamingExtractor::new(reader, pool);

    if cli.list || cli.verbose {
        return list_entries(&extractor, cli.verbose).await;
    }

    let dest = cli
        .dest
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let options = ExtractOptions {
        max_entry_size: cli.max_entry_size_mb.map(|mb| mb * 1024 * 1024),
        memory_limit_bytes: cli.memory_limit_mb * 1024 * 1024,
        overwrite: cli.overwrite,
        include_patterns: cli.include.clone(),
        exclude_patterns: cli.exclude.clone(),
        include_directories: cli.dirs,
        score_run: cli.score,
        ..Default::default()
    };

    let mut request = ExtractionRequest::new(dest).with_options(options);
    if !cli.is_quiet() {
        request = request.on_entry_extracted(|entry: &ArchiveEntry| {
            println!("  extracting: {}", entry.name);
        });
    }

    let result = if cli.streaming {
        extractor.extract_streaming(request).await
    } else {
        extractor.extract(request).await
    };

    report_result(&result, cli);

    if let RunOutcome::Aborted(err) = &result.outcome {
        anyhow::bail!("extraction aborted: {}", err);
    }
    Ok(())
}

fn report_result(result: &ExtractionResult, cli: &Cli) {
    if !cli.is_very_quiet() {
        for warning in &result.warnings {
            eprintln!("warning: {}", warning);
        }
    }

    if !cli.is_quiet() {
        println!(
            "{} extracted, {} skipped, {}",
            result.extracted_count,
            result.skipped_count,
            format_size(result.total_bytes)
        );
    }

    if let Some(report) = &result.report {
        print_report(report);
    }
}

fn print_report(report: &VerificationReport) {
    println!("\nVerification score: {:.3}", report.overall_score);
    println!("  accuracy:       {:.3}", report.accuracy);
    println!("  integrity:      {:.3}", report.integrity);
    println!("  efficiency:     {:.3}", report.efficiency);
    println!("  resource usage: {:.3}", report.resource_usage);
    println!("  consistency:    {:.3}", report.consistency);
    println!("  processing:     {} ms", report.processing_time_ms);
}

/// List entries, either one name per line or as a detail table.
async fn list_entries<R: ReadAt + 'static>(
    extractor: &StreamingExtractor<R>,
    verbose: bool,
) -> Result<()> {
    let entries = extractor.list_entries().await?;

    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in &entries {
        if verbose {
            let (year, month, day) = entry.mod_date();
            let (hour, minute, _second) = entry.mod_time();

            let ratio = if entry.uncompressed_size > 0 {
                format!(
                    "{:>4}%",
                    100 - (entry.compressed_size * 100 / entry.uncompressed_size)
                )
            } else {
                "  0%".to_string()
            };

            println!(
                "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
                entry.uncompressed_size,
                entry.compressed_size,
                ratio,
                year,
                month,
                day,
                hour,
                minute,
                entry.name
            );

            if !entry.is_directory {
                total_uncompressed += entry.uncompressed_size;
                total_compressed += entry.compressed_size;
                file_count += 1;
            }
        } else {
            println!("{}", entry.name);
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        let total_ratio = if total_uncompressed > 0 {
            format!(
                "{:>4}%",
                100 - (total_compressed * 100 / total_uncompressed)
            )
        } else {
            "  0%".to_string()
        };
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed, total_compressed, total_ratio, "", file_count
        );
    }

    Ok(())
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
