//! CLI command for fragmenting reads against a KeBaB index.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::ProgressBar;
use tracing::{info, warn};

use crate::index::{KebabIndex, DEFAULT_MIN_MEM_LENGTH};
use crate::io::fasta::{FastaConfig, FastaSource};
use crate::io::fragments::{append_fragment_records, OUTPUT_BUFFER_SIZE};
use crate::io::threads::{run_sequence_pipeline, OutputInfo, ScanStats, ThreadConfig};

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Reads FASTA file(s), optionally gzip/zstd compressed
    #[arg(required = true)]
    pub fasta: Vec<String>,
    /// KeBaB index file
    #[arg(short = 'i', long)]
    pub index: String,
    /// Output FASTA file for fragments
    #[arg(short = 'o', long)]
    pub output: String,
    /// Minimum MEM length: fragments shorter than this are dropped
    #[arg(short = 'l', long, default_value_t = DEFAULT_MIN_MEM_LENGTH)]
    pub min_mem_length: usize,
    /// Sort each read's fragments longest-first
    #[arg(short = 's', long)]
    pub sort: bool,
    /// Merge overlapping fragments
    #[arg(short = 'r', long)]
    pub remove_overlaps: bool,
    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = 1)]
    pub threads: usize,
    /// Disable the prefetch probe pipeline
    #[arg(long)]
    pub no_prefetch: bool,
}

pub fn run(args: ScanArgs) -> Result<()> {
    let start = Instant::now();

    info!("Loading index from {}", args.index);
    let index_file = File::open(&args.index)
        .with_context(|| format!("failed to open {}", args.index))?;
    let mut index_reader = BufReader::new(index_file);
    let index = KebabIndex::load(&mut index_reader)
        .with_context(|| format!("failed to load {}", args.index))?;
    let stats_snapshot = index.stats();
    info!(
        "  k={}, mode={}, {} bits, {} hashes",
        index.k(),
        index.kmer_mode(),
        stats_snapshot.filter.num_bits,
        stats_snapshot.filter.num_hashes,
    );

    if args.min_mem_length < index.k() {
        anyhow::bail!(
            "--min-mem-length ({}) must be at least k ({})",
            args.min_mem_length,
            index.k(),
        );
    }

    // The prefetch pipeline needs min_mem_length strictly above k.
    let mut prefetch = !args.no_prefetch;
    if prefetch && args.min_mem_length <= index.k() {
        warn!(
            "--min-mem-length ({}) must exceed k ({}) for prefetch scanning; \
             falling back to plain probes",
            args.min_mem_length,
            index.k(),
        );
        prefetch = false;
    }

    let out_file = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output))?;
    let output = OutputInfo {
        num_reads_written: AtomicU64::new(0),
        out_file: Mutex::new(BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, out_file)),
    };
    let stats = ScanStats::new();

    let fasta = FastaSource::new(FastaConfig {
        paths: args.fasta.clone(),
    })?;
    let thread_config = ThreadConfig {
        threads: args.threads,
    };
    let progress = ProgressBar::new_spinner();
    progress.set_message("reads scanned");

    run_sequence_pipeline(fasta, thread_config, |chunk| {
        let mut buf = Vec::new();
        let mut local_reads = 0u64;
        let mut local_fragments = 0u64;
        let mut local_bases_in = 0u64;
        let mut local_bases_kept = 0u64;

        for rec in &chunk {
            local_reads += 1;
            local_bases_in += rec.seq.len() as u64;
            match index.scan_read(&rec.seq, args.min_mem_length, args.remove_overlaps, prefetch)
            {
                Ok(mut fragments) => {
                    if args.sort {
                        fragments.sort_unstable();
                    }
                    local_fragments += fragments.len() as u64;
                    local_bases_kept +=
                        fragments.iter().map(|f| f.length as u64).sum::<u64>();
                    append_fragment_records(&mut buf, &rec.name, &rec.seq, &fragments);
                }
                Err(e) => {
                    tracing::error!(
                        "skipping read {}: {e}",
                        String::from_utf8_lossy(&rec.name),
                    );
                }
            }
        }

        if !buf.is_empty() {
            let mut file = output.out_file.lock().unwrap();
            file.write_all(&buf).ok();
            output
                .num_reads_written
                .fetch_add(local_reads, Ordering::Relaxed);
        }

        stats.num_reads.fetch_add(local_reads, Ordering::Relaxed);
        stats
            .num_fragments
            .fetch_add(local_fragments, Ordering::Relaxed);
        stats
            .num_bases_in
            .fetch_add(local_bases_in, Ordering::Relaxed);
        stats
            .num_bases_kept
            .fetch_add(local_bases_kept, Ordering::Relaxed);
        progress.inc(chunk.len() as u64);
    })?;
    progress.finish_and_clear();

    // Flush and close the fragment file on every exit path before reporting.
    let mut writer = output.out_file.into_inner().unwrap();
    writer.flush().context("failed to flush fragment output")?;
    drop(writer);

    let (num_reads, num_fragments, bases_in, bases_kept) = stats.summary();
    info!(
        "Scanned {} reads into {} fragments ({:.1}% of bases kept), {:.1}s",
        num_reads,
        num_fragments,
        if bases_in > 0 {
            bases_kept as f64 / bases_in as f64 * 100.0
        } else {
            0.0
        },
        start.elapsed().as_secs_f64(),
    );

    Ok(())
}
