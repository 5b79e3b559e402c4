//! CLI command for building a KeBaB index.
//!
//! When the expected k-mer count is not supplied, a first streaming pass
//! feeds every k-mer hash into per-worker cardinality estimators, which are
//! merged to size the filter; a second pass then performs the inserts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::ProgressBar;
use tracing::info;

use crate::index::cardinality::CardinalityEstimator;
use crate::index::kebab::{observe_sequence, FILE_EXTENSION};
use crate::index::{
    FilterSizeMode, IndexParams, KebabIndex, KmerMode, DEFAULT_FP_RATE, DEFAULT_KMER_SIZE,
};
use crate::io::fasta::{FastaConfig, FastaSource};
use crate::io::threads::{run_sequence_pipeline, ThreadConfig};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Reference FASTA file(s), optionally gzip/zstd compressed
    #[arg(required = true)]
    pub fasta: Vec<String>,
    /// Output prefix for the .kbb index file
    #[arg(short = 'o', long)]
    pub output: String,
    /// K-mer size
    #[arg(short = 'k', long, default_value_t = DEFAULT_KMER_SIZE)]
    pub kmer_size: usize,
    /// Which k-mer hashes enter the filter (both, canonical, forward)
    #[arg(long, default_value = "both")]
    pub kmer_mode: KmerMode,
    /// Expected number of k-mer inserts (0 = estimate with a first pass)
    #[arg(short = 'm', long, default_value_t = 0)]
    pub expected_kmers: u64,
    /// Target false-positive rate (between 0 and 1)
    #[arg(short = 'e', long, default_value_t = DEFAULT_FP_RATE)]
    pub fp_rate: f64,
    /// Number of hash functions (0 = optimal for the target rate)
    #[arg(short = 'f', long, default_value_t = 0)]
    pub hash_funcs: usize,
    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = 1)]
    pub threads: usize,
    /// Keep the exact computed filter size instead of rounding up to a
    /// power of two
    #[arg(long)]
    pub no_rounding: bool,
}

pub fn run(args: BuildArgs) -> Result<()> {
    let start = Instant::now();

    let size_mode = if args.no_rounding {
        FilterSizeMode::Exact
    } else {
        FilterSizeMode::NextPowerOfTwo
    };
    let thread_config = ThreadConfig {
        threads: args.threads,
    };

    let expected_kmers = if args.expected_kmers == 0 {
        estimate_kmers(&args, thread_config)?
    } else {
        args.expected_kmers
    };

    let index = KebabIndex::new(&IndexParams {
        k: args.kmer_size,
        expected_kmers,
        fp_rate: args.fp_rate,
        num_hashes: args.hash_funcs,
        kmer_mode: args.kmer_mode,
        size_mode,
    })?;

    info!(
        "Indexing k-mers (k={}, mode={}, {} bits)",
        args.kmer_size,
        args.kmer_mode,
        index.stats().filter.num_bits,
    );
    let fasta = FastaSource::new(FastaConfig {
        paths: args.fasta.clone(),
    })?;
    let progress = sequence_spinner();
    run_sequence_pipeline(fasta, thread_config, |chunk| {
        for rec in &chunk {
            index.add_sequence(&rec.seq);
        }
        progress.inc(chunk.len() as u64);
    })?;
    progress.finish_and_clear();

    // Write the index, flushing before the summary so a failure surfaces.
    let out_path = index_path(&args.output);
    let file = File::create(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut writer = BufWriter::new(file);
    index.save(&mut writer)?;
    writer.flush()?;

    let stats = index.stats();
    info!("Index written to {}", out_path.display());
    info!("  desired FP rate: {}", stats.filter.desired_fp_rate);
    info!("  observed FP rate: {:.3e}", stats.filter.observed_fp_rate);
    info!("  hashes: {}", stats.filter.num_hashes);
    info!(
        "  set bits: {} / {} (load {:.4})",
        stats.filter.num_set_bits, stats.filter.num_bits, stats.filter.load_factor,
    );

    let json_path = out_path.with_extension("json");
    let json_file = File::create(&json_path)
        .with_context(|| format!("failed to create {}", json_path.display()))?;
    serde_json::to_writer_pretty(&json_file, &stats)
        .context("failed to write index stats JSON")?;

    info!("Build completed in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

/// First pass: stream every sequence through per-worker estimators and merge.
fn estimate_kmers(args: &BuildArgs, thread_config: ThreadConfig) -> Result<u64> {
    info!("Estimating distinct k-mer inserts (first pass over the reference)");
    let fasta = FastaSource::new(FastaConfig {
        paths: args.fasta.clone(),
    })?;
    let merged = Mutex::new(CardinalityEstimator::new());
    let progress = sequence_spinner();

    run_sequence_pipeline(fasta, thread_config, |chunk| {
        let mut local = CardinalityEstimator::new();
        for rec in &chunk {
            observe_sequence(&mut local, args.kmer_size, args.kmer_mode, &rec.seq);
        }
        merged.lock().unwrap().merge(&local);
        progress.inc(chunk.len() as u64);
    })?;
    progress.finish_and_clear();

    let estimator = merged.into_inner().unwrap();
    let estimate = estimator.report();
    if estimate == 0 {
        anyhow::bail!("no k-mers of length {} found in the input", args.kmer_size);
    }
    info!(
        "Estimated {} k-mer inserts (expected error ±{:.2}%)",
        estimate,
        estimator.relative_error() * 100.0,
    );
    Ok(estimate)
}

fn index_path(prefix: &str) -> PathBuf {
    let mut path = Path::new(prefix).to_path_buf();
    path.set_extension(FILE_EXTENSION);
    path
}

fn sequence_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_message("sequences processed");
    pb
}
