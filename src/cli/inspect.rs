//! CLI command for inspecting a saved index.

use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use clap::Args;

use crate::index::KebabIndex;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// KeBaB index file
    #[arg(short = 'i', long)]
    pub index: String,
    /// Emit the stats as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: InspectArgs) -> Result<()> {
    let file = File::open(&args.index)
        .with_context(|| format!("failed to open {}", args.index))?;
    let mut reader = BufReader::new(file);
    let index = KebabIndex::load(&mut reader)
        .with_context(|| format!("failed to load {}", args.index))?;

    let stats = index.stats();
    if args.json {
        serde_json::to_writer_pretty(std::io::stdout().lock(), &stats)
            .context("failed to write JSON stats")?;
        println!();
    } else {
        println!("k: {}", stats.k);
        println!("k-mer mode: {}", stats.kmer_mode);
        println!("filter-size mode: {:?}", index.size_mode());
        println!("bits: {}", stats.filter.num_bits);
        println!("set bits: {}", stats.filter.num_set_bits);
        println!("hashes: {}", stats.filter.num_hashes);
        println!("load: {:.6}", stats.filter.load_factor);
        println!("observed FP rate: {:.3e}", stats.filter.observed_fp_rate);
    }
    Ok(())
}
