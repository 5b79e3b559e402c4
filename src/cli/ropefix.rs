//! CLI command for rewriting MEM coordinates.
//!
//! Downstream MEM finders run on KeBaB fragments whose names carry their
//! 1-based position in the source read (`read:start-end`). Each MEM line
//! `name:start-end<TAB>mem_start<TAB>mem_end<TAB>occ` is rewritten to
//! `name<TAB>mem_start+start-1<TAB>mem_end+start-1<TAB>occ`, mapping the MEM
//! back into read coordinates. Lines that do not parse are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Args;

#[derive(Args, Debug)]
pub struct RopefixArgs {
    /// MEM file produced by running the MEM finder on KeBaB fragments
    #[arg(required = true)]
    pub mems: String,
    /// Output file (default: stdout)
    #[arg(short = 'o', long)]
    pub output: Option<String>,
}

pub fn run(args: RopefixArgs) -> Result<()> {
    let input = File::open(&args.mems)
        .with_context(|| format!("failed to open {}", args.mems))?;
    let reader = BufReader::new(input);

    let mut writer: BufWriter<Box<dyn Write>> = match &args.output {
        Some(path) => BufWriter::new(Box::new(
            File::create(path).with_context(|| format!("failed to create {path}"))?,
        )),
        None => BufWriter::new(Box::new(std::io::stdout().lock())),
    };

    for line in reader.lines() {
        let line = line?;
        if let Some(fixed) = rewrite_mem_line(&line) {
            writeln!(writer, "{fixed}")?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Rewrite one MEM line, or `None` if it does not match the expected shape.
fn rewrite_mem_line(line: &str) -> Option<String> {
    let mut fields = line.split('\t');
    let tag = fields.next()?;
    let mem_start: u64 = fields.next()?.trim().parse().ok()?;
    let mem_end: u64 = fields.next()?.trim().parse().ok()?;
    let occ: u64 = fields.next()?.trim().parse().ok()?;

    // The fragment range is appended after the last ':' so read names that
    // contain ':' survive.
    let (name, range) = tag.rsplit_once(':')?;
    let (start, _end) = range.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let offset = start.checked_sub(1)?;

    Some(format!(
        "{name}\t{}\t{}\t{occ}",
        mem_start + offset,
        mem_end + offset,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
