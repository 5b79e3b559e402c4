//! Threading infrastructure — producer-consumer pipeline.
//!
//! One producer thread parses FASTA chunks and feeds a bounded crossbeam
//! channel; a fixed pool of workers pulls chunks and runs the build or scan
//! closure. Scoped threads let workers borrow the shared index without
//! `Arc`.
//!
//! Within a read, fragment order is preserved (each worker writes a whole
//! read's output under one lock acquisition); across reads no output order
//! is guaranteed once `threads > 1`.

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use crossbeam::channel;

use crate::io::fasta::{FastaSource, SeqChunk};

// ---------------------------------------------------------------------------
// ThreadConfig
// ---------------------------------------------------------------------------

/// Threading configuration.
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    pub threads: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self { threads: 1 }
    }
}

// ---------------------------------------------------------------------------
// OutputInfo
// ---------------------------------------------------------------------------

/// Shared output state for the scan pipeline.
pub struct OutputInfo {
    /// Number of reads whose fragments have been written.
    pub num_reads_written: AtomicU64,
    /// Mutex-guarded fragment FASTA output.
    pub out_file: Mutex<BufWriter<File>>,
}

// ---------------------------------------------------------------------------
// ScanStats
// ---------------------------------------------------------------------------

/// Thread-safe scan statistics.
pub struct ScanStats {
    pub num_reads: AtomicU64,
    pub num_fragments: AtomicU64,
    pub num_bases_in: AtomicU64,
    pub num_bases_kept: AtomicU64,
}

impl ScanStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self {
            num_reads: AtomicU64::new(0),
            num_fragments: AtomicU64::new(0),
            num_bases_in: AtomicU64::new(0),
            num_bases_kept: AtomicU64::new(0),
        }
    }

    /// Get summary values: (reads, fragments, bases in, bases kept).
    pub fn summary(&self) -> (u64, u64, u64, u64) {
        (
            self.num_reads.load(Ordering::Relaxed),
            self.num_fragments.load(Ordering::Relaxed),
            self.num_bases_in.load(Ordering::Relaxed),
            self.num_bases_kept.load(Ordering::Relaxed),
        )
    }
}

impl Default for ScanStats {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// run_sequence_pipeline
// ---------------------------------------------------------------------------

/// Run the sequence pipeline.
///
/// - Main thread reads FASTA chunks, sends through a bounded channel
/// - N workers receive chunks and run `worker_fn`
///
/// The `worker_fn` closure captures whatever shared state the caller needs
/// (index, output, stats) and owns its per-thread resources (hasher state,
/// fragment buffers, prefetch ring). Always 1 producer + N workers, so even
/// `threads = 1` overlaps parsing/decompression with hashing.
pub fn run_sequence_pipeline<F>(
    mut fasta: FastaSource,
    config: ThreadConfig,
    worker_fn: F,
) -> Result<()>
where
    F: Fn(SeqChunk) + Send + Sync,
{
    let num_threads = config.threads.max(1);
    let (sender, receiver) = channel::bounded::<SeqChunk>(num_threads * 2);

    let worker_ref = &worker_fn;
    crossbeam::scope(|scope| {
        // Spawn worker threads
        for _ in 0..num_threads {
            let recv = receiver.clone();
            scope.spawn(move |_| {
                while let Ok(chunk) = recv.recv() {
                    worker_ref(chunk);
                }
            });
        }
        // Drop the extra receiver clone so workers exit when the sender drops.
        drop(receiver);

        // Producer thread: reads FASTA chunks and sends to workers.
        scope.spawn(move |_| {
            let mut chunk = Vec::new();
            loop {
                match fasta.next_chunk(&mut chunk) {
                    Ok(true) => {
                        let batch = std::mem::take(&mut chunk);
                        if sender.send(batch).is_err() {
                            break; // Workers have shut down
                        }
                    }
                    Ok(false) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading FASTA: {}", e);
                        break;
                    }
                }
            }
            // sender dropped here, signaling workers to exit.
        });
    })
    .map_err(|e| anyhow::anyhow!("thread panicked: {:?}", e))?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_config_default() {
        let config = ThreadConfig::default();
        assert_eq!(config.threads, 1);
    }

    #[test]
    fn test_scan_stats_new() {
        let stats = ScanStats::new();
        assert_eq!(stats.summary(), (0, 0, 0, 0));
    }

    #[test]
    fn test_scan_stats_atomic_ops() {
        let stats = ScanStats::new();
        stats.num_reads.fetch_add(10, Ordering::Relaxed);
        stats.num_fragments.fetch_add(25, Ordering::Relaxed);
        stats.num_bases_in.fetch_add(1000, Ordering::Relaxed);
        stats.num_bases_kept.fetch_add(800, Ordering::Relaxed);
        assert_eq!(stats.summary(), (10, 25, 1000, 800));
    }
}
