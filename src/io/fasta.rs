//! FASTA reader — wraps `paraseq` for batched reading.
//!
//! Provides a chunking sequence source for the build and scan pipelines,
//! with multi-file concatenation and transparent decompression (gzip, zstd,
//! etc.) via niffler.

use anyhow::{Context, Result};

pub use paraseq::fasta;
use paraseq::Record;

// ---------------------------------------------------------------------------
// SeqRecord
// ---------------------------------------------------------------------------

/// A named sequence with owned byte buffers.
#[derive(Debug, Clone)]
pub struct SeqRecord {
    /// Record name: the header up to the first whitespace.
    pub name: Vec<u8>,
    pub seq: Vec<u8>,
}

/// A chunk of sequences for batch processing.
pub type SeqChunk = Vec<SeqRecord>;

// ---------------------------------------------------------------------------
// FastaConfig
// ---------------------------------------------------------------------------

/// Configuration for FASTA input sources.
#[derive(Debug, Clone, Default)]
pub struct FastaConfig {
    pub paths: Vec<String>,
}

// ---------------------------------------------------------------------------
// FastaSource
// ---------------------------------------------------------------------------

/// Sequential FASTA reader that produces chunks of `SeqRecord`.
///
/// Each `next_chunk` call drains one `paraseq` record set; record order is
/// file order.
pub struct FastaSource {
    reader: fasta::Reader<Box<dyn std::io::Read + Send>>,
    record_set: fasta::RecordSet,
}

impl FastaSource {
    /// Open FASTA files from the configuration.
    pub fn new(config: FastaConfig) -> Result<Self> {
        let r = open_concatenated_readers(&config.paths)?;
        let reader = fasta::Reader::new(r);
        let record_set = reader.new_record_set();
        Ok(Self { reader, record_set })
    }

    /// Read the next chunk of sequences into the provided buffer.
    ///
    /// Returns `Ok(true)` if sequences were produced, `Ok(false)` at EOF.
    pub fn next_chunk(&mut self, chunk: &mut SeqChunk) -> Result<bool> {
        chunk.clear();

        let has = self.record_set.fill(&mut self.reader)?;
        if !has {
            return Ok(false);
        }

        for rec in self.record_set.iter() {
            let rec = rec?;
            chunk.push(SeqRecord {
                name: record_name(rec.id()),
                seq: rec.seq().into_owned(),
            });
        }

        Ok(!chunk.is_empty())
    }
}

/// Header bytes up to the first whitespace.
fn record_name(id: &[u8]) -> Vec<u8> {
    let end = id
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(id.len());
    id[..end].to_vec()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Open a single file with automatic decompression (gzip, zstd, etc.).
fn open_with_decompression(path: &str) -> Result<Box<dyn std::io::Read + Send>> {
    let (reader, _format) = niffler::send::from_path(path)
        .with_context(|| format!("failed to open {}", path))?;
    Ok(reader)
}

/// Open multiple files and concatenate them into a single reader.
fn open_concatenated_readers(
    paths: &[String],
) -> Result<Box<dyn std::io::Read + Send>> {
    use std::io::Read;

    if paths.is_empty() {
        anyhow::bail!("no input files specified");
    }
    if paths.len() == 1 {
        return open_with_decompression(&paths[0]);
    }
    let mut readers: Vec<Box<dyn Read + Send>> = Vec::with_capacity(paths.len());
    for path in paths {
        readers.push(open_with_decompression(path)?);
    }
    Ok(Box::new(MultiReader { readers, current: 0 }))
}

/// Concatenating reader over multiple boxed readers.
struct MultiReader {
    readers: Vec<Box<dyn std::io::Read + Send>>,
    current: usize,
}

impl std::io::Read for MultiReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.current < self.readers.len() {
            let n = self.readers[self.current].read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.current += 1;
        }
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_record_name_stops_at_whitespace() {
        assert_eq!(record_name(b"chr1 assembly=GRCh38"), b"chr1".to_vec());
        assert_eq!(record_name(b"read/1\tcomment"), b"read/1".to_vec());
        assert_eq!(record_name(b"plain"), b"plain".to_vec());
    }

    #[test]
    fn test_multi_reader_concatenates() {
        let readers: Vec<Box<dyn Read + Send>> = vec![
            Box::new(Cursor::new(b">a\nACGT\n".to_vec())),
            Box::new(Cursor::new(b">b\nTTTT\n".to_vec())),
        ];
        let mut multi = MultiReader {
            readers,
            current: 0,
        };
        let mut out = String::new();
        multi.read_to_string(&mut out).unwrap();
        assert_eq!(out, ">a\nACGT\n>b\nTTTT\n");
    }

    #[test]
    fn test_empty_path_list_is_an_error() {
        assert!(open_concatenated_readers(&[]).is_err());
    }
}
