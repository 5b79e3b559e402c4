//! Fragment FASTA output.
//!
//! One record per fragment: `>{name}:{start}-{end}` with 1-based inclusive
//! coordinates, then the fragment bases. Workers format into a thread-local
//! buffer and flush whole reads under the output mutex, so fragments of one
//! read stay contiguous and in scan order.

use std::io::Write;

use crate::index::Fragment;

/// Output buffer size for the fragment FASTA writer.
pub const OUTPUT_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Append the FASTA records for one read's fragments to `buf`.
pub fn append_fragment_records(
    buf: &mut Vec<u8>,
    name: &[u8],
    seq: &[u8],
    fragments: &[Fragment],
) {
    for frag in fragments {
        buf.push(b'>');
        buf.extend_from_slice(name);
        // Writing into a Vec cannot fail.
        let _ = write!(buf, ":{}-{}", frag.start + 1, frag.end());
        buf.push(b'\n');
        buf.extend_from_slice(&seq[frag.start..frag.end()]);
        buf.push(b'\n');
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_fragment_record() {
        let mut buf = Vec::new();
        append_fragment_records(
            &mut buf,
            b"read1",
            b"ACGTACGT",
            &[Fragment { start: 0, length: 8 }],
        );
        assert_eq!(buf, b">read1:1-8\nACGTACGT\n");
    }

    #[test]
    fn test_coordinates_are_one_based_inclusive() {
        let mut buf = Vec::new();
        append_fragment_records(
            &mut buf,
            b"r",
            b"AACCGGTT",
            &[Fragment { start: 2, length: 4 }],
        );
        assert_eq!(buf, b">r:3-6\nCCGG\n");
    }

    #[test]
    fn test_multiple_fragments_in_scan_order() {
        let mut buf = Vec::new();
        append_fragment_records(
            &mut buf,
            b"r",
            b"AAAACCCCGGGG",
            &[
                Fragment { start: 0, length: 4 },
                Fragment { start: 8, length: 4 },
            ],
        );
        assert_eq!(buf, b">r:1-4\nAAAA\n>r:9-12\nGGGG\n");
    }

    #[test]
    fn test_no_fragments_no_output() {
        let mut buf = Vec::new();
        append_fragment_records(&mut buf, b"r", b"ACGT", &[]);
        assert!(buf.is_empty());
    }
}
