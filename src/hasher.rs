//! Rolling 2-bit k-mer hasher over FASTA/FASTQ/raw byte buffers (spec.md §4.C).
//!
//! Carries enough state (line position, record-boundary reset, partial
//! window fill) across successive [`set_seq`](RollingHasher::set_seq) calls
//! that a buffer boundary can fall inside a header or quality block and the
//! hasher still resumes correctly on the next chunk, without ever producing
//! a k-mer that spans two records.

use crate::alphabet::Base;
use crate::seqstream::FileType;

/// Why the last call to [`RollingHasher::next_hash`] returned `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// No call has returned `None` yet this sequence.
    None = 0,
    /// The buffer was fully consumed; call `set_seq` with the next chunk.
    BufferExhausted = 1,
    /// A record boundary was crossed mid-window (informational only; hashing continues).
    RecordBoundary = 2,
}

/// A k-mer rolling hasher bound to one record-framing convention.
pub struct RollingHasher {
    k: usize,
    mask: u32,
    hash: u32,
    filled: usize,
    buf: Vec<u8>,
    pos: usize,
    file_type: FileType,
    at_line_start: bool,
    in_skip_line: bool,
    fastq_line: u8,
    end_reason: EndReason,
}

impl RollingHasher {
    #[must_use]
    pub fn new(k: usize, file_type: FileType) -> Self {
        let mask = if k >= 16 { u32::MAX } else { (1u32 << (2 * k)) - 1 };
        Self {
            k,
            mask,
            hash: 0,
            filled: 0,
            buf: Vec::new(),
            pos: 0,
            file_type,
            at_line_start: true,
            in_skip_line: false,
            fastq_line: 0,
            end_reason: EndReason::None,
        }
    }

    #[must_use]
    pub const fn end_reason(&self) -> EndReason {
        self.end_reason
    }

    #[must_use]
    pub const fn pos(&self) -> usize {
        self.pos
    }

    /// Loads the next chunk of bytes to hash. Window state (partial k-mer
    /// fill, current line role) survives across calls.
    pub fn set_seq(&mut self, buf: &[u8]) {
        self.buf = buf.to_vec();
        self.pos = 0;
        self.end_reason = EndReason::None;
    }

    fn reset_window(&mut self) {
        self.hash = 0;
        self.filled = 0;
    }

    fn advance_fastq_line(&mut self) {
        self.fastq_line = (self.fastq_line + 1) % 4;
        if self.fastq_line == 0 {
            self.reset_window();
            self.end_reason = EndReason::RecordBoundary;
        }
        self.in_skip_line = self.fastq_line != 1;
    }

    /// Returns the next complete k-mer's hash, or `None` when the current
    /// buffer is exhausted (check [`Self::end_reason`] to distinguish EOF
    /// from a record boundary already consumed internally).
    pub fn next_hash(&mut self) -> Option<u32> {
        loop {
            if self.pos >= self.buf.len() {
                self.end_reason = EndReason::BufferExhausted;
                return None;
            }
            let b = self.buf[self.pos];
            self.pos += 1;

            if self.in_skip_line {
                if b == b'\n' {
                    self.in_skip_line = false;
                    self.at_line_start = true;
                    if self.file_type == FileType::Fastq {
                        self.advance_fastq_line();
                    }
                }
                continue;
            }

            if b == b'\n' {
                self.at_line_start = true;
                match self.file_type {
                    FileType::Fastq => self.advance_fastq_line(),
                    FileType::Raw => self.reset_window(),
                    FileType::Fasta | FileType::Unknown => {}
                }
                continue;
            }

            if self.at_line_start {
                self.at_line_start = false;
                match self.file_type {
                    FileType::Fasta if b == b'>' || b == b';' => {
                        self.reset_window();
                        self.in_skip_line = true;
                        continue;
                    }
                    FileType::Fastq if self.fastq_line != 1 => {
                        self.in_skip_line = true;
                        continue;
                    }
                    _ => {}
                }
            }

            match Base::from_byte(b) {
                Some(base) => {
                    self.hash = ((self.hash << 2) | base.bits()) & self.mask;
                    self.filled = (self.filled + 1).min(self.k);
                    if self.filled == self.k {
                        return Some(self.hash);
                    }
                }
                None => self.reset_window(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(mut hasher: RollingHasher, buf: &[u8]) -> Vec<u32> {
        hasher.set_seq(buf);
        let mut out = Vec::new();
        while let Some(h) = hasher.next_hash() {
            out.push(h);
        }
        out
    }

    #[test]
    fn raw_counts_every_window() {
        let hasher = RollingHasher::new(2, FileType::Raw);
        let hashes = collect(hasher, b"ACGT\n");
        // AC, CG, GT
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn raw_line_boundary_resets_window() {
        let hasher = RollingHasher::new(4, FileType::Raw);
        let hashes = collect(hasher, b"AC\nGT\n");
        assert!(hashes.is_empty());
    }

    #[test]
    fn fasta_skips_header() {
        let hasher = RollingHasher::new(2, FileType::Fasta);
        let hashes = collect(hasher, b">seq1 desc\nACGT\n");
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn fasta_does_not_span_records() {
        let hasher = RollingHasher::new(4, FileType::Fasta);
        let hashes = collect(hasher, b">a\nACG\n>b\nTAC\n");
        assert!(hashes.is_empty());
    }

    #[test]
    fn fasta_sequence_wraps_multiple_lines() {
        let hasher = RollingHasher::new(4, FileType::Fasta);
        let hashes = collect(hasher, b">a\nAC\nGT\n");
        assert_eq!(hashes.len(), 1);
    }

    #[test]
    fn fastq_hashes_only_sequence_line() {
        let hasher = RollingHasher::new(2, FileType::Fastq);
        let hashes = collect(hasher, b"@r1\nACGT\n+\nIIII\n");
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn fastq_does_not_span_records() {
        let hasher = RollingHasher::new(4, FileType::Fastq);
        let hashes = collect(hasher, b"@r1\nACG\n+\nIII\n@r2\nTAC\n+\nIII\n");
        assert!(hashes.is_empty());
    }

    #[test]
    fn resumes_partial_window_across_buffers() {
        let mut hasher = RollingHasher::new(4, FileType::Raw);
        hasher.set_seq(b"AC");
        assert_eq!(hasher.next_hash(), None);
        hasher.set_seq(b"GT\n");
        assert_eq!(hasher.next_hash(), Some(0b00_01_10_11));
    }
}
