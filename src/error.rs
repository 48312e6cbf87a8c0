//! Error types for knockmer.
//!
//! Exhaustive, strongly-typed errors for every component, grouped the way
//! spec.md §7 groups failures: I/O, Configuration, Capacity, Protocol.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur across the counting, enrichment, and bootstrap pipelines.
#[derive(Debug, Error)]
pub enum KnockmerError {
    // -- I/O --
    /// Failed to open a sequence file or descriptor.
    #[error("failed to open sequence stream '{path}': {source}")]
    OpenFailed {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// A read from the underlying file or decompressor failed.
    #[error("read failed on '{path}': {source}")]
    ReadFailed {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// The gzip/zlib decompressor reported an error mid-stream.
    #[error("decompression failed on '{path}': {source}")]
    DecompressionFailed {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// End of file reached inside a record that was not yet complete.
    #[error("unexpected end of file within a record in '{path}'")]
    UnexpectedEof { path: PathBuf },

    // -- Configuration --
    /// K-mer length is outside the valid `[1, 16]` range.
    #[error("invalid k-mer length {k}: must be between 1 and 16")]
    InvalidK { k: usize },

    /// IKKE iteration count is zero or exceeds `4^k`.
    #[error("invalid iteration count {iters}: must be between 1 and {max}")]
    InvalidIters { iters: usize, max: u64 },

    /// `bootstrap_sample` is outside the `[1, 100000]` milli-percent range.
    #[error("invalid bootstrap sample {value}: must be between 1 and 100000 (milli-percent)")]
    InvalidSamplePercent { value: u32 },

    /// An open-mode character did not match any known file-type tag.
    #[error("invalid stream open mode '{mode}'")]
    InvalidMode { mode: char },

    /// A probabilistic-background request was paired with a control file, or
    /// `prob_algo` was used somewhere it is not supported.
    #[error("prob_algo {prob_algo:?} is not supported in this context: {details}")]
    UnsupportedProbAlgo {
        prob_algo: crate::options::ProbAlgo,
        details: String,
    },

    /// A control file is required for this algorithm but was not supplied.
    #[error("a control file is required for control-based enrichment")]
    MissingControl,

    // -- Capacity --
    /// A record did not fit within the stream's output buffer.
    #[error("record in '{path}' is larger than the {buffer_size}-byte output buffer")]
    RecordTooLarge { path: PathBuf, buffer_size: usize },

    /// A table or buffer allocation failed.
    #[error("allocation failed: {details}")]
    AllocationFailed { details: String },

    // -- Protocol --
    /// The first 10 lines of the stream did not resolve to a known file type.
    #[error("could not classify '{path}' as raw, FASTA, or FASTQ")]
    UnclassifiableType { path: PathBuf },

    /// A k-mer string passed to a table lookup contained a non-alphabet byte.
    #[error("invalid base in k-mer string at position {position}")]
    InvalidKmerString { position: usize },

    /// A k-mer string's length does not match the table's k.
    #[error("k-mer string length {got} does not match table k={expected}")]
    KmerLengthMismatch { got: usize, expected: usize },

    /// A hash value fell outside `[0, 4^k)` for the table it was queried against.
    #[error("hash {hash} is out of range for table of capacity {capacity}")]
    HashOutOfRange { hash: u32, capacity: u64 },

    /// Two tables were compared (enrichment, IKKE) with differing k.
    #[error("k mismatch between tables: {a} vs {b}")]
    KMismatch { a: usize, b: usize },
}

impl From<KnockmerError> for String {
    fn from(err: KnockmerError) -> Self {
        err.to_string()
    }
}
