//! # knockmer
//!
//! `knockmer` counts, enriches, and iteratively knocks out k-mer motifs from
//! very large nucleotide sequence files (raw, FASTA, or FASTQ; optionally
//! gzip- or zlib-compressed).
//!
//! The library is organized bottom-up, matching spec.md §2's component
//! table:
//!
//! - [`seqstream`] opens a path or reader, detects compression, and exposes
//!   byte/line/record reads.
//! - [`detector`] classifies a stream's first ten lines as raw/FASTA/FASTQ.
//! - [`alphabet`] is the single A/C/G/T/U <-> 2-bit authority shared by the
//!   hasher, table, and IKKE unhash step.
//! - [`hasher`] turns a buffer into a lazy stream of rolling k-mer hashes,
//!   carrying partial window state across buffer boundaries.
//! - [`table`] is the fixed `4^k`-slot count table with masked-k-mer
//!   bookkeeping for IKKE.
//! - [`counter`] orchestrates single- and multi-threaded counting passes,
//!   plus bootstrap subsampling and shuffle-based counting.
//! - [`shuffler`] implements k-let-preserving sequence shuffling.
//! - [`enrichment`] computes enrichment tables and IKKE.
//! - [`bootstrap`] runs independent subsample iterations into Welford
//!   aggregates and a Welch's t-test.
//! - [`api`] is the validated `count`/`enrichment`/`ikke` entry surface; this
//!   is the only module external collaborators (the logo/PWM subsystem,
//!   dataset bundles, scripting-host bindings) should depend on.
//!
//! Set `RUST_LOG=knockmer=debug` (with the `tracing` feature enabled) to see
//! per-pass buffer refills and mask-list growth.

pub mod alphabet;
pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod counter;
pub mod detector;
pub mod enrichment;
pub mod error;
pub mod hasher;
pub mod options;
pub mod seqstream;
pub mod shuffler;
pub mod table;

pub use api::{Api, KmerData, KmerRow};
pub use error::KnockmerError;
pub use options::{Options, OptionsBuilder, ProbAlgo};
pub use seqstream::FileType;
