//! Command-line interface definition.
//!
//! Grounded in the teacher's `cli.rs`: one `clap::Args` struct per
//! subcommand, a `value_parser` for k with the same eager-validation style,
//! and an `OutputFormat` enum mirroring the teacher's Fasta/Tsv/Json shapes
//! (the teacher's `Histogram` variant has no counterpart here — knockmer's
//! rows already carry `score`/`stdev`/`pval`, not a second-order count of
//! counts, so it is dropped rather than stretched to fit).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::options::ProbAlgo;

/// K-mer counting, enrichment, and iterative knockout motif discovery for
/// large nucleotide sequence files.
///
/// Input is auto-detected as raw/FASTA/FASTQ (and gzip/zlib) unless
/// `--input-format` is given explicitly.
///
/// # Examples
///
/// ```bash
/// # Count 5-mers in a FASTA file
/// knockmer count 5 sequences.fa
///
/// # Enrichment against a control corpus
/// knockmer enrichment 5 test.fa --control background.fa --normalize
///
/// # IKKE: discover the top 10 motifs
/// knockmer ikke 5 test.fa --control background.fa --iters 10
/// ```
#[derive(Parser, Debug)]
#[command(name = "knockmer")]
#[command(version, author, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Count every k-mer of a given length.
    Count(CountArgs),
    /// Compute enrichment against a control corpus or a probabilistic background.
    Enrichment(EnrichmentArgs),
    /// Iterative k-mer knockout enrichment: discover, mask, repeat.
    Ikke(IkkeArgs),
}

/// Flags shared by every subcommand, mirroring spec.md §3's `Options` record.
#[derive(clap::Args, Debug)]
pub struct SharedArgs {
    /// K-mer length (1-16).
    #[arg(value_parser = parse_k)]
    pub k: usize,

    /// Input file path.
    pub path: PathBuf,

    /// Input file format (auto-detected by sampling the first 10 lines if not specified).
    #[arg(short = 'i', long = "input-format", value_enum, default_value = "auto")]
    pub input_format: InputFormatArg,

    /// Worker thread count (clamped to [1, 128]).
    #[arg(short, long, default_value = "1")]
    pub threads: usize,

    /// Report enrichment scores as log2.
    #[arg(short, long)]
    pub normalize: bool,

    /// Sort output rows by descending score (NaN rows trail).
    #[arg(short, long)]
    pub sort: bool,

    /// Number of bootstrap iterations (0 disables bootstrap).
    #[arg(long, default_value = "0")]
    pub bootstrap_iters: u32,

    /// Bootstrap subsample fraction in milli-percent (1-100000).
    #[arg(long, default_value = "100000")]
    pub bootstrap_sample: u32,

    /// RNG seed; negative uses a time-derived seed.
    #[arg(long, default_value = "-1")]
    pub seed: i64,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "fasta")]
    pub format: OutputFormat,

    /// Emit 'U' instead of 'T' in k-mer strings.
    #[arg(long)]
    pub use_u: bool,

    /// Suppress the informational preamble.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(clap::Args, Debug)]
pub struct CountArgs {
    #[command(flatten)]
    pub shared: SharedArgs,
}

#[derive(clap::Args, Debug)]
pub struct EnrichmentArgs {
    #[command(flatten)]
    pub shared: SharedArgs,

    /// Control corpus for control-based enrichment. Required unless
    /// `--prob-algo` selects a probabilistic background.
    #[arg(long)]
    pub control: Option<PathBuf>,

    /// Background model.
    #[arg(long, value_enum, default_value = "none")]
    pub prob_algo: ProbAlgoArg,

    /// k-let length preserved by shuffling (defaults to round(sqrt(k))).
    #[arg(long, default_value = "0")]
    pub prob_ntprec: usize,
}

#[derive(clap::Args, Debug)]
pub struct IkkeArgs {
    #[command(flatten)]
    pub shared: SharedArgs,

    /// Control corpus. Required unless `--prob-algo` selects a probabilistic background.
    #[arg(long)]
    pub control: Option<PathBuf>,

    /// Background model.
    #[arg(long, value_enum, default_value = "none")]
    pub prob_algo: ProbAlgoArg,

    /// k-let length preserved by shuffling (defaults to round(sqrt(k))).
    #[arg(long, default_value = "0")]
    pub prob_ntprec: usize,

    /// Number of IKKE iterations (1..=4^k).
    #[arg(long, default_value = "1")]
    pub iters: usize,
}

/// Output format for emitted `KmerData` rows.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// FASTA-like format (`>{score}\n{kmer}`).
    #[default]
    Fasta,
    /// Tab-separated values (`kmer\tscore[\tstdev][\tpval]`).
    Tsv,
    /// JSON array of row objects.
    Json,
}

/// CLI-facing mirror of [`crate::seqstream::FileType`] plus an `Auto` variant
/// that defers to [`crate::detector::detect`].
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum InputFormatArg {
    #[default]
    Auto,
    Raw,
    Fasta,
    Fastq,
}

/// CLI-facing mirror of [`ProbAlgo`].
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum ProbAlgoArg {
    #[default]
    None,
    Ushuffle,
    Regular,
    Both,
}

impl From<ProbAlgoArg> for ProbAlgo {
    fn from(value: ProbAlgoArg) -> Self {
        match value {
            ProbAlgoArg::None => Self::None,
            ProbAlgoArg::Ushuffle => Self::Ushuffle,
            ProbAlgoArg::Regular => Self::Regular,
            ProbAlgoArg::Both => Self::Both,
        }
    }
}

fn parse_k(s: &str) -> Result<usize, String> {
    let k: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if k == 0 || k > 16 {
        return Err("k-mer length must be between 1 and 16".to_string());
    }
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_k_rejects_zero_and_above_16() {
        assert!(parse_k("0").is_err());
        assert!(parse_k("17").is_err());
        assert!(parse_k("16").is_ok());
        assert!(parse_k("1").is_ok());
    }

    #[test]
    fn prob_algo_arg_maps_to_options_prob_algo() {
        assert_eq!(ProbAlgo::from(ProbAlgoArg::None), ProbAlgo::None);
        assert_eq!(ProbAlgo::from(ProbAlgoArg::Ushuffle), ProbAlgo::Ushuffle);
        assert_eq!(ProbAlgo::from(ProbAlgoArg::Regular), ProbAlgo::Regular);
        assert_eq!(ProbAlgo::from(ProbAlgoArg::Both), ProbAlgo::Both);
    }
}
