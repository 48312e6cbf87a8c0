#![allow(
    clippy::too_many_lines,
    clippy::needless_pass_by_value,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::redundant_clone
)]

use std::process;

use clap::Parser;
use colored::Colorize;
use serde::Serialize;

use knockmer::api::{Api, KmerData, KmerRow};
use knockmer::cli::{
    Cli, Command, CountArgs, EnrichmentArgs, IkkeArgs, InputFormatArg, OutputFormat, SharedArgs,
};
use knockmer::error::KnockmerError;
use knockmer::options::OptionsBuilder;
use knockmer::seqstream::FileType;

/// Initialize the tracing subscriber with environment filter.
///
/// Set `RUST_LOG=knockmer=debug` to see debug output.
#[cfg(feature = "tracing")]
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn main() {
    #[cfg(feature = "tracing")]
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Count(args) => run_count(args),
        Command::Enrichment(args) => run_enrichment(args),
        Command::Ikke(args) => run_ikke(args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}\n {}",
            "Application error:".blue().bold(),
            e.to_string().blue()
        );
        process::exit(1);
    }
}

fn resolve_file_type(arg: InputFormatArg) -> Option<FileType> {
    match arg {
        InputFormatArg::Auto => None,
        InputFormatArg::Raw => Some(FileType::Raw),
        InputFormatArg::Fasta => Some(FileType::Fasta),
        InputFormatArg::Fastq => Some(FileType::Fastq),
    }
}

fn print_preamble(shared: &SharedArgs, algo: &str) {
    if shared.quiet {
        return;
    }
    eprintln!("{}: {}", "algorithm".bold(), algo.blue().bold());
    eprintln!(
        "{}: {}",
        "k-length".bold(),
        shared.k.to_string().blue().bold()
    );
    eprintln!(
        "{}: {}",
        "data".bold(),
        shared.path.display().to_string().underline().blue().bold()
    );
    eprintln!(
        "{}: {}",
        "threads".bold(),
        shared.threads.to_string().blue().bold()
    );
    if shared.bootstrap_iters > 0 {
        eprintln!(
            "{}: {} ({}‰ sample)",
            "bootstrap-iters".bold(),
            shared.bootstrap_iters.to_string().blue().bold(),
            shared.bootstrap_sample.to_string().blue().bold()
        );
    }
    eprintln!(
        "{}: {}",
        "output-format".bold(),
        format!("{:?}", shared.format).to_lowercase().blue().bold()
    );
    eprintln!();
}

fn run_count(args: CountArgs) -> Result<(), KnockmerError> {
    let shared = args.shared;
    if !shared.path.exists() {
        eprintln!(
            "{}\n {}",
            "Problem with arguments:".blue().bold(),
            format!("File not found: {}", shared.path.display()).blue().bold()
        );
        process::exit(1);
    }
    print_preamble(&shared, "count");

    let opts = OptionsBuilder::new()
        .k(shared.k)?
        .threads(shared.threads)
        .sort(shared.sort)
        .bootstrap_iters(shared.bootstrap_iters)
        .bootstrap_sample(shared.bootstrap_sample)?
        .seed(shared.seed)
        .build();

    let data = Api::count(
        &shared.path,
        resolve_file_type(shared.input_format),
        &opts,
        !shared.use_u,
    )?;
    print_warnings(&data);
    output_rows(&data, shared.format)
}

fn run_enrichment(args: EnrichmentArgs) -> Result<(), KnockmerError> {
    let shared = args.shared;
    print_preamble(&shared, "enrichment");

    let opts = OptionsBuilder::new()
        .k(shared.k)?
        .threads(shared.threads)
        .normalize(shared.normalize)
        .sort(shared.sort)
        .bootstrap_iters(shared.bootstrap_iters)
        .bootstrap_sample(shared.bootstrap_sample)?
        .seed(shared.seed)
        .prob_algo(args.prob_algo.into())
        .prob_ntprec(args.prob_ntprec)
        .build();

    let data = Api::enrichment(
        &shared.path,
        resolve_file_type(shared.input_format),
        args.control.as_ref(),
        None, // control format is auto-detected independently of the test file
        &opts,
        !shared.use_u,
    )?;
    print_warnings(&data);
    output_rows(&data, shared.format)
}

fn run_ikke(args: IkkeArgs) -> Result<(), KnockmerError> {
    let shared = args.shared;
    print_preamble(&shared, "ikke");

    let opts = OptionsBuilder::new()
        .k(shared.k)?
        .iters(args.iters)?
        .threads(shared.threads)
        .normalize(shared.normalize)
        .sort(shared.sort)
        .seed(shared.seed)
        .prob_algo(args.prob_algo.into())
        .prob_ntprec(args.prob_ntprec)
        .build();

    let data = Api::ikke(
        &shared.path,
        resolve_file_type(shared.input_format),
        args.control.as_ref(),
        None,
        &opts,
        !shared.use_u,
    )?;
    print_warnings(&data);
    output_rows(&data, shared.format)
}

fn print_warnings(data: &KmerData) {
    for w in &data.warnings {
        eprintln!("{}: {}", "warning".yellow().bold(), w.yellow());
    }
}

/// A row shaped for JSON serialization; only the columns spec.md §6 says are
/// present for this call are included (`stdev`/`pval` are `None` otherwise,
/// and `serde`'s `skip_serializing_if` drops them from the object).
#[derive(Serialize)]
struct JsonRow {
    kmer: String,
    score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pval: Option<f64>,
}

impl From<&KmerRow> for JsonRow {
    fn from(row: &KmerRow) -> Self {
        Self {
            kmer: row.kmer.clone(),
            score: row.score,
            count: row.count,
            stdev: row.stdev,
            pval: row.pval,
        }
    }
}

fn output_rows(data: &KmerData, format: OutputFormat) -> Result<(), KnockmerError> {
    use std::io::{stdout, BufWriter, Write};

    let mut buf = BufWriter::new(stdout());
    match format {
        OutputFormat::Fasta => {
            for row in &data.rows {
                writeln!(buf, ">{}\n{}", row.score, row.kmer).ok();
            }
        }
        OutputFormat::Tsv => {
            for row in &data.rows {
                let mut line = format!("{}\t{}", row.kmer, row.score);
                if let Some(stdev) = row.stdev {
                    line.push_str(&format!("\t{stdev}"));
                }
                if let Some(pval) = row.pval {
                    line.push_str(&format!("\t{pval}"));
                }
                writeln!(buf, "{line}").ok();
            }
        }
        OutputFormat::Json => {
            let json_rows: Vec<JsonRow> = data.rows.iter().map(JsonRow::from).collect();
            serde_json::to_writer_pretty(&mut buf, &json_rows)
                .map_err(|e| KnockmerError::AllocationFailed {
                    details: e.to_string(),
                })?;
            writeln!(buf).ok();
        }
    }
    buf.flush().map_err(|source| KnockmerError::ReadFailed {
        source,
        path: "<stdout>".into(),
    })?;
    Ok(())
}
