//! Validated entry points dispatching across the count/enrichment/ikke x
//! bootstrap x `prob_algo` matrix (spec.md §4.H).
//!
//! `Api::count`, `Api::enrichment`, and `Api::ikke` are the only things a
//! library consumer — the out-of-scope logo subsystem, dataset bundles, or
//! scripting-host bindings named in spec.md §1 — should ever call; none of
//! them touch `SeqStream`/`RollingHasher`/`KmerTable` directly.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::alphabet::unhash_to_string;
use crate::bootstrap::BootstrapEngine;
use crate::counter::Counter;
use crate::detector::detect;
use crate::enrichment::EnrichmentEngine;
use crate::error::KnockmerError;
use crate::options::{Options, ProbAlgo};
use crate::seqstream::FileType;
use crate::shuffler::Shuffler;
use crate::table::KmerTable;

/// One emitted row: spec.md §3 `KmerData` entry.
#[derive(Debug, Clone)]
pub struct KmerRow {
    pub kmer_hash: u32,
    pub kmer: String,
    pub score: f64,
    pub count: Option<u32>,
    pub stdev: Option<f64>,
    pub pval: Option<f64>,
}

/// The core's output: an ordered row set plus any non-fatal diagnostics
/// (spec.md §4.H "opt-in diagnostic channel").
#[derive(Debug, Clone, Default)]
pub struct KmerData {
    pub rows: Vec<KmerRow>,
    pub warnings: Vec<String>,
}

/// The `count`/`enrichment`/`ikke` entry points.
pub struct Api;

impl Api {
    /// Plain counting, with optional bootstrap. `use_t` selects 'T' vs 'U'
    /// in emitted k-mer strings (spec.md §6 host-bindings option).
    pub fn count(
        path: impl AsRef<Path>,
        file_type_hint: Option<FileType>,
        opts: &Options,
        use_t: bool,
    ) -> Result<KmerData, KnockmerError> {
        let mut warnings = Vec::new();
        let file_type = resolve_file_type(&path, file_type_hint)?;

        if opts.bootstrap_iters > 0 {
            let agg = BootstrapEngine::count(
                &path,
                file_type,
                opts.k,
                opts.clamped_threads(),
                opts.bootstrap_iters,
                opts.bootstrap_sample,
                resolve_seed(opts.seed),
            )?;
            let mut rows: Vec<KmerRow> = agg
                .into_iter()
                .map(|(hash, w)| KmerRow {
                    kmer_hash: hash,
                    kmer: kmer_string(hash, opts.k, use_t),
                    score: w.mean(),
                    count: None,
                    stdev: Some(w.stdev()),
                    pval: None,
                })
                .collect();
            sort_if_requested(&mut rows, opts.sort);
            return Ok(KmerData { rows, warnings });
        }

        let table = Counter::count(&path, file_type, opts.k, opts.clamped_threads())?;
        if opts.prob_algo != ProbAlgo::None {
            warnings.push(format!(
                "prob_algo {:?} is ignored for algorithm=count",
                opts.prob_algo
            ));
        }
        let mut rows = table_to_rows(&table, opts.k, use_t);
        sort_if_requested(&mut rows, opts.sort);
        Ok(KmerData { rows, warnings })
    }

    /// Enrichment against a control corpus or a probabilistic background,
    /// depending on `opts.prob_algo` (spec.md §3, §4.F, §9.2's preserved
    /// `0=none,1=ushuffle,2=regular,3=both` mapping).
    pub fn enrichment(
        test_path: impl AsRef<Path>,
        test_hint: Option<FileType>,
        control_path: Option<impl AsRef<Path>>,
        control_hint: Option<FileType>,
        opts: &Options,
        use_t: bool,
    ) -> Result<KmerData, KnockmerError> {
        let mut warnings = Vec::new();
        let test_ft = resolve_file_type(&test_path, test_hint)?;

        if opts.bootstrap_iters > 0 {
            return Self::enrichment_bootstrap(
                test_path,
                test_ft,
                control_path,
                control_hint,
                opts,
                use_t,
                &mut warnings,
            );
        }

        match opts.prob_algo {
            ProbAlgo::None => {
                let Some(control_path) = control_path else {
                    return Err(KnockmerError::MissingControl);
                };
                let control_ft = resolve_file_type(&control_path, control_hint)?;
                let test_table =
                    Counter::count(&test_path, test_ft, opts.k, opts.clamped_threads())?;
                let control_table =
                    Counter::count(&control_path, control_ft, opts.k, opts.clamped_threads())?;
                let rows =
                    EnrichmentEngine::enrichment(&test_table, &control_table, opts.normalize)?;
                let mut rows = enrichment_rows_to_kmer_rows(rows, opts.k, use_t);
                sort_if_requested(&mut rows, opts.sort);
                Ok(KmerData { rows, warnings })
            }
            ProbAlgo::Regular | ProbAlgo::Ushuffle | ProbAlgo::Both => {
                if control_path.is_some() {
                    warnings.push(
                        "a control file was supplied together with a probabilistic prob_algo; the control file is ignored"
                            .to_string(),
                    );
                }
                let rows = Self::prob_background_rows(&test_path, test_ft, opts)?;
                let mut rows = enrichment_rows_to_kmer_rows(rows, opts.k, use_t);
                sort_if_requested(&mut rows, opts.sort);
                Ok(KmerData { rows, warnings })
            }
        }
    }

    /// IKKE (spec.md §4.F "IKKE"): iteratively masks the previous row's top
    /// motif and recounts before computing the next row, for either a
    /// control corpus or a probabilistic background.
    pub fn ikke(
        test_path: impl AsRef<Path>,
        test_hint: Option<FileType>,
        control_path: Option<impl AsRef<Path>>,
        control_hint: Option<FileType>,
        opts: &Options,
        use_t: bool,
    ) -> Result<KmerData, KnockmerError> {
        let mut warnings = Vec::new();
        let test_ft = resolve_file_type(&test_path, test_hint)?;
        let threads = opts.clamped_threads();

        let rows = match opts.prob_algo {
            ProbAlgo::None => {
                let Some(control_path) = control_path else {
                    return Err(KnockmerError::MissingControl);
                };
                let control_ft = resolve_file_type(&control_path, control_hint)?;
                EnrichmentEngine::ikke_control(
                    &test_path,
                    test_ft,
                    &control_path,
                    control_ft,
                    opts.k,
                    opts.iters,
                    threads,
                )?
            }
            ProbAlgo::Regular | ProbAlgo::Ushuffle | ProbAlgo::Both => {
                if control_path.is_some() {
                    warnings.push(
                        "a control file was supplied together with a probabilistic prob_algo; the control file is ignored"
                            .to_string(),
                    );
                }
                EnrichmentEngine::ikke_prob(
                    &test_path,
                    test_ft,
                    opts.k,
                    opts.effective_ntprec(),
                    opts.iters,
                    threads,
                )?
            }
        };

        let rows = enrichment_rows_to_kmer_rows(rows, opts.k, use_t);
        // IKKE rows already come out in discovery order (row 0 is the
        // strongest motif); `sort` would just confirm that ordering since
        // scores are monotonically non-increasing by construction, but we
        // still honor an explicit request for consistency with the other entry points.
        let mut rows = rows;
        sort_if_requested(&mut rows, opts.sort);
        Ok(KmerData { rows, warnings })
    }

    fn enrichment_bootstrap(
        test_path: impl AsRef<Path>,
        test_ft: FileType,
        control_path: Option<impl AsRef<Path>>,
        control_hint: Option<FileType>,
        opts: &Options,
        use_t: bool,
        warnings: &mut Vec<String>,
    ) -> Result<KmerData, KnockmerError> {
        if opts.prob_algo != ProbAlgo::None {
            warnings.push(
                "bootstrap is only implemented against a control corpus; prob_algo is ignored"
                    .to_string(),
            );
        }
        let Some(control_path) = control_path else {
            return Err(KnockmerError::MissingControl);
        };
        let control_ft = resolve_file_type(&control_path, control_hint)?;
        let rows = BootstrapEngine::enrichment(
            &test_path,
            test_ft,
            &control_path,
            control_ft,
            opts.k,
            opts.clamped_threads(),
            opts.normalize,
            opts.bootstrap_iters,
            opts.bootstrap_sample,
            resolve_seed(opts.seed),
        )?;
        let mut rows: Vec<KmerRow> = rows
            .into_iter()
            .map(|r| KmerRow {
                kmer_hash: r.hash,
                kmer: kmer_string(r.hash, opts.k, use_t),
                score: r.mean,
                count: None,
                stdev: Some(r.stdev),
                pval: Some(r.pval),
            })
            .collect();
        sort_if_requested(&mut rows, opts.sort);
        Ok(KmerData {
            rows,
            warnings: std::mem::take(warnings),
        })
    }

    fn prob_background_rows(
        test_path: impl AsRef<Path>,
        test_ft: FileType,
        opts: &Options,
    ) -> Result<Vec<crate::enrichment::EnrichmentRow>, KnockmerError> {
        let threads = opts.clamped_threads();
        let test_table = Counter::count(&test_path, test_ft, opts.k, threads)?;
        let mono = Counter::count(&test_path, test_ft, 1, threads)?;
        let di = Counter::count(&test_path, test_ft, 2, threads)?;

        match opts.prob_algo {
            ProbAlgo::Regular => {
                EnrichmentEngine::enrichment_prob(&test_table, &mono, &di, opts.normalize)
            }
            ProbAlgo::Ushuffle => {
                let shuffled = shuffle_background_table(&test_path, test_ft, opts, threads)?;
                EnrichmentEngine::enrichment(&test_table, &shuffled, opts.normalize)
            }
            ProbAlgo::Both => {
                let regular = EnrichmentEngine::enrichment_prob(&test_table, &mono, &di, opts.normalize)?;
                let shuffled_table = shuffle_background_table(&test_path, test_ft, opts, threads)?;
                let shuffled = EnrichmentEngine::enrichment(&test_table, &shuffled_table, opts.normalize)?;
                Ok(merge_both(regular, shuffled))
            }
            ProbAlgo::None => unreachable!("caller only dispatches here for Regular/Ushuffle/Both"),
        }
    }
}

/// Counts a k-let-preserving-shuffled background corpus derived from the
/// test file, used by `prob_algo=ushuffle` as the "control" table.
fn shuffle_background_table(
    test_path: impl AsRef<Path>,
    test_ft: FileType,
    opts: &Options,
    threads: usize,
) -> Result<KmerTable, KnockmerError> {
    let _ = Shuffler::new(1); // pass-entry reset convention, spec.md §4.E'.
    Counter::count_shuffled(
        test_path,
        test_ft,
        opts.k,
        threads,
        crate::counter::ShuffleSpec {
            klet: opts.effective_ntprec(),
            seed: 1,
        },
    )
}

/// Averages the regular and ushuffle r-values slot-by-slot for `prob_algo=both`.
fn merge_both(
    regular: Vec<crate::enrichment::EnrichmentRow>,
    shuffled: Vec<crate::enrichment::EnrichmentRow>,
) -> Vec<crate::enrichment::EnrichmentRow> {
    regular
        .into_iter()
        .zip(shuffled)
        .map(|(a, b)| crate::enrichment::EnrichmentRow {
            hash: a.hash,
            r: match (a.r.is_nan(), b.r.is_nan()) {
                (true, true) => f64::NAN,
                (true, false) => b.r,
                (false, true) => a.r,
                (false, false) => (a.r + b.r) / 2.0,
            },
        })
        .collect()
}

fn resolve_file_type(
    path: impl AsRef<Path>,
    hint: Option<FileType>,
) -> Result<FileType, KnockmerError> {
    match hint {
        Some(ft) => Ok(ft),
        None => detect(path),
    }
}

/// Resolves `Options::seed` (spec.md §3: "negative ⇒ time-based") into a
/// concrete seed every bootstrap sub-seed derives from. A non-negative seed
/// is used as-is; a negative one is replaced by the current time, so two
/// runs with a negative seed are independent while a fixed non-negative seed
/// stays reproducible.
fn resolve_seed(seed: i64) -> i64 {
    if seed >= 0 {
        return seed;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    let seed = nanos as i64;
    seed
}

fn kmer_string(hash: u32, k: usize, use_t: bool) -> String {
    let s = unhash_to_string(hash, k);
    if use_t {
        s
    } else {
        s.replace('T', "U")
    }
}

fn table_to_rows(table: &KmerTable, k: usize, use_t: bool) -> Vec<KmerRow> {
    (0..table.len() as u32)
        .map(|h| {
            #[allow(clippy::cast_possible_truncation)]
            let count: u32 = table.get_by_hash(h).unwrap_or(0);
            KmerRow {
                kmer_hash: h,
                kmer: kmer_string(h, k, use_t),
                score: f64::from(count),
                count: Some(count),
                stdev: None,
                pval: None,
            }
        })
        .collect()
}

fn enrichment_rows_to_kmer_rows(
    rows: Vec<crate::enrichment::EnrichmentRow>,
    k: usize,
    use_t: bool,
) -> Vec<KmerRow> {
    rows.into_iter()
        .map(|r| KmerRow {
            kmer_hash: r.hash,
            kmer: kmer_string(r.hash, k, use_t),
            score: r.r,
            count: None,
            stdev: None,
            pval: None,
        })
        .collect()
}

/// Sorts rows by descending `score`, sinking NaN to the end, with a stable
/// tie-break on ascending hash (spec.md §8 invariant 8).
fn sort_if_requested(rows: &mut [KmerRow], sort: bool) {
    if !sort {
        return;
    }
    rows.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
        (true, true) => a.kmer_hash.cmp(&b.kmer_hash),
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => b
            .score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.kmer_hash.cmp(&b.kmer_hash)),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OptionsBuilder;
    use std::io::Write;

    fn write_temp(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn count_row_count_matches_capacity() {
        let f = write_temp(&b"AAAA\n".repeat(10));
        let opts = OptionsBuilder::new().k(2).unwrap().build();
        let data = Api::count(f.path(), Some(FileType::Raw), &opts, true).unwrap();
        assert_eq!(data.rows.len(), 16);
        let aa = data.rows.iter().find(|r| r.kmer == "AA").unwrap();
        assert_eq!(aa.count, Some(30));
    }

    #[test]
    fn count_use_t_false_renders_u() {
        let f = write_temp(&b"TTTT\n".repeat(4));
        let opts = OptionsBuilder::new().k(2).unwrap().build();
        let data = Api::count(f.path(), Some(FileType::Raw), &opts, false).unwrap();
        assert!(data.rows.iter().any(|r| r.kmer == "UU"));
    }

    #[test]
    fn enrichment_requires_control_without_prob_algo() {
        let f = write_temp(b"ACGT\n");
        let opts = OptionsBuilder::new().k(2).unwrap().build();
        let no_control: Option<&Path> = None;
        let result = Api::enrichment(f.path(), Some(FileType::Raw), no_control, None, &opts, true);
        assert!(matches!(result, Err(KnockmerError::MissingControl)));
    }

    #[test]
    fn enrichment_sorted_is_non_increasing() {
        let test = write_temp(&b"AAAA\n".repeat(40));
        let control = write_temp(&b"TTTT\n".repeat(40));
        let opts = OptionsBuilder::new().k(2).unwrap().sort(true).build();
        let data = Api::enrichment(
            test.path(),
            Some(FileType::Raw),
            Some(control.path()),
            Some(FileType::Raw),
            &opts,
            true,
        )
        .unwrap();
        let scores: Vec<f64> = data.rows.iter().map(|r| r.score).collect();
        let finite: Vec<f64> = scores.iter().copied().filter(|s| !s.is_nan()).collect();
        for w in finite.windows(2) {
            assert!(w[0] >= w[1]);
        }
        // NaNs sink to the end.
        let first_nan = scores.iter().position(|s| s.is_nan());
        if let Some(idx) = first_nan {
            assert!(scores[idx..].iter().all(|s| s.is_nan()));
        }
    }

    #[test]
    fn ikke_row_count_is_min_iters_and_capacity() {
        let mut data = Vec::new();
        for i in 0..300 {
            data.extend_from_slice(format!("GCATGACGTACGTTT{i}\n").as_bytes());
        }
        let test = write_temp(&data);
        let control = write_temp(&b"ACGTACGTACGTACGT\n".repeat(300));
        let opts = OptionsBuilder::new().k(5).unwrap().iters(3).unwrap().build();
        let result = Api::ikke(
            test.path(),
            Some(FileType::Raw),
            Some(control.path()),
            Some(FileType::Raw),
            &opts,
            true,
        )
        .unwrap();
        assert_eq!(result.rows.len(), 3);
    }

    #[test]
    fn count_with_prob_algo_warns_and_is_ignored() {
        let f = write_temp(b"ACGT\n");
        let opts = OptionsBuilder::new()
            .k(2)
            .unwrap()
            .prob_algo(ProbAlgo::Regular)
            .build();
        let data = Api::count(f.path(), Some(FileType::Raw), &opts, true).unwrap();
        assert!(!data.warnings.is_empty());
    }

    #[test]
    fn resolve_seed_passes_nonnegative_through_unchanged() {
        assert_eq!(resolve_seed(0), 0);
        assert_eq!(resolve_seed(42), 42);
    }

    #[test]
    fn resolve_seed_derives_distinct_values_for_negative_seed() {
        let a = resolve_seed(-1);
        let b = resolve_seed(-1);
        assert!(a > 0);
        assert!(b > 0);
        assert_ne!(a, b, "two time-derived seeds should not collide");
    }

    #[test]
    fn bootstrap_count_with_negative_seed_is_not_reproducible_across_calls() {
        let data = b"ACGTACGTACGT\n".repeat(300);
        let f1 = write_temp(&data);
        let f2 = write_temp(&data);
        let opts = OptionsBuilder::new()
            .k(2)
            .unwrap()
            .bootstrap_iters(3)
            .bootstrap_sample(50_000)
            .unwrap()
            .seed(-1)
            .build();
        let a = Api::count(f1.path(), Some(FileType::Raw), &opts, true).unwrap();
        let b = Api::count(f2.path(), Some(FileType::Raw), &opts, true).unwrap();
        let any_differs = a
            .rows
            .iter()
            .zip(b.rows.iter())
            .any(|(ra, rb)| ra.score.to_bits() != rb.score.to_bits());
        assert!(any_differs, "time-derived seeds should not reproduce the same subsample");
    }
}
