//! Orchestrates counting passes over [`SeqStream`] + [`RollingHasher`] +
//! [`KmerTable`] (spec.md §4.E), including bootstrap subsampling and
//! shuffle-based counting (§4.E').
//!
//! The multi-threaded pass is an explicit producer/worker loop over
//! `std::thread::scope` rather than a `rayon` data-parallel iterator: spec.md
//! §5 calls for "parallel OS threads (not cooperative)" pulling chunks on
//! demand through one stream mutex, which is a producer/worker shape, not a
//! map over a known-length collection (that shape belongs to
//! [`EnrichmentEngine`](crate::enrichment), which does use `rayon`).

use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
#[cfg(feature = "tracing")]
use tracing::{debug, info, info_span};

use crate::alphabet::is_nucleotide;
use crate::error::KnockmerError;
use crate::hasher::RollingHasher;
use crate::seqstream::{FileType, SeqStream};
use crate::shuffler::Shuffler;
use crate::table::KmerTable;

/// How many bytes a worker asks for per record-respecting read.
const READ_CHUNK: usize = 64 * 1024;
/// Local per-worker batch size before flushing into the shared table
/// (spec.md §4.E: "each worker owns a 250,000-slot local batch").
const BATCH_SIZE: usize = 250_000;

/// Reproducible per-pass subsampling parameters (spec.md "Bootstrap subsample").
#[derive(Debug, Clone, Copy)]
pub struct SubsampleSpec {
    /// Keep-probability numerator in milli-percent, `[1, 100000]`.
    pub sample_milli_percent: u32,
    pub seed: u64,
}

/// Reproducible per-pass shuffle-counting parameters (spec.md "Shuffle counting").
#[derive(Debug, Clone, Copy)]
pub struct ShuffleSpec {
    pub klet: usize,
    pub seed: u64,
}

/// A file-plus-RNG producer shared by every worker thread. Reading the next
/// chunk and deciding which of its records survive subsampling happen
/// together while the stream's lock is held, so the resulting keep/drop
/// decisions depend only on file order, never on worker scheduling —
/// spec.md's "one seed ⇒ one deterministic KmerTable up to ordering".
struct SharedReader {
    stream: Mutex<SeqStream>,
    subsample: Option<Mutex<StdRng>>,
}

impl SharedReader {
    fn open(path: impl AsRef<Path>, file_type: FileType, subsample: Option<SubsampleSpec>) -> Result<Self, KnockmerError> {
        Ok(Self {
            stream: Mutex::new(SeqStream::open(path, file_type)?),
            subsample: subsample.map(|s| Mutex::new(StdRng::seed_from_u64(s.seed))),
        })
    }

    /// Pulls the next chunk of complete records, already mask- and
    /// subsample-filtered. Returns `None` at end of stream.
    fn next_chunk(&self, file_type: FileType, sample_milli_percent: Option<u32>) -> Result<Option<Vec<u8>>, KnockmerError> {
        let mut stream = self.stream.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut buf = Vec::with_capacity(READ_CHUNK);
        let n = match file_type {
            FileType::Fasta => stream.aread(&mut buf)?,
            FileType::Fastq => stream.qread(&mut buf)?,
            FileType::Raw | FileType::Unknown => stream.sread(&mut buf)?,
        };
        if n == 0 {
            return Ok(None);
        }
        if let (Some(rng_lock), Some(pct)) = (&self.subsample, sample_milli_percent) {
            let mut rng = rng_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            buf = filter_records(&buf, file_type, pct, &mut rng);
        }
        Ok(Some(buf))
    }
}

/// Keeps each record of `chunk` independently with probability
/// `pct / 100000`, drawing from `rng` in file order.
fn filter_records(chunk: &[u8], file_type: FileType, pct: u32, rng: &mut StdRng) -> Vec<u8> {
    let boundaries = record_boundaries(chunk, file_type);
    let mut out = Vec::with_capacity(chunk.len());
    for w in 0..boundaries.len() {
        let start = boundaries[w];
        let end = boundaries.get(w + 1).copied().unwrap_or(chunk.len());
        let keep = rng.gen_range(0..100_000) < pct;
        if keep {
            out.extend_from_slice(&chunk[start..end]);
        }
    }
    out
}

/// Byte offsets where each record of `chunk` begins, given its framing.
fn record_boundaries(chunk: &[u8], file_type: FileType) -> Vec<usize> {
    let starts = line_starts(chunk);
    match file_type {
        FileType::Raw | FileType::Unknown => starts,
        FileType::Fasta => starts
            .into_iter()
            .filter(|&i| chunk.get(i).copied() == Some(b'>') || chunk.get(i).copied() == Some(b';'))
            .collect(),
        FileType::Fastq => starts.into_iter().step_by(4).collect(),
    }
}

fn line_starts(buf: &[u8]) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (i, &b) in buf.iter().enumerate() {
        if b == b'\n' && i + 1 < buf.len() {
            starts.push(i + 1);
        }
    }
    starts
}

/// Replaces every masked k-mer string's occurrences in `chunk` with `'X'`
/// (case-insensitive, U treated as T), allowing overlapping masked and
/// unmasked k-mers to survive per spec.md invariant 5.
fn mask_chunk(chunk: &mut [u8], masked: &[Vec<u8>]) {
    for needle in masked {
        if needle.is_empty() || needle.len() > chunk.len() {
            continue;
        }
        let mut i = 0;
        while i + needle.len() <= chunk.len() {
            let matched = needle.iter().enumerate().all(|(j, &nb)| {
                bases_equal(chunk[i + j], nb)
            });
            if matched {
                for b in &mut chunk[i..i + needle.len()] {
                    *b = b'X';
                }
            }
            i += 1;
        }
    }
}

fn bases_equal(a: u8, b: u8) -> bool {
    match (a.to_ascii_uppercase(), b.to_ascii_uppercase()) {
        (x, y) if x == y => true,
        (b'U', b'T') | (b'T', b'U') => true,
        _ => false,
    }
}

/// Rewrites `chunk` in place so every nucleotide byte is replaced by a
/// k-let-preserving shuffle of the nucleotide stream extracted from the same
/// record, scattered back into the original nucleotide positions. Framing
/// bytes (headers, `+` lines, newlines, quality scores) are left untouched,
/// which both preserves length and keeps this uniform across Raw/FASTA/FASTQ.
fn shuffle_chunk(chunk: &mut [u8], file_type: FileType, klet: usize, shuffler: &mut Shuffler) {
    let boundaries = record_boundaries(chunk, file_type);
    for w in 0..boundaries.len() {
        let start = boundaries[w];
        let end = boundaries.get(w + 1).copied().unwrap_or(chunk.len());
        let record = &chunk[start..end];
        let positions: Vec<usize> = record
            .iter()
            .enumerate()
            .filter(|&(_, &b)| is_nucleotide(b))
            .map(|(i, _)| i)
            .collect();
        if positions.is_empty() {
            continue;
        }
        let bytes: Vec<u8> = positions.iter().map(|&i| record[i]).collect();
        let shuffled = shuffler.shuffle(&bytes, klet);
        for (&i, b) in positions.iter().zip(shuffled) {
            chunk[start + i] = b;
        }
    }
}

/// Orchestrates single- and multi-threaded counting passes.
pub struct Counter;

impl Counter {
    /// An ordinary counting pass: opens `path`, hashes every k-mer, returns a
    /// freshly allocated table. Respects any masks already on a table by
    /// using [`Self::recount`] instead when re-running after IKKE masking.
    pub fn count(
        path: impl AsRef<Path>,
        file_type: FileType,
        k: usize,
        threads: usize,
    ) -> Result<KmerTable, KnockmerError> {
        let table = KmerTable::new(k);
        Self::run(&table, path, file_type, threads, None, None)?;
        Ok(table)
    }

    /// Recount pass used by IKKE (spec.md §4.E "Recount pass"): clears the
    /// table's slots, pushes `new_mask` onto the cumulative masked list, then
    /// reruns an ordinary counting pass with every accumulated mask applied.
    pub fn recount(
        table: &KmerTable,
        path: impl AsRef<Path>,
        file_type: FileType,
        new_mask: &str,
        threads: usize,
    ) -> Result<(), KnockmerError> {
        table.clear();
        table.mask_push(new_mask);
        Self::run(table, path, file_type, threads, None, None)
    }

    /// Bootstrap subsample counting pass: each record is kept independently
    /// with probability `spec.sample_milli_percent / 100000`.
    pub fn count_bootstrap(
        path: impl AsRef<Path>,
        file_type: FileType,
        k: usize,
        threads: usize,
        spec: SubsampleSpec,
    ) -> Result<KmerTable, KnockmerError> {
        let table = KmerTable::new(k);
        Self::run(&table, path, file_type, threads, Some(spec), None)?;
        Ok(table)
    }

    /// Shuffle-counting pass: every record's nucleotide stream is replaced by
    /// a k-let-preserving shuffle before hashing (spec.md §4.E "Shuffle
    /// counting. As single-threaded."). The shuffle RNG is seeded fresh
    /// (conventionally `1`) at pass entry so the shuffled corpus is
    /// reproducible; `run` pins this pass to a single worker regardless of
    /// the `threads` argument, since splitting records across workers would
    /// make which record draws from the shuffler's RNG stream depend on
    /// scheduling, not file order.
    pub fn count_shuffled(
        path: impl AsRef<Path>,
        file_type: FileType,
        k: usize,
        threads: usize,
        spec: ShuffleSpec,
    ) -> Result<KmerTable, KnockmerError> {
        let table = KmerTable::new(k);
        Self::run(&table, path, file_type, threads, None, Some(spec))?;
        Ok(table)
    }

    fn run(
        table: &KmerTable,
        path: impl AsRef<Path>,
        file_type: FileType,
        threads: usize,
        subsample: Option<SubsampleSpec>,
        shuffle: Option<ShuffleSpec>,
    ) -> Result<(), KnockmerError> {
        #[cfg(feature = "tracing")]
        info!(k = table.k(), threads = threads, "Starting counting pass");
        #[cfg(feature = "tracing")]
        let _pass_span = info_span!("counting_pass", k = table.k()).entered();

        let reader = SharedReader::open(path, file_type, subsample)?;
        let masked_strings = table.masked();
        let masked_bases: Vec<Vec<u8>> = masked_strings.into_iter().map(String::into_bytes).collect();
        let k = table.k();
        // Shuffle counting is single-threaded (spec.md §4.E): each worker
        // would otherwise own an independent shuffler RNG, making the
        // shuffled corpus depend on how records happen to be scheduled.
        let n_threads = if shuffle.is_some() {
            1
        } else {
            threads.clamp(1, 128)
        };
        let sample_pct = subsample.map(|s| s.sample_milli_percent);
        let shuffler_seed = shuffle.map(|s| s.seed);
        let klet = shuffle.map(|s| s.klet);

        let errors: Mutex<Vec<KnockmerError>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(n_threads);
            for _ in 0..n_threads {
                let masked_bases = masked_bases.clone();
                let errors = &errors;
                let reader = &reader;
                handles.push(scope.spawn(move || {
                    let mut hasher = RollingHasher::new(k, file_type);
                    let mut shuffler = shuffler_seed.map(Shuffler::new);
                    let mut batch = Vec::with_capacity(BATCH_SIZE);
                    loop {
                        match reader.next_chunk(file_type, sample_pct) {
                            Ok(None) => break,
                            Ok(Some(mut chunk)) => {
                                if !masked_bases.is_empty() {
                                    mask_chunk(&mut chunk, &masked_bases);
                                }
                                if let (Some(klet), Some(shuffler)) = (klet, shuffler.as_mut()) {
                                    shuffle_chunk(&mut chunk, file_type, klet, shuffler);
                                }
                                hasher.set_seq(&chunk);
                                while let Some(h) = hasher.next_hash() {
                                    batch.push(h);
                                    if batch.len() >= BATCH_SIZE {
                                        #[cfg(feature = "tracing")]
                                        debug!(batch_len = batch.len(), "Flushing worker batch into table");
                                        table.increment_batch(&batch);
                                        batch.clear();
                                    }
                                }
                            }
                            Err(e) => {
                                errors.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(e);
                                break;
                            }
                        }
                    }
                    if !batch.is_empty() {
                        table.increment_batch(&batch);
                    }
                }));
            }
            for h in handles {
                let _ = h.join();
            }
        });

        let mut errors = errors.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(e) = errors.pop() {
            return Err(e);
        }
        #[cfg(feature = "tracing")]
        info!(total = table.total(), "Counting pass complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn counts_raw_repeated_lines() {
        let data = b"AAAA\n".repeat(10);
        let f = write_temp(&data);
        let table = Counter::count(f.path(), FileType::Raw, 2, 1).unwrap();
        assert_eq!(table.get_by_string::<u64>("AA").unwrap(), 30);
        assert_eq!(table.total(), 30);
    }

    #[test]
    fn single_and_multi_thread_counts_match() {
        let mut data = Vec::new();
        for i in 0..2000 {
            data.extend_from_slice(format!("ACGTACGTACGT{i}\n").as_bytes());
        }
        let f1 = write_temp(&data);
        let f2 = write_temp(&data);
        let single = Counter::count(f1.path(), FileType::Raw, 3, 1).unwrap();
        let multi = Counter::count(f2.path(), FileType::Raw, 3, 4).unwrap();
        assert_eq!(single.total(), multi.total());
        for h in 0..single.len() as u32 {
            assert_eq!(
                single.get_by_hash::<u64>(h).unwrap(),
                multi.get_by_hash::<u64>(h).unwrap(),
                "hash {h}"
            );
        }
    }

    #[test]
    fn fasta_multiline_record_counts_across_wrap() {
        let f = write_temp(b">h\nACGT\nACGT\n");
        let table = Counter::count(f.path(), FileType::Fasta, 2, 1).unwrap();
        assert_eq!(table.get_by_string::<u64>("AC").unwrap(), 2);
        assert_eq!(table.get_by_string::<u64>("CG").unwrap(), 2);
        assert_eq!(table.get_by_string::<u64>("GT").unwrap(), 2);
        assert_eq!(table.get_by_string::<u64>("TA").unwrap(), 1);
    }

    #[test]
    fn fastq_quality_line_not_counted() {
        let f = write_temp(b"@r1\nACGT\n+\n@@@@\n");
        let table = Counter::count(f.path(), FileType::Fastq, 2, 1).unwrap();
        // quality "@@@@" contains no nucleotides; only "ACGT" contributes.
        assert_eq!(table.total(), 3);
    }

    #[test]
    fn recount_zeroes_masked_kmer_and_keeps_cumulative_masks() {
        let f = write_temp(b"AAAACCCCAAAA\n");
        let table = KmerTable::new(2);
        Counter::recount(&table, f.path(), FileType::Raw, "AA", 1).unwrap();
        assert_eq!(table.get_by_string::<u64>("AA").unwrap(), 0);
        assert_eq!(table.masked(), vec!["AA".to_string()]);
    }

    #[test]
    fn bootstrap_sample_full_matches_plain_count() {
        let data = b"AAAA\n".repeat(20);
        let f1 = write_temp(&data);
        let f2 = write_temp(&data);
        let plain = Counter::count(f1.path(), FileType::Raw, 2, 1).unwrap();
        let boot = Counter::count_bootstrap(
            f2.path(),
            FileType::Raw,
            2,
            1,
            SubsampleSpec {
                sample_milli_percent: 100_000,
                seed: 42,
            },
        )
        .unwrap();
        assert_eq!(plain.total(), boot.total());
    }

    #[test]
    fn bootstrap_same_seed_is_deterministic() {
        let data = b"ACGTACGT\n".repeat(200);
        let f1 = write_temp(&data);
        let f2 = write_temp(&data);
        let a = Counter::count_bootstrap(
            f1.path(),
            FileType::Raw,
            3,
            4,
            SubsampleSpec {
                sample_milli_percent: 25_000,
                seed: 7,
            },
        )
        .unwrap();
        let b = Counter::count_bootstrap(
            f2.path(),
            FileType::Raw,
            3,
            4,
            SubsampleSpec {
                sample_milli_percent: 25_000,
                seed: 7,
            },
        )
        .unwrap();
        assert_eq!(a.total(), b.total());
        for h in 0..a.len() as u32 {
            assert_eq!(a.get_by_hash::<u64>(h).unwrap(), b.get_by_hash::<u64>(h).unwrap());
        }
    }

    #[test]
    fn shuffled_counting_preserves_total() {
        let data = b"ACGTACGTACGTACGT\n".repeat(50);
        let f1 = write_temp(&data);
        let f2 = write_temp(&data);
        let plain = Counter::count(f1.path(), FileType::Raw, 3, 1).unwrap();
        let shuffled = Counter::count_shuffled(
            f2.path(),
            FileType::Raw,
            3,
            1,
            ShuffleSpec { klet: 2, seed: 1 },
        )
        .unwrap();
        assert_eq!(plain.total(), shuffled.total());
    }

    #[test]
    fn shuffled_counting_is_deterministic_regardless_of_requested_threads() {
        let data = b"ACGTACGTACGTGGCTATAGACGT\n".repeat(80);
        let f1 = write_temp(&data);
        let f2 = write_temp(&data);
        // `threads` is forwarded but the shuffle pass must pin itself to a
        // single worker, so requesting 1 vs 8 must produce bit-identical tables.
        let single = Counter::count_shuffled(
            f1.path(),
            FileType::Raw,
            3,
            1,
            ShuffleSpec { klet: 2, seed: 7 },
        )
        .unwrap();
        let many = Counter::count_shuffled(
            f2.path(),
            FileType::Raw,
            3,
            8,
            ShuffleSpec { klet: 2, seed: 7 },
        )
        .unwrap();
        assert_eq!(single.total(), many.total());
        for h in 0..single.len() as u32 {
            assert_eq!(
                single.get_by_hash::<u64>(h).unwrap(),
                many.get_by_hash::<u64>(h).unwrap(),
                "hash {h}"
            );
        }
    }
}
