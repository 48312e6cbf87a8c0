//! Bootstrap subsampling with per-k-mer Welford aggregates and a two-sample
//! Welch's t-test (spec.md §4.G).
//!
//! Each bootstrap iteration counts (or enriches) an independent subsample and
//! feeds its per-slot statistic into a running mean/variance; test and
//! control slots also feed a Welch's t-test so the emitted `pval` answers
//! "is this k-mer's statistic different between test and control beyond what
//! subsampling noise alone would produce". Spec.md §9.5 calls out that some
//! C code paths shared one RNG across test and control subsamples; this
//! engine always draws independent per-stream sub-seeds instead.

use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::{info, info_span};

use crate::counter::{Counter, SubsampleSpec};
use crate::enrichment::EnrichmentEngine;
use crate::error::KnockmerError;
use crate::seqstream::FileType;

/// Numerically stable running mean/variance (Welford's online algorithm).
#[derive(Debug, Clone, Copy, Default)]
pub struct Welford {
    n: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn push(&mut self, x: f64) {
        if x.is_nan() {
            return;
        }
        self.n += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = self.n as f64;
        let delta = x - self.mean;
        self.mean += delta / n;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    #[must_use]
    pub fn n(&self) -> u64 {
        self.n
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Sample variance (Bessel-corrected). `NaN` if fewer than 2 samples.
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.n < 2 {
            return f64::NAN;
        }
        #[allow(clippy::cast_precision_loss)]
        let denom = (self.n - 1) as f64;
        self.m2 / denom
    }

    /// Sample standard deviation. `0.0` when the statistic was constant
    /// across every sample (spec.md invariant 6), `NaN` if fewer than 2 samples.
    #[must_use]
    pub fn stdev(&self) -> f64 {
        let var = self.variance();
        if var.is_nan() {
            f64::NAN
        } else {
            var.sqrt()
        }
    }
}

/// Welch's two-sample t-test over two independent [`Welford`] aggregates.
#[must_use]
pub fn welch_t_test(x: &Welford, y: &Welford) -> f64 {
    if x.n() < 2 || y.n() < 2 {
        return f64::NAN;
    }
    #[allow(clippy::cast_precision_loss)]
    let nx = x.n() as f64;
    #[allow(clippy::cast_precision_loss)]
    let ny = y.n() as f64;
    let vx = x.variance();
    let vy = y.variance();
    let se2 = vx / nx + vy / ny;
    if se2 <= 0.0 || !se2.is_finite() {
        return f64::NAN;
    }
    let t = (x.mean() - y.mean()) / se2.sqrt();
    let df = se2 * se2 / ((vx / nx).powi(2) / (nx - 1.0) + (vy / ny).powi(2) / (ny - 1.0));
    if !df.is_finite() || df <= 0.0 {
        return f64::NAN;
    }
    two_tailed_p(t, df)
}

/// `p = 2 * P(T <= -|t|; df)` via the regularized incomplete beta function
/// identity `P(T<=t; df) = 1 - I_{df/(df+t^2)}(df/2, 1/2) / 2`.
fn two_tailed_p(t: f64, df: f64) -> f64 {
    let x = df / (df + t * t);
    let ib = regularized_incomplete_beta(x, df / 2.0, 0.5);
    (ib).clamp(0.0, 1.0)
}

/// Regularized incomplete beta function `I_x(a, b)`, evaluated through the
/// standard continued-fraction expansion (Numerical Recipes' `betacf`), with
/// the symmetry relation `I_x(a,b) = 1 - I_{1-x}(b,a)` used for numerical
/// stability when `x` is not in the faster-converging half of `[0, 1]`.
fn regularized_incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_beta = ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b);
    let front = (a * x.ln() + b * (1.0 - x).ln() - ln_beta).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * betacf(x, a, b) / a
    } else {
        1.0 - front * betacf(1.0 - x, b, a) / b
    }
}

const MAX_ITER: usize = 200;
const EPS: f64 = 1e-12;
const TINY: f64 = 1e-300;

/// Continued-fraction evaluation used by [`regularized_incomplete_beta`].
fn betacf(x: f64, a: f64, b: f64) -> f64 {
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        #[allow(clippy::cast_precision_loss)]
        let mf = m as f64;
        let m2 = 2.0 * mf;

        let aa = mf * (b - mf) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + mf) * (qab + mf) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of `ln(Gamma(x))`.
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection formula.
        std::f64::consts::PI.ln() - (std::f64::consts::PI * x).sin().ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut a = COEFFS[0];
        let t = x + G + 0.5;
        for (i, &coeff) in COEFFS.iter().enumerate().skip(1) {
            a += coeff / (x + i as f64);
        }
        0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
    }
}

/// One k-mer's finalized bootstrap statistics.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapRow {
    pub hash: u32,
    pub mean: f64,
    pub stdev: f64,
    pub pval: f64,
}

/// Derives `iters` independent, deterministic sub-seeds from a base seed
/// (spec.md §4.G "Subsample independence"). `stream` distinguishes test (0)
/// from control (1) so the two corpora never share a sub-seed.
fn sub_seed(base: i64, iter: usize, stream: u64) -> u64 {
    #[allow(clippy::cast_sign_loss)]
    let base = base as u64;
    base.wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(iter as u64 * 2 + stream)
        .wrapping_add(0x9E37_79B9_7F4A_7C15)
}

pub struct BootstrapEngine;

impl BootstrapEngine {
    /// Bootstraps plain counts over `path`: `iters` independent subsamples,
    /// each producing a [`Welford`] per k-mer, finalized to mean/stdev. No
    /// t-test is computed for plain counting (spec.md: `pval` only applies
    /// to algorithms other than `count`).
    pub fn count(
        path: impl AsRef<Path>,
        file_type: FileType,
        k: usize,
        threads: usize,
        iters: u32,
        sample_milli_percent: u32,
        seed: i64,
    ) -> Result<Vec<(u32, Welford)>, KnockmerError> {
        #[cfg(feature = "tracing")]
        info!(k = k, iters = iters, "Starting bootstrap count");
        let capacity = 1usize << (2 * k);
        let mut aggs = vec![Welford::new(); capacity];
        for i in 0..iters as usize {
            #[cfg(feature = "tracing")]
            let _iter_span = info_span!("bootstrap_iteration", iter = i).entered();
            let table = Counter::count_bootstrap(
                &path,
                file_type,
                k,
                threads,
                SubsampleSpec {
                    sample_milli_percent,
                    seed: sub_seed(seed, i, 0),
                },
            )?;
            for (h, agg) in aggs.iter_mut().enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let count: u64 = table.get_by_hash(h as u32)?;
                #[allow(clippy::cast_precision_loss)]
                agg.push(count as f64);
            }
        }
        #[cfg(feature = "tracing")]
        info!(iters = iters, "Bootstrap count complete");
        #[allow(clippy::cast_possible_truncation)]
        Ok(aggs
            .into_iter()
            .enumerate()
            .map(|(h, agg)| (h as u32, agg))
            .collect())
    }

    /// Bootstraps control-based enrichment: each iteration independently
    /// subsamples test and control (different sub-seeds each), computes the
    /// r-value table, and feeds both a [`Welford`] (over `r`) and a
    /// `(test_count, control_count)` pair for the per-slot t-test.
    pub fn enrichment(
        test_path: impl AsRef<Path>,
        test_ft: FileType,
        control_path: impl AsRef<Path>,
        control_ft: FileType,
        k: usize,
        threads: usize,
        normalize: bool,
        iters: u32,
        sample_milli_percent: u32,
        seed: i64,
    ) -> Result<Vec<BootstrapRow>, KnockmerError> {
        #[cfg(feature = "tracing")]
        info!(k = k, iters = iters, "Starting bootstrap enrichment");
        let capacity = 1usize << (2 * k);
        let mut r_agg = vec![Welford::new(); capacity];
        let mut test_agg = vec![Welford::new(); capacity];
        let mut control_agg = vec![Welford::new(); capacity];

        for i in 0..iters as usize {
            #[cfg(feature = "tracing")]
            let _iter_span = info_span!("bootstrap_iteration", iter = i).entered();
            let test_table = Counter::count_bootstrap(
                &test_path,
                test_ft,
                k,
                threads,
                SubsampleSpec {
                    sample_milli_percent,
                    seed: sub_seed(seed, i, 0),
                },
            )?;
            let control_table = Counter::count_bootstrap(
                &control_path,
                control_ft,
                k,
                threads,
                SubsampleSpec {
                    sample_milli_percent,
                    seed: sub_seed(seed, i, 1),
                },
            )?;
            let rows = EnrichmentEngine::enrichment(&test_table, &control_table, normalize)?;
            for row in rows {
                r_agg[row.hash as usize].push(row.r);
                #[allow(clippy::cast_possible_truncation)]
                let t: u64 = test_table.get_by_hash(row.hash)?;
                #[allow(clippy::cast_possible_truncation)]
                let c: u64 = control_table.get_by_hash(row.hash)?;
                #[allow(clippy::cast_precision_loss)]
                test_agg[row.hash as usize].push(t as f64);
                #[allow(clippy::cast_precision_loss)]
                control_agg[row.hash as usize].push(c as f64);
            }
        }

        #[cfg(feature = "tracing")]
        info!(iters = iters, "Bootstrap enrichment complete");
        #[allow(clippy::cast_possible_truncation)]
        Ok((0..capacity)
            .map(|h| BootstrapRow {
                hash: h as u32,
                mean: r_agg[h].mean(),
                stdev: r_agg[h].stdev(),
                pval: welch_t_test(&test_agg[h], &control_agg[h]),
            })
            .collect())
    }
}
