//! Fixed-capacity k-mer count table (spec.md §4.D).
//!
//! Two storage shapes selected by k: 64-bit slots for k ≤ 12 (small variant)
//! and 32-bit slots for k ∈ [13, 16] (medium variant). Single increments are
//! lock-free (`AtomicU64`/`AtomicU32`); batched increments, decrements, and
//! clears serialize through a `Mutex<()>` guard, matching the
//! `Arc<AtomicU64>`/`Arc<Mutex<_>>` sharing pattern this corpus's other
//! k-mer counters use for cross-worker ordering.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
#[cfg(feature = "tracing")]
use tracing::debug;

use crate::alphabet::{hash_str, unhash_to_string};
use crate::error::KnockmerError;

/// Either a 64-bit-slot (k ≤ 12) or 32-bit-slot (k ∈ [13, 16]) dense table.
enum Slots {
    Small(Vec<AtomicU64>),
    Medium(Vec<AtomicU32>),
}

impl Slots {
    fn new(k: usize, capacity: usize) -> Self {
        if k <= 12 {
            Self::Small((0..capacity).map(|_| AtomicU64::new(0)).collect())
        } else {
            Self::Medium((0..capacity).map(|_| AtomicU32::new(0)).collect())
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Small(v) => v.len(),
            Self::Medium(v) => v.len(),
        }
    }

    fn get(&self, i: usize) -> u64 {
        match self {
            Self::Small(v) => v[i].load(Ordering::Relaxed),
            Self::Medium(v) => u64::from(v[i].load(Ordering::Relaxed)),
        }
    }

    fn add(&self, i: usize, n: u64) {
        match self {
            Self::Small(v) => {
                v[i].fetch_add(n, Ordering::Relaxed);
            }
            Self::Medium(v) => {
                #[allow(clippy::cast_possible_truncation)]
                v[i].fetch_add(n as u32, Ordering::Relaxed);
            }
        }
    }

    fn sub_one(&self, i: usize) {
        match self {
            Self::Small(v) => {
                v[i].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some(c.saturating_sub(1)))
                    .ok();
            }
            Self::Medium(v) => {
                v[i]
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                        Some(c.saturating_sub(1))
                    })
                    .ok();
            }
        }
    }

    fn clear(&self) {
        match self {
            Self::Small(v) => v.iter().for_each(|s| s.store(0, Ordering::Relaxed)),
            Self::Medium(v) => v.iter().for_each(|s| s.store(0, Ordering::Relaxed)),
        }
    }
}

/// A saturating-cast target for [`KmerTable::get_by_hash`]/[`KmerTable::get_by_string`].
pub trait SaturatingFrom {
    fn saturating_from_u64(value: u64) -> Self;
}

macro_rules! impl_saturating_int {
    ($t:ty) => {
        impl SaturatingFrom for $t {
            fn saturating_from_u64(value: u64) -> Self {
                <$t>::try_from(value).unwrap_or(<$t>::MAX)
            }
        }
    };
}

impl_saturating_int!(u8);
impl_saturating_int!(u16);
impl_saturating_int!(u32);
impl_saturating_int!(u64);

impl SaturatingFrom for f32 {
    fn saturating_from_u64(value: u64) -> Self {
        value as Self
    }
}

impl SaturatingFrom for f64 {
    fn saturating_from_u64(value: u64) -> Self {
        value as Self
    }
}

/// A dense `4^k`-slot count table with FIFO masked-k-mer bookkeeping for IKKE.
pub struct KmerTable {
    k: usize,
    slots: Slots,
    total: AtomicU64,
    guard: Mutex<()>,
    masked: Mutex<Vec<String>>,
}

impl KmerTable {
    /// Allocates a table of `4^k` slots for the given k-mer length.
    #[must_use]
    pub fn new(k: usize) -> Self {
        let capacity = 1usize << (2 * k);
        Self {
            k,
            slots: Slots::new(k, capacity),
            total: AtomicU64::new(0),
            guard: Mutex::new(()),
            masked: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn k(&self) -> usize {
        self.k
    }

    /// `4^k`, the number of addressable slots (spec.md: `capacity + 1 = 4^k`
    /// describes the max valid hash `4^k - 1`; `len()` is `4^k` itself).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Sum of all slot counts, maintained incrementally by `increment`/`increment_batch`.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// +1 to slot `h`, +1 to total. Lock-free; safe to call concurrently from
    /// many workers without holding [`Self`]'s mutex.
    pub fn increment(&self, h: u32) {
        self.slots.add(h as usize, 1);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Applies every hash in `hashes` under the table's mutex, then adds the
    /// batch length to total in one step.
    pub fn increment_batch(&self, hashes: &[u32]) {
        let _guard = self.guard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for &h in hashes {
            self.slots.add(h as usize, 1);
        }
        #[allow(clippy::cast_possible_truncation)]
        self.total.fetch_add(hashes.len() as u64, Ordering::Relaxed);
    }

    /// -1 from slot `h` (saturating at zero), under the table's mutex.
    pub fn decrement(&self, h: u32) {
        let _guard = self.guard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.slots.sub_one(h as usize);
        self.total
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            })
            .ok();
    }

    /// Zeroes every slot and total; the masked-k-mer list is left untouched.
    pub fn clear(&self) {
        let _guard = self.guard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.slots.clear();
        self.total.store(0, Ordering::Relaxed);
    }

    /// Retrieves a slot's count by raw hash, saturating-cast to `T`.
    pub fn get_by_hash<T: SaturatingFrom>(&self, h: u32) -> Result<T, KnockmerError> {
        let capacity = self.len() as u64;
        if u64::from(h) >= capacity {
            return Err(KnockmerError::HashOutOfRange { hash: h, capacity });
        }
        Ok(T::saturating_from_u64(self.slots.get(h as usize)))
    }

    /// Retrieves a slot's count by k-mer string, saturating-cast to `T`.
    pub fn get_by_string<T: SaturatingFrom>(&self, s: &str) -> Result<T, KnockmerError> {
        if s.len() != self.k {
            return Err(KnockmerError::KmerLengthMismatch {
                got: s.len(),
                expected: self.k,
            });
        }
        let h = hash_str(s, self.k).map_err(|position| KnockmerError::InvalidKmerString { position })?;
        self.get_by_hash(h)
    }

    /// Appends `s` to the masked-k-mer list (insertion order preserved, FIFO).
    pub fn mask_push(&self, s: impl Into<String>) {
        let mut masked = self.masked.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        masked.push(s.into());
        #[cfg(feature = "tracing")]
        debug!(mask_list_len = masked.len(), "Mask list grew");
    }

    /// The masked-k-mer strings accumulated so far, in insertion order.
    #[must_use]
    pub fn masked(&self) -> Vec<String> {
        self.masked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The uppercase k-mer string for raw hash `h` (`use_t` selects T vs U).
    #[must_use]
    pub fn unhash(&self, h: u32) -> String {
        unhash_to_string(h, self.k)
    }
}
