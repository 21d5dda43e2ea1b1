//! # Twiddle Table Module
//!
//! Precomputed rotation factors and the bit-reversal permutation used by the
//! butterfly workers and by the final reorder pass.
//!
//! Tables are shared: every engine built for the same `nu` holds the same
//! `Arc<TwiddleTable>` for as long as at least one of them is alive.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

/// Reverses the low `nu` bits of `i`.
///
/// Bits above `nu` are ignored, so the result always lies in `[0, 2^nu)`.
/// A `nu` wider than `usize` is treated as the full word.
///
/// ```
/// use fft_core::twiddle::bit_reverse;
/// assert_eq!(bit_reverse(0b001, 3), 0b100);
/// assert_eq!(bit_reverse(0b110, 3), 0b011);
/// ```
#[inline]
pub fn bit_reverse(i: usize, nu: u32) -> usize {
    if nu == 0 {
        return 0;
    }
    i.reverse_bits() >> (usize::BITS - nu.min(usize::BITS))
}

/// Cosine/sine lookup for the `N = 2^nu` angles `2π·i/N`.
#[derive(Debug)]
pub struct TwiddleTable {
    nu: u32,
    cos: Vec<f32>,
    sin: Vec<f32>,
}

/// Live tables keyed by `nu`. Entries are weak so a table is freed with the
/// last engine that uses it.
static SHARED_TABLES: Lazy<Mutex<BTreeMap<u32, Weak<TwiddleTable>>>> =
    Lazy::new(|| Mutex::new(BTreeMap::new()));

impl TwiddleTable {
    /// Builds a fresh table for `N = 2^nu` samples.
    ///
    /// The angles are computed in `f64` and rounded once, so the table does
    /// not accumulate error for large `N`.
    pub fn new(nu: u32) -> Self {
        let size = 1usize << nu;
        let step = 2.0 * std::f64::consts::PI / size as f64;
        let (cos, sin) = (0..size)
            .map(|i| {
                let angle = step * i as f64;
                (angle.cos() as f32, angle.sin() as f32)
            })
            .unzip();
        Self { nu, cos, sin }
    }

    /// Returns the process-wide table for `nu`, building it on first use.
    pub fn shared(nu: u32) -> Arc<Self> {
        // A poisoned lock only means another thread panicked mid-insert; the
        // map itself is still consistent.
        let mut tables = SHARED_TABLES.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(table) = tables.get(&nu).and_then(Weak::upgrade) {
            return table;
        }
        let table = Arc::new(Self::new(nu));
        tables.insert(nu, Arc::downgrade(&table));
        tables.retain(|_, weak| weak.strong_count() > 0);
        table
    }

    pub fn nu(&self) -> u32 {
        self.nu
    }

    /// Number of entries, `2^nu`.
    pub fn len(&self) -> usize {
        self.cos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cos.is_empty()
    }

    /// `(cos, sin)` of `2π·index/N`.
    #[inline]
    pub fn get(&self, index: usize) -> (f32, f32) {
        (self.cos[index], self.sin[index])
    }
}
