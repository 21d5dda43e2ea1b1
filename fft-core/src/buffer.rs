//! # Sample Buffer Module
//!
//! The complex sample buffer handed to the engine, and the raw view the
//! workers use to mutate it in place while it is checked out.

/// Complex samples stored as two parallel channels.
///
/// On input the samples are in natural order; after a transform both
/// channels hold the spectrum, also in natural order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    pub real: Vec<f32>,
    pub imag: Vec<f32>,
}

impl SampleBuffer {
    pub fn new(real: Vec<f32>, imag: Vec<f32>) -> Self {
        Self { real, imag }
    }

    /// Wraps real-valued samples with a zeroed imaginary channel.
    pub fn from_real(real: Vec<f32>) -> Self {
        let imag = vec![0.0; real.len()];
        Self { real, imag }
    }

    /// All-zero buffer of `len` samples.
    pub fn zeroed(len: usize) -> Self {
        Self {
            real: vec![0.0; len],
            imag: vec![0.0; len],
        }
    }

    /// Number of samples in the real channel.
    pub fn len(&self) -> usize {
        self.real.len()
    }

    pub fn is_empty(&self) -> bool {
        self.real.is_empty()
    }

    /// Swaps sample `a` with sample `b` in both channels.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.real.swap(a, b);
        self.imag.swap(a, b);
    }

    /// Multiplies every sample by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for (re, im) in self.real.iter_mut().zip(self.imag.iter_mut()) {
            *re *= factor;
            *im *= factor;
        }
    }

    /// Raw view for the worker pool. The buffer must stay put (no push, no
    /// drop) until every worker holding the view has reported back.
    pub(crate) fn shared_view(&mut self) -> SharedSamples {
        SharedSamples {
            real: self.real.as_mut_ptr(),
            imag: self.imag.as_mut_ptr(),
            len: self.real.len().min(self.imag.len()),
        }
    }
}

/// Unchecked, shareable handle to a checked-out [`SampleBuffer`].
///
/// Several workers hold copies of the same view at once. Soundness rests on
/// two rules kept by the coordinator:
/// - within one round (one strided stage, or the local remainder) the index
///   pairs touched by different workers are disjoint;
/// - the owning `SampleBuffer` is not read, moved or dropped until every
///   worker has reported the round finished.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SharedSamples {
    real: *mut f32,
    imag: *mut f32,
    len: usize,
}

// The pointers are only dereferenced under the rules documented above.
unsafe impl Send for SharedSamples {}

impl SharedSamples {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Applies one butterfly to the pair `(k1, k2)` with twiddle `(c, s)`:
    ///
    /// ```text
    /// tr = re[k2]·c + im[k2]·s      re[k2] = re[k1] − tr    re[k1] += tr
    /// ti = im[k2]·c − re[k2]·s      im[k2] = im[k1] − ti    im[k1] += ti
    /// ```
    ///
    /// # Safety
    /// `k1` and `k2` must be in bounds and no other thread may access either
    /// index for the duration of the call.
    #[inline]
    pub(crate) unsafe fn butterfly(&self, k1: usize, k2: usize, c: f32, s: f32) {
        debug_assert!(k1 < self.len && k2 < self.len);
        unsafe {
            let re1 = self.real.add(k1);
            let im1 = self.imag.add(k1);
            let re2 = self.real.add(k2);
            let im2 = self.imag.add(k2);

            let tr = *re2 * c + *im2 * s;
            let ti = *im2 * c - *re2 * s;
            *re2 = *re1 - tr;
            *im2 = *im1 - ti;
            *re1 += tr;
            *im1 += ti;
        }
    }
}
