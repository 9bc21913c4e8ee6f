//! Frequency-domain impulse response transforms
//!
//! Each transform takes the full complex spectrum of an IR, reshapes it, and
//! transforms back. They allocate nothing once an [`IrHelperFft`] exists, but
//! are still meant for the control thread: a full-length FFT per call is far
//! too slow for an audio callback.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use lpx_core::{DesignSample, LpxError, LpxResult};

use crate::vector_ops;

/// Magnitudes below this are clamped before taking the log
const MIN_MAGNITUDE: f64 = 1.0e-12;

/// Complex FFT plans and work buffers for one IR length
pub struct IrHelperFft {
    size: usize,
    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
    spectrum: Vec<Complex<f64>>,
    aux: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl IrHelperFft {
    pub fn new(size: usize) -> LpxResult<Self> {
        if size < 2 {
            return Err(LpxError::InvalidParam(format!(
                "IR helper FFT size must be at least 2, got {size}"
            )));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());

        Ok(Self {
            size,
            fft,
            ifft,
            spectrum: vec![Complex::new(0.0, 0.0); size],
            aux: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    fn check_lengths(&self, target: &[DesignSample], original: &[DesignSample]) -> LpxResult<()> {
        for len in [target.len(), original.len()] {
            if len != self.size {
                return Err(LpxError::InvalidIrLength {
                    expected: self.size,
                    actual: len,
                });
            }
        }
        Ok(())
    }

    /// Load `original` into the spectrum buffer and transform it
    fn analyse(&mut self, original: &[DesignSample]) {
        for (bin, &x) in self.spectrum.iter_mut().zip(original) {
            *bin = Complex::new(x, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);
    }

    /// Inverse-transform the spectrum buffer and keep the real part
    fn synthesise(&mut self, target: &mut [DesignSample]) {
        self.ifft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        // rustfft doesn't normalize, so divide by n
        let scale = 1.0 / self.size as f64;
        for (out, bin) in target.iter_mut().zip(&self.spectrum) {
            *out = bin.re * scale;
        }
    }

    /// Hilbert transform of `aux` in place: `+i` on positive, `-i` on negative frequencies
    fn hilbert_aux(&mut self) {
        let n = self.size;
        let half = n / 2;
        let odd = n % 2;

        self.fft.process_with_scratch(&mut self.aux, &mut self.scratch);

        self.aux[0] = Complex::new(0.0, 0.0);
        if odd == 0 {
            self.aux[half] = Complex::new(0.0, 0.0);
        }

        let i = Complex::<f64>::i();
        for bin in &mut self.aux[1..half + odd] {
            *bin *= i;
        }
        for bin in &mut self.aux[half + 1..] {
            *bin *= -i;
        }

        self.ifft.process_with_scratch(&mut self.aux, &mut self.scratch);

        let scale = 1.0 / n as f64;
        for bin in &mut self.aux {
            *bin *= scale;
        }
    }
}

/// Remove the mean of `target`
fn remove_dc(target: &mut [DesignSample]) {
    let mean = vector_ops::accumulate(target) / target.len() as f64;
    for x in target.iter_mut() {
        *x -= mean;
    }
}

/// Scale `target` to the given RMS level
fn normalize_rms(target: &mut [DesignSample], rms: f64) {
    let current = vector_ops::rms(target);
    if current > 0.0 {
        let gain = rms / current;
        for x in target.iter_mut() {
            *x *= gain;
        }
    }
}

/// Square-root the magnitude of `original`'s spectrum, keeping its phase.
///
/// Used to undo the magnitude doubling of forward-backward filtering.
pub fn make_half_magnitude(
    target: &mut [DesignSample],
    original: &[DesignSample],
    fft: &mut IrHelperFft,
) -> LpxResult<()> {
    fft.check_lengths(target, original)?;
    fft.analyse(original);

    for bin in &mut fft.spectrum {
        let (magnitude, phase) = bin.to_polar();
        *bin = Complex::from_polar(magnitude.sqrt(), phase);
    }

    fft.synthesise(target);
    Ok(())
}

/// Linear-phase version of `original`: same magnitude, pure `N / 2` sample
/// delay, DC removed and RMS matched to `original`.
pub fn make_linear_phase(
    target: &mut [DesignSample],
    original: &[DesignSample],
    fft: &mut IrHelperFft,
) -> LpxResult<()> {
    fft.check_lengths(target, original)?;
    let original_rms = vector_ops::rms(original);
    fft.analyse(original);

    let n = fft.size as f64;
    let half = n / 2.0;
    for (k, bin) in fft.spectrum.iter_mut().enumerate() {
        let phase = -2.0 * std::f64::consts::PI * half * k as f64 / n;
        *bin = Complex::from_polar(bin.norm(), phase);
    }

    fft.synthesise(target);
    remove_dc(target);
    normalize_rms(target, original_rms);
    Ok(())
}

/// Minimum-phase version of `original` with the same magnitude response
pub fn make_minimum_phase(
    target: &mut [DesignSample],
    original: &[DesignSample],
    fft: &mut IrHelperFft,
) -> LpxResult<()> {
    fft.check_lengths(target, original)?;
    fft.analyse(original);

    for (bin, log_mag) in fft.spectrum.iter_mut().zip(fft.aux.iter_mut()) {
        let magnitude = bin.norm();
        *bin = Complex::new(magnitude, 0.0);
        *log_mag = Complex::new(magnitude.max(MIN_MAGNITUDE).ln(), 0.0);
    }

    fft.hilbert_aux();

    let i = Complex::<f64>::i();
    for (bin, arg) in fft.spectrum.iter_mut().zip(&fft.aux) {
        *bin *= (i * arg).exp();
    }

    fft.synthesise(target);
    Ok(())
}
