//! Real-only FFT adapter
//!
//! The convolution engine talks to its transform through [`RealFft`], which
//! uses the packed layout of the JUCE real-only transform:
//!
//! - buffers hold `2 * fft_size` reals
//! - `forward` reads `fft_size` real samples from the front of the buffer and
//!   writes all `fft_size` complex bins interleaved as `re, im` pairs (the
//!   negative-frequency half is the conjugate mirror of the positive half)
//! - `inverse` reads bins `0..=fft_size/2` from the same interleaved layout and
//!   writes `fft_size` real samples, scaled by `1 / fft_size`, to the front of
//!   the buffer
//!
//! [`RealFftEngine`] implements the trait on top of `realfft` with all
//! working memory allocated up front, so neither direction allocates.

use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use lpx_core::{LpxError, LpxResult, Sample, is_power_of_two};

/// Real-valued forward/inverse transform over the packed interleaved layout
pub trait RealFft: Send + Sync + Sized {
    /// Plan a transform of `fft_size` points (power of two, at least 2)
    fn new(fft_size: usize) -> LpxResult<Self>;

    /// Transform size in points
    fn size(&self) -> usize;

    /// In-place forward transform; `buffer.len() >= 2 * size()`
    fn forward(&mut self, buffer: &mut [Sample]);

    /// In-place normalised inverse transform; `buffer.len() >= 2 * size()`
    fn inverse(&mut self, buffer: &mut [Sample]);
}

/// `realfft`-backed implementation of [`RealFft`]
pub struct RealFftEngine {
    fft_size: usize,
    forward: Arc<dyn RealToComplex<Sample>>,
    inverse: Arc<dyn ComplexToReal<Sample>>,
    time: Vec<Sample>,
    spectrum: Vec<Complex<Sample>>,
    forward_scratch: Vec<Complex<Sample>>,
    inverse_scratch: Vec<Complex<Sample>>,
}

impl RealFft for RealFftEngine {
    fn new(fft_size: usize) -> LpxResult<Self> {
        if fft_size < 2 || !is_power_of_two(fft_size) {
            return Err(LpxError::InvalidParam(format!(
                "FFT size must be a power of two >= 2, got {fft_size}"
            )));
        }

        let mut planner = RealFftPlanner::<Sample>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let time = forward.make_input_vec();
        let spectrum = forward.make_output_vec();
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();

        Ok(Self {
            fft_size,
            forward,
            inverse,
            time,
            spectrum,
            forward_scratch,
            inverse_scratch,
        })
    }

    #[inline]
    fn size(&self) -> usize {
        self.fft_size
    }

    fn forward(&mut self, buffer: &mut [Sample]) {
        let n = self.fft_size;
        debug_assert!(buffer.len() >= 2 * n);

        self.time.copy_from_slice(&buffer[..n]);
        let result = self.forward.process_with_scratch(
            &mut self.time,
            &mut self.spectrum,
            &mut self.forward_scratch,
        );
        debug_assert!(result.is_ok());

        for (k, bin) in self.spectrum.iter().enumerate() {
            buffer[2 * k] = bin.re;
            buffer[2 * k + 1] = bin.im;
        }

        // Negative frequencies: X[n - k] = conj(X[k])
        for k in (n / 2 + 1)..n {
            let mirror = self.spectrum[n - k];
            buffer[2 * k] = mirror.re;
            buffer[2 * k + 1] = -mirror.im;
        }
    }

    fn inverse(&mut self, buffer: &mut [Sample]) {
        let n = self.fft_size;
        debug_assert!(buffer.len() >= 2 * n);

        for (k, bin) in self.spectrum.iter_mut().enumerate() {
            *bin = Complex::new(buffer[2 * k], buffer[2 * k + 1]);
        }

        // A real signal has purely real DC and Nyquist bins
        self.spectrum[0].im = 0.0;
        self.spectrum[n / 2].im = 0.0;

        let result = self.inverse.process_with_scratch(
            &mut self.spectrum,
            &mut self.time,
            &mut self.inverse_scratch,
        );
        debug_assert!(result.is_ok());

        let norm = 1.0 / n as Sample;
        for (out, &x) in buffer[..n].iter_mut().zip(&self.time) {
            *out = x * norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(RealFftEngine::new(0).is_err());
        assert!(RealFftEngine::new(1).is_err());
        assert!(RealFftEngine::new(48).is_err());
        assert!(RealFftEngine::new(64).is_ok());
    }

    #[test]
    fn test_forward_layout_of_impulse() {
        let n = 16;
        let mut fft = RealFftEngine::new(n).unwrap();
        let mut buffer = vec![0.0; 2 * n];
        buffer[0] = 1.0;

        fft.forward(&mut buffer);

        // A unit impulse has a flat, purely real spectrum
        for k in 0..n {
            assert!((buffer[2 * k] - 1.0).abs() < 1e-6, "re[{k}] = {}", buffer[2 * k]);
            assert!(buffer[2 * k + 1].abs() < 1e-6, "im[{k}] = {}", buffer[2 * k + 1]);
        }
    }

    #[test]
    fn test_negative_bins_are_conjugate_mirror() {
        let n = 32;
        let mut fft = RealFftEngine::new(n).unwrap();
        let mut buffer = vec![0.0; 2 * n];
        for (i, x) in buffer[..n].iter_mut().enumerate() {
            *x = ((i * 7) % 5) as f32 - 2.0;
        }

        fft.forward(&mut buffer);

        for k in 1..n / 2 {
            assert!((buffer[2 * k] - buffer[2 * (n - k)]).abs() < 1e-4);
            assert!((buffer[2 * k + 1] + buffer[2 * (n - k) + 1]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_inverse_restores_signal() {
        let n = 64;
        let mut fft = RealFftEngine::new(n).unwrap();
        let signal: Vec<f32> = (0..n).map(|i| (i as f32 * 0.37).sin()).collect();

        let mut buffer = vec![0.0; 2 * n];
        buffer[..n].copy_from_slice(&signal);
        fft.forward(&mut buffer);
        fft.inverse(&mut buffer);

        for (a, b) in buffer[..n].iter().zip(&signal) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
