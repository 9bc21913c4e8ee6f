//! Biquad filter implementation using Transposed Direct Form II
//!
//! TDF-II is numerically optimal for floating-point arithmetic,
//! minimizing quantization noise and ensuring stability.
//!
//! These sections run in `f64`: they are used to design impulse responses
//! off the audio thread, not to filter audio directly.

use lpx_core::DesignSample;
use std::f64::consts::PI;

use crate::{MonoProcessor, Processor};

/// Biquad coefficients
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Calculate lowpass filter coefficients
    pub fn lowpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = (1.0 - cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Calculate highpass filter coefficients
    pub fn highpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 + cos_omega) / 2.0;
        let b1 = -(1.0 + cos_omega);
        let b2 = (1.0 + cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Bypass (unity gain, no filtering)
    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Magnitude response at `freq`
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * freq / sample_rate;
        let (s1, c1) = omega.sin_cos();
        let (s2, c2) = (2.0 * omega).sin_cos();

        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);

        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// First-order section coefficients (bilinear transform, prewarped)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FirstOrderCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub a1: f64,
}

impl FirstOrderCoeffs {
    pub fn lowpass(freq: f64, sample_rate: f64) -> Self {
        let k = (PI * freq / sample_rate).tan();
        let norm = 1.0 / (k + 1.0);
        Self {
            b0: k * norm,
            b1: k * norm,
            a1: (k - 1.0) * norm,
        }
    }

    pub fn highpass(freq: f64, sample_rate: f64) -> Self {
        let k = (PI * freq / sample_rate).tan();
        let norm = 1.0 / (k + 1.0);
        Self {
            b0: norm,
            b1: -norm,
            a1: (k - 1.0) * norm,
        }
    }

    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            a1: 0.0,
        }
    }

    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let (s1, c1) = (2.0 * PI * freq / sample_rate).sin_cos();

        let num_re = self.b0 + self.b1 * c1;
        let num_im = -self.b1 * s1;
        let den_re = 1.0 + self.a1 * c1;
        let den_im = -self.a1 * s1;

        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// Transposed Direct Form II biquad filter
#[derive(Debug, Clone)]
pub struct BiquadTDF2 {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
    sample_rate: f64,
}

impl BiquadTDF2 {
    pub fn new(sample_rate: f64) -> Self {
        Self::with_coeffs(BiquadCoeffs::bypass(), sample_rate)
    }

    pub fn with_coeffs(coeffs: BiquadCoeffs, sample_rate: f64) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
        }
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Set as lowpass filter
    pub fn set_lowpass(&mut self, freq: f64, q: f64) {
        self.coeffs = BiquadCoeffs::lowpass(freq, q, self.sample_rate);
    }

    /// Set as highpass filter
    pub fn set_highpass(&mut self, freq: f64, q: f64) {
        self.coeffs = BiquadCoeffs::highpass(freq, q, self.sample_rate);
    }

    /// Set as bypass
    pub fn set_bypass(&mut self) {
        self.coeffs = BiquadCoeffs::bypass();
    }
}

impl Processor for BiquadTDF2 {
    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

impl MonoProcessor for BiquadTDF2 {
    #[inline(always)]
    fn process_sample(&mut self, input: DesignSample) -> DesignSample {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }
}

/// Transposed Direct Form II first-order filter
#[derive(Debug, Clone)]
pub struct FirstOrderTDF2 {
    coeffs: FirstOrderCoeffs,
    z1: f64,
    sample_rate: f64,
}

impl FirstOrderTDF2 {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            coeffs: FirstOrderCoeffs::bypass(),
            z1: 0.0,
            sample_rate,
        }
    }

    pub fn set_lowpass(&mut self, freq: f64) {
        self.coeffs = FirstOrderCoeffs::lowpass(freq, self.sample_rate);
    }

    pub fn set_highpass(&mut self, freq: f64) {
        self.coeffs = FirstOrderCoeffs::highpass(freq, self.sample_rate);
    }

    #[inline]
    pub fn coeffs(&self) -> &FirstOrderCoeffs {
        &self.coeffs
    }
}

impl Processor for FirstOrderTDF2 {
    fn reset(&mut self) {
        self.z1 = 0.0;
    }
}

impl MonoProcessor for FirstOrderTDF2 {
    #[inline(always)]
    fn process_sample(&mut self, input: DesignSample) -> DesignSample {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output;
        output
    }
}
