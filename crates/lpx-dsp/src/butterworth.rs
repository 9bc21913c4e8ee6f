//! Arbitrary-order Butterworth filters
//!
//! An order-`n` filter is a cascade of `n / 2` biquads with the Butterworth
//! pole-pair Q values, plus one first-order section when `n` is odd.

use std::f64::consts::PI;

use lpx_core::{DesignSample, LpxError, LpxResult};

use crate::biquad::{BiquadTDF2, FirstOrderTDF2};
use crate::{MonoProcessor, Processor};

/// Butterworth response type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButterworthType {
    Lowpass,
    Highpass,
}

/// Q values of the second-order sections of an order-`order` Butterworth filter
pub fn butterworth_qs(order: usize) -> Vec<f64> {
    let n = order as f64;
    (0..order / 2)
        .map(|k| {
            let angle = PI * (2.0 * k as f64 + n + 1.0) / (2.0 * n);
            -1.0 / (2.0 * angle.cos())
        })
        .collect()
}

/// Cascaded Butterworth lowpass/highpass
#[derive(Debug, Clone)]
pub struct ButterworthFilter {
    order: usize,
    filter_type: ButterworthType,
    sample_rate: f64,
    cutoff: f64,
    qs: Vec<f64>,
    sections: Vec<BiquadTDF2>,
    first_order: Option<FirstOrderTDF2>,
}

impl ButterworthFilter {
    pub fn new(order: usize, filter_type: ButterworthType, sample_rate: f64) -> LpxResult<Self> {
        if order == 0 {
            return Err(LpxError::InvalidParam(
                "Butterworth order must be at least 1".into(),
            ));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(LpxError::InvalidParam(format!(
                "sample rate must be positive, got {sample_rate}"
            )));
        }

        let qs = butterworth_qs(order);
        let sections = qs.iter().map(|_| BiquadTDF2::new(sample_rate)).collect();
        let first_order = (order % 2 == 1).then(|| FirstOrderTDF2::new(sample_rate));

        Ok(Self {
            order,
            filter_type,
            sample_rate,
            cutoff: 0.0,
            qs,
            sections,
            first_order,
        })
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order
    }

    #[inline]
    pub fn filter_type(&self) -> ButterworthType {
        self.filter_type
    }

    #[inline]
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// Recompute coefficients for a new cutoff; state is kept
    pub fn set_cutoff(&mut self, cutoff_hz: f64) -> LpxResult<()> {
        if !(cutoff_hz > 0.0 && cutoff_hz < self.sample_rate * 0.5) {
            return Err(LpxError::InvalidParam(format!(
                "cutoff {cutoff_hz} Hz outside (0, {}) Hz",
                self.sample_rate * 0.5
            )));
        }

        self.cutoff = cutoff_hz;
        for (section, &q) in self.sections.iter_mut().zip(&self.qs) {
            match self.filter_type {
                ButterworthType::Lowpass => section.set_lowpass(cutoff_hz, q),
                ButterworthType::Highpass => section.set_highpass(cutoff_hz, q),
            }
        }
        if let Some(section) = self.first_order.as_mut() {
            match self.filter_type {
                ButterworthType::Lowpass => section.set_lowpass(cutoff_hz),
                ButterworthType::Highpass => section.set_highpass(cutoff_hz),
            }
        }
        Ok(())
    }

    /// Magnitude response at `freq`
    pub fn magnitude_at(&self, freq: f64) -> f64 {
        let biquads: f64 = self
            .sections
            .iter()
            .map(|s| s.coeffs().magnitude_at(freq, self.sample_rate))
            .product();
        let first = self
            .first_order
            .as_ref()
            .map_or(1.0, |s| s.coeffs().magnitude_at(freq, self.sample_rate));
        biquads * first
    }
}

impl Processor for ButterworthFilter {
    fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
        if let Some(section) = self.first_order.as_mut() {
            section.reset();
        }
    }
}

impl MonoProcessor for ButterworthFilter {
    #[inline]
    fn process_sample(&mut self, input: DesignSample) -> DesignSample {
        let mut x = input;
        for section in &mut self.sections {
            x = section.process_sample(x);
        }
        if let Some(section) = self.first_order.as_mut() {
            x = section.process_sample(x);
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_qs() {
        let q2 = butterworth_qs(2);
        assert_eq!(q2.len(), 1);
        assert_relative_eq!(q2[0], std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);

        let q4 = butterworth_qs(4);
        assert_relative_eq!(q4[0], 1.306_562_964_876_377, epsilon = 1e-9);
        assert_relative_eq!(q4[1], 0.541_196_100_146_197, epsilon = 1e-9);

        let q3 = butterworth_qs(3);
        assert_eq!(q3.len(), 1);
        assert_relative_eq!(q3[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cutoff_is_minus_3db() {
        for order in 1..=6 {
            let mut lp = ButterworthFilter::new(order, ButterworthType::Lowpass, 48000.0).unwrap();
            lp.set_cutoff(1000.0).unwrap();
            assert_eq!(lp.order(), order);
            assert_eq!(lp.filter_type(), ButterworthType::Lowpass);
            assert_eq!(lp.cutoff(), 1000.0);
            assert_relative_eq!(
                lp.magnitude_at(1000.0),
                std::f64::consts::FRAC_1_SQRT_2,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_power_complementary() {
        for order in [2, 3, 4] {
            let mut lp = ButterworthFilter::new(order, ButterworthType::Lowpass, 48000.0).unwrap();
            let mut hp = ButterworthFilter::new(order, ButterworthType::Highpass, 48000.0).unwrap();
            lp.set_cutoff(2000.0).unwrap();
            hp.set_cutoff(2000.0).unwrap();

            for freq in [50.0, 500.0, 2000.0, 5000.0, 15000.0] {
                let sum = lp.magnitude_at(freq).powi(2) + hp.magnitude_at(freq).powi(2);
                assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(ButterworthFilter::new(0, ButterworthType::Lowpass, 48000.0).is_err());
        assert!(ButterworthFilter::new(2, ButterworthType::Lowpass, 0.0).is_err());

        let mut filter = ButterworthFilter::new(2, ButterworthType::Highpass, 48000.0).unwrap();
        assert!(filter.set_cutoff(0.0).is_err());
        assert!(filter.set_cutoff(24000.0).is_err());
        assert!(filter.set_cutoff(f64::NAN).is_err());
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let mut hp = ButterworthFilter::new(3, ButterworthType::Highpass, 48000.0).unwrap();
        hp.set_cutoff(200.0).unwrap();

        let mut buffer = vec![1.0; 20000];
        hp.process_block(&mut buffer);
        assert!(buffer[19999].abs() < 1e-4);

        hp.reset();
        assert_eq!(hp.process_sample(0.0), 0.0);
    }
}
