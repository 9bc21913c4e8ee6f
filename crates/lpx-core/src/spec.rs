//! Processing specification handed to processors at prepare time

use serde::{Deserialize, Serialize};

use crate::{LpxError, LpxResult};

/// Sample rate, maximum block size and channel count of the host stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub sample_rate: f64,
    pub maximum_block_size: usize,
    pub num_channels: usize,
}

impl ProcessSpec {
    pub fn new(sample_rate: f64, maximum_block_size: usize, num_channels: usize) -> Self {
        Self {
            sample_rate,
            maximum_block_size,
            num_channels,
        }
    }

    /// Reject specs no processor can be prepared with
    pub fn validate(&self) -> LpxResult<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(LpxError::InvalidParam(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.maximum_block_size == 0 {
            return Err(LpxError::InvalidParam(
                "maximum block size must be non-zero".into(),
            ));
        }
        if self.num_channels == 0 {
            return Err(LpxError::InvalidParam(
                "channel count must be non-zero".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn nyquist(&self) -> f64 {
        self.sample_rate * 0.5
    }
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self::new(48000.0, 512, 2)
    }
}
