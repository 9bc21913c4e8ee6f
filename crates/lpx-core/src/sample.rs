//! Sample types and audio buffer definitions

/// Type alias for streamed audio samples
pub type Sample = f32;

/// Precision used when designing impulse responses from IIR prototypes
pub type DesignSample = f64;

/// Audio buffer trait for generic buffer operations
pub trait AudioBuffer {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&mut self);
}

/// Multi-channel audio buffer with split (non-interleaved) channels
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    channels: Vec<Vec<Sample>>,
    num_samples: usize,
}

impl ChannelBuffer {
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        Self {
            channels: vec![vec![0.0; num_samples]; num_channels],
            num_samples,
        }
    }

    /// Build a buffer holding `data` on every channel
    pub fn from_mono(num_channels: usize, data: &[Sample]) -> Self {
        Self {
            channels: vec![data.to_vec(); num_channels],
            num_samples: data.len(),
        }
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [Sample] {
        &mut self.channels[index]
    }

    /// Read-only views of every channel
    pub fn channel_slices(&self) -> Vec<&[Sample]> {
        self.channels.iter().map(Vec::as_slice).collect()
    }

    /// Mutable views of every channel
    pub fn channel_slices_mut(&mut self) -> Vec<&mut [Sample]> {
        self.channels.iter_mut().map(Vec::as_mut_slice).collect()
    }
}

impl AudioBuffer for ChannelBuffer {
    fn len(&self) -> usize {
        self.num_samples
    }

    fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }
}
