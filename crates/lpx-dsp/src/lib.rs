//! lpx-dsp: partitioned convolution and linear-phase crossover
//!
//! Real-time-safe FFT convolution with hot-swappable impulse responses.
//!
//! ## Modules
//! - `fft` - Real-only FFT adapter (packed interleaved spectrum layout)
//! - `vector_ops` - Elementwise float kernels for the convolution hot path
//! - `convolution` - Uniform-partitioned overlap-add convolution engine
//! - `ir_transfer` - Lock-guarded IR staging for glitch-free IR swaps
//! - `biquad` - TDF-II biquad and first-order sections
//! - `butterworth` - Arbitrary-order Butterworth prototypes
//! - `ir_helpers` - Half-magnitude, linear-phase and minimum-phase IR transforms
//! - `crossover` - Linear-phase 3-way crossover

pub mod biquad;
pub mod butterworth;
pub mod convolution;
pub mod crossover;
pub mod fft;
pub mod ir_helpers;
pub mod ir_transfer;
pub mod vector_ops;

pub use convolution::{ConvolutionEngine, Partitioning};
pub use crossover::{CrossoverController, IrUpdateState, LinearPhase3WayCrossover, ParameterUpdate};
pub use fft::{RealFft, RealFftEngine};
pub use ir_transfer::{IrTransfer, IrTransferGuard};

use lpx_core::DesignSample;

/// Trait for all DSP processors
pub trait Processor: Send + Sync {
    /// Reset processor state
    fn reset(&mut self);

    /// Get latency in samples
    fn latency(&self) -> usize {
        0
    }
}

/// Mono processor trait for the `f64` design-time filters
pub trait MonoProcessor: Processor {
    /// Process a single sample
    fn process_sample(&mut self, input: DesignSample) -> DesignSample;

    /// Process a block of samples
    fn process_block(&mut self, buffer: &mut [DesignSample]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}
