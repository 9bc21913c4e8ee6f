//! Uniform-Partitioned Convolution Engine
//!
//! Streaming overlap-add convolution against a fixed-length impulse response:
//! - Uniform partitioning, one FFT per processed (sub-)block
//! - Zero-latency mode that re-transforms the partially filled block on every call
//! - One-block-latency mode that only transforms full blocks
//! - IR contents can be replaced at runtime (see [`crate::ir_transfer`]), IR length cannot
//!
//! Spectra are kept in a split layout (real parts, then imaginary parts, then
//! the Nyquist bin at index `fft_size`) so a complex multiply-accumulate is
//! four vector multiply-adds over contiguous halves.
//!
//! ```ignore
//! let mut engine = ConvolutionEngine::<RealFftEngine>::new(ir.len(), 256, Some(&ir))?;
//! engine.process_samples(&input, &mut output)?;
//! ```

use lpx_core::{LpxError, LpxResult, Sample, next_power_of_two};

use crate::Processor;
use crate::fft::{RealFft, RealFftEngine};
use crate::vector_ops;

// ============ Constants ============

/// Blocks up to this size use a 4x FFT and three input segments per IR segment
const SHORT_BLOCK_THRESHOLD: usize = 128;

// ============ Partitioning ============

/// Buffer geometry of an engine, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partitioning {
    /// Impulse response length in samples
    pub ir_num_samples: usize,
    /// Host block size rounded up to a power of two
    pub block_size: usize,
    /// Transform size
    pub fft_size: usize,
    /// Number of IR partitions
    pub num_segments: usize,
    /// Size of the ring of transformed input blocks
    pub num_input_segments: usize,
}

impl Partitioning {
    pub fn new(ir_num_samples: usize, max_block_size: usize) -> LpxResult<Self> {
        if ir_num_samples == 0 {
            return Err(LpxError::InvalidParam(
                "impulse response length must be non-zero".into(),
            ));
        }
        if max_block_size == 0 {
            return Err(LpxError::InvalidParam(
                "maximum block size must be non-zero".into(),
            ));
        }

        let block_size = next_power_of_two(max_block_size);
        let short_blocks = block_size <= SHORT_BLOCK_THRESHOLD;
        let fft_size = if short_blocks {
            4 * block_size
        } else {
            2 * block_size
        };
        let num_segments = ir_num_samples / (fft_size - block_size) + 1;
        let num_input_segments = if short_blocks {
            3 * num_segments
        } else {
            num_segments
        };

        Ok(Self {
            ir_num_samples,
            block_size,
            fft_size,
            num_segments,
            num_input_segments,
        })
    }

    /// IR samples held by each partition
    #[inline]
    pub fn segment_length(&self) -> usize {
        self.fft_size - self.block_size
    }

    /// Input-ring distance between consecutive IR partitions
    #[inline]
    pub fn index_step(&self) -> usize {
        self.num_input_segments / self.num_segments
    }

    /// Length of every frequency-domain segment buffer
    #[inline]
    pub fn segment_buffer_len(&self) -> usize {
        2 * self.fft_size
    }

    pub(crate) fn make_segments(&self, count: usize) -> Vec<Vec<Sample>> {
        (0..count)
            .map(|_| vec![0.0; self.segment_buffer_len()])
            .collect()
    }
}

// ============ Spectrum Layout Helpers ============

/// Repack an interleaved full spectrum into the split layout used for
/// multiply-accumulate: `[re 0..N/2) [0, im 1..N/2) [nyquist re]`.
pub fn prepare_for_convolution(samples: &mut [Sample], fft_size: usize) {
    let half = fft_size / 2;

    for i in 0..half {
        samples[i] = samples[i << 1];
    }

    samples[half] = 0.0;

    // im[i] = -im[N - i] for a real signal
    for i in 1..half {
        samples[i + half] = -samples[((fft_size - i) << 1) + 1];
    }
}

/// Complex multiply-accumulate of two split-layout spectra into `output`
pub fn convolution_processing_and_accumulate(
    fft_size: usize,
    input: &[Sample],
    impulse: &[Sample],
    output: &mut [Sample],
) {
    let half = fft_size / 2;

    let (input_re, input_im) = (&input[..half], &input[half..fft_size]);
    let (impulse_re, impulse_im) = (&impulse[..half], &impulse[half..fft_size]);

    {
        let (output_re, rest) = output.split_at_mut(half);
        let output_im = &mut rest[..half];

        vector_ops::add_with_multiply(output_re, input_re, impulse_re);
        vector_ops::subtract_with_multiply(output_re, input_im, impulse_im);

        vector_ops::add_with_multiply(output_im, input_re, impulse_im);
        vector_ops::add_with_multiply(output_im, input_im, impulse_re);
    }

    output[fft_size] += input[fft_size] * impulse[fft_size];
}

/// Undo [`prepare_for_convolution`]: rebuild the interleaved spectrum with
/// Hermitian symmetry so the inverse transform yields a real signal.
pub fn update_symmetric_frequency_domain_data(samples: &mut [Sample], fft_size: usize) {
    let half = fft_size / 2;

    for i in 1..half {
        samples[(fft_size - i) << 1] = samples[i];
        samples[((fft_size - i) << 1) + 1] = -samples[half + i];
    }

    samples[1] = 0.0;

    for i in 1..half {
        samples[i << 1] = samples[(fft_size - i) << 1];
        samples[(i << 1) + 1] = -samples[((fft_size - i) << 1) + 1];
    }
}

/// Cut `ir` into partitions, transform each and store it in split layout
pub(crate) fn fill_impulse_segments<F: RealFft>(
    fft: &mut F,
    partitioning: &Partitioning,
    ir: &[Sample],
    segments: &mut [Vec<Sample>],
) -> LpxResult<()> {
    if ir.len() != partitioning.ir_num_samples {
        return Err(LpxError::InvalidIrLength {
            expected: partitioning.ir_num_samples,
            actual: ir.len(),
        });
    }

    let segment_length = partitioning.segment_length();
    for (i, segment) in segments.iter_mut().enumerate() {
        segment.fill(0.0);

        let offset = i * segment_length;
        let count = segment_length.min(partitioning.ir_num_samples.saturating_sub(offset));
        vector_ops::copy(&mut segment[..count], &ir[offset..offset + count]);

        fft.forward(segment);
        prepare_for_convolution(segment, partitioning.fft_size);
    }

    Ok(())
}

// ============ Convolution Engine ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatencyMode {
    Zero,
    OneBlock,
}

/// Single-channel uniform-partitioned convolution engine.
///
/// The IR length is fixed for the lifetime of the engine; IR contents may be
/// replaced with [`ConvolutionEngine::set_new_ir`] or through an
/// [`IrTransfer`](crate::ir_transfer::IrTransfer). A given engine should be
/// driven through one latency mode only.
pub struct ConvolutionEngine<F: RealFft = RealFftEngine> {
    partitioning: Partitioning,
    fft: F,
    current_segment: usize,
    input_data_pos: usize,

    /// Time-domain accumulation of the current block (`fft_size`)
    buffer_input: Vec<Sample>,
    /// Spectrum / IFFT output of the current call (`2 * fft_size`)
    buffer_output: Vec<Sample>,
    /// Contribution of all but the newest partition (`2 * fft_size`)
    buffer_temp_output: Vec<Sample>,
    /// Overlap-add tail (`fft_size`)
    buffer_overlap: Vec<Sample>,

    pub(crate) input_segments: Vec<Vec<Sample>>,
    pub(crate) impulse_segments: Vec<Vec<Sample>>,
}

impl<F: RealFft> ConvolutionEngine<F> {
    /// Create an engine for an IR of `num_samples`. Later IRs loaded into
    /// this engine MUST have the same length.
    pub fn new(
        num_samples: usize,
        max_block_size: usize,
        initial_ir: Option<&[Sample]>,
    ) -> LpxResult<Self> {
        let partitioning = Partitioning::new(num_samples, max_block_size)?;
        let fft = F::new(partitioning.fft_size)?;

        let mut engine = Self {
            partitioning,
            fft,
            current_segment: 0,
            input_data_pos: 0,
            buffer_input: vec![0.0; partitioning.fft_size],
            buffer_output: vec![0.0; 2 * partitioning.fft_size],
            buffer_temp_output: vec![0.0; 2 * partitioning.fft_size],
            buffer_overlap: vec![0.0; partitioning.fft_size],
            input_segments: partitioning.make_segments(partitioning.num_input_segments),
            impulse_segments: partitioning.make_segments(partitioning.num_segments),
        };

        if let Some(ir) = initial_ir {
            engine.set_new_ir(ir)?;
        }

        engine.reset();

        log::debug!(
            "ConvolutionEngine: ir={} block={} fft={} segments={} input_segments={}",
            partitioning.ir_num_samples,
            partitioning.block_size,
            partitioning.fft_size,
            partitioning.num_segments,
            partitioning.num_input_segments
        );

        Ok(engine)
    }

    #[inline]
    pub fn partitioning(&self) -> &Partitioning {
        &self.partitioning
    }

    #[inline]
    pub fn ir_num_samples(&self) -> usize {
        self.partitioning.ir_num_samples
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.partitioning.block_size
    }

    /// Latency of [`Self::process_samples_with_added_latency`]
    #[inline]
    pub fn added_latency(&self) -> usize {
        self.partitioning.block_size
    }

    /// Load new IR contents (same length). Transforms every partition, so
    /// call it from a control thread or before processing starts.
    pub fn set_new_ir(&mut self, new_ir: &[Sample]) -> LpxResult<()> {
        fill_impulse_segments(
            &mut self.fft,
            &self.partitioning,
            new_ir,
            &mut self.impulse_segments,
        )
    }

    /// Zero-latency overlap-add convolution of `input` into `output`
    pub fn process_samples(&mut self, input: &[Sample], output: &mut [Sample]) -> LpxResult<()> {
        if input.len() != output.len() {
            return Err(LpxError::ContractViolation(
                "convolution input and output lengths differ",
            ));
        }
        self.process_io(Some(input), output, LatencyMode::Zero);
        Ok(())
    }

    /// Zero-latency convolution of `buffer` in place
    pub fn process_samples_in_place(&mut self, buffer: &mut [Sample]) {
        self.process_io(None, buffer, LatencyMode::Zero);
    }

    /// Convolution with one block of added latency; transforms only full blocks
    pub fn process_samples_with_added_latency(
        &mut self,
        input: &[Sample],
        output: &mut [Sample],
    ) -> LpxResult<()> {
        if input.len() != output.len() {
            return Err(LpxError::ContractViolation(
                "convolution input and output lengths differ",
            ));
        }
        self.process_io(Some(input), output, LatencyMode::OneBlock);
        Ok(())
    }

    /// One-block-latency convolution of `buffer` in place
    pub fn process_samples_with_added_latency_in_place(&mut self, buffer: &mut [Sample]) {
        self.process_io(None, buffer, LatencyMode::OneBlock);
    }

    fn process_io(&mut self, input: Option<&[Sample]>, output: &mut [Sample], mode: LatencyMode) {
        let num_samples = output.len();
        let mut num_samples_processed = 0;

        while num_samples_processed < num_samples {
            let count = (num_samples - num_samples_processed)
                .min(self.partitioning.block_size - self.input_data_pos);
            let chunk = num_samples_processed..num_samples_processed + count;

            let source = match input {
                Some(input) => &input[chunk.clone()],
                None => &output[chunk.clone()],
            };
            vector_ops::copy(
                &mut self.buffer_input[self.input_data_pos..self.input_data_pos + count],
                source,
            );

            match mode {
                LatencyMode::Zero => self.render_zero_latency(&mut output[chunk]),
                LatencyMode::OneBlock => self.render_with_added_latency(&mut output[chunk]),
            }

            num_samples_processed += count;
        }
    }

    /// Transform the (possibly partial) current block and emit its output
    fn render_zero_latency(&mut self, output: &mut [Sample]) {
        let pos = self.input_data_pos;
        let count = output.len();
        let input_data_was_empty = pos == 0;

        self.transform_current_input();

        // The older partitions only change once per block
        if input_data_was_empty {
            self.accumulate_history();
        }

        self.combine_and_inverse();

        vector_ops::add_into(
            output,
            &self.buffer_output[pos..pos + count],
            &self.buffer_overlap[pos..pos + count],
        );

        self.input_data_pos += count;
        if self.input_data_pos == self.partitioning.block_size {
            self.finish_block();
        }
    }

    /// Emit the previous block's output; convolve once the block is full
    fn render_with_added_latency(&mut self, output: &mut [Sample]) {
        let block_size = self.partitioning.block_size;
        let pos = self.input_data_pos;
        let count = output.len();

        vector_ops::copy(output, &self.buffer_output[pos..pos + count]);

        self.input_data_pos += count;
        if self.input_data_pos == block_size {
            self.transform_current_input();
            self.accumulate_history();
            self.combine_and_inverse();

            vector_ops::add(
                &mut self.buffer_output[..block_size],
                &self.buffer_overlap[..block_size],
            );

            self.finish_block();
        }
    }

    fn transform_current_input(&mut self) {
        let fft_size = self.partitioning.fft_size;
        let segment = &mut self.input_segments[self.current_segment];

        vector_ops::copy(&mut segment[..fft_size], &self.buffer_input);
        self.fft.forward(segment);
        prepare_for_convolution(segment, fft_size);
    }

    /// Sum every partition except the newest against its delayed input segment
    fn accumulate_history(&mut self) {
        let fft_size = self.partitioning.fft_size;
        let num_input_segments = self.partitioning.num_input_segments;
        let index_step = self.partitioning.index_step();

        vector_ops::fill(&mut self.buffer_temp_output[..=fft_size], 0.0);

        let mut index = self.current_segment;
        for impulse in self.impulse_segments.iter().skip(1) {
            index += index_step;
            if index >= num_input_segments {
                index -= num_input_segments;
            }

            convolution_processing_and_accumulate(
                fft_size,
                &self.input_segments[index],
                impulse,
                &mut self.buffer_temp_output,
            );
        }
    }

    /// Newest partition + accumulated history, back to the time domain
    fn combine_and_inverse(&mut self) {
        let fft_size = self.partitioning.fft_size;

        vector_ops::copy(
            &mut self.buffer_output[..=fft_size],
            &self.buffer_temp_output[..=fft_size],
        );

        convolution_processing_and_accumulate(
            fft_size,
            &self.input_segments[self.current_segment],
            &self.impulse_segments[0],
            &mut self.buffer_output,
        );

        update_symmetric_frequency_domain_data(&mut self.buffer_output, fft_size);
        self.fft.inverse(&mut self.buffer_output);
    }

    /// Input block complete: save the overlap tail and step the segment ring
    fn finish_block(&mut self) {
        let Partitioning {
            block_size,
            fft_size,
            num_input_segments,
            ..
        } = self.partitioning;

        vector_ops::fill(&mut self.buffer_input, 0.0);
        self.input_data_pos = 0;

        // Only non-empty when fft_size > 2 * block_size
        let tail = fft_size - 2 * block_size;
        vector_ops::add(
            &mut self.buffer_output[block_size..block_size + tail],
            &self.buffer_overlap[block_size..block_size + tail],
        );

        vector_ops::copy(
            &mut self.buffer_overlap[..fft_size - block_size],
            &self.buffer_output[block_size..fft_size],
        );

        self.current_segment = if self.current_segment > 0 {
            self.current_segment - 1
        } else {
            num_input_segments - 1
        };
    }
}

impl<F: RealFft> ConvolutionEngine<F> {
    /// Clear all streaming state; the loaded IR is kept
    pub fn reset(&mut self) {
        vector_ops::fill(&mut self.buffer_input, 0.0);
        vector_ops::fill(&mut self.buffer_overlap, 0.0);
        vector_ops::fill(&mut self.buffer_temp_output, 0.0);
        vector_ops::fill(&mut self.buffer_output, 0.0);

        for segment in &mut self.input_segments {
            segment.fill(0.0);
        }

        self.current_segment = 0;
        self.input_data_pos = 0;
    }
}

impl<F: RealFft> Processor for ConvolutionEngine<F> {
    fn reset(&mut self) {
        ConvolutionEngine::reset(self);
    }
}

// ============ Tests ============

#[cfg(test)]
mod tests {
    use super::*;

    type Engine = ConvolutionEngine<RealFftEngine>;

    #[test]
    fn test_partitioning_long_blocks() {
        let p = Partitioning::new(1024, 200).unwrap();
        assert_eq!(p.block_size, 256);
        assert_eq!(p.fft_size, 512);
        assert_eq!(p.segment_length(), 256);
        assert_eq!(p.num_segments, 5);
        assert_eq!(p.num_input_segments, 5);
        assert_eq!(p.index_step(), 1);
    }

    #[test]
    fn test_partitioning_short_blocks() {
        let p = Partitioning::new(256, 128).unwrap();
        assert_eq!(p.block_size, 128);
        assert_eq!(p.fft_size, 512);
        assert_eq!(p.segment_length(), 384);
        assert_eq!(p.num_segments, 1);
        assert_eq!(p.num_input_segments, 3);
        assert_eq!(p.index_step(), 3);
    }

    #[test]
    fn test_partitioning_rejects_empty() {
        assert!(Partitioning::new(0, 128).is_err());
        assert!(Partitioning::new(128, 0).is_err());
    }

    #[test]
    fn test_prepare_and_restore_spectrum() {
        let fft_size = 16;
        let mut fft = RealFftEngine::new(fft_size).unwrap();
        let signal: Vec<f32> = (0..fft_size).map(|i| ((i * 3) % 7) as f32 - 3.0).collect();

        let mut buffer = vec![0.0; 2 * fft_size];
        buffer[..fft_size].copy_from_slice(&signal);
        fft.forward(&mut buffer);
        let reference = buffer.clone();

        prepare_for_convolution(&mut buffer, fft_size);
        update_symmetric_frequency_domain_data(&mut buffer, fft_size);

        // Bins 0..=N/2 are restored (DC/Nyquist imaginary parts are zero anyway)
        for k in 0..fft_size / 2 {
            assert!((buffer[2 * k] - reference[2 * k]).abs() < 1e-4);
            assert!((buffer[2 * k + 1] - reference[2 * k + 1]).abs() < 1e-4);
        }
        assert!((buffer[fft_size] - reference[fft_size]).abs() < 1e-4);

        fft.inverse(&mut buffer);
        for (a, b) in buffer[..fft_size].iter().zip(&signal) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_split_layout_multiply_matches_complex_product() {
        let fft_size = 8;
        let half = fft_size / 2;
        let mut input = vec![0.0; 2 * fft_size];
        let mut impulse = vec![0.0; 2 * fft_size];
        for i in 0..=fft_size {
            input[i] = i as f32 * 0.5 + 1.0;
            impulse[i] = 2.0 - i as f32 * 0.25;
        }
        input[half] = 0.0;
        impulse[half] = 0.0;

        let mut output = vec![0.0; 2 * fft_size];
        convolution_processing_and_accumulate(fft_size, &input, &impulse, &mut output);

        for k in 1..half {
            let (a, b) = (input[k], input[half + k]);
            let (c, d) = (impulse[k], impulse[half + k]);
            assert!((output[k] - (a * c - b * d)).abs() < 1e-5);
            assert!((output[half + k] - (a * d + b * c)).abs() < 1e-5);
        }
        assert!((output[0] - input[0] * impulse[0]).abs() < 1e-5);
        assert!((output[fft_size] - input[fft_size] * impulse[fft_size]).abs() < 1e-5);
    }

    #[test]
    fn test_set_new_ir_rejects_wrong_length() {
        let mut engine = Engine::new(64, 32, None).unwrap();
        assert_eq!(engine.ir_num_samples(), 64);
        assert_eq!(engine.block_size(), 32);
        let err = engine.set_new_ir(&[0.0; 63]).unwrap_err();
        assert!(matches!(
            err,
            LpxError::InvalidIrLength {
                expected: 64,
                actual: 63
            }
        ));
    }

    #[test]
    fn test_mismatched_io_is_contract_violation() {
        let mut engine = Engine::new(64, 32, None).unwrap();
        let input = vec![0.0; 16];
        let mut output = vec![0.0; 15];
        let err = engine.process_samples(&input, &mut output).unwrap_err();
        assert!(err.is_contract_violation());
        let err = engine
            .process_samples_with_added_latency(&input, &mut output)
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut ir = vec![0.0; 128];
        ir[0] = 1.0;
        ir[100] = 0.5;
        let mut engine = Engine::new(128, 64, Some(&ir)).unwrap();

        let mut buffer = vec![1.0; 64];
        engine.process_samples_in_place(&mut buffer);

        engine.reset();
        assert_eq!(engine.input_data_pos, 0);
        assert_eq!(engine.current_segment, 0);

        // Fresh engine state: silence in, silence out
        let mut silence = vec![0.0; 256];
        engine.process_samples_in_place(&mut silence);
        assert!(silence.iter().all(|x| x.abs() < 1e-6));
    }

    #[test]
    fn test_segment_ring_rotates_backwards() {
        let mut engine = Engine::new(512, 64, None).unwrap();
        let nis = engine.partitioning().num_input_segments;

        let mut block = vec![0.0; 64];
        engine.process_samples_in_place(&mut block);
        assert_eq!(engine.current_segment, nis - 1);

        engine.process_samples_in_place(&mut block);
        assert_eq!(engine.current_segment, nis - 2);

        // Half a block does not rotate
        engine.process_samples_in_place(&mut block[..32]);
        assert_eq!(engine.current_segment, nis - 2);
        assert_eq!(engine.input_data_pos, 32);
    }
}
