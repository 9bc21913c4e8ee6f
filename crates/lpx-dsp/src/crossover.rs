//! Linear-Phase 3-Way Crossover
//!
//! Splits a signal into low/mid/high bands with linear-phase FIR filters
//! designed from Butterworth prototypes:
//! - Each band IR is an impulse run forwards and backwards through the band's
//!   IIR chain, then square-rooted in magnitude (zero phase, centred at `N / 2`)
//! - Band magnitudes are power complementary, so the bands sum to a pure
//!   `N / 2` sample delay
//! - Parameter changes are designed on a background thread and handed to the
//!   audio thread through [`IrTransfer`] try-locks
//!
//! IR update state machine (one `AtomicU8`):
//!
//! ```text
//! Good --set_parameters--> Needed --updater designs + stages--> Ready
//!   ^                                                            |
//!   +------- process_block: all three bands transferred ---------+
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use lpx_core::{
    CrossoverConfig, DesignSample, LpxError, LpxResult, ProcessSpec, Sample, is_power_of_two,
};

use crate::butterworth::{ButterworthFilter, ButterworthType};
use crate::convolution::ConvolutionEngine;
use crate::fft::RealFftEngine;
use crate::ir_helpers::{IrHelperFft, make_half_magnitude};
use crate::ir_transfer::IrTransfer;
use crate::{MonoProcessor, Processor};

// ═══════════════════════════════════════════════════════════════════════════
// STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Progress of a pending IR update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrUpdateState {
    /// Engines run the IRs for the current parameters
    Good = 0,
    /// Parameters changed, IRs not designed yet
    Needed = 1,
    /// New IRs staged, waiting for the audio thread to pick them up
    Ready = 2,
}

impl From<u8> for IrUpdateState {
    fn from(v: u8) -> Self {
        match v {
            0 => IrUpdateState::Good,
            1 => IrUpdateState::Needed,
            2 => IrUpdateState::Ready,
            _ => IrUpdateState::Good,
        }
    }
}

/// Outcome of [`LinearPhase3WayCrossover::set_parameters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterUpdate {
    /// Same frequencies as the current request
    Unchanged,
    /// New IRs will be designed
    Scheduled,
    /// An earlier update is still in flight; the request was dropped
    AlreadyPending,
    /// Not prepared, or frequencies out of range
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CrossoverParams {
    low_hz: f64,
    high_hz: f64,
}

fn validate_frequencies(low_hz: f64, high_hz: f64, sample_rate: f64) -> LpxResult<()> {
    let nyquist = sample_rate * 0.5;
    if low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist {
        Ok(())
    } else {
        Err(LpxError::InvalidParam(format!(
            "crossover frequencies must satisfy 0 < low < high < {nyquist}, got {low_hz} / {high_hz}"
        )))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IR DESIGN
// ═══════════════════════════════════════════════════════════════════════════

const NUM_BANDS: usize = 3;
const LOW: usize = 0;
const MID: usize = 1;
const HIGH: usize = 2;

fn filter_pair(
    order: usize,
    filter_type: ButterworthType,
    sample_rate: f64,
) -> LpxResult<[ButterworthFilter; 2]> {
    Ok([
        ButterworthFilter::new(order, filter_type, sample_rate)?,
        ButterworthFilter::new(order, filter_type, sample_rate)?,
    ])
}

/// Butterworth prototypes; each band cascades two of each stage
struct PrototypeFilters {
    low_band_high_cut: [ButterworthFilter; 2],
    mid_band_low_cut: [ButterworthFilter; 2],
    mid_band_high_cut: [ButterworthFilter; 2],
    high_band_low_cut: [ButterworthFilter; 2],
}

impl PrototypeFilters {
    fn new(order: usize, sample_rate: f64) -> LpxResult<Self> {
        Ok(Self {
            low_band_high_cut: filter_pair(order, ButterworthType::Lowpass, sample_rate)?,
            mid_band_low_cut: filter_pair(order, ButterworthType::Highpass, sample_rate)?,
            mid_band_high_cut: filter_pair(order, ButterworthType::Lowpass, sample_rate)?,
            high_band_low_cut: filter_pair(order, ButterworthType::Highpass, sample_rate)?,
        })
    }

    fn set_low_crossover(&mut self, freq_hz: f64) -> LpxResult<()> {
        for filter in self
            .low_band_high_cut
            .iter_mut()
            .chain(self.mid_band_low_cut.iter_mut())
        {
            filter.set_cutoff(freq_hz)?;
        }
        Ok(())
    }

    fn set_high_crossover(&mut self, freq_hz: f64) -> LpxResult<()> {
        for filter in self
            .mid_band_high_cut
            .iter_mut()
            .chain(self.high_band_low_cut.iter_mut())
        {
            filter.set_cutoff(freq_hz)?;
        }
        Ok(())
    }

    /// Run `buffer` through one band's chain, each filter from a cleared state
    fn process_band(&mut self, band: usize, buffer: &mut [DesignSample]) {
        let stages: [Option<&mut [ButterworthFilter; 2]>; 2] = match band {
            LOW => [Some(&mut self.low_band_high_cut), None],
            MID => [
                Some(&mut self.mid_band_low_cut),
                Some(&mut self.mid_band_high_cut),
            ],
            _ => [
                Some(&mut self.mid_band_low_cut),
                Some(&mut self.high_band_low_cut),
            ],
        };

        for filter in stages.into_iter().flatten().flatten() {
            filter.reset();
            filter.process_block(buffer);
        }
    }
}

/// Designs the three band IRs for a parameter set (CONTROL THREAD)
struct IrDesigner {
    ir_size: usize,
    filters: PrototypeFilters,
    fft: IrHelperFft,
    ir_buffer: Vec<DesignSample>,
    half_magnitude: Vec<DesignSample>,
    band_irs: [Vec<Sample>; NUM_BANDS],
    /// Parameters of the last successful design
    designed: Option<CrossoverParams>,
}

impl IrDesigner {
    fn new(prototype_order: usize, sample_rate: f64, ir_size: usize) -> LpxResult<Self> {
        Ok(Self {
            ir_size,
            filters: PrototypeFilters::new(prototype_order, sample_rate)?,
            fft: IrHelperFft::new(ir_size)?,
            ir_buffer: vec![0.0; ir_size],
            half_magnitude: vec![0.0; ir_size],
            band_irs: std::array::from_fn(|_| vec![0.0; ir_size]),
            designed: None,
        })
    }

    fn design(&mut self, params: CrossoverParams) -> LpxResult<()> {
        self.filters.set_low_crossover(params.low_hz)?;
        self.filters.set_high_crossover(params.high_hz)?;

        for band in 0..NUM_BANDS {
            self.ir_buffer.fill(0.0);
            self.ir_buffer[self.ir_size / 2 - 1] = 1.0;

            self.filters.process_band(band, &mut self.ir_buffer);
            self.ir_buffer.reverse();
            self.filters.process_band(band, &mut self.ir_buffer);

            // Forward-backward filtering squared the magnitude
            make_half_magnitude(&mut self.half_magnitude, &self.ir_buffer, &mut self.fft)?;

            for (dst, &src) in self.band_irs[band].iter_mut().zip(&self.half_magnitude) {
                *dst = src as Sample;
            }
        }
        self.designed = Some(params);

        log::debug!(
            "Crossover IRs designed: low={} Hz high={} Hz ir={}",
            params.low_hz,
            params.high_hz,
            self.ir_size
        );
        Ok(())
    }

    fn band_ir(&self, band: usize) -> &[Sample] {
        &self.band_irs[band]
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SHARED STATE + UPDATER THREAD
// ═══════════════════════════════════════════════════════════════════════════

/// State shared between the audio side, controllers and the updater thread
struct CrossoverShared {
    state: AtomicU8,
    sample_rate: f64,
    params: Mutex<CrossoverParams>,
    designer: Mutex<IrDesigner>,
    transfers: [IrTransfer<RealFftEngine>; NUM_BANDS],
}

impl CrossoverShared {
    #[inline]
    fn state(&self) -> IrUpdateState {
        self.state.load(Ordering::Acquire).into()
    }

    fn set_parameters(&self, low_hz: f64, high_hz: f64) -> ParameterUpdate {
        if let Err(e) = validate_frequencies(low_hz, high_hz, self.sample_rate) {
            log::warn!("Crossover parameters rejected: {}", e);
            return ParameterUpdate::Rejected;
        }

        let mut params = self.params.lock();
        if params.low_hz == low_hz && params.high_hz == high_hz {
            return ParameterUpdate::Unchanged;
        }

        if self.state() != IrUpdateState::Good {
            return ParameterUpdate::AlreadyPending;
        }

        *params = CrossoverParams { low_hz, high_hz };
        self.state.store(IrUpdateState::Needed as u8, Ordering::Release);
        ParameterUpdate::Scheduled
    }

    /// `Needed -> Ready`: design and stage new IRs. Returns whether any work was done.
    fn service_update(&self) -> LpxResult<bool> {
        if self.state() != IrUpdateState::Needed {
            return Ok(false);
        }

        let params = *self.params.lock();
        let mut designer = self.designer.lock();
        let previous = designer.designed;

        let staged = designer.design(params).and_then(|()| {
            self.transfers
                .iter()
                .enumerate()
                .try_for_each(|(band, transfer)| transfer.set_new_ir(designer.band_ir(band)))
        });

        match staged {
            Ok(()) => {
                self.state.store(IrUpdateState::Ready as u8, Ordering::Release);
                Ok(true)
            }
            Err(e) => {
                // Engines keep the previous IRs, so the params must too
                if let Some(previous) = previous {
                    *self.params.lock() = previous;
                }
                self.state.store(IrUpdateState::Good as u8, Ordering::Release);
                Err(e)
            }
        }
    }
}

/// Background thread that polls for pending IR updates
struct IrUpdater {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IrUpdater {
    fn spawn(shared: Arc<CrossoverShared>, interval: Duration) -> LpxResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("lpx-ir-updater".into())
            .spawn(move || Self::run(shared, flag, interval))?;

        log::info!("Crossover IR updater started ({:?} interval)", interval);

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    fn run(shared: Arc<CrossoverShared>, shutdown: Arc<AtomicBool>, interval: Duration) {
        while !shutdown.load(Ordering::Acquire) {
            if let Err(e) = shared.service_update() {
                log::error!("Crossover IR update failed: {}", e);
            }
            thread::sleep(interval);
        }
    }

    fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Crossover IR updater panicked");
            }
            log::info!("Crossover IR updater stopped");
        }
    }
}

impl Drop for IrUpdater {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════

/// Cloneable handle for changing crossover frequencies from another thread
#[derive(Clone)]
pub struct CrossoverController {
    shared: Arc<CrossoverShared>,
}

impl CrossoverController {
    pub fn set_parameters(&self, low_hz: f64, high_hz: f64) -> ParameterUpdate {
        self.shared.set_parameters(low_hz, high_hz)
    }

    pub fn service_ir_update(&self) -> LpxResult<bool> {
        self.shared.service_update()
    }

    pub fn ir_update_state(&self) -> IrUpdateState {
        self.shared.state()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CROSSOVER
// ═══════════════════════════════════════════════════════════════════════════

/// Linear-phase three-band crossover.
///
/// `ORDER` is the slope of each crossover (even, greater than 2). Latency is
/// half the IR length.
pub struct LinearPhase3WayCrossover<const ORDER: usize> {
    config: CrossoverConfig,
    ir_size: usize,
    /// One engine per channel per band (low, mid, high)
    engines: [Vec<ConvolutionEngine>; NUM_BANDS],
    shared: Option<Arc<CrossoverShared>>,
    updater: Option<IrUpdater>,
}

impl<const ORDER: usize> LinearPhase3WayCrossover<ORDER> {
    const VALID_ORDER: () = assert!(
        ORDER > 2 && ORDER % 2 == 0,
        "crossover order must be even and greater than 2"
    );

    pub fn new() -> Self {
        let () = Self::VALID_ORDER;

        Self {
            config: CrossoverConfig {
                order: ORDER,
                ..CrossoverConfig::default()
            },
            ir_size: 0,
            engines: std::array::from_fn(|_| Vec::new()),
            shared: None,
            updater: None,
        }
    }

    pub fn with_config(config: CrossoverConfig) -> LpxResult<Self> {
        config.validate()?;
        if config.order != ORDER {
            return Err(LpxError::Config(format!(
                "config order {} does not match crossover order {}",
                config.order, ORDER
            )));
        }

        Ok(Self {
            config,
            ..Self::new()
        })
    }

    #[inline]
    pub fn config(&self) -> &CrossoverConfig {
        &self.config
    }

    /// Prepare with an IR length (power of two, at least 4) and initial
    /// crossover frequencies. Designs the initial IRs synchronously.
    pub fn prepare(
        &mut self,
        spec: &ProcessSpec,
        ir_length: usize,
        low_hz: f64,
        high_hz: f64,
    ) -> LpxResult<()> {
        spec.validate()?;
        if ir_length < 4 || !is_power_of_two(ir_length) {
            return Err(LpxError::InvalidParam(format!(
                "crossover IR length must be a power of two >= 4, got {ir_length}"
            )));
        }
        validate_frequencies(low_hz, high_hz, spec.sample_rate)?;

        // Stop any updater still bound to the previous preparation
        self.updater = None;
        self.shared = None;

        let params = CrossoverParams { low_hz, high_hz };
        let mut designer = IrDesigner::new(ORDER / 2, spec.sample_rate, ir_length)?;
        designer.design(params)?;

        let mut engines: [Vec<ConvolutionEngine>; NUM_BANDS] = std::array::from_fn(|_| Vec::new());
        for (band, band_engines) in engines.iter_mut().enumerate() {
            for _ in 0..spec.num_channels {
                band_engines.push(ConvolutionEngine::new(
                    ir_length,
                    spec.maximum_block_size,
                    Some(designer.band_ir(band)),
                )?);
            }
        }

        let transfers = [
            IrTransfer::for_engines(&engines[LOW])?,
            IrTransfer::for_engines(&engines[MID])?,
            IrTransfer::for_engines(&engines[HIGH])?,
        ];

        let shared = Arc::new(CrossoverShared {
            state: AtomicU8::new(IrUpdateState::Good as u8),
            sample_rate: spec.sample_rate,
            params: Mutex::new(params),
            designer: Mutex::new(designer),
            transfers,
        });

        if self.config.background_updates {
            self.updater = Some(IrUpdater::spawn(
                Arc::clone(&shared),
                Duration::from_millis(self.config.update_interval_ms),
            )?);
        }

        self.engines = engines;
        self.shared = Some(shared);
        self.ir_size = ir_length;

        log::info!(
            "LinearPhase3WayCrossover<{}> prepared: fs={} block={} channels={} ir={} low={} Hz high={} Hz",
            ORDER,
            spec.sample_rate,
            spec.maximum_block_size,
            spec.num_channels,
            ir_length,
            low_hz,
            high_hz
        );
        Ok(())
    }

    /// Request new crossover frequencies. Never blocks on the audio thread's
    /// locks; the IRs change at a later block.
    pub fn set_parameters(&self, low_hz: f64, high_hz: f64) -> ParameterUpdate {
        match self.shared.as_ref() {
            Some(shared) => shared.set_parameters(low_hz, high_hz),
            None => {
                log::warn!("Crossover parameters set before prepare");
                ParameterUpdate::Rejected
            }
        }
    }

    /// Handle for parameter changes from another thread (after `prepare`)
    pub fn controller(&self) -> Option<CrossoverController> {
        self.shared.as_ref().map(|shared| CrossoverController {
            shared: Arc::clone(shared),
        })
    }

    /// Design and stage pending IRs now. This is the updater thread's body;
    /// call it directly when background updates are disabled.
    pub fn service_ir_update(&self) -> LpxResult<bool> {
        match self.shared.as_ref() {
            Some(shared) => shared.service_update(),
            None => Ok(false),
        }
    }

    pub fn ir_update_state(&self) -> IrUpdateState {
        self.shared
            .as_ref()
            .map_or(IrUpdateState::Good, |shared| shared.state())
    }

    #[inline]
    pub fn ir_length(&self) -> usize {
        self.ir_size
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.engines[LOW].len()
    }

    /// Split `input` into the three bands (AUDIO THREAD).
    ///
    /// All buffers must have the input's channel count and length.
    pub fn process_block(
        &mut self,
        input: &[&[Sample]],
        low: &mut [&mut [Sample]],
        mid: &mut [&mut [Sample]],
        high: &mut [&mut [Sample]],
    ) -> LpxResult<()> {
        self.check_shapes(input.len(), input.first().map_or(0, |c| c.len()), input)?;
        self.check_outputs(input, low)?;
        self.check_outputs(input, mid)?;
        self.check_outputs(input, high)?;

        self.apply_pending_ir()?;

        for (ch, channel_in) in input.iter().enumerate() {
            self.engines[HIGH][ch].process_samples(channel_in, high[ch])?;
            self.engines[MID][ch].process_samples(channel_in, mid[ch])?;
            self.engines[LOW][ch].process_samples(channel_in, low[ch])?;
        }
        Ok(())
    }

    /// Like [`Self::process_block`], but `low` holds the input on entry and
    /// the low band on return (AUDIO THREAD).
    pub fn process_block_low_in_place(
        &mut self,
        low: &mut [&mut [Sample]],
        mid: &mut [&mut [Sample]],
        high: &mut [&mut [Sample]],
    ) -> LpxResult<()> {
        {
            let input: &[&mut [Sample]] = low;
            let num_samples = input.first().map_or(0, |c| c.len());
            self.check_shapes(input.len(), num_samples, input)?;
            self.check_outputs(input, mid)?;
            self.check_outputs(input, high)?;
        }

        self.apply_pending_ir()?;

        for (ch, channel) in low.iter_mut().enumerate() {
            self.engines[HIGH][ch].process_samples(channel, high[ch])?;
            self.engines[MID][ch].process_samples(channel, mid[ch])?;
            self.engines[LOW][ch].process_samples_in_place(channel);
        }
        Ok(())
    }

    /// `Ready -> Good` once every band has taken the staged IR
    fn apply_pending_ir(&mut self) -> LpxResult<()> {
        let Some(shared) = self.shared.as_ref() else {
            return Err(LpxError::ContractViolation(
                "crossover processed before prepare",
            ));
        };

        if shared.state() == IrUpdateState::Ready {
            let mut transferred = true;
            for (transfer, engines) in shared.transfers.iter().zip(self.engines.iter_mut()) {
                transferred &= transfer.try_transfer_to(engines)?;
            }
            if transferred {
                shared.state.store(IrUpdateState::Good as u8, Ordering::Release);
            }
        }
        Ok(())
    }

    fn check_shapes<T: AsRef<[Sample]>>(
        &self,
        num_channels: usize,
        num_samples: usize,
        buffers: &[T],
    ) -> LpxResult<()> {
        if num_channels > self.num_channels() {
            return Err(LpxError::ContractViolation(
                "more channels than the crossover was prepared for",
            ));
        }
        if buffers.iter().any(|c| c.as_ref().len() != num_samples) {
            return Err(LpxError::ContractViolation(
                "crossover channels differ in length",
            ));
        }
        Ok(())
    }

    fn check_outputs<T: AsRef<[Sample]>>(
        &self,
        input: &[T],
        output: &[&mut [Sample]],
    ) -> LpxResult<()> {
        let num_samples = input.first().map_or(0, |c| c.as_ref().len());
        if output.len() != input.len() {
            return Err(LpxError::ContractViolation(
                "crossover output channel count differs from input",
            ));
        }
        if output.iter().any(|c| c.len() != num_samples) {
            return Err(LpxError::ContractViolation(
                "crossover output length differs from input",
            ));
        }
        Ok(())
    }
}

impl<const ORDER: usize> Default for LinearPhase3WayCrossover<ORDER> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const ORDER: usize> Processor for LinearPhase3WayCrossover<ORDER> {
    fn reset(&mut self) {
        for engine in self.engines.iter_mut().flatten() {
            engine.reset();
        }
    }

    fn latency(&self) -> usize {
        self.ir_size / 2
    }
}

impl<const ORDER: usize> LinearPhase3WayCrossover<ORDER> {
    /// Clear convolution state in every band
    #[inline]
    pub fn reset(&mut self) {
        Processor::reset(self);
    }

    /// Band delay in samples (`ir_length / 2`)
    #[inline]
    pub fn latency(&self) -> usize {
        Processor::latency(self)
    }
}
