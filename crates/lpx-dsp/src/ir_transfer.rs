//! IR staging for glitch-free impulse response swaps
//!
//! A control thread designs a new IR and transforms it into partition spectra
//! under a `parking_lot::Mutex` (CONTROL THREAD). The audio thread later
//! try-locks the same mutex and copies the finished spectra into its engines
//! (AUDIO THREAD). If the lock is held, the audio thread simply retries on its
//! next block, so it never waits on the designer.

use parking_lot::{Mutex, MutexGuard};

use lpx_core::{LpxError, LpxResult, Sample};

use crate::convolution::{ConvolutionEngine, Partitioning, fill_impulse_segments};
use crate::fft::{RealFft, RealFftEngine};
use crate::vector_ops;

/// Staged partition spectra plus the transform used to build them
struct StagedIr<F: RealFft> {
    fft: F,
    segments: Vec<Vec<Sample>>,
}

/// Lock-guarded staging area mirroring the geometry of a reference engine
pub struct IrTransfer<F: RealFft = RealFftEngine> {
    partitioning: Partitioning,
    staged: Mutex<StagedIr<F>>,
}

impl<F: RealFft> IrTransfer<F> {
    /// Stage for engines with the same partitioning as `engine`
    pub fn new<E: RealFft>(engine: &ConvolutionEngine<E>) -> LpxResult<Self> {
        let partitioning = *engine.partitioning();
        let staged = StagedIr {
            fft: F::new(partitioning.fft_size)?,
            segments: partitioning.make_segments(partitioning.num_segments),
        };

        Ok(Self {
            partitioning,
            staged: Mutex::new(staged),
        })
    }

    /// Stage for a group of engines that must all share one geometry
    pub fn for_engines<E: RealFft>(engines: &[ConvolutionEngine<E>]) -> LpxResult<Self> {
        let Some(first) = engines.first() else {
            return Err(LpxError::InvalidParam(
                "IR transfer needs at least one engine".into(),
            ));
        };

        if engines
            .iter()
            .any(|engine| engine.partitioning() != first.partitioning())
        {
            return Err(LpxError::ContractViolation(
                "engines sharing an IR transfer must have identical partitioning",
            ));
        }

        Self::new(first)
    }

    #[inline]
    pub fn partitioning(&self) -> &Partitioning {
        &self.partitioning
    }

    /// Transform `new_ir` into the staging area.
    ///
    /// Blocks until the lock is free. CONTROL THREAD ONLY.
    pub fn set_new_ir(&self, new_ir: &[Sample]) -> LpxResult<()> {
        let mut staged = self.staged.lock();
        let StagedIr { fft, segments } = &mut *staged;
        fill_impulse_segments(fft, &self.partitioning, new_ir, segments)?;

        log::debug!(
            "IrTransfer: staged {} samples in {} segments",
            new_ir.len(),
            self.partitioning.num_segments
        );
        Ok(())
    }

    /// Non-blocking lock attempt; `None` means the staging area is busy
    #[inline]
    pub fn try_lock(&self) -> Option<IrTransferGuard<'_, F>> {
        self.staged.try_lock().map(|staged| IrTransferGuard {
            partitioning: &self.partitioning,
            staged,
        })
    }

    /// Blocking lock. CONTROL THREAD ONLY.
    pub fn lock(&self) -> IrTransferGuard<'_, F> {
        IrTransferGuard {
            partitioning: &self.partitioning,
            staged: self.staged.lock(),
        }
    }

    /// Try-lock and copy the staged IR into every engine.
    ///
    /// `Ok(false)` means the lock was busy and nothing was copied; try again
    /// on the next block. Safe to call from the audio thread.
    pub fn try_transfer_to<E: RealFft>(
        &self,
        engines: &mut [ConvolutionEngine<E>],
    ) -> LpxResult<bool> {
        let Some(guard) = self.try_lock() else {
            return Ok(false);
        };

        for engine in engines.iter_mut() {
            guard.transfer_ir(engine)?;
        }
        Ok(true)
    }
}

/// Held lock on an [`IrTransfer`] staging area
pub struct IrTransferGuard<'a, F: RealFft> {
    partitioning: &'a Partitioning,
    staged: MutexGuard<'a, StagedIr<F>>,
}

impl<F: RealFft> IrTransferGuard<'_, F> {
    /// Copy the staged partition spectra into `engine` verbatim
    pub fn transfer_ir<E: RealFft>(&self, engine: &mut ConvolutionEngine<E>) -> LpxResult<()> {
        if engine.partitioning() != self.partitioning {
            return Err(LpxError::ContractViolation(
                "engine partitioning differs from IR transfer",
            ));
        }

        for (target, source) in engine
            .impulse_segments
            .iter_mut()
            .zip(self.staged.segments.iter())
        {
            vector_ops::copy(target, source);
        }
        Ok(())
    }
}
