//! Exposure convergence service.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::clock::{self, Clock};
use crate::convergence::{
    ConvergenceController, ConvergenceOutcome, ConvergencePlant, ConvergenceTarget,
};
use crate::shutdown::ShutdownSignal;
use crate::traits::{CameraDevice, Result};

/// Time the camera gets to report the requested exposure.
pub const EXPOSURE_DEADLINE: Duration = Duration::from_secs(5);

/// Exposure is re-read at this rate while waiting.
pub const EXPOSURE_POLL_HZ: f64 = 5.0;

/// Result of a `SetExposure` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureOutcome {
    /// The camera reports the requested exposure within one exposure step.
    Converged,
    /// The camera was not ready; nothing was written.
    NotReady,
    /// The camera did not reach the exposure in time.
    TimedOut,
    /// Shutdown was requested while waiting.
    Aborted,
    /// Reading or writing the exposure failed.
    DeviceError,
}

impl ExposureOutcome {
    /// The `success` field of the service response.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Converged)
    }
}

struct ExposurePlant<'a> {
    device: &'a dyn CameraDevice,
}

impl ConvergencePlant for ExposurePlant<'_> {
    fn read(&mut self) -> Result<f64> {
        self.device.current_exposure()
    }

    fn apply(&mut self, target: f64) -> Result<()> {
        self.device.set_exposure(target)
    }

    fn is_converged(&mut self, current: f64, target: &ConvergenceTarget) -> bool {
        (current - target.target_value).abs() < target.tolerance
    }
}

/// Drives the camera exposure to a requested value.
pub struct ExposureService {
    device: Arc<dyn CameraDevice>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<ShutdownSignal>,
}

impl ExposureService {
    /// Create the service.
    pub fn new(
        device: Arc<dyn CameraDevice>,
        clock: Arc<dyn Clock>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            device,
            clock,
            shutdown,
        }
    }

    /// Set the exposure to `target` microseconds and wait until the camera
    /// reports it, for at most [`EXPOSURE_DEADLINE`].
    ///
    /// Fails immediately with [`ExposureOutcome::NotReady`] if the camera is
    /// not ready.
    pub fn set_exposure(&self, target: f64) -> ExposureOutcome {
        if !self.device.is_ready() {
            warn!(target, "exposure request while camera is not ready");
            return ExposureOutcome::NotReady;
        }

        match self.converge(target) {
            Ok(ConvergenceOutcome::Converged) => {
                info!(target, "exposure reached");
                ExposureOutcome::Converged
            }
            Ok(ConvergenceOutcome::TimedOut) => {
                error!(target, "did not reach the required exposure in time");
                ExposureOutcome::TimedOut
            }
            Ok(ConvergenceOutcome::Aborted) => ExposureOutcome::Aborted,
            Err(err) => {
                warn!(target, error = %err, "exposure access failed");
                ExposureOutcome::DeviceError
            }
        }
    }

    fn converge(&self, target: f64) -> Result<ConvergenceOutcome> {
        let goal = ConvergenceTarget {
            target_value: target,
            tolerance: self.device.exposure_step()?,
            deadline: EXPOSURE_DEADLINE,
        };
        let controller = ConvergenceController::new(
            self.clock.as_ref(),
            &self.shutdown,
            clock::rate(EXPOSURE_POLL_HZ),
        );
        let mut plant = ExposurePlant {
            device: self.device.as_ref(),
        };
        controller.run(&mut plant, &goal)
    }
}
