//! Brightness convergence service.
//!
//! Brightness is measured from the live frame. After one write of the target
//! to the camera's auto brightness function the service waits on a liveness
//! flag that the periodic publisher clears once the camera stops adjusting,
//! then validates the result against a fresh frame measurement.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::clock::{self, Clock};
use crate::convergence::{
    ConvergenceController, ConvergenceOutcome, ConvergencePlant, ConvergenceTarget,
};
use crate::grab::GrabCoordinator;
use crate::shutdown::ShutdownSignal;
use crate::traits::{CameraDevice, CameraError, Result};
use crate::validation::{self, BRIGHTNESS_TOLERANCE};

/// Time the auto brightness function gets to settle.
pub const BRIGHTNESS_DEADLINE: Duration = Duration::from_secs(5);

/// Targets above this value get [`SATURATED_BRIGHTNESS_DEADLINE`].
pub const SATURATION_THRESHOLD: u8 = 205;

/// Time budget for near-saturation targets, which need long exposures.
pub const SATURATED_BRIGHTNESS_DEADLINE: Duration = Duration::from_secs(15);

/// Longest wait for the camera to become ready.
pub const READY_DEADLINE: Duration = Duration::from_secs(3);

/// Readiness is checked at this rate while waiting.
pub const READY_POLL_HZ: f64 = 2.0;

/// The liveness flag is checked at this rate while waiting.
pub const BRIGHTNESS_POLL_HZ: f64 = 5.0;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const SETTLED: u8 = 2;
const TIMED_OUT: u8 = 3;

/// State of the current brightness adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoBrightnessPhase {
    /// No adjustment has been requested.
    Idle,
    /// The camera is adjusting towards a target.
    Running,
    /// The camera reported that it stopped adjusting.
    Settled,
    /// The requesting service gave up waiting.
    TimedOut,
}

/// Liveness flag of the camera's auto brightness function.
///
/// Leaving `Running` is a single compare-and-swap, so when the camera settles
/// just as the deadline passes exactly one of [`Self::settle`] and
/// [`Self::time_out`] wins.
#[derive(Debug, Default)]
pub struct AutoBrightnessState {
    phase: AtomicU8,
}

impl AutoBrightnessState {
    /// Create an idle flag.
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(IDLE),
        }
    }

    /// Mark an adjustment as started.
    pub fn begin(&self) {
        self.phase.store(RUNNING, Ordering::Release);
    }

    /// Running to settled. Returns `true` if this call ended the adjustment.
    pub fn settle(&self) -> bool {
        self.finish(SETTLED)
    }

    /// Running to timed out. Returns `false` if the adjustment already settled.
    pub fn time_out(&self) -> bool {
        self.finish(TIMED_OUT)
    }

    /// Whether an adjustment is in progress.
    pub fn is_running(&self) -> bool {
        self.phase.load(Ordering::Acquire) == RUNNING
    }

    /// Current phase.
    pub fn phase(&self) -> AutoBrightnessPhase {
        match self.phase.load(Ordering::Acquire) {
            RUNNING => AutoBrightnessPhase::Running,
            SETTLED => AutoBrightnessPhase::Settled,
            TIMED_OUT => AutoBrightnessPhase::TimedOut,
            _ => AutoBrightnessPhase::Idle,
        }
    }

    fn finish(&self, to: u8) -> bool {
        self.phase
            .compare_exchange(RUNNING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Result of a `SetBrightness` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessOutcome {
    /// The camera settled and the frame brightness matches the target.
    Converged,
    /// No frame was available within [`READY_DEADLINE`].
    NotReady,
    /// The camera kept adjusting past the deadline.
    TimedOut,
    /// The camera settled but the measured brightness is off target.
    ValidationFailed {
        /// Brightness measured from the live frame.
        measured: u8,
        /// Requested brightness.
        target: u8,
    },
    /// Shutdown was requested while waiting.
    Aborted,
    /// Writing the target to the camera failed.
    DeviceError,
}

impl BrightnessOutcome {
    /// The `success` field of the service response.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// Deadline for a brightness target.
pub const fn deadline_for(target: u8) -> Duration {
    if target > SATURATION_THRESHOLD {
        SATURATED_BRIGHTNESS_DEADLINE
    } else {
        BRIGHTNESS_DEADLINE
    }
}

struct BrightnessPlant<'a> {
    device: &'a dyn CameraDevice,
    grabber: &'a GrabCoordinator,
    liveness: &'a AutoBrightnessState,
}

impl ConvergencePlant for BrightnessPlant<'_> {
    fn read(&mut self) -> Result<f64> {
        self.grabber
            .current_brightness()
            .map(f64::from)
            .ok_or_else(|| CameraError::StreamError("no frame to measure".to_owned()))
    }

    fn apply(&mut self, target: f64) -> Result<()> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target = target.clamp(0.0, 255.0) as u8;
        self.device.set_brightness(target)?;
        // a liveness read before the write cannot settle the new request
        self.liveness.begin();
        Ok(())
    }

    fn is_converged(&mut self, _current: f64, _target: &ConvergenceTarget) -> bool {
        !self.liveness.is_running()
    }
}

/// Drives the frame brightness to a requested mean grey value.
pub struct BrightnessService {
    device: Arc<dyn CameraDevice>,
    grabber: Arc<GrabCoordinator>,
    liveness: Arc<AutoBrightnessState>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<ShutdownSignal>,
}

impl BrightnessService {
    /// Create the service.
    pub fn new(
        device: Arc<dyn CameraDevice>,
        grabber: Arc<GrabCoordinator>,
        liveness: Arc<AutoBrightnessState>,
        clock: Arc<dyn Clock>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            device,
            grabber,
            liveness,
            clock,
            shutdown,
        }
    }

    /// Set the brightness to `target` and wait for the camera to settle.
    ///
    /// The deadline is [`BRIGHTNESS_DEADLINE`], or
    /// [`SATURATED_BRIGHTNESS_DEADLINE`] for targets above
    /// [`SATURATION_THRESHOLD`]. Once settled, the live frame must be within
    /// [`BRIGHTNESS_TOLERANCE`] of the target.
    pub fn set_brightness(&self, target: u8) -> BrightnessOutcome {
        if !self.wait_until_ready() {
            error!(
                waited = ?READY_DEADLINE,
                "camera has not grabbed an image yet"
            );
            return BrightnessOutcome::NotReady;
        }

        let Some(current) = self.grabber.current_brightness() else {
            warn!(target, "no frame available to measure brightness");
            return BrightnessOutcome::NotReady;
        };
        info!(target, current, "new brightness request");

        let goal = ConvergenceTarget {
            target_value: f64::from(target),
            tolerance: f64::from(BRIGHTNESS_TOLERANCE),
            deadline: deadline_for(target),
        };
        let controller = ConvergenceController::new(
            self.clock.as_ref(),
            &self.shutdown,
            clock::rate(BRIGHTNESS_POLL_HZ),
        );
        let mut plant = BrightnessPlant {
            device: self.device.as_ref(),
            grabber: &self.grabber,
            liveness: &self.liveness,
        };

        match controller.run(&mut plant, &goal) {
            Ok(ConvergenceOutcome::Converged) => self.validate(target),
            Ok(ConvergenceOutcome::TimedOut) => {
                if self.liveness.time_out() {
                    error!(target, "did not reach the required brightness in time");
                    BrightnessOutcome::TimedOut
                } else {
                    // settled between the last poll and the deadline
                    self.validate(target)
                }
            }
            Ok(ConvergenceOutcome::Aborted) => {
                self.liveness.time_out();
                BrightnessOutcome::Aborted
            }
            Err(err) => {
                self.liveness.time_out();
                warn!(target, error = %err, "brightness request failed");
                BrightnessOutcome::DeviceError
            }
        }
    }

    fn wait_until_ready(&self) -> bool {
        let start = self.clock.now();
        let interval = clock::rate(READY_POLL_HZ);
        while !self.device.is_ready() {
            if self.shutdown.is_requested() {
                return false;
            }
            if self.clock.now().duration_since(start) > READY_DEADLINE {
                return false;
            }
            self.clock.sleep(interval);
        }
        true
    }

    fn validate(&self, target: u8) -> BrightnessOutcome {
        let Some(measured) = self.grabber.current_brightness() else {
            return BrightnessOutcome::NotReady;
        };
        if validation::brightness_matches(measured, target) {
            info!(target, measured, "brightness reached");
            BrightnessOutcome::Converged
        } else {
            warn!(target, measured, "camera settled off target");
            BrightnessOutcome::ValidationFailed { measured, target }
        }
    }
}
