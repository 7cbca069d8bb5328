//! Multi-exposure sequence capture.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{info, warn};

use crate::grab::GrabCoordinator;
use crate::traits::{CameraError, Frame, Result};
use crate::validation;

/// Result of a `GrabSequence` request.
#[derive(Debug, Clone)]
pub struct SequenceResult {
    /// One frame per configured exposure, in the same order. Empty unless
    /// `success` is set.
    pub images: Vec<Frame>,
    /// The configured exposure times in microseconds.
    pub exposure_times: Vec<f64>,
    /// Whether every frame of the burst was grabbed.
    pub success: bool,
}

impl SequenceResult {
    /// The representative (middle) frame of a successful burst.
    pub fn representative(&self) -> Option<&Frame> {
        self.images.get(self.images.len() / 2)
    }

    /// Exposure list stamped with the representative frame's capture time.
    pub fn exposure_message(&self) -> Option<ExposureTimes> {
        let frame = self.representative()?;
        Some(ExposureTimes {
            exposure_times: self.exposure_times.clone(),
            timestamp: frame.metadata.timestamp,
        })
    }
}

/// Exposure list published alongside the live frame after a burst.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureTimes {
    /// Exposure times in microseconds.
    pub exposure_times: Vec<f64>,
    /// Capture time of the representative frame.
    pub timestamp: SystemTime,
}

/// Grabs one frame per configured exposure under the grab lock.
pub struct SequenceCaptureService {
    grabber: Arc<GrabCoordinator>,
    exposure_times: Vec<f64>,
}

impl SequenceCaptureService {
    /// Create the service for a fixed, non-empty exposure list.
    pub fn new(grabber: Arc<GrabCoordinator>, exposure_times: Vec<f64>) -> Result<Self> {
        if exposure_times.is_empty() {
            return Err(CameraError::Config(
                "sequence capture needs at least one exposure time".to_owned(),
            ));
        }
        Ok(Self {
            grabber,
            exposure_times,
        })
    }

    /// The configured exposure times.
    pub fn exposure_times(&self) -> &[f64] {
        &self.exposure_times
    }

    /// Run one burst.
    ///
    /// Any failed grab clears `images`, so a result never pairs a frame with
    /// the wrong exposure.
    pub fn grab_sequence(&self) -> SequenceResult {
        let outcome = self.grabber.grab_burst(&self.exposure_times);
        let mut images = outcome.frames;
        let mut success = outcome.success;

        if success {
            if let Err(err) = validation::validate_burst(&images, &self.exposure_times) {
                warn!(error = %err, "discarding inconsistent burst");
                success = false;
            }
        }
        if success {
            info!(frames = images.len(), "sequence captured");
        } else {
            warn!(
                requested = self.exposure_times.len(),
                "sequence capture failed"
            );
            images.clear();
        }

        SequenceResult {
            images,
            exposure_times: self.exposure_times.clone(),
            success,
        }
    }
}
