//! Steady-state frame publishing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, trace};

use crate::grab::GrabError;
use crate::sequence::{ExposureTimes, SequenceResult};
use crate::session::Session;
use crate::traits::Frame;

/// Camera description delivered with every image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Lens distortion model name.
    pub distortion_model: String,
    /// Coordinate frame name.
    pub frame_id: String,
    /// Same timestamp as the image it describes.
    pub timestamp: SystemTime,
}

impl CameraInfo {
    /// Distortion model reported for uncalibrated cameras.
    pub const PLUMB_BOB: &'static str = "plumb_bob";
}

/// Outbound side of the frame stream.
pub trait Transport: Send + Sync {
    /// Number of consumers currently interested in images.
    fn subscriber_count(&self) -> usize;

    /// Deliver an image and its camera description. Fire and forget.
    fn publish(&self, frame: &Frame, info: &CameraInfo);

    /// Deliver the exposure list of a finished burst.
    fn publish_exposure_times(&self, message: &ExposureTimes) {
        let _ = message;
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody is listening; nothing was grabbed.
    NoSubscribers,
    /// Grabbing is paused; nothing was grabbed.
    Sleeping,
    /// A frame was grabbed and published.
    Published,
    /// The grab failed; the tick was skipped.
    Skipped,
    /// The camera is gone.
    Fatal,
}

/// Grabs and publishes one frame per tick while anyone is listening.
pub struct PeriodicPublisher {
    session: Arc<Session>,
    transport: Arc<dyn Transport>,
}

impl PeriodicPublisher {
    /// Create a publisher for `session`.
    pub fn new(session: Arc<Session>, transport: Arc<dyn Transport>) -> Self {
        Self { session, transport }
    }

    /// Run one tick.
    pub fn tick(&self) -> TickOutcome {
        if self.transport.subscriber_count() == 0 {
            return TickOutcome::NoSubscribers;
        }
        if self.session.is_sleeping() {
            return TickOutcome::Sleeping;
        }

        self.refresh_auto_brightness();

        match self.session.grabber().grab_one() {
            Ok(frame) => {
                let info = self.session.camera_info(frame.metadata.timestamp);
                self.transport.publish(&frame, &info);
                TickOutcome::Published
            }
            Err(GrabError::Removed) => TickOutcome::Fatal,
            Err(GrabError::InvalidFrame(_)) => TickOutcome::Skipped,
        }
    }

    /// Publish the exposure list of a successful burst.
    pub fn publish_sequence(&self, result: &SequenceResult) {
        if let Some(message) = result.exposure_message() {
            self.transport.publish_exposure_times(&message);
        }
    }

    /// Tick at `period` until `keep_running` is cleared or shutdown is
    /// requested.
    pub fn run(&self, period: Duration, keep_running: &AtomicBool) {
        let clock = self.session.clock();
        let shutdown = self.session.shutdown();

        while keep_running.load(Ordering::Acquire) && !shutdown.is_requested() {
            let started = clock.now();
            if self.tick() == TickOutcome::Fatal {
                break;
            }
            let spent = clock.now().duration_since(started);
            clock.sleep(period.saturating_sub(spent));
        }
        debug!("publisher stopped");
    }

    // Advisory only: the read may fail while the camera is busy.
    fn refresh_auto_brightness(&self) {
        match self.session.device().is_auto_brightness_running() {
            Ok(false) => {
                if self.session.liveness().settle() {
                    debug!("auto brightness function settled");
                }
            }
            Ok(true) => trace!("auto brightness function running"),
            Err(err) => trace!(error = %err, "auto brightness state unreadable"),
        }
    }
}
