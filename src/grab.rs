//! Exclusive access to the camera's grab primitive.
//!
//! Every raw grab and every access to the live [`FrameBuffer`] goes through
//! one [`GrabCoordinator`]. Its lock is reentrant: the burst path holds it for
//! the whole burst and re-enters it while storing the representative frame,
//! so periodic single-frame grabs can never interleave with a burst.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::ReentrantMutex;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::frame_buffer::FrameBuffer;
use crate::shutdown::ShutdownSignal;
use crate::traits::{CameraDevice, CameraError, Format, Frame, FrameMetadata};
use crate::validation;

/// Why a grab produced no frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrabError {
    /// The camera is gone; shutdown has been requested.
    #[error("camera has been removed")]
    Removed,
    /// The camera returned no usable image; the next grab may succeed.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl GrabError {
    /// Whether the failure ends the session.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

/// Result of a multi-exposure burst.
#[derive(Debug, Clone)]
pub struct BurstOutcome {
    /// Frames that were grabbed successfully, in request order.
    pub frames: Vec<Frame>,
    /// Whether every grab of the burst succeeded.
    pub success: bool,
}

#[derive(Debug)]
struct GrabState {
    frame: FrameBuffer,
    scratch: Vec<u8>,
}

/// Serialises grabs and owns the live frame.
pub struct GrabCoordinator {
    device: Arc<dyn CameraDevice>,
    format: Format,
    shutdown: Arc<ShutdownSignal>,
    state: ReentrantMutex<RefCell<GrabState>>,
}

impl GrabCoordinator {
    /// Create a coordinator for the session format reported by `device`.
    pub fn new(device: Arc<dyn CameraDevice>, shutdown: Arc<ShutdownSignal>) -> Self {
        let format = device.format();
        let state = GrabState {
            frame: FrameBuffer::new(format.clone()),
            scratch: Vec::with_capacity(format.frame_len()),
        };
        Self {
            device,
            format,
            shutdown,
            state: ReentrantMutex::new(RefCell::new(state)),
        }
    }

    /// Session format.
    pub const fn format(&self) -> &Format {
        &self.format
    }

    /// Grab one frame into the live frame buffer and return a copy of it.
    ///
    /// A failed grab leaves the previous live frame untouched.
    pub fn grab_one(&self) -> Result<Frame, GrabError> {
        self.grab_into(&mut self.state.lock().borrow_mut())
    }

    /// Grab one frame per entry of `exposure_times`, in order, holding the
    /// grab lock for the whole burst.
    ///
    /// Each frame is grabbed into its own buffer. The frame at index
    /// `len / 2` also becomes the live frame, provided no earlier grab of the
    /// burst failed. A recoverable failure marks the burst failed but the
    /// remaining exposures are still grabbed; removal of the camera ends the
    /// burst immediately.
    pub fn grab_burst(&self, exposure_times: &[f64]) -> BurstOutcome {
        let _guard = self.state.lock();
        let middle = exposure_times.len() / 2;
        let mut frames = Vec::with_capacity(exposure_times.len());
        let mut success = true;

        for (index, &exposure) in exposure_times.iter().enumerate() {
            let mut pixels = Vec::with_capacity(self.format.frame_len());
            let grabbed = self
                .device
                .prepare_sequence_step(exposure)
                .and_then(|()| self.raw_grab(&mut pixels));

            match grabbed {
                Ok(()) => {
                    let timestamp = SystemTime::now();
                    if index == middle && success {
                        self.store_live(&pixels, timestamp);
                    }
                    frames.push(Frame {
                        data: pixels,
                        metadata: FrameMetadata::from_format(&self.format, timestamp),
                    });
                }
                Err(err) => {
                    success = false;
                    if self.classify(&err).is_fatal() {
                        break;
                    }
                }
            }
        }

        debug!(
            requested = exposure_times.len(),
            grabbed = frames.len(),
            success,
            "burst finished"
        );
        BurstOutcome { frames, success }
    }

    /// Run `f` against the live frame while holding the grab lock.
    ///
    /// `f` must not grab: the live frame stays borrowed while it runs.
    pub(crate) fn with_frame<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&FrameBuffer) -> R,
    {
        f(&self.state.lock().borrow().frame)
    }

    /// Copy of the live frame, if one has been captured.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.with_frame(FrameBuffer::snapshot)
    }

    /// Brightness of the live frame.
    pub fn current_brightness(&self) -> Option<u8> {
        self.with_frame(FrameBuffer::mean_brightness)
    }

    fn store_live(&self, pixels: &[u8], timestamp: SystemTime) {
        self.state.lock().borrow_mut().frame.store(pixels, timestamp);
    }

    fn grab_into(&self, state: &mut GrabState) -> Result<Frame, GrabError> {
        let GrabState { frame, scratch } = state;
        match self.raw_grab(scratch) {
            Ok(()) => {
                frame.swap_in(scratch, SystemTime::now());
                frame
                    .snapshot()
                    .ok_or_else(|| GrabError::InvalidFrame("live frame missing".to_owned()))
            }
            Err(err) => Err(self.classify(&err)),
        }
    }

    fn raw_grab(&self, buffer: &mut Vec<u8>) -> crate::traits::Result<()> {
        self.device.grab(buffer)?;
        validation::validate_frame_layout(buffer, &self.format)
    }

    fn classify(&self, err: &CameraError) -> GrabError {
        if err.is_fatal() || self.device.is_removed() {
            error!("camera has been removed");
            self.shutdown.request("camera removed");
            GrabError::Removed
        } else {
            warn!(error = %err, "grab failed, skipping");
            GrabError::InvalidFrame(err.to_string())
        }
    }
}
