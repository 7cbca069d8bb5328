//! Grabbing session: the shared state of one open camera.
//!
//! A [`Session`] is created by the composition root once the camera is open
//! and owns everything the services share: the device handle, the grab
//! coordinator, the auto brightness liveness flag, the sleeping switch and
//! the shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::info;

use crate::brightness::{AutoBrightnessState, BrightnessService};
use crate::clock::Clock;
use crate::exposure::ExposureService;
use crate::grab::GrabCoordinator;
use crate::publisher::CameraInfo;
use crate::sequence::SequenceCaptureService;
use crate::shutdown::ShutdownSignal;
use crate::traits::{CameraDevice, CameraError, Format, Result};

/// Settings a session is started with.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Coordinate frame name stamped on published images.
    pub frame_id: String,
    /// Requested frame rate; zero or negative means "as fast as possible".
    pub desired_frame_rate: f64,
    /// Exposure list for sequence capture. `Some` enables sequencer mode,
    /// which replaces the exposure and brightness services.
    pub sequence_exposure_times: Option<Vec<f64>>,
}

/// What the session settled on at start.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Image layout.
    pub format: Format,
    /// Effective frame rate.
    pub frame_rate: f64,
    /// Whether the requested frame rate had to be lowered.
    pub frame_rate_clamped: bool,
}

/// Shared state of one grabbing session.
pub struct Session {
    device: Arc<dyn CameraDevice>,
    grabber: Arc<GrabCoordinator>,
    liveness: Arc<AutoBrightnessState>,
    shutdown: Arc<ShutdownSignal>,
    clock: Arc<dyn Clock>,
    sleeping: AtomicBool,
    frame_id: String,
    sequence_exposure_times: Option<Vec<f64>>,
    info: SessionInfo,
}

impl Session {
    /// Start a session on an open camera.
    ///
    /// Clamps the desired frame rate to what the camera supports and applies
    /// it.
    pub fn start(
        device: Arc<dyn CameraDevice>,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if matches!(&settings.sequence_exposure_times, Some(times) if times.is_empty()) {
            return Err(CameraError::Config("sequencer enabled without exposure times".to_owned()));
        }

        let caps = device.capabilities();
        info!(
            card = %caps.card,
            driver = %caps.driver,
            bus = %caps.bus_info,
            "starting grab session"
        );

        let max = device.max_possible_framerate()?;
        if !max.is_finite() || max <= 0.0 {
            return Err(CameraError::PropertyAccess(format!(
                "camera reports an unusable max frame rate {max}"
            )));
        }
        let desired = settings.desired_frame_rate;
        let (frame_rate, frame_rate_clamped) = if !desired.is_finite() || desired <= 0.0 {
            info!(max, "max possible framerate is {max:.2} Hz");
            (max, false)
        } else if max < desired {
            info!(
                desired,
                max, "desired framerate is higher than max possible, limiting to {max:.2} Hz"
            );
            (max, true)
        } else {
            (desired, false)
        };
        device.set_frame_rate(frame_rate)?;

        let shutdown = Arc::new(ShutdownSignal::new());
        let grabber = Arc::new(GrabCoordinator::new(Arc::clone(&device), Arc::clone(&shutdown)));
        let info = SessionInfo {
            format: grabber.format().clone(),
            frame_rate,
            frame_rate_clamped,
        };

        Ok(Self {
            device,
            grabber,
            liveness: Arc::new(AutoBrightnessState::new()),
            shutdown,
            clock,
            sleeping: AtomicBool::new(false),
            frame_id: settings.frame_id,
            sequence_exposure_times: settings.sequence_exposure_times,
            info,
        })
    }

    /// What the session settled on at start.
    pub const fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// The camera.
    pub fn device(&self) -> &Arc<dyn CameraDevice> {
        &self.device
    }

    /// The grab coordinator.
    pub const fn grabber(&self) -> &Arc<GrabCoordinator> {
        &self.grabber
    }

    /// Liveness flag of the camera's auto brightness function.
    pub const fn liveness(&self) -> &Arc<AutoBrightnessState> {
        &self.liveness
    }

    /// Process-level shutdown signal.
    pub const fn shutdown(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Clock used for ticks and polls.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Pause or resume periodic grabbing. Always succeeds.
    pub fn set_sleeping(&self, sleeping: bool) -> bool {
        self.sleeping.store(sleeping, Ordering::Release);
        if sleeping {
            info!("setting camera to sleep");
        } else {
            info!("camera continues grabbing");
        }
        true
    }

    /// Whether periodic grabbing is paused.
    pub fn is_sleeping(&self) -> bool {
        self.sleeping.load(Ordering::Acquire)
    }

    /// Whether the session runs in sequencer mode.
    pub const fn sequencer_enabled(&self) -> bool {
        self.sequence_exposure_times.is_some()
    }

    /// Exposure service; not offered in sequencer mode.
    pub fn exposure_service(&self) -> Option<ExposureService> {
        if self.sequencer_enabled() {
            return None;
        }
        Some(ExposureService::new(
            Arc::clone(&self.device),
            Arc::clone(&self.clock),
            Arc::clone(&self.shutdown),
        ))
    }

    /// Brightness service; not offered in sequencer mode.
    pub fn brightness_service(&self) -> Option<BrightnessService> {
        if self.sequencer_enabled() {
            return None;
        }
        Some(BrightnessService::new(
            Arc::clone(&self.device),
            Arc::clone(&self.grabber),
            Arc::clone(&self.liveness),
            Arc::clone(&self.clock),
            Arc::clone(&self.shutdown),
        ))
    }

    /// Sequence capture service; only offered in sequencer mode.
    pub fn sequence_service(&self) -> Option<SequenceCaptureService> {
        let times = self.sequence_exposure_times.clone()?;
        SequenceCaptureService::new(Arc::clone(&self.grabber), times).ok()
    }

    /// Camera description matching an image captured at `timestamp`.
    pub fn camera_info(&self, timestamp: SystemTime) -> CameraInfo {
        CameraInfo {
            width: self.info.format.width,
            height: self.info.format.height,
            distortion_model: CameraInfo::PLUMB_BOB.to_owned(),
            frame_id: self.frame_id.clone(),
            timestamp,
        }
    }
}
