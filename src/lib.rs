//! Cam-Grab-Control: grab coordination and camera control for V4L2 cameras
//!
//! This library serialises access to a camera between periodic image
//! publishing and on-demand control requests (exposure, brightness and
//! multi-exposure sequence capture). Hardware access goes through the
//! [`CameraDevice`] trait, enabling both production use with real hardware
//! and testing with mock devices.

pub mod brightness;
pub mod clock;
pub mod config;
pub mod convergence;
pub mod device;
pub mod exposure;
pub mod frame_buffer;
pub mod grab;
pub mod logging;
pub mod publisher;
pub mod sequence;
pub mod session;
pub mod shutdown;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use brightness::{AutoBrightnessState, BrightnessOutcome, BrightnessService};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use device::V4L2Device;
pub use exposure::{ExposureOutcome, ExposureService};
pub use frame_buffer::FrameBuffer;
pub use grab::{BurstOutcome, GrabCoordinator, GrabError};
pub use publisher::{CameraInfo, PeriodicPublisher, TickOutcome, Transport};
pub use sequence::{ExposureTimes, SequenceCaptureService, SequenceResult};
pub use session::{Session, SessionInfo, SessionSettings};
pub use shutdown::ShutdownSignal;
pub use traits::{
    CameraDevice, CameraError, DeviceCapabilities, Format, FourCC, Frame, FrameMetadata,
};
