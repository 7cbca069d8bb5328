//! Core traits and types for the camera device abstraction.

use std::time::SystemTime;

use thiserror::Error;

/// Pixel format representation (e.g., YUYV, RGB3, GREY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// GREY pixel format (8-bit mono).
    pub const GREY: Self = Self::new(b"GREY");

    /// Parse a four character code such as `"YUYV"`.
    pub fn parse(code: &str) -> Option<Self> {
        let bytes: [u8; 4] = code.as_bytes().try_into().ok()?;
        Some(Self(bytes))
    }

    /// Bytes occupied by one pixel, or `None` for formats without a fixed depth.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match &self.0 {
            b"YUYV" => Some(2),
            b"RGB3" => Some(3),
            b"GREY" => Some(1),
            _ => None,
        }
    }

    /// Encoding name as understood by image consumers.
    #[must_use]
    pub const fn encoding(self) -> &'static str {
        match &self.0 {
            b"YUYV" => "yuv422",
            b"RGB3" => "rgb8",
            b"GREY" => "mono8",
            _ => "unknown",
        }
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format of a grabbing session.
///
/// Fixed once the session has started: every grabbed buffer must hold
/// exactly `size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format specification.
    ///
    /// Formats without a known pixel depth are treated as 8-bit.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let depth = match fourcc.bytes_per_pixel() {
            Some(depth) => depth,
            None => 1,
        };
        let stride = width * depth;
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Frame size in bytes as a buffer length.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.size as usize
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per row.
    pub step: u32,
    /// Pixel encoding.
    pub encoding: FourCC,
    /// Wall-clock time the frame was taken over from the device.
    pub timestamp: SystemTime,
}

impl FrameMetadata {
    /// Metadata for a frame of `format` captured at `timestamp`.
    #[must_use]
    pub const fn from_format(format: &Format, timestamp: SystemTime) -> Self {
        Self {
            width: format.width,
            height: format.height,
            step: format.stride,
            encoding: format.fourcc,
            timestamp,
        }
    }
}

/// A captured video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw frame data, `step * height` bytes.
    pub data: Vec<u8>,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Error type for camera operations.
#[derive(Error, Debug)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0:?}")]
    FormatNotSupported(Format),
    /// Grab produced no usable frame.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Reading or writing a device property failed.
    #[error("Property access failed: {0}")]
    PropertyAccess(String),
    /// The camera is physically gone.
    #[error("Camera has been removed")]
    DeviceRemoved,
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Whether the error means no further device operation can succeed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceRemoved)
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over an open camera with a running grabbing session.
///
/// Property accessors take `&self`: implementations synchronise internally
/// so that property writes can proceed while another thread is grabbing.
pub trait CameraDevice: Send + Sync {
    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Image layout of the session (rows, columns, pixel depth, encoding).
    fn format(&self) -> Format;

    /// Grab the next frame into `buffer`, replacing its contents.
    fn grab(&self, buffer: &mut Vec<u8>) -> Result<()>;

    /// Whether the camera has been unplugged.
    fn is_removed(&self) -> bool;

    /// Whether the camera has delivered at least one frame.
    fn is_ready(&self) -> bool;

    /// Current exposure time in microseconds.
    fn current_exposure(&self) -> Result<f64>;

    /// Request a new exposure time in microseconds.
    fn set_exposure(&self, exposure_us: f64) -> Result<()>;

    /// Smallest exposure increment the camera can realise, in microseconds.
    fn exposure_step(&self) -> Result<f64>;

    /// Hand a brightness target (mean grey value) to the camera's auto function.
    fn set_brightness(&self, target: u8) -> Result<()>;

    /// Whether the camera's auto brightness function is still adjusting.
    fn is_auto_brightness_running(&self) -> Result<bool>;

    /// Highest frame rate the camera supports in the session format.
    fn max_possible_framerate(&self) -> Result<f64>;

    /// Set the acquisition frame rate.
    fn set_frame_rate(&self, fps: f64) -> Result<()>;

    /// Prepare the next grab of a burst to use `exposure_us`.
    ///
    /// Cameras with a hardware sequencer are configured up front and keep
    /// the default no-op.
    fn prepare_sequence_step(&self, exposure_us: f64) -> Result<()> {
        let _ = exposure_us;
        Ok(())
    }
}
