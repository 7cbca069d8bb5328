//! V4L2 device implementation using the v4l crate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{CameraDevice, CameraError, DeviceCapabilities, Format, FourCC, Result};

const V4L2_CID_BRIGHTNESS: u32 = 0x0098_0900;
const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const V4L2_EXPOSURE_MANUAL: i64 = 1;

/// `V4L2_CID_EXPOSURE_ABSOLUTE` counts in units of 100 us.
const EXPOSURE_UNIT_US: f64 = 100.0;

/// Errno returned by a stream whose device was unplugged.
const ENODEV: i32 = 19;

/// Map a streaming failure, recognising an unplugged device.
fn stream_error(err: &std::io::Error) -> CameraError {
    if err.raw_os_error() == Some(ENODEV) {
        CameraError::DeviceRemoved
    } else {
        CameraError::StreamError(err.to_string())
    }
}

/// V4L2 device implementation wrapping the v4l crate.
///
/// The mmap stream is created on the first grab and kept for the lifetime
/// of the device; controls are accessed directly on the device handle and do
/// not contend with grabbing.
pub struct V4L2Device {
    device: Device,
    path: PathBuf,
    capabilities: DeviceCapabilities,
    format: Format,
    buffer_count: u32,
    stream: Mutex<Option<Stream<'static>>>,
    ready: AtomicBool,
    brightness_request: Mutex<Option<i64>>,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let path = PathBuf::from(format!("/dev/video{index}"));
        if !path.exists() {
            return Err(CameraError::DeviceNotFound(index));
        }

        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        let mut opened = Self {
            device,
            path,
            capabilities,
            format: Format::new(0, 0, FourCC::YUYV),
            buffer_count: 4,
            stream: Mutex::new(None),
            ready: AtomicBool::new(false),
            brightness_request: Mutex::new(None),
        };
        opened.format = opened.query_format()?;
        Ok(opened)
    }

    /// Set the number of driver buffers used once streaming starts.
    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// Set capture format. Returns the actual format set by the driver, which
    /// becomes the session format.
    pub fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        let actual = Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        };
        if actual.fourcc != format.fourcc {
            return Err(CameraError::FormatNotSupported(format.clone()));
        }
        self.format = actual.clone();
        Ok(actual)
    }

    fn query_format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        })
    }

    fn open_stream(&self) -> Result<Stream<'static>> {
        debug!(buffers = self.buffer_count, "starting mmap stream");
        Stream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)
            .map_err(|err| stream_error(&err))
    }

    fn read_control(&self, id: u32) -> Result<i64> {
        let control = self
            .device
            .control(id)
            .map_err(|err| CameraError::PropertyAccess(format!("control {id:#x}: {err}")))?;

        match control.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            _ => Err(CameraError::PropertyAccess(format!("control {id:#x} is not numeric"))),
        }
    }

    fn write_control(&self, id: u32, value: i64) -> Result<()> {
        self.device
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|err| CameraError::PropertyAccess(format!("control {id:#x}: {err}")))
    }

    fn control_range(&self, id: u32) -> Result<(i64, i64, u64)> {
        let controls = self
            .device
            .query_controls()
            .map_err(|err| CameraError::PropertyAccess(err.to_string()))?;

        controls
            .into_iter()
            .find(|desc| desc.id == id)
            .map(|desc| {
                let step = u64::try_from(desc.step).unwrap_or(1);
                (desc.minimum, desc.maximum, step)
            })
            .ok_or_else(|| CameraError::PropertyAccess(format!("control {id:#x} not supported")))
    }
}

impl CameraDevice for V4L2Device {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Format {
        self.format.clone()
    }

    fn grab(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut slot = self.stream.lock();
        if slot.is_none() {
            *slot = Some(self.open_stream()?);
        }
        let stream = slot
            .as_mut()
            .ok_or_else(|| CameraError::StreamError("stream not started".to_owned()))?;

        let (buf, meta) = stream.next().map_err(|err| stream_error(&err))?;

        let used = (meta.bytesused as usize).min(buf.len());
        buffer.clear();
        buffer.extend_from_slice(buf.get(..used).unwrap_or(buf));
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn is_removed(&self) -> bool {
        !self.path.exists()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn current_exposure(&self) -> Result<f64> {
        #[allow(clippy::cast_precision_loss)]
        let exposure = self.read_control(V4L2_CID_EXPOSURE_ABSOLUTE)? as f64 * EXPOSURE_UNIT_US;
        Ok(exposure)
    }

    fn set_exposure(&self, exposure_us: f64) -> Result<()> {
        if let Err(err) = self.write_control(V4L2_CID_EXPOSURE_AUTO, V4L2_EXPOSURE_MANUAL) {
            warn!(error = %err, "could not switch to manual exposure");
        }
        #[allow(clippy::cast_possible_truncation)]
        let units = (exposure_us / EXPOSURE_UNIT_US).round() as i64;
        self.write_control(V4L2_CID_EXPOSURE_ABSOLUTE, units)
    }

    fn exposure_step(&self) -> Result<f64> {
        let (_, _, step) = self.control_range(V4L2_CID_EXPOSURE_ABSOLUTE)?;
        #[allow(clippy::cast_precision_loss)]
        let step = step.max(1) as f64 * EXPOSURE_UNIT_US;
        Ok(step)
    }

    fn set_brightness(&self, target: u8) -> Result<()> {
        let (min, max, _) = self.control_range(V4L2_CID_BRIGHTNESS)?;
        let value = min + (max - min) * i64::from(target) / 255;
        *self.brightness_request.lock() = Some(value);
        self.write_control(V4L2_CID_BRIGHTNESS, value)
    }

    fn is_auto_brightness_running(&self) -> Result<bool> {
        let Some(requested) = *self.brightness_request.lock() else {
            return Ok(false);
        };
        Ok(self.read_control(V4L2_CID_BRIGHTNESS)? != requested)
    }

    fn max_possible_framerate(&self) -> Result<f64> {
        let intervals = self
            .device
            .enum_frameintervals(
                self.format.fourcc.into(),
                self.format.width,
                self.format.height,
            )
            .map_err(|err| CameraError::PropertyAccess(err.to_string()))?;

        let best = intervals
            .iter()
            .map(|interval| match &interval.interval {
                FrameIntervalEnum::Discrete(fraction) => fraction,
                FrameIntervalEnum::Stepwise(stepwise) => &stepwise.min,
            })
            .filter(|fraction| fraction.numerator > 0)
            .map(|fraction| f64::from(fraction.denominator) / f64::from(fraction.numerator))
            .fold(0.0_f64, f64::max);

        if best > 0.0 {
            return Ok(best);
        }

        let params = self
            .device
            .params()
            .map_err(|err| CameraError::PropertyAccess(err.to_string()))?;
        let interval = params.interval;
        if interval.numerator == 0 {
            return Err(CameraError::PropertyAccess("driver reports no frame interval".to_owned()));
        }
        let fps = f64::from(interval.denominator) / f64::from(interval.numerator);
        Ok(fps)
    }

    fn set_frame_rate(&self, fps: f64) -> Result<()> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let fps = fps.round().max(1.0) as u32;
        self.device
            .set_params(&Parameters::with_fps(fps))
            .map(|_| ())
            .map_err(|err| CameraError::PropertyAccess(err.to_string()))
    }

    fn prepare_sequence_step(&self, exposure_us: f64) -> Result<()> {
        self.set_exposure(exposure_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unplugged_stream_maps_to_removal() {
        let err = stream_error(&std::io::Error::from_raw_os_error(ENODEV));
        assert!(matches!(err, CameraError::DeviceRemoved));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_other_stream_failures_are_recoverable() {
        let err = stream_error(&std::io::Error::from_raw_os_error(5));
        assert!(matches!(err, CameraError::StreamError(_)));
        assert!(!err.is_fatal());
    }
}
