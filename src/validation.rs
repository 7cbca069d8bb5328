//! Frame validation and brightness estimation.
//!
//! This module provides the checks applied to grabbed frames before they are
//! accepted into the session, and the frame-based brightness measurement used
//! to validate brightness convergence independently of the camera.

use crate::traits::{CameraError, Format, Frame, Result};

/// Largest difference between measured and requested brightness that still
/// counts as reached.
pub const BRIGHTNESS_TOLERANCE: u8 = 2;

/// Validates that a grabbed buffer fills exactly one frame of `format`.
///
/// # Errors
///
/// Returns `StreamError` if the buffer is empty or its length differs from
/// `stride * height`.
pub fn validate_frame_layout(pixels: &[u8], format: &Format) -> Result<()> {
    if pixels.is_empty() {
        return Err(CameraError::StreamError("empty frame".to_owned()));
    }

    let expected = format.frame_len();
    if pixels.len() != expected {
        return Err(CameraError::StreamError(format!(
            "frame holds {} bytes, expected {expected} ({}x{} at stride {})",
            pixels.len(),
            format.width,
            format.height,
            format.stride
        )));
    }

    Ok(())
}

/// Mean byte value of a frame, rounded to the nearest integer.
///
/// Returns `None` for an empty buffer.
pub fn mean_brightness(pixels: &[u8]) -> Option<u8> {
    if pixels.is_empty() {
        return None;
    }

    let sum: u64 = pixels.iter().map(|&p| u64::from(p)).sum();
    let len = pixels.len() as u64;
    // Rounded integer division; the mean of bytes always fits in a byte.
    let mean = (sum + len / 2) / len;
    u8::try_from(mean).ok()
}

/// Whether a measured brightness is within [`BRIGHTNESS_TOLERANCE`] of `target`.
pub const fn brightness_matches(measured: u8, target: u8) -> bool {
    measured.abs_diff(target) <= BRIGHTNESS_TOLERANCE
}

/// Validates a finished burst against the exposures that were requested.
///
/// # Errors
///
/// Returns `StreamError` if:
/// - The number of frames differs from the number of exposures
/// - Any frame's data length disagrees with its own metadata
pub fn validate_burst(frames: &[Frame], exposure_times: &[f64]) -> Result<()> {
    if frames.len() != exposure_times.len() {
        return Err(CameraError::StreamError(format!(
            "burst produced {} frames for {} exposures",
            frames.len(),
            exposure_times.len()
        )));
    }

    for (index, frame) in frames.iter().enumerate() {
        let meta = &frame.metadata;
        let expected = meta.step as usize * meta.height as usize;
        if frame.data.len() != expected {
            return Err(CameraError::StreamError(format!(
                "burst frame {index} holds {} bytes, expected {expected}",
                frame.data.len()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{FourCC, FrameMetadata};
    use std::time::{Duration, SystemTime};

    fn frame(format: &Format, fill: u8, timestamp: SystemTime) -> Frame {
        Frame {
            data: vec![fill; format.frame_len()],
            metadata: FrameMetadata::from_format(format, timestamp),
        }
    }

    #[test]
    fn test_validate_frame_layout() {
        let format = Format::new(4, 2, FourCC::YUYV);
        assert!(validate_frame_layout(&[0; 16], &format).is_ok());
        assert!(validate_frame_layout(&[], &format).is_err());
        assert!(validate_frame_layout(&[0; 15], &format).is_err());
    }

    #[test]
    fn test_mean_brightness_rounds() {
        assert_eq!(mean_brightness(&[]), None);
        assert_eq!(mean_brightness(&[100, 100, 100]), Some(100));
        // 100.5 rounds up, 100.25 rounds down
        assert_eq!(mean_brightness(&[100, 101]), Some(101));
        assert_eq!(mean_brightness(&[100, 100, 100, 101]), Some(100));
        assert_eq!(mean_brightness(&[255; 64]), Some(255));
    }

    #[test]
    fn test_brightness_tolerance_boundary() {
        assert!(brightness_matches(101, 100));
        assert!(brightness_matches(102, 100));
        assert!(brightness_matches(98, 100));
        assert!(!brightness_matches(103, 100));
        assert!(!brightness_matches(104, 100));
    }

    #[test]
    fn test_validate_burst_success() {
        let format = Format::new(4, 4, FourCC::GREY);
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let frames: Vec<Frame> = (0..3u8)
            .map(|i| frame(&format, i, start + Duration::from_millis(u64::from(i))))
            .collect();

        let result = validate_burst(&frames, &[100.0, 200.0, 300.0]);
        assert!(
            result.is_ok(),
            "burst validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_burst_count_mismatch() {
        let format = Format::new(4, 4, FourCC::GREY);
        let frames = vec![frame(&format, 0, SystemTime::UNIX_EPOCH)];
        assert!(validate_burst(&frames, &[100.0, 200.0]).is_err());
    }

    #[test]
    fn test_validate_burst_ignores_wall_clock_steps() {
        let format = Format::new(4, 4, FourCC::GREY);
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        // the system clock was set back between the two grabs
        let frames = vec![
            frame(&format, 0, start),
            frame(&format, 1, start - Duration::from_secs(1)),
        ];
        let result = validate_burst(&frames, &[100.0, 200.0]);
        assert!(
            result.is_ok(),
            "burst validation should succeed: {result:?}"
        );
    }

    #[test]
    fn test_validate_burst_rejects_short_frame() {
        let format = Format::new(4, 4, FourCC::GREY);
        let mut short = frame(&format, 1, SystemTime::UNIX_EPOCH);
        short.data.truncate(8);
        let frames = vec![frame(&format, 0, SystemTime::UNIX_EPOCH), short];
        assert!(validate_burst(&frames, &[100.0, 200.0]).is_err());
    }
}
