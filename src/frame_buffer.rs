//! Most recently captured frame of the session.

use std::time::SystemTime;

use crate::traits::{Format, Frame, FrameMetadata};
use crate::validation;

/// Holds the live frame shown to streaming consumers.
///
/// Only [`crate::grab::GrabCoordinator`] mutates it, always under the grab
/// lock. Dimensions are fixed when the session starts; pixels and timestamp
/// are overwritten on every accepted grab.
#[derive(Debug)]
pub struct FrameBuffer {
    format: Format,
    pixels: Vec<u8>,
    timestamp: Option<SystemTime>,
}

impl FrameBuffer {
    /// Allocate a buffer for frames of `format`. It stays unpopulated until
    /// the first grab is stored.
    #[must_use]
    pub fn new(format: Format) -> Self {
        let pixels = Vec::with_capacity(format.frame_len());
        Self {
            format,
            pixels,
            timestamp: None,
        }
    }

    /// Session format.
    pub const fn format(&self) -> &Format {
        &self.format
    }

    /// Pixels of the live frame; empty until populated.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Time the live frame was captured.
    pub const fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    /// Whether a frame has been stored.
    pub const fn is_populated(&self) -> bool {
        self.timestamp.is_some() && !self.pixels.is_empty()
    }

    /// Take over a freshly grabbed buffer. The previous pixels end up in
    /// `scratch` so its allocation is reused by the next grab.
    pub(crate) fn swap_in(&mut self, scratch: &mut Vec<u8>, timestamp: SystemTime) {
        debug_assert_eq!(scratch.len(), self.format.frame_len());
        std::mem::swap(&mut self.pixels, scratch);
        self.timestamp = Some(timestamp);
    }

    /// Copy `pixels` in as the live frame.
    pub(crate) fn store(&mut self, pixels: &[u8], timestamp: SystemTime) {
        debug_assert_eq!(pixels.len(), self.format.frame_len());
        self.pixels.clear();
        self.pixels.extend_from_slice(pixels);
        self.timestamp = Some(timestamp);
    }

    /// Owned copy of the live frame.
    pub fn snapshot(&self) -> Option<Frame> {
        let timestamp = self.timestamp?;
        if self.pixels.is_empty() {
            return None;
        }
        Some(Frame {
            data: self.pixels.clone(),
            metadata: FrameMetadata::from_format(&self.format, timestamp),
        })
    }

    /// Brightness of the live frame as the rounded mean of its bytes.
    pub fn mean_brightness(&self) -> Option<u8> {
        if !self.is_populated() {
            return None;
        }
        validation::mean_brightness(&self.pixels)
    }
}
