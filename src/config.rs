//! TOML configuration.
//!
//! # Example
//!
//! ```toml
//! [camera]
//! device_index = 0
//! width = 1280
//! height = 720
//! fourcc = "YUYV"
//! frame_id = "wrist_camera"
//! desired_frame_rate = 15.0
//!
//! [sequencer]
//! enabled = true
//! exposure_times = [2000.0, 8000.0, 32000.0]
//!
//! [logging]
//! level = "debug"
//! format = "compact"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::logging::LoggingConfig;
use crate::session::SessionSettings;
use crate::traits::{CameraError, Format, FourCC, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera and session settings.
    pub camera: CameraConfig,
    /// Sequence capture settings.
    pub sequencer: SequencerConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Camera and session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device index (`/dev/videoN`).
    pub device_index: u32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format as a four character code.
    pub fourcc: String,
    /// Coordinate frame name stamped on images.
    pub frame_id: String,
    /// Number of driver buffers.
    pub buffer_count: u32,
    /// Desired frame rate; -1 selects the camera maximum.
    pub desired_frame_rate: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fourcc: "YUYV".to_owned(),
            frame_id: "camera".to_owned(),
            buffer_count: 4,
            desired_frame_rate: -1.0,
        }
    }
}

/// Sequence capture settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Offer sequence capture instead of exposure and brightness control.
    pub enabled: bool,
    /// Exposure time of each burst frame in microseconds.
    pub exposure_times: Vec<f64>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| CameraError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(CameraError::Config(format!(
                "frame size {}x{} is empty",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.buffer_count == 0 {
            return Err(CameraError::Config("buffer_count must be positive".to_owned()));
        }
        let rate = self.camera.desired_frame_rate;
        if !rate.is_finite() {
            return Err(CameraError::Config(format!("desired_frame_rate {rate} is not finite")));
        }
        self.fourcc()?;
        if self.sequencer.enabled {
            if self.sequencer.exposure_times.is_empty() {
                return Err(CameraError::Config(
                    "sequencer enabled without exposure times".to_owned(),
                ));
            }
            if let Some(bad) = self
                .sequencer
                .exposure_times
                .iter()
                .find(|t| !t.is_finite() || **t <= 0.0)
            {
                return Err(CameraError::Config(format!("invalid exposure time {bad}")));
            }
        }
        Ok(())
    }

    /// Requested pixel format.
    pub fn fourcc(&self) -> Result<FourCC> {
        FourCC::parse(&self.camera.fourcc)
            .ok_or_else(|| CameraError::Config(format!("invalid fourcc {:?}", self.camera.fourcc)))
    }

    /// Requested capture format.
    pub fn format(&self) -> Result<Format> {
        Ok(Format::new(self.camera.width, self.camera.height, self.fourcc()?))
    }

    /// Settings for starting a session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            frame_id: self.camera.frame_id.clone(),
            desired_frame_rate: self.camera.desired_frame_rate,
            sequence_exposure_times: self
                .sequencer
                .enabled
                .then(|| self.sequencer.exposure_times.clone()),
        }
    }
}
