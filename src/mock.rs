//! Mock device and simulated clock for testing without hardware.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::traits::{CameraDevice, CameraError, DeviceCapabilities, Format, FourCC, Result};

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Every byte equals the current brightness level.
    Solid,
    /// Every byte equals the index of the grab (wrapping), so frames of a
    /// burst can be told apart.
    GrabIndex,
    /// Half a frame of zeros, as delivered by a broken transfer.
    Truncated,
}

/// How the simulated exposure reacts to `set_exposure`.
#[derive(Debug, Clone, Copy)]
pub enum ExposureResponse {
    /// The requested value is reported on the next read.
    Immediate,
    /// The reported value never changes.
    Stuck,
    /// The reported value lands this far from the request.
    Offset(f64),
}

/// How the simulated auto brightness function reacts to `set_brightness`.
#[derive(Debug, Clone, Copy)]
pub enum BrightnessResponse {
    /// Frames reach the target and the auto function stops.
    Reach,
    /// Frames settle at the given level and the auto function stops.
    SettleAt(u8),
    /// The auto function keeps running forever.
    NeverSettle,
}

#[derive(Debug)]
struct MockState {
    ready: bool,
    removed: bool,
    pattern: TestPattern,
    grab_count: usize,
    failing_grabs: HashSet<usize>,
    removal_grab: Option<usize>,
    brightness: u8,
    brightness_response: BrightnessResponse,
    auto_running: bool,
    liveness_read_fails: bool,
    set_brightness_calls: Vec<u8>,
    exposure: f64,
    exposure_step: f64,
    exposure_response: ExposureResponse,
    set_exposure_calls: Vec<f64>,
    sequence_steps: Vec<f64>,
    max_fps: f64,
    frame_rate: Option<f64>,
}

type Hook = Box<dyn FnMut() + Send>;

/// Scriptable in-memory camera.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    format: Format,
    state: Mutex<MockState>,
    before_brightness_write: Mutex<Option<Hook>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a ready 8x4 mono camera with brightness 50 and exposure 1000 us.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            format: Format::new(8, 4, FourCC::GREY),
            state: Mutex::new(MockState {
                ready: true,
                removed: false,
                pattern: TestPattern::Solid,
                grab_count: 0,
                failing_grabs: HashSet::new(),
                removal_grab: None,
                brightness: 50,
                brightness_response: BrightnessResponse::Reach,
                auto_running: false,
                liveness_read_fails: false,
                set_brightness_calls: Vec::new(),
                exposure: 1000.0,
                exposure_step: 10.0,
                exposure_response: ExposureResponse::Immediate,
                set_exposure_calls: Vec::new(),
                sequence_steps: Vec::new(),
                max_fps: 30.0,
                frame_rate: None,
            }),
            before_brightness_write: Mutex::new(None),
        }
    }

    /// Set the frame pattern.
    #[must_use]
    pub fn with_pattern(self, pattern: TestPattern) -> Self {
        self.state.lock().pattern = pattern;
        self
    }

    /// Set whether the camera reports ready.
    #[must_use]
    pub fn with_ready(self, ready: bool) -> Self {
        self.state.lock().ready = ready;
        self
    }

    /// Set the brightness level of generated frames.
    #[must_use]
    pub fn with_brightness(self, level: u8) -> Self {
        self.state.lock().brightness = level;
        self
    }

    /// Set the reaction to brightness requests.
    #[must_use]
    pub fn with_brightness_response(self, response: BrightnessResponse) -> Self {
        self.state.lock().brightness_response = response;
        self
    }

    /// Set the reported exposure and its step.
    #[must_use]
    pub fn with_exposure(self, exposure: f64, step: f64) -> Self {
        {
            let mut state = self.state.lock();
            state.exposure = exposure;
            state.exposure_step = step;
        }
        self
    }

    /// Set the reaction to exposure requests.
    #[must_use]
    pub fn with_exposure_response(self, response: ExposureResponse) -> Self {
        self.state.lock().exposure_response = response;
        self
    }

    /// Set the maximum frame rate.
    #[must_use]
    pub fn with_max_fps(self, fps: f64) -> Self {
        self.state.lock().max_fps = fps;
        self
    }

    /// Make the grab with the given zero-based index fail.
    #[must_use]
    pub fn with_failing_grab(self, index: usize) -> Self {
        self.state.lock().failing_grabs.insert(index);
        self
    }

    /// Make the grab with the given zero-based index report removal while the
    /// device node still looks present.
    #[must_use]
    pub fn with_removal_on_grab(self, index: usize) -> Self {
        self.state.lock().removal_grab = Some(index);
        self
    }

    /// Make reading the auto brightness state return an error.
    #[must_use]
    pub fn with_failing_liveness_read(self) -> Self {
        self.state.lock().liveness_read_fails = true;
        self
    }

    /// Unplug the camera: every later grab fails.
    pub fn remove(&self) {
        self.state.lock().removed = true;
    }

    /// Run `hook` at the start of every `set_brightness`, before the write
    /// reaches the simulated camera.
    pub fn on_set_brightness<F>(&self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.before_brightness_write.lock() = Some(Box::new(hook));
    }

    /// Stop the auto brightness function from outside.
    pub fn finish_auto_brightness(&self) {
        self.state.lock().auto_running = false;
    }

    /// Number of grab attempts so far.
    pub fn grab_count(&self) -> usize {
        self.state.lock().grab_count
    }

    /// Exposure values written so far.
    pub fn set_exposure_calls(&self) -> Vec<f64> {
        self.state.lock().set_exposure_calls.clone()
    }

    /// Brightness targets written so far.
    pub fn set_brightness_calls(&self) -> Vec<u8> {
        self.state.lock().set_brightness_calls.clone()
    }

    /// Exposures prepared for burst steps so far.
    pub fn sequence_steps(&self) -> Vec<f64> {
        self.state.lock().sequence_steps.clone()
    }

    /// Frame rate set on the camera, if any.
    pub fn frame_rate(&self) -> Option<f64> {
        self.state.lock().frame_rate
    }
}

impl CameraDevice for MockDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn format(&self) -> Format {
        self.format.clone()
    }

    fn grab(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut state = self.state.lock();
        let index = state.grab_count;
        state.grab_count += 1;

        if state.removed || state.removal_grab == Some(index) {
            return Err(CameraError::DeviceRemoved);
        }
        if state.failing_grabs.contains(&index) {
            return Err(CameraError::StreamError(format!("grab {index} failed")));
        }

        buffer.clear();
        buffer.resize(self.format.frame_len(), 0);
        match state.pattern {
            TestPattern::Solid => buffer.fill(state.brightness),
            TestPattern::GrabIndex => {
                #[allow(clippy::cast_possible_truncation)]
                let value = index as u8;
                buffer.fill(value);
            }
            TestPattern::Truncated => buffer.truncate(self.format.frame_len() / 2),
        }
        state.ready = true;
        Ok(())
    }

    fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    fn current_exposure(&self) -> Result<f64> {
        Ok(self.state.lock().exposure)
    }

    fn set_exposure(&self, exposure_us: f64) -> Result<()> {
        let mut state = self.state.lock();
        state.set_exposure_calls.push(exposure_us);
        match state.exposure_response {
            ExposureResponse::Immediate => state.exposure = exposure_us,
            ExposureResponse::Stuck => {}
            ExposureResponse::Offset(offset) => state.exposure = exposure_us + offset,
        }
        Ok(())
    }

    fn exposure_step(&self) -> Result<f64> {
        Ok(self.state.lock().exposure_step)
    }

    fn set_brightness(&self, target: u8) -> Result<()> {
        if let Some(hook) = self.before_brightness_write.lock().as_mut() {
            hook();
        }
        let mut state = self.state.lock();
        state.set_brightness_calls.push(target);
        match state.brightness_response {
            BrightnessResponse::Reach => {
                state.brightness = target;
                state.auto_running = false;
            }
            BrightnessResponse::SettleAt(level) => {
                state.brightness = level;
                state.auto_running = false;
            }
            BrightnessResponse::NeverSettle => state.auto_running = true,
        }
        Ok(())
    }

    fn is_auto_brightness_running(&self) -> Result<bool> {
        let state = self.state.lock();
        if state.liveness_read_fails {
            return Err(CameraError::PropertyAccess("auto function node not readable".to_owned()));
        }
        Ok(state.auto_running)
    }

    fn max_possible_framerate(&self) -> Result<f64> {
        Ok(self.state.lock().max_fps)
    }

    fn set_frame_rate(&self, fps: f64) -> Result<()> {
        self.state.lock().frame_rate = Some(fps);
        Ok(())
    }

    fn prepare_sequence_step(&self, exposure_us: f64) -> Result<()> {
        self.state.lock().sequence_steps.push(exposure_us);
        Ok(())
    }
}

/// Clock whose `sleep` advances virtual time instantly.
///
/// An optional hook runs after every sleep, standing in for the work the
/// scheduler would service while a poll loop waits.
pub struct SimClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: AtomicUsize,
    hook: Mutex<Option<Hook>>,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    /// Create a clock at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: AtomicUsize::new(0),
            hook: Mutex::new(None),
        }
    }

    /// Run `hook` after every sleep.
    pub fn on_sleep<F>(&self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        *self.hook.lock() = Some(Box::new(hook));
    }

    /// Virtual time passed since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }

    /// Number of sleeps so far.
    pub fn sleeps(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.hook.lock().as_mut() {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.is_ready());
        assert!(!device.is_removed());
    }

    #[test]
    fn test_mock_grab_patterns() {
        let device = MockDevice::new().with_pattern(TestPattern::GrabIndex);
        let mut buffer = Vec::new();
        device.grab(&mut buffer).expect("grab should succeed");
        assert_eq!(buffer.len(), 32);
        assert!(buffer.iter().all(|&b| b == 0));
        device.grab(&mut buffer).expect("grab should succeed");
        assert!(buffer.iter().all(|&b| b == 1));
        assert_eq!(device.grab_count(), 2);
    }

    #[test]
    fn test_scripted_failures() {
        let device = MockDevice::new().with_failing_grab(1);
        let mut buffer = Vec::new();
        assert!(device.grab(&mut buffer).is_ok());
        assert!(device.grab(&mut buffer).is_err());
        assert!(device.grab(&mut buffer).is_ok());

        device.remove();
        let removed = device.grab(&mut buffer);
        assert!(matches!(removed, Err(CameraError::DeviceRemoved)));
        assert!(device.is_removed());
    }

    #[test]
    fn test_brightness_responses() {
        let device = MockDevice::new().with_brightness_response(BrightnessResponse::NeverSettle);
        device.set_brightness(120).expect("set_brightness should succeed");
        assert!(device.is_auto_brightness_running().expect("liveness read"));
        device.finish_auto_brightness();
        assert!(!device.is_auto_brightness_running().expect("liveness read"));
        assert_eq!(device.set_brightness_calls(), vec![120]);
    }

    #[test]
    fn test_sim_clock_runs_hook() {
        let clock = SimClock::new();
        let start = clock.now();
        let counter = std::sync::Arc::new(AtomicUsize::new(0));
        let seen = std::sync::Arc::clone(&counter);
        clock.on_sleep(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        clock.sleep(Duration::from_millis(200));
        clock.sleep(Duration::from_millis(200));

        assert_eq!(clock.now() - start, Duration::from_millis(400));
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
