//! Cam-grab-control binary: runs a grabbing session on a V4L2 camera.
//!
//! ```bash
//! cam-grab-control --config camera.toml run
//! cam-grab-control set-exposure 8000
//! cam-grab-control set-brightness 128
//! cam-grab-control --config sequencer.toml grab-sequence
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use cam_grab_control::clock::rate;
use cam_grab_control::{
    logging, CameraDevice, CameraInfo, Config, ExposureTimes, Frame, PeriodicPublisher, Session,
    SystemClock, Transport, V4L2Device,
};

#[derive(Parser)]
#[command(name = "cam-grab-control")]
#[command(about = "Grab coordination and camera control for V4L2 cameras", long_about = None)]
struct Cli {
    /// Configuration file (TOML format); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish frames at the session frame rate
    Run {
        /// Start with grabbing paused
        #[arg(long)]
        sleeping: bool,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Drive the camera exposure to a target in microseconds
    SetExposure {
        /// Target exposure time in microseconds
        exposure_us: f64,
    },

    /// Drive the camera brightness to a target
    SetBrightness {
        /// Target mean image brightness
        target: u8,
    },

    /// Capture one burst with the configured exposure times
    GrabSequence,
}

/// Transport that logs every delivered message.
struct LogTransport;

impl Transport for LogTransport {
    fn subscriber_count(&self) -> usize {
        1
    }

    fn publish(&self, frame: &Frame, info: &CameraInfo) {
        debug!(
            frame_id = %info.frame_id,
            width = info.width,
            height = info.height,
            encoding = frame.metadata.encoding.encoding(),
            bytes = frame.data.len(),
            "image published"
        );
    }

    fn publish_exposure_times(&self, message: &ExposureTimes) {
        info!(exposure_times = ?message.exposure_times, "exposure times published");
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    logging::init(&config.logging);

    let session = Arc::new(open_session(&config)?);
    let transport: Arc<dyn Transport> = Arc::new(LogTransport);
    let period = rate(session.info().frame_rate);

    match cli.command {
        Commands::Run { sleeping, duration } => {
            let stop_after = duration.map(run_duration).transpose()?;
            session.set_sleeping(sleeping);
            let publisher = PeriodicPublisher::new(Arc::clone(&session), transport);
            let keep_running = AtomicBool::new(true);
            std::thread::scope(|scope| {
                if let Some(stop_after) = stop_after {
                    let keep_running = &keep_running;
                    scope.spawn(move || {
                        std::thread::sleep(stop_after);
                        keep_running.store(false, Ordering::Release);
                    });
                }
                publisher.run(period, &keep_running);
            });
        }
        Commands::SetExposure { exposure_us } => {
            let service = session
                .exposure_service()
                .context("exposure control is disabled in sequencer mode")?;
            let outcome = with_publisher(&session, &transport, period, || {
                service.set_exposure(exposure_us)
            });
            info!(?outcome, exposure_us, "set exposure finished");
            if !outcome.is_success() {
                bail!("set exposure to {exposure_us} us failed: {outcome:?}");
            }
        }
        Commands::SetBrightness { target } => {
            let service = session
                .brightness_service()
                .context("brightness control is disabled in sequencer mode")?;
            let outcome = with_publisher(&session, &transport, period, || {
                service.set_brightness(target)
            });
            info!(?outcome, target, "set brightness finished");
            if !outcome.is_success() {
                bail!("set brightness to {target} failed: {outcome:?}");
            }
        }
        Commands::GrabSequence => {
            let service = session
                .sequence_service()
                .context("sequence capture needs [sequencer] enabled with exposure times")?;
            let result = with_publisher(&session, &transport, period, || service.grab_sequence());
            info!(
                success = result.success,
                images = result.images.len(),
                "grab sequence finished"
            );
            if !result.success {
                bail!("sequence capture failed");
            }
            PeriodicPublisher::new(Arc::clone(&session), transport).publish_sequence(&result);
        }
    }

    if session.shutdown().is_requested() {
        bail!("camera was removed");
    }
    Ok(())
}

/// Length of a `run --duration` in seconds.
fn run_duration(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("invalid --duration {secs}, expected seconds >= 0"))
}

fn open_session(config: &Config) -> Result<Session> {
    let index = config.camera.device_index;
    let mut device = V4L2Device::open(index)
        .with_context(|| format!("failed to open /dev/video{index}"))?
        .with_buffer_count(config.camera.buffer_count);

    let requested = config.format()?;
    let actual = device
        .set_format(&requested)
        .context("failed to set capture format")?;
    info!(
        width = actual.width,
        height = actual.height,
        fourcc = ?actual.fourcc,
        "capture format set"
    );

    let device: Arc<dyn CameraDevice> = Arc::new(device);
    Session::start(device, config.session_settings(), Arc::new(SystemClock))
        .context("failed to start grab session")
}

/// Run `request` while a publisher keeps ticking on a background thread.
fn with_publisher<R, F>(
    session: &Arc<Session>,
    transport: &Arc<dyn Transport>,
    period: Duration,
    request: F,
) -> R
where
    F: FnOnce() -> R,
{
    // the camera only counts as ready once it has delivered a frame
    if let Err(err) = session.grabber().grab_one() {
        warn!(error = %err, "first grab failed");
    }

    let publisher = PeriodicPublisher::new(Arc::clone(session), Arc::clone(transport));
    let keep_running = AtomicBool::new(true);
    std::thread::scope(|scope| {
        scope.spawn(|| publisher.run(period, &keep_running));
        let result = request();
        keep_running.store(false, Ordering::Release);
        result
    })
}
