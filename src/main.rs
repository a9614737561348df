// SPDX-License-Identifier: GPL-3.0-or-later
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use structopt::StructOpt;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod ambient;
mod capture;
mod correlate;
mod detect;
mod display;
mod error;
mod frame_buffer;
mod geometry;
mod normalize;
mod pipeline;
mod settings;
mod temperature;
mod util;

use crate::capture::{CameraSettings, CaptureDriver, CaptureSession, PlaybackDriver, Recorder};
use crate::detect::HotspotDetector;
use crate::display::Display;
use crate::pipeline::{Processor, Reporter};
use crate::settings::{Args, Settings};

/// An explicit level takes precedence over `RUST_LOG`, and `info` is used when neither is given.
fn log_filter(level: Option<&str>) -> anyhow::Result<EnvFilter> {
    match level {
        Some(level) => {
            EnvFilter::try_new(level).with_context(|| format!("Invalid log level {:?}", level))
        }
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Clear the returned flag on SIGINT, SIGTERM or SIGHUP.
fn install_shutdown_handler() -> anyhow::Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("interrupted, shutting down");
        handler_flag.store(false, Ordering::Release);
    })
    .context("Unable to install the shutdown handler")?;
    Ok(running)
}

fn create_processor(
    settings: &Settings,
    args: &Args,
    frame_size: (u32, u32),
) -> anyhow::Result<Processor> {
    let mut processor = Processor::new(
        frame_size,
        settings.calibration,
        settings.display_unit,
        &settings.detection,
    );
    if settings.detection.enabled {
        processor =
            processor.with_detector(Box::new(HotspotDetector::new(settings.detection.hotspot)));
        if let Some(ambient_settings) = &settings.ambient {
            match ambient::open_sensor(ambient_settings) {
                Ok(sensor) => processor = processor.with_ambient(sensor),
                Err(err) => warn!("Ambient sensor unavailable: {:?}", err),
            }
        }
    }
    if settings.display.enabled {
        processor = processor.with_display(Display::new(&settings.display));
    }
    if let Some(path) = &args.record {
        let recorder = Recorder::create(path)
            .with_context(|| format!("Unable to record to {}", path.display()))?;
        info!(path = %path.display(), "recording raw frames");
        processor = processor.with_recorder(recorder);
    }
    Ok(processor)
}

fn run_session<D>(
    driver: D,
    settings: &Settings,
    args: &Args,
    running: &AtomicBool,
) -> anyhow::Result<()>
where
    D: CaptureDriver,
{
    let mut session = CaptureSession::open(
        driver,
        settings.camera.vendor_id(),
        settings.camera.product_id(),
    )?;
    info!(
        width = session.width(),
        height = session.height(),
        frame_rate = session.frame_rate(),
        "camera opened"
    );
    let mut processor = create_processor(settings, args, (session.width(), session.height()))?;
    let snapshot_path = settings
        .display
        .enabled
        .then(|| settings.display.snapshot_path.clone())
        .flatten();
    let reporter = Reporter::new(settings.display_unit, snapshot_path);
    session.start()?;
    pipeline::run(
        &session,
        &mut processor,
        session.frame_rate(),
        running,
        |report| reporter.report(&report),
    );
    let dropped = session.dropped_frames();
    if dropped > 0 {
        warn!(dropped, "malformed frames were dropped");
    }
    session.close();
    debug!(state = %session.state(), "capture session ended");
    processor.finish()
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut settings = Settings::load(&args.config_path)?;
    settings.apply_args(&args)?;
    let running = install_shutdown_handler()?;

    match &settings.camera {
        CameraSettings::Playback(playback) => {
            info!(
                path = %playback.path.display(),
                repeat_mode = %playback.repeat_mode,
                "playing back a recording"
            );
            run_session(
                PlaybackDriver::new(playback.clone()),
                &settings,
                &args,
                &running,
            )
        }
        #[cfg(feature = "v4l2")]
        CameraSettings::V4l2 { device, .. } => run_session(
            capture::V4l2Driver::new(device.clone()),
            &settings,
            &args,
            &running,
        ),
        #[cfg(not(feature = "v4l2"))]
        CameraSettings::V4l2 { .. } => Err(anyhow::anyhow!(
            "This build does not include V4L2 support, only playback cameras are available"
        )),
    }
}

fn main() {
    let args = Args::from_args();
    match log_filter(args.log_level.as_deref()) {
        Ok(filter) => tracing_subscriber::fmt().with_env_filter(filter).init(),
        Err(err) => {
            eprintln!("{:?}", err);
            process::exit(2);
        }
    }
    if let Err(err) = run(args) {
        error!("{:?}", err);
        process::exit(1);
    }
}
