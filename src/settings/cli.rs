// SPDX-License-Identifier: GPL-3.0-or-later
use structopt::StructOpt;

use std::path::PathBuf;

use super::gradient;
use crate::capture::RepeatMode;
use crate::temperature::{Centikelvin, TemperatureUnit};

#[derive(Debug, StructOpt)]
#[structopt()]
pub(crate) struct Args {
    /// Path to a configuration file.
    #[structopt(short, long, parse(from_os_str), default_value = "config.toml")]
    pub(crate) config_path: PathBuf,

    /// Log level filter (overrides RUST_LOG), for example "debug" or "fever_screen=trace".
    #[structopt(short, long)]
    pub(crate) log_level: Option<String>,

    /// Raw sensor value mapped to the darkest intensity.
    #[structopt(long)]
    pub(crate) min_temperature: Option<Centikelvin>,

    /// Raw sensor value mapped to the brightest intensity.
    #[structopt(long)]
    pub(crate) max_temperature: Option<Centikelvin>,

    /// Ignore detections less confident than this (between 0 and 1).
    #[structopt(long)]
    pub(crate) detection_confidence_threshold: Option<f32>,

    /// The most regions to measure in a single frame.
    #[structopt(long)]
    pub(crate) max_detected_regions: Option<usize>,

    /// Report temperatures in this unit ("celsius" or "fahrenheit").
    #[structopt(short = "u", long)]
    pub(crate) display_unit: Option<TemperatureUnit>,

    /// Play back a raw recording instead of using the configured camera.
    #[structopt(long, parse(from_os_str))]
    pub(crate) playback: Option<PathBuf>,

    /// How a recording repeats during playback ("none", "loop" or "bounce").
    #[structopt(long)]
    pub(crate) repeat_mode: Option<RepeatMode>,

    /// Save every processed raw frame to this file.
    #[structopt(long, parse(from_os_str))]
    pub(crate) record: Option<PathBuf>,

    /// Render the annotated window.
    #[structopt(short, long)]
    pub(crate) display: bool,

    /// Write the rendered window to this JPEG file (implies --display).
    #[structopt(long, parse(from_os_str))]
    pub(crate) snapshot: Option<PathBuf>,

    /// The colorous gradient used for the window.
    #[structopt(long, parse(try_from_str = gradient::from_str))]
    pub(crate) colors: Option<colorous::Gradient>,
}
