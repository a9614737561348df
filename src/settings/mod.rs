// SPDX-License-Identifier: GPL-3.0-or-later
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context as _};
use serde::Deserialize;
use tracing::warn;

mod cli;
pub(crate) mod gradient;

use crate::ambient::AmbientSettings;
use crate::capture::{CameraSettings, PlaybackSettings};
use crate::detect::DetectionSettings;
use crate::display::DisplaySettings;
use crate::normalize::Calibration;
use crate::temperature::TemperatureUnit;
pub(crate) use cli::Args;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Settings {
    /// Camera-specific settings.
    #[serde(default)]
    pub(crate) camera: CameraSettings,

    /// The raw temperature range mapped onto the normalized image.
    #[serde(default)]
    pub(crate) calibration: Calibration,

    #[serde(default)]
    pub(crate) detection: DetectionSettings,

    /// Settings for the annotated window.
    #[serde(default)]
    pub(crate) display: DisplaySettings,

    /// An optional environmental sensor, read once per cycle.
    #[serde(default)]
    pub(crate) ambient: Option<AmbientSettings>,

    #[serde(default)]
    pub(crate) display_unit: TemperatureUnit,
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// A missing file is not an error, the defaults are used instead.
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            warn!(
                path = %path.display(),
                "configuration file not found, using the defaults"
            );
            return Ok(Self::default());
        }
        let config_data = fs::read(path)
            .with_context(|| format!("Unable to read configuration from {}", path.display()))?;
        toml::from_slice(&config_data)
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Override settings with anything given on the command line.
    pub(crate) fn apply_args(&mut self, args: &Args) -> anyhow::Result<()> {
        if args.min_temperature.is_some() || args.max_temperature.is_some() {
            self.calibration = Calibration::new(
                args.min_temperature
                    .unwrap_or_else(|| self.calibration.min_temperature()),
                args.max_temperature
                    .unwrap_or_else(|| self.calibration.max_temperature()),
            )?;
        }
        if let Some(threshold) = args.detection_confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(anyhow!(
                    "The detection confidence threshold must be between 0 and 1, not {}",
                    threshold
                ));
            }
            self.detection.confidence_threshold = threshold;
        }
        if let Some(max_regions) = args.max_detected_regions {
            if max_regions == 0 {
                return Err(anyhow!("At least one detected region must be allowed"));
            }
            self.detection.max_regions = max_regions;
        }
        if let Some(unit) = args.display_unit {
            self.display_unit = unit;
        }
        if let Some(path) = &args.playback {
            self.camera = CameraSettings::Playback(PlaybackSettings::new(path.clone()));
        }
        if let Some(repeat_mode) = args.repeat_mode {
            match &mut self.camera {
                CameraSettings::Playback(playback) => playback.repeat_mode = repeat_mode,
                _ => return Err(anyhow!("--repeat-mode only applies to playback cameras")),
            }
        }
        if args.display || args.snapshot.is_some() {
            self.display.enabled = true;
        }
        if let Some(path) = &args.snapshot {
            self.display.snapshot_path = Some(path.clone());
        }
        if let Some(colors) = args.colors {
            self.display.colors = colors;
        }
        Ok(())
    }
}
