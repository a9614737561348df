// SPDX-License-Identifier: GPL-3.0-or-later
//! Environmental sensors bound to a kernel driver, read through the Linux IIO interface.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _};
use serde::Deserialize;
use tracing::debug;

use super::{AmbientReading, AmbientSensor};
use crate::error::SensorNotReady;
use crate::temperature::Temperature;

const IIO_DEVICES: &str = "/sys/bus/iio/devices";

fn default_sensor_name() -> String {
    "bme680".to_string()
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct IioSettings {
    /// The IIO device directory, for example `/sys/bus/iio/devices/iio:device0`. When not given,
    /// the first device whose name matches `name` is used.
    #[serde(default)]
    pub(crate) device: Option<PathBuf>,

    #[serde(default = "default_sensor_name")]
    pub(crate) name: String,
}

/// A temperature, pressure, and humidity sensor (BME280, BME680 and the like) exposed through
/// IIO.
#[derive(Clone, Debug)]
pub(crate) struct IioSensor {
    device_dir: PathBuf,
}

impl IioSensor {
    pub(crate) fn new(device_dir: PathBuf) -> Self {
        Self { device_dir }
    }

    pub(crate) fn from_settings(settings: &IioSettings) -> anyhow::Result<Self> {
        match &settings.device {
            Some(device_dir) => Ok(Self::new(device_dir.clone())),
            None => Self::find(Path::new(IIO_DEVICES), &settings.name),
        }
    }

    /// Find the first IIO device under `root` with the given name.
    pub(crate) fn find(root: &Path, name: &str) -> anyhow::Result<Self> {
        let mut candidates: Vec<PathBuf> = fs::read_dir(root)
            .with_context(|| format!("Unable to list IIO devices in {}", root.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        candidates.sort();
        candidates
            .into_iter()
            .find(|path| {
                fs::read_to_string(path.join("name"))
                    .map(|device_name| device_name.trim() == name)
                    .unwrap_or(false)
            })
            .map(|device_dir| {
                debug!(path = %device_dir.display(), name, "found ambient sensor");
                Self::new(device_dir)
            })
            .ok_or_else(|| anyhow!("No IIO device named {} was found", name))
    }

    fn read_channel(&self, channel: &str) -> anyhow::Result<f32> {
        let path = self.device_dir.join(channel);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        contents
            .trim()
            .parse()
            .with_context(|| format!("Invalid value in {}: {:?}", path.display(), contents))
    }

    fn read_all(&self) -> anyhow::Result<AmbientReading> {
        // IIO reports temperature in milli-degrees Celsius, pressure in kilopascals, and humidity
        // in milli-percent.
        let temperature = self.read_channel("in_temp_input")? / 1000.0;
        let pressure = self.read_channel("in_pressure_input")? * 10.0;
        let humidity = self.read_channel("in_humidityrelative_input")? / 1000.0;
        Ok(AmbientReading {
            temperature: Temperature::Celsius(temperature),
            pressure,
            humidity,
        })
    }
}

impl AmbientSensor for IioSensor {
    fn read(&mut self) -> Result<AmbientReading, SensorNotReady> {
        self.read_all().map_err(SensorNotReady)
    }
}
