// SPDX-License-Identifier: GPL-3.0-or-later
//! Ambient conditions from an environmental sensor.
use serde::Deserialize;
use tracing::info;

mod i2c;
mod iio;

pub(crate) use i2c::{Bme680Sensor, I2cSettings};
pub(crate) use iio::{IioSensor, IioSettings};

use crate::error::SensorNotReady;
use crate::temperature::Temperature;

/// One set of environmental measurements.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct AmbientReading {
    pub(crate) temperature: Temperature,
    /// In hectopascals.
    pub(crate) pressure: f32,
    /// Relative humidity in percent.
    pub(crate) humidity: f32,
}

pub(crate) trait AmbientSensor {
    fn read(&mut self) -> Result<AmbientReading, SensorNotReady>;
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub(crate) enum AmbientSettings {
    /// A BME680 on an I²C bus, driven from userspace.
    Bme680(I2cSettings),

    /// Any temperature, pressure, and humidity sensor already bound to a kernel IIO driver.
    Iio(IioSettings),
}

impl Default for AmbientSettings {
    fn default() -> Self {
        AmbientSettings::Bme680(I2cSettings::default())
    }
}

pub(crate) fn open_sensor(settings: &AmbientSettings) -> anyhow::Result<Box<dyn AmbientSensor>> {
    let sensor: Box<dyn AmbientSensor> = match settings {
        AmbientSettings::Bme680(i2c) => Box::new(Bme680Sensor::open(i2c)?),
        AmbientSettings::Iio(iio) => Box::new(IioSensor::from_settings(iio)?),
    };
    info!(?settings, "ambient sensor opened");
    Ok(sensor)
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::i2c::Bus;
    use super::{open_sensor, AmbientSettings, I2cSettings, IioSettings};
    use crate::temperature::Temperature;

    #[test]
    fn bme680_settings() {
        let settings: AmbientSettings =
            toml::from_str("kind = \"bme680\"\nbus = 0\naddress = \"0x77\"").unwrap();
        assert_eq!(
            settings,
            AmbientSettings::Bme680(I2cSettings {
                bus: Bus::Number(0),
                address: 0x77,
            })
        );
        let settings: AmbientSettings = toml::from_str("kind = \"bme680\"").unwrap();
        assert_eq!(settings, AmbientSettings::default());
    }

    #[test]
    fn iio_settings() {
        let settings: AmbientSettings =
            toml::from_str("kind = \"iio\"\nname = \"bme280\"").unwrap();
        assert_eq!(
            settings,
            AmbientSettings::Iio(IioSettings {
                device: None,
                name: "bme280".to_string(),
            })
        );
    }

    #[test]
    fn unknown_kind() {
        assert!(toml::from_str::<AmbientSettings>("kind = \"dht22\"").is_err());
        assert!(toml::from_str::<AmbientSettings>("name = \"bme680\"").is_err());
    }

    #[test]
    fn open_iio() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("iio:device0");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("in_temp_input"), "21000\n").unwrap();
        fs::write(dir.join("in_pressure_input"), "100.0\n").unwrap();
        fs::write(dir.join("in_humidityrelative_input"), "50000\n").unwrap();
        let mut sensor = open_sensor(&AmbientSettings::Iio(IioSettings {
            device: Some(dir),
            name: "bme680".to_string(),
        }))
        .unwrap();
        let reading = sensor.read().unwrap();
        assert_eq!(reading.temperature, Temperature::Celsius(21.0));
    }

    #[test]
    fn open_missing_bus() {
        let settings = AmbientSettings::Bme680(I2cSettings {
            bus: Bus::Path("/nonexistent/i2c-9".to_string()),
            address: 0x76,
        });
        assert!(open_sensor(&settings).is_err());
    }
}
