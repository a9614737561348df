// SPDX-License-Identifier: GPL-3.0-or-later
//! A BME680 driven directly over an I²C bus.
use std::convert::TryFrom;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use bme680::{
    Bme680, FieldDataCondition, I2CAddress, IIRFilterSize, OversamplingSetting, PowerMode,
    SettingsBuilder,
};
use linux_embedded_hal::{Delay, I2cdev};
use serde::de::{Deserialize, Deserializer, Error as _};
use tracing::debug;

use super::{AmbientReading, AmbientSensor};
use crate::error::SensorNotReady;
use crate::temperature::Temperature;
use crate::util::parse_int_decimal_hex;

/// The address used when SDO is pulled low.
const PRIMARY_ADDRESS: u8 = 0x76;
/// The address used when SDO is pulled high.
const SECONDARY_ADDRESS: u8 = 0x77;

#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum Bus {
    Number(u32),
    Path(String),
}

impl Bus {
    fn device_path(&self) -> PathBuf {
        match self {
            Bus::Number(n) => PathBuf::from(format!("/dev/i2c-{}", n)),
            Bus::Path(p) => PathBuf::from(p),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Bus::Number(1)
    }
}

/// Addresses may be written as integers or as strings, so that hexadecimal can be used (`"0x77"`).
fn deserialize_address<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Address {
        Number(u8),
        Text(String),
    }

    let address = match Address::deserialize(deserializer)? {
        Address::Number(address) => address,
        Address::Text(text) => parse_int_decimal_hex(text.trim())
            .map_err(|err| D::Error::custom(format!("invalid I²C address {:?}: {}", text, err)))?,
    };
    match address {
        PRIMARY_ADDRESS | SECONDARY_ADDRESS => Ok(address),
        _ => Err(D::Error::custom(format!(
            "a BME680 can only be at 0x{:02x} or 0x{:02x}, not 0x{:02x}",
            PRIMARY_ADDRESS, SECONDARY_ADDRESS, address
        ))),
    }
}

fn default_address() -> u8 {
    PRIMARY_ADDRESS
}

#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub(crate) struct I2cSettings {
    #[serde(default)]
    pub(crate) bus: Bus,

    #[serde(default = "default_address", deserialize_with = "deserialize_address")]
    pub(crate) address: u8,
}

impl Default for I2cSettings {
    fn default() -> Self {
        Self {
            bus: Bus::default(),
            address: default_address(),
        }
    }
}

impl I2cSettings {
    fn chip_address(&self) -> I2CAddress {
        if self.address == SECONDARY_ADDRESS {
            I2CAddress::Secondary
        } else {
            I2CAddress::Primary
        }
    }
}

impl TryFrom<&I2cSettings> for I2cdev {
    type Error = anyhow::Error;

    fn try_from(settings: &I2cSettings) -> Result<Self, Self::Error> {
        let device_path = settings.bus.device_path();
        I2cdev::new(&device_path)
            .with_context(|| format!("Unable to open I²C bus {}", device_path.display()))
    }
}

/// A BME680 in forced mode: every read triggers a single measurement.
pub(crate) struct Bme680Sensor {
    device: Bme680<I2cdev, Delay>,
    delay: Delay,
    measurement_duration: Duration,
}

impl Bme680Sensor {
    pub(crate) fn open(settings: &I2cSettings) -> anyhow::Result<Self> {
        let bus = I2cdev::try_from(settings)?;
        let mut delay = Delay;
        let mut device = Bme680::init(bus, &mut delay, settings.chip_address())
            .map_err(|err| anyhow!("Unable to initialize the BME680: {:?}", err))?;
        // The gas heater is left off, it warms the die and skews the temperature.
        let sensor_settings = SettingsBuilder::new()
            .with_humidity_oversampling(OversamplingSetting::OS2x)
            .with_pressure_oversampling(OversamplingSetting::OS4x)
            .with_temperature_oversampling(OversamplingSetting::OS8x)
            .with_temperature_filter(IIRFilterSize::Size3)
            .with_run_gas(false)
            .build();
        let measurement_duration = device
            .get_profile_dur(&sensor_settings.0)
            .map_err(|err| anyhow!("Unable to compute the BME680 profile: {:?}", err))?;
        device
            .set_sensor_settings(&mut delay, sensor_settings)
            .map_err(|err| anyhow!("Unable to configure the BME680: {:?}", err))?;
        debug!(
            bus = %settings.bus.device_path().display(),
            address = settings.address,
            ?measurement_duration,
            "BME680 configured"
        );
        Ok(Self {
            device,
            delay,
            measurement_duration,
        })
    }

    fn measure(&mut self) -> anyhow::Result<AmbientReading> {
        self.device
            .set_sensor_mode(&mut self.delay, PowerMode::ForcedMode)
            .map_err(|err| anyhow!("Unable to start a BME680 measurement: {:?}", err))?;
        thread::sleep(self.measurement_duration);
        let (data, condition) = self
            .device
            .get_sensor_data(&mut self.delay)
            .map_err(|err| anyhow!("Unable to read the BME680: {:?}", err))?;
        if matches!(condition, FieldDataCondition::Unchanged) {
            return Err(anyhow!("The BME680 has no new measurement"));
        }
        Ok(AmbientReading {
            temperature: Temperature::Celsius(data.temperature_celsius()),
            pressure: data.pressure_hpa(),
            humidity: data.humidity_percent(),
        })
    }
}

impl AmbientSensor for Bme680Sensor {
    fn read(&mut self) -> Result<AmbientReading, SensorNotReady> {
        self.measure().map_err(SensorNotReady)
    }
}
