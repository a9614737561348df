// SPDX-License-Identifier: GPL-3.0-or-later
use std::fmt;
use std::str::FromStr;

use num_traits::Float;
use serde::Deserialize;

/// Raw sensor temperatures are in hundredths of a kelvin.
pub(crate) type Centikelvin = u16;

const KELVIN_OFFSET: f32 = 273.15;

#[derive(Clone, Copy, Debug, Deserialize, Hash, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TemperatureUnit {
    #[serde(alias = "c", alias = "C")]
    Celsius,
    #[serde(alias = "f", alias = "F")]
    Fahrenheit,
}

impl Default for TemperatureUnit {
    fn default() -> Self {
        Self::Celsius
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Fahrenheit => "F",
        })
    }
}

impl FromStr for TemperatureUnit {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_ascii_lowercase() as &str {
            "celsius" | "c" | "metric" => Ok(TemperatureUnit::Celsius),
            "fahrenheit" | "f" | "imperial" => Ok(TemperatureUnit::Fahrenheit),
            _ => Err("unknown temperature unit"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(from = "SerializedTemperature<T>")]
pub(crate) enum Temperature<T = f32>
where
    T: Float,
{
    Celsius(T),
    Fahrenheit(T),
}

impl<T> Temperature<T>
where
    T: Float,
{
    /// Get the temperature in Celsius.
    pub(crate) fn in_celsius(&self) -> T {
        match self {
            Self::Celsius(_) => self.value(),
            Self::Fahrenheit(_) => {
                (self.value() - T::from(32).expect("32 to be able to be represented by a float"))
                    * T::from(5).expect("5 to be able to be represented by a float")
                    / T::from(9).expect("9 to be able to be represented by a float")
            }
        }
    }

    /// Get the temperature in Fahrenheit.
    pub(crate) fn in_fahrenheit(&self) -> T {
        match self {
            Self::Celsius(_) => {
                self.value() * T::from(9).expect("9 to be able to be represented by a float")
                    / T::from(5).expect("5 to be able to be represented by a float")
                    + T::from(32).expect("32 to be able to be represented by a float")
            }
            Self::Fahrenheit(_) => self.value(),
        }
    }

    pub(crate) fn unit(&self) -> TemperatureUnit {
        match self {
            Temperature::Celsius(_) => TemperatureUnit::Celsius,
            Temperature::Fahrenheit(_) => TemperatureUnit::Fahrenheit,
        }
    }

    fn value(&self) -> T {
        let value = match self {
            Temperature::Celsius(c) => *c,
            Temperature::Fahrenheit(f) => *f,
        };
        // Negative zero would be displayed as "-0".
        if value.is_zero() && value.is_sign_negative() {
            T::zero()
        } else {
            value
        }
    }
}

impl Temperature<f32> {
    /// Convert a temperature to the nearest raw sensor value, saturating at the limits of
    /// [`Centikelvin`].
    pub(crate) fn to_centikelvin(&self) -> Centikelvin {
        let centikelvin = ((self.in_celsius() + KELVIN_OFFSET) * 100.0).round();
        centikelvin.max(0.0).min(Centikelvin::MAX as f32) as Centikelvin
    }
}

impl<T> PartialEq<Self> for Temperature<T>
where
    T: Float,
{
    fn eq(&self, other: &Self) -> bool {
        // Always compare in celsius.
        self.in_celsius().eq(&other.in_celsius())
    }
}

impl<T> fmt::Display for Temperature<T>
where
    T: Float,
    T: fmt::Display,
{
    /// Format the temperature value like a numeric value. If the alternate formatting flag (`#`)
    /// is specified, the degree symbol and the unit (ex: `°C`) are also printed. When the
    /// alternate flag is set, no space is added between the temperature value and the degree
    /// symbol. The precision is *not* modified when the alternate mode is set.
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(fmt)?;
        if fmt.alternate() {
            write!(fmt, "°{}", self.unit())?;
        }
        Ok(())
    }
}

/// `raw / 100 - 273.15`
pub(crate) fn to_celsius(raw: Centikelvin) -> f32 {
    raw as f32 / 100.0 - KELVIN_OFFSET
}

/// `celsius * 9 / 5 + 32`
pub(crate) fn to_fahrenheit(raw: Centikelvin) -> f32 {
    Temperature::Celsius(to_celsius(raw)).in_fahrenheit()
}

/// Format a raw temperature rounded to a whole degree.
///
/// With `with_unit` the degree sign and unit letter are appended (`37°C`), otherwise only the
/// number is returned, which is what the on-image labels use.
pub(crate) fn format_temperature(
    raw: Centikelvin,
    unit: TemperatureUnit,
    with_unit: bool,
) -> String {
    let temperature = match unit {
        TemperatureUnit::Celsius => Temperature::Celsius(to_celsius(raw)),
        TemperatureUnit::Fahrenheit => Temperature::Fahrenheit(to_fahrenheit(raw)),
    };
    if with_unit {
        format!("{:#.0}", temperature)
    } else {
        format!("{:.0}", temperature)
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SerializedTemperature<T = f32>
where
    T: Float,
{
    #[serde(alias = "c", alias = "C")]
    Celsius(T),

    #[serde(alias = "f", alias = "F")]
    Fahrenheit(T),
}

impl<T> From<SerializedTemperature<T>> for Temperature<T>
where
    T: Float,
{
    fn from(value: SerializedTemperature<T>) -> Self {
        match value {
            SerializedTemperature::Celsius(c) => Self::Celsius(c),
            SerializedTemperature::Fahrenheit(f) => Self::Fahrenheit(f),
        }
    }
}

#[cfg(test)]
mod test {
    use float_cmp::{approx_eq, F32Margin};
    use serde::Deserialize;

    use super::{
        format_temperature, to_celsius, to_fahrenheit, Temperature, TemperatureUnit,
    };

    #[test]
    fn self_in_self() {
        assert_eq!(Temperature::Celsius(0.5).in_celsius(), 0.5);
        assert_eq!(Temperature::Fahrenheit(0.5).in_fahrenheit(), 0.5);
    }

    #[test]
    fn fahrenheit_in_celsius() {
        assert!(approx_eq!(
            f32,
            Temperature::Fahrenheit(-40.0).in_celsius(),
            -40.0,
            F32Margin::default()
        ));
        assert!(approx_eq!(
            f32,
            Temperature::Fahrenheit(212.0).in_celsius(),
            100.0,
            F32Margin::default()
        ));
    }

    #[test]
    fn celsius_in_fahrenheit() {
        assert!(approx_eq!(
            f32,
            Temperature::Celsius(-40.0f32).in_fahrenheit(),
            -40.0,
            F32Margin::default()
        ));
        assert!(approx_eq!(
            f32,
            Temperature::Celsius(100.0).in_fahrenheit(),
            212.0,
            F32Margin::default()
        ));
    }

    #[test]
    fn raw_to_celsius() {
        assert!(approx_eq!(f32, to_celsius(27315), 0.0, epsilon = 0.001));
        assert!(approx_eq!(f32, to_celsius(31015), 37.0, epsilon = 0.001));
        assert!(approx_eq!(f32, to_celsius(0), -273.15, epsilon = 0.001));
    }

    #[test]
    fn raw_to_fahrenheit() {
        assert!(approx_eq!(f32, to_fahrenheit(27315), 32.0, epsilon = 0.001));
        assert!(approx_eq!(f32, to_fahrenheit(37315), 212.0, epsilon = 0.01));
    }

    #[test]
    fn fahrenheit_round_trip() {
        let mut fahrenheit = -40.0f32;
        while fahrenheit <= 250.0 {
            let raw = Temperature::Fahrenheit(fahrenheit).to_centikelvin();
            let back = to_fahrenheit(raw);
            assert!(
                (back - fahrenheit).abs() <= 1.0,
                "{}°F came back as {}°F (raw {})",
                fahrenheit,
                back,
                raw
            );
            fahrenheit += 0.7;
        }
    }

    #[test]
    fn centikelvin_saturates() {
        assert_eq!(Temperature::Celsius(-300.0).to_centikelvin(), 0);
        assert_eq!(Temperature::Celsius(1000.0).to_centikelvin(), u16::MAX);
    }

    #[test]
    fn format_with_unit() {
        assert_eq!(
            format_temperature(31015, TemperatureUnit::Celsius, true),
            "37°C"
        );
        assert_eq!(
            format_temperature(31015, TemperatureUnit::Fahrenheit, true),
            "99°F"
        );
    }

    #[test]
    fn format_without_unit() {
        assert_eq!(
            format_temperature(30915, TemperatureUnit::Celsius, false),
            "36"
        );
        assert_eq!(
            format_temperature(27315, TemperatureUnit::Celsius, false),
            "0"
        );
    }

    #[test]
    fn unit_from_str() {
        assert_eq!("C".parse::<TemperatureUnit>(), Ok(TemperatureUnit::Celsius));
        assert_eq!(
            "fahrenheit".parse::<TemperatureUnit>(),
            Ok(TemperatureUnit::Fahrenheit)
        );
        assert!("kelvin".parse::<TemperatureUnit>().is_err());
    }

    #[derive(Debug, Deserialize)]
    struct TemperatureTest {
        temp: Temperature,
    }

    #[test]
    fn deserialize_celsius() {
        let wrapper: TemperatureTest = toml::from_str(r#"temp = { "celsius" = -40.0 }"#)
            .expect("A map of Celsius to a float to deserialize");
        assert_eq!(wrapper.temp.unit(), TemperatureUnit::Celsius);
        assert_eq!(wrapper.temp.in_celsius(), -40.0);
    }

    #[test]
    fn deserialize_fahrenheit() {
        let wrapper: TemperatureTest = toml::from_str(r#"temp = { "f" = 100.0 }"#)
            .expect("A map of Fahrenheit to a float to deserialize");
        assert_eq!(wrapper.temp.unit(), TemperatureUnit::Fahrenheit);
    }
}
