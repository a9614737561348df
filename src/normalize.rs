// SPDX-License-Identifier: GPL-3.0-or-later
use std::convert::TryFrom;
use std::fmt;

use image::buffer::ConvertBuffer;
use image::{GrayImage, Rgb, RgbImage};
use ndarray::ArrayView2;
use serde::Deserialize;
use tracing::trace;

use crate::error::CalibrationError;
use crate::temperature::{Centikelvin, Temperature};

/// The raw temperature range mapped onto the 8-bit intensity range.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(try_from = "CalibrationBounds")]
pub(crate) struct Calibration {
    min_temperature: Centikelvin,
    max_temperature: Centikelvin,
}

impl Calibration {
    /// Roughly -36°C to 100°C.
    pub(crate) const DEFAULT_MIN: Centikelvin = 23715;
    pub(crate) const DEFAULT_MAX: Centikelvin = 37315;

    /// Both bounds are raw sensor values. The range has to be at least 255 wide, otherwise the
    /// integer scale factor would be zero.
    pub(crate) fn new(
        min_temperature: Centikelvin,
        max_temperature: Centikelvin,
    ) -> Result<Self, CalibrationError> {
        if max_temperature <= min_temperature
            || (max_temperature - min_temperature) / (u8::MAX as Centikelvin) == 0
        {
            return Err(CalibrationError::InvalidCalibrationRange {
                min: min_temperature,
                max: max_temperature,
            });
        }
        Ok(Self {
            min_temperature,
            max_temperature,
        })
    }

    pub(crate) fn min_temperature(&self) -> Centikelvin {
        self.min_temperature
    }

    pub(crate) fn max_temperature(&self) -> Centikelvin {
        self.max_temperature
    }

    /// How many raw units make up a single intensity step, truncated.
    fn scale(&self) -> i32 {
        (i32::from(self.max_temperature) - i32::from(self.min_temperature)) / i32::from(u8::MAX)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            min_temperature: Self::DEFAULT_MIN,
            max_temperature: Self::DEFAULT_MAX,
        }
    }
}

/// A calibration bound as written in a config file: either a raw sensor value or a table with a
/// unit (`{ celsius = 37.5 }`).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(untagged)]
enum Bound {
    Raw(Centikelvin),
    Degrees(Temperature),
}

impl From<Bound> for Centikelvin {
    fn from(bound: Bound) -> Self {
        match bound {
            Bound::Raw(raw) => raw,
            Bound::Degrees(temperature) => temperature.to_centikelvin(),
        }
    }
}

fn default_min_bound() -> Bound {
    Bound::Raw(Calibration::DEFAULT_MIN)
}

fn default_max_bound() -> Bound {
    Bound::Raw(Calibration::DEFAULT_MAX)
}

#[derive(Clone, Copy, Debug, Deserialize)]
struct CalibrationBounds {
    #[serde(default = "default_min_bound")]
    min_temperature: Bound,

    #[serde(default = "default_max_bound")]
    max_temperature: Bound,
}

impl TryFrom<CalibrationBounds> for Calibration {
    type Error = CalibrationError;

    fn try_from(bounds: CalibrationBounds) -> Result<Self, Self::Error> {
        Self::new(bounds.min_temperature.into(), bounds.max_temperature.into())
    }
}

/// Turns raw temperature frames into contrast stretched 8-bit images.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Normalizer {
    calibration: Calibration,
}

impl Normalizer {
    pub(crate) fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    /// Map every raw sample to `(sample - min) / scale`, clamped to `0..=255`.
    ///
    /// The division truncates, exactly like the integer maths the calibration bounds were tuned
    /// against.
    pub(crate) fn clip_into(&self, raw: ArrayView2<Centikelvin>, clipped: &mut GrayImage) {
        let (height, width) = raw.dim();
        if clipped.dimensions() != (width as u32, height as u32) {
            *clipped = GrayImage::new(width as u32, height as u32);
        }
        let min = i32::from(self.calibration.min_temperature);
        let scale = self.calibration.scale();
        for (sample, pixel) in raw.iter().zip(clipped.iter_mut()) {
            let scaled = (i32::from(*sample) - min) / scale;
            *pixel = scaled.max(0).min(i32::from(u8::MAX)) as u8;
        }
    }

    /// Clip and stretch `raw` into `normalized`, reusing its allocation when the size matches.
    pub(crate) fn normalize_into(&self, raw: ArrayView2<Centikelvin>, normalized: &mut GrayImage) {
        self.clip_into(raw, normalized);
        stretch_contrast(normalized);
    }
}

/// Linearly remap the image so its darkest pixel is 0 and its brightest is 255.
///
/// Images with a single intensity have no range to stretch and come out entirely black.
pub(crate) fn stretch_contrast(image: &mut GrayImage) {
    let (min, max) = image
        .iter()
        .fold((u8::MAX, u8::MIN), |(min, max), value| {
            (min.min(*value), max.max(*value))
        });
    if max <= min {
        trace!(value = min, "flat image, nothing to stretch");
        for pixel in image.iter_mut() {
            *pixel = 0;
        }
        return;
    }
    let scale = f32::from(u8::MAX) / f32::from(max - min);
    let shift = -f32::from(min) * scale;
    for pixel in image.iter_mut() {
        let stretched = (f32::from(*pixel) * scale + shift).round_ties_even();
        *pixel = stretched.max(0.0).min(f32::from(u8::MAX)) as u8;
    }
}

/// Replicate the single intensity channel into red, green and blue.
pub(crate) fn expand_to_rgb(gray: &GrayImage) -> RgbImage {
    gray.convert()
}

/// A 256 entry lookup table from intensity to color.
///
/// Only ever used for display, detectors are always given the gray image.
#[derive(Clone)]
pub(crate) struct ColorMap {
    table: Vec<Rgb<u8>>,
}

impl ColorMap {
    pub(crate) fn new(gradient: colorous::Gradient) -> Self {
        let steps = usize::from(u8::MAX) + 1;
        let table = (0..steps)
            .map(|index| Rgb(gradient.eval_rational(index, steps).as_array()))
            .collect();
        Self { table }
    }

    pub(crate) fn color(&self, intensity: u8) -> Rgb<u8> {
        self.table[usize::from(intensity)]
    }

    pub(crate) fn apply(&self, gray: &GrayImage) -> RgbImage {
        let mut colored = RgbImage::new(gray.width(), gray.height());
        for (source, dest) in gray.pixels().zip(colored.pixels_mut()) {
            *dest = self.color(source[0]);
        }
        colored
    }
}

impl Default for ColorMap {
    fn default() -> Self {
        Self::new(colorous::TURBO)
    }
}

impl fmt::Debug for ColorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorMap")
            .field("first", &self.table.first())
            .field("last", &self.table.last())
            .finish()
    }
}
