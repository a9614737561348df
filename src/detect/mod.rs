// SPDX-License-Identifier: GPL-3.0-or-later
use image::RgbImage;
use serde::Deserialize;

mod hotspot;

use crate::geometry::{BoundingBox, DetectorGrid};
pub(crate) use hotspot::{HotspotDetector, HotspotSettings};

/// A region of interest found by a [`Detector`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Detection {
    pub(crate) bbox: BoundingBox<DetectorGrid>,
    /// In `0.0..=1.0`.
    pub(crate) confidence: f32,
}

/// Finds regions of interest (faces, people) in a normalized frame.
pub(crate) trait Detector {
    /// Return at most `max_results` detections with a confidence of at least
    /// `confidence_threshold`, most confident first. Coordinates are in pixels of `image`.
    fn detect(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
        max_results: usize,
    ) -> anyhow::Result<Vec<Detection>>;
}

fn default_confidence_threshold() -> f32 {
    0.5
}

fn default_max_regions() -> usize {
    10
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct DetectionSettings {
    /// Run detection at all. Without it only the frames are captured (and displayed).
    #[serde(default = "default_enabled")]
    pub(crate) enabled: bool,

    #[serde(
        default = "default_confidence_threshold",
        deserialize_with = "deserialize_confidence"
    )]
    pub(crate) confidence_threshold: f32,

    #[serde(
        default = "default_max_regions",
        deserialize_with = "deserialize_max_regions"
    )]
    pub(crate) max_regions: usize,

    #[serde(default)]
    pub(crate) hotspot: HotspotSettings,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            confidence_threshold: default_confidence_threshold(),
            max_regions: default_max_regions(),
            hotspot: HotspotSettings::default(),
        }
    }
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = f32::deserialize(deserializer)?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Float(value.into()),
            &"a confidence between 0 and 1",
        ))
    }
}

fn deserialize_max_regions<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = usize::deserialize(deserializer)?;
    if value > 0 {
        Ok(value)
    } else {
        Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Unsigned(0),
            &"at least one region",
        ))
    }
}
