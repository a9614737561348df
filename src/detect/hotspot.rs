// SPDX-License-Identifier: GPL-3.0-or-later
use std::cmp::Ordering;
use std::collections::HashMap;

use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Deserialize;
use tracing::trace;

use super::{Detection, Detector};
use crate::geometry::BoundingBox;

fn default_intensity_threshold() -> u8 {
    200
}

fn default_min_area() -> u32 {
    4
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct HotspotSettings {
    /// Pixels at least this bright (after normalization) are considered hot.
    #[serde(default = "default_intensity_threshold")]
    pub(crate) intensity_threshold: u8,

    /// Hot regions with fewer pixels than this are ignored.
    #[serde(default = "default_min_area")]
    pub(crate) min_area: u32,
}

impl Default for HotspotSettings {
    fn default() -> Self {
        Self {
            intensity_threshold: default_intensity_threshold(),
            min_area: default_min_area(),
        }
    }
}

/// Bounds and intensity totals for one connected region.
#[derive(Clone, Copy, Debug)]
struct Region {
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
    area: u32,
    intensity_sum: u64,
}

impl Region {
    fn new(x: u32, y: u32) -> Self {
        Self {
            left: x,
            top: y,
            right: x,
            bottom: y,
            area: 0,
            intensity_sum: 0,
        }
    }

    fn add(&mut self, x: u32, y: u32, intensity: u8) {
        self.left = self.left.min(x);
        self.top = self.top.min(y);
        self.right = self.right.max(x);
        self.bottom = self.bottom.max(y);
        self.area += 1;
        self.intensity_sum += u64::from(intensity);
    }

    fn confidence(&self) -> f32 {
        (self.intensity_sum as f64 / f64::from(self.area) / f64::from(u8::MAX)) as f32
    }

    fn to_detection(&self) -> Detection {
        Detection {
            bbox: BoundingBox::new(
                self.left as f32,
                self.top as f32,
                (self.right + 1) as f32,
                (self.bottom + 1) as f32,
            ),
            confidence: self.confidence(),
        }
    }
}

/// Finds warm blobs: connected groups of bright pixels.
///
/// This is a stand-in for a real face detector; a forehead is usually the hottest thing in frame,
/// so it does a passable job for a single person facing the camera.
#[derive(Clone, Debug, Default)]
pub(crate) struct HotspotDetector {
    settings: HotspotSettings,
}

impl HotspotDetector {
    pub(crate) fn new(settings: HotspotSettings) -> Self {
        Self { settings }
    }

    fn regions(&self, gray: &GrayImage) -> Vec<Region> {
        let threshold = self.settings.intensity_threshold;
        let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            if gray.get_pixel(x, y)[0] >= threshold {
                Luma([u8::MAX])
            } else {
                Luma([0])
            }
        });
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let mut regions: HashMap<u32, Region> = HashMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0];
            // Zero is the background
            if label == 0 {
                continue;
            }
            regions
                .entry(label)
                .or_insert_with(|| Region::new(x, y))
                .add(x, y, gray.get_pixel(x, y)[0]);
        }
        regions.into_iter().map(|(_, region)| region).collect()
    }
}

impl Detector for HotspotDetector {
    fn detect(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
        max_results: usize,
    ) -> anyhow::Result<Vec<Detection>> {
        // Normalized frames are gray, so any channel will do.
        let gray = GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([image.get_pixel(x, y)[0]])
        });
        let mut regions: Vec<Region> = self
            .regions(&gray)
            .into_iter()
            .filter(|region| region.area >= self.settings.min_area)
            .filter(|region| region.confidence() >= confidence_threshold)
            .collect();
        trace!(count = regions.len(), "hot regions");
        regions.sort_by(|a, b| {
            b.confidence()
                .partial_cmp(&a.confidence())
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.area.cmp(&a.area))
                .then_with(|| (a.top, a.left).cmp(&(b.top, b.left)))
        });
        regions.truncate(max_results);
        Ok(regions.iter().map(Region::to_detection).collect())
    }
}
