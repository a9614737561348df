// SPDX-License-Identifier: GPL-3.0-or-later
use ndarray::{s, ArrayView2};
use tracing::warn;

use crate::geometry::{BoundingBox, RawGrid};
use crate::temperature::Centikelvin;

/// The hottest raw sample inside a region, and the region it came from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct TemperatureReading {
    pub(crate) value: Centikelvin,
    pub(crate) region: BoundingBox<RawGrid>,
}

/// Truncate a coordinate toward zero and clamp it into `0..=limit`.
fn clamp_coordinate(coordinate: f32, limit: usize) -> usize {
    // Float to int casts saturate, and NaN becomes 0.
    let truncated = coordinate.trunc();
    if truncated <= 0.0 {
        0
    } else {
        (truncated as usize).min(limit)
    }
}

/// Find the maximum raw temperature within `region`.
///
/// The region covers rows `top..bottom` and columns `left..right` after the coordinates have been
/// truncated and clamped to the grid. Regions with nothing left in them after clamping (including
/// ones entirely outside of the grid) yield `None`.
pub(crate) fn correlate(
    raw: ArrayView2<Centikelvin>,
    region: &BoundingBox<RawGrid>,
) -> Option<TemperatureReading> {
    let (height, width) = raw.dim();
    let left = clamp_coordinate(region.left, width);
    let right = clamp_coordinate(region.right, width);
    let top = clamp_coordinate(region.top, height);
    let bottom = clamp_coordinate(region.bottom, height);
    if left >= right || top >= bottom {
        warn!(?region, "region has no samples after clamping to the frame");
        return None;
    }
    raw.slice(s![top..bottom, left..right])
        .iter()
        .copied()
        .max()
        .map(|value| TemperatureReading {
            value,
            region: *region,
        })
}
