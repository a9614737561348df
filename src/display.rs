// SPDX-License-Identifier: GPL-3.0-or-later
use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ColorType, GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use serde::Deserialize;
use tracing::trace;

use crate::geometry::{BoundingBox, DisplayGrid};
use crate::normalize::ColorMap;
use crate::settings::gradient;

const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_COLOR: Rgb<u8> = LINE_COLOR;
const LINE_THICKNESS: u32 = 2;

/// Each glyph cell is scaled up by this much.
const GLYPH_SCALE: u32 = 4;
const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;
const GLYPH_SPACING: u32 = 1;

/// Different resizing methods
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Method {
    /// Nearest neighbor sampling.
    Nearest,

    /// Triangle (aka linear) sampling.
    #[serde(alias = "linear")]
    Triangle,

    /// Catmull-Rom (aka bicubic) sampling.
    #[serde(alias = "bicubic")]
    CatmullRom,

    /// Lanczos sampling with a window size of 3.
    #[serde(alias = "lanczos")]
    Lanczos3,
}

impl Default for Method {
    fn default() -> Self {
        Self::CatmullRom
    }
}

impl From<Method> for imageops::FilterType {
    fn from(method: Method) -> Self {
        match method {
            Method::Nearest => imageops::Nearest,
            Method::Triangle => imageops::Triangle,
            Method::CatmullRom => imageops::CatmullRom,
            Method::Lanczos3 => imageops::Lanczos3,
        }
    }
}

fn default_window_width() -> u32 {
    640
}

fn default_window_height() -> u32 {
    480
}

fn default_colors() -> colorous::Gradient {
    colorous::TURBO
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct DisplaySettings {
    #[serde(default)]
    pub(crate) enabled: bool,

    #[serde(default = "default_window_width")]
    pub(crate) width: u32,

    #[serde(default = "default_window_height")]
    pub(crate) height: u32,

    #[serde(default = "default_colors", deserialize_with = "gradient::deserialize")]
    pub(crate) colors: colorous::Gradient,

    #[serde(default)]
    pub(crate) scaling_method: Method,

    /// Keep the most recent window image in this file (as a JPEG).
    #[serde(default)]
    pub(crate) snapshot_path: Option<PathBuf>,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            width: default_window_width(),
            height: default_window_height(),
            colors: default_colors(),
            scaling_method: Method::default(),
            snapshot_path: None,
        }
    }
}

impl PartialEq for DisplaySettings {
    fn eq(&self, other: &Self) -> bool {
        self.enabled == other.enabled
            && self.width == other.width
            && self.height == other.height
            && format!("{:?}", self.colors) == format!("{:?}", other.colors)
            && self.scaling_method == other.scaling_method
            && self.snapshot_path == other.snapshot_path
    }
}

/// A box to outline, and optionally a label to center inside it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Annotation<'a> {
    pub(crate) bbox: BoundingBox<DisplayGrid>,
    pub(crate) label: Option<&'a str>,
}

/// Rows of a 3x5 glyph, most significant bit on the left.
fn glyph(character: char) -> Option<[u8; GLYPH_HEIGHT as usize]> {
    Some(match character {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        _ => return None,
    })
}

/// The size of a rendered label, in pixels.
pub(crate) fn label_size(label: &str) -> (u32, u32) {
    let count = label.chars().count() as u32;
    let width = if count == 0 {
        0
    } else {
        (count * (GLYPH_WIDTH + GLYPH_SPACING) - GLYPH_SPACING) * GLYPH_SCALE
    };
    (width, GLYPH_HEIGHT * GLYPH_SCALE)
}

/// The bottom left corner of a label centered within a box.
///
/// Halving rounds towards negative infinity, so boxes hanging off the top or left edge place
/// their labels consistently with boxes inside the window.
pub(crate) fn label_position(
    bbox: &BoundingBox<DisplayGrid>,
    label_size: (u32, u32),
) -> (i32, i32) {
    let (left, top, right, bottom) = pixel_corners(bbox);
    let (label_width, label_height) = (label_size.0 as i32, label_size.1 as i32);
    (
        (left + right).div_euclid(2) - label_width.div_euclid(2),
        (top + bottom).div_euclid(2) + label_height.div_euclid(2),
    )
}

/// Box corners truncated to whole pixels.
fn pixel_corners(bbox: &BoundingBox<DisplayGrid>) -> (i32, i32, i32, i32) {
    (
        bbox.left as i32,
        bbox.top as i32,
        bbox.right as i32,
        bbox.bottom as i32,
    )
}

/// Draw `label` with its bottom left corner at `origin`. Unknown characters are skipped.
fn draw_label(image: &mut RgbImage, label: &str, origin: (i32, i32)) {
    let top = origin.1 - (GLYPH_HEIGHT * GLYPH_SCALE) as i32;
    let advance = ((GLYPH_WIDTH + GLYPH_SPACING) * GLYPH_SCALE) as i32;
    for (index, character) in label.chars().enumerate() {
        let rows = match glyph(character) {
            Some(rows) => rows,
            None => continue,
        };
        let left = origin.0 + index as i32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for column in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - column)) == 0 {
                    continue;
                }
                let cell = Rect::at(
                    left + (column * GLYPH_SCALE) as i32,
                    top + (row as u32 * GLYPH_SCALE) as i32,
                )
                .of_size(GLYPH_SCALE, GLYPH_SCALE);
                draw_filled_rect_mut(image, cell, LABEL_COLOR);
            }
        }
    }
}

/// Outline a box, growing inwards for thicker lines.
fn draw_box(image: &mut RgbImage, bbox: &BoundingBox<DisplayGrid>) {
    let (left, top, right, bottom) = pixel_corners(bbox);
    for inset in 0..LINE_THICKNESS as i32 {
        let width = right - left - 2 * inset;
        let height = bottom - top - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(left + inset, top + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, LINE_COLOR);
    }
}

/// Renders normalized frames into an annotated, colorized window image.
#[derive(Clone, Debug)]
pub(crate) struct Display {
    color_map: ColorMap,
    width: u32,
    height: u32,
    filter: imageops::FilterType,
}

impl Display {
    pub(crate) fn new(settings: &DisplaySettings) -> Self {
        Self {
            color_map: ColorMap::new(settings.colors),
            width: settings.width,
            height: settings.height,
            filter: settings.scaling_method.into(),
        }
    }

    /// `(width, height)` of the window.
    pub(crate) fn window_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub(crate) fn render(
        &self,
        normalized: &GrayImage,
        annotations: &[Annotation<'_>],
    ) -> RgbImage {
        let colored = self.color_map.apply(normalized);
        let mut window = imageops::resize(&colored, self.width, self.height, self.filter);
        for annotation in annotations {
            draw_box(&mut window, &annotation.bbox);
            if let Some(label) = annotation.label {
                let position = label_position(&annotation.bbox, label_size(label));
                draw_label(&mut window, label, position);
            }
        }
        trace!(annotations = annotations.len(), "rendered window");
        window
    }
}

/// Write `image` as a JPEG to `path`, replacing the previous file in a single step.
pub(crate) fn write_snapshot(image: &RgbImage, path: &Path) -> anyhow::Result<()> {
    let mut temporary = PathBuf::from(path);
    temporary.set_extension("partial");
    {
        let file = File::create(&temporary)
            .with_context(|| format!("Unable to create {}", temporary.display()))?;
        let mut output = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut output, 85)
            .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
            .context("Unable to encode snapshot")?;
        output.flush()?;
    }
    fs::rename(&temporary, path)
        .with_context(|| format!("Unable to replace snapshot {}", path.display()))?;
    Ok(())
}
