// SPDX-License-Identifier: GPL-3.0-or-later
//! Colormaps for the annotated window.
use colorous::Gradient;
use serde::de::{self, Deserialize, Deserializer};

/// Gradients that read well as a thermal image: either perceptually ordered from cold to hot, or
/// cycling brightly enough that small differences stand out. The diverging and single-hue
/// ColorBrewer schemes are left out.
const GRADIENTS: &[(&str, Gradient)] = &[
    ("turbo", colorous::TURBO),
    ("inferno", colorous::INFERNO),
    ("magma", colorous::MAGMA),
    ("plasma", colorous::PLASMA),
    ("viridis", colorous::VIRIDIS),
    ("cividis", colorous::CIVIDIS),
    ("greys", colorous::GREYS),
    ("rainbow", colorous::RAINBOW),
    ("sinebow", colorous::SINEBOW),
    ("cubehelix", colorous::CUBEHELIX),
    ("warm", colorous::WARM),
    ("cool", colorous::COOL),
    ("yellow_orange_red", colorous::YELLOW_ORANGE_RED),
    ("orange_red", colorous::ORANGE_RED),
    ("red_yellow_blue", colorous::RED_YELLOW_BLUE),
];

fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

fn known_names() -> String {
    GRADIENTS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Look up a gradient by name, ignoring case and treating spaces and hyphens like underscores.
pub(crate) fn from_str(gradient_name: &str) -> Result<Gradient, String> {
    let normalized = normalize_name(gradient_name);
    GRADIENTS
        .iter()
        .find(|(name, _)| *name == normalized)
        .map(|(_, gradient)| *gradient)
        .ok_or_else(|| {
            format!(
                "unknown gradient {:?}, expected one of {}",
                gradient_name,
                known_names()
            )
        })
}

pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Gradient, D::Error>
where
    D: Deserializer<'de>,
{
    let gradient_name = String::deserialize(deserializer)?;
    from_str(&gradient_name).map_err(de::Error::custom)
}
