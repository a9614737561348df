// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::PathBuf;

use serde::de::{Deserialize, Deserializer, Error};

use super::driver::{PURETHERMAL_PRODUCT_ID, PURETHERMAL_VENDOR_ID};
use super::playback::PlaybackSettings;
use crate::util::parse_int_decimal_hex;

/// USB identifiers may be written either as integers or as strings, so that hexadecimal can be
/// used (`"0x1e4e"`).
fn deserialize_usb_id<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum UsbId {
        Number(u16),
        Text(String),
    }

    match UsbId::deserialize(deserializer)? {
        UsbId::Number(id) => Ok(id),
        UsbId::Text(text) => parse_int_decimal_hex(text.trim())
            .map_err(|err| D::Error::custom(format!("invalid USB identifier {:?}: {}", text, err))),
    }
}

fn default_vendor_id() -> u16 {
    PURETHERMAL_VENDOR_ID
}

fn default_product_id() -> u16 {
    PURETHERMAL_PRODUCT_ID
}

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub(crate) enum CameraSettings {
    /// A UVC camera accessed through V4L2.
    V4l2 {
        #[serde(default = "default_vendor_id", deserialize_with = "deserialize_usb_id")]
        vendor_id: u16,

        #[serde(default = "default_product_id", deserialize_with = "deserialize_usb_id")]
        product_id: u16,

        /// Use this device node instead of searching by USB ID.
        #[serde(default)]
        device: Option<PathBuf>,
    },
    /// A recording of raw frames.
    Playback(PlaybackSettings),
}

impl CameraSettings {
    pub(crate) fn vendor_id(&self) -> u16 {
        match self {
            Self::V4l2 { vendor_id, .. } => *vendor_id,
            Self::Playback(_) => PURETHERMAL_VENDOR_ID,
        }
    }

    pub(crate) fn product_id(&self) -> u16 {
        match self {
            Self::V4l2 { product_id, .. } => *product_id,
            Self::Playback(_) => PURETHERMAL_PRODUCT_ID,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self::V4l2 {
            vendor_id: PURETHERMAL_VENDOR_ID,
            product_id: PURETHERMAL_PRODUCT_ID,
            device: None,
        }
    }
}
