// SPDX-License-Identifier: GPL-3.0-or-later
use std::error::Error as StdError;
use std::fmt;

/// Errors from opening, negotiating with, or streaming from a capture device.
///
/// Everything except [`CaptureError::MalformedFrame`] is fatal to a capture session.
#[derive(Debug)]
pub(crate) enum CaptureError {
    /// No device with the requested USB identifiers could be found.
    DeviceNotFound {
        vendor_id: u16,
        product_id: u16,
        source: anyhow::Error,
    },

    /// The capture context or the device itself could not be opened.
    DeviceOpenFailed(anyhow::Error),

    /// The device does not advertise a 16-bit temperature stream.
    UnsupportedFormat,

    /// The device rejected the stream parameters.
    StreamNegotiationFailed(anyhow::Error),

    /// Streaming could not be started.
    StreamStartFailed(anyhow::Error),

    /// A delivered frame did not match the negotiated size.
    MalformedFrame { expected: usize, actual: usize },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotFound {
                vendor_id,
                product_id,
                ..
            } => write!(
                f,
                "Unable to find capture device {:04x}:{:04x}",
                vendor_id, product_id
            ),
            Self::DeviceOpenFailed(_) => f.write_str("Unable to open capture device"),
            Self::UnsupportedFormat => {
                f.write_str("Capture device does not support the Y16 video stream format")
            }
            Self::StreamNegotiationFailed(_) => f.write_str("Unable to negotiate stream profile"),
            Self::StreamStartFailed(_) => f.write_str("Unable to start streaming"),
            Self::MalformedFrame { expected, actual } => write!(
                f,
                "Malformed frame: expected {} bytes, got {}",
                expected, actual
            ),
        }
    }
}

impl StdError for CaptureError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::DeviceNotFound { source, .. } => Some(source.as_ref()),
            Self::DeviceOpenFailed(err) => Some(err.as_ref()),
            Self::StreamNegotiationFailed(err) => Some(err.as_ref()),
            Self::StreamStartFailed(err) => Some(err.as_ref()),
            Self::UnsupportedFormat | Self::MalformedFrame { .. } => None,
        }
    }
}

/// The calibration bounds cannot be used to scale raw temperatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CalibrationError {
    InvalidCalibrationRange { min: u16, max: u16 },
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCalibrationRange { min, max } => write!(
                f,
                "Invalid calibration range {}..{}: the maximum must exceed the minimum by at \
                 least 255 centikelvin",
                min, max
            ),
        }
    }
}

impl StdError for CalibrationError {}

/// The ambient sensor did not have a fresh reading.
#[derive(Debug)]
pub(crate) struct SensorNotReady(pub(crate) anyhow::Error);

impl fmt::Display for SensorNotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ambient sensor data not ready")
    }
}

impl StdError for SensorNotReady {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}
