// SPDX-License-Identifier: GPL-3.0-or-later
mod driver;
mod playback;
mod record;
mod session;
mod settings;
#[cfg(feature = "v4l2")]
mod v4l2;

pub(crate) use driver::CaptureDriver;
pub(crate) use playback::{PlaybackDriver, PlaybackSettings, RepeatMode};
pub(crate) use record::Recorder;
pub(crate) use session::CaptureSession;
pub(crate) use settings::CameraSettings;
#[cfg(feature = "v4l2")]
pub(crate) use v4l2::V4l2Driver;
