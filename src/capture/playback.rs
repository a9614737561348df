// SPDX-License-Identifier: GPL-3.0-or-later
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use serde::de::{Deserialize, IntoDeserializer};
use tracing::{debug, info, trace};

use super::driver::{
    CaptureDriver, FormatDescriptor, FrameCallback, FrameDescriptor, FramePayload, StreamProfile,
    INTERVALS_PER_SECOND, Y16_GUID,
};

/// Controls how recorded frames are repeated during playback.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum RepeatMode {
    /// Don't repeat.
    ///
    /// Once the end of the recording has been reached no more frames are delivered, and the last
    /// one stays in the buffer.
    None,

    /// Loop over the recording. This is the default mode.
    Loop,

    /// Alternate between forward and reverse playback.
    ///
    /// The frames at either end of the recording are *not* repeated.
    Bounce,
}

impl RepeatMode {
    /// The order frames are played back in. `frame_count` must not be zero.
    fn frame_order(&self, frame_count: usize) -> Box<dyn Iterator<Item = usize> + Send> {
        match self {
            RepeatMode::None => Box::new(0..frame_count),
            RepeatMode::Loop => Box::new((0..frame_count).cycle()),
            RepeatMode::Bounce => {
                let forwards = 0..frame_count;
                let backwards = (1..(frame_count - 1)).rev();
                Box::new(forwards.chain(backwards).cycle())
            }
        }
    }
}

impl Default for RepeatMode {
    fn default() -> Self {
        Self::Loop
    }
}

impl FromStr for RepeatMode {
    type Err = serde::de::value::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepeatMode::deserialize(s.into_deserializer())
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepeatMode::None => "none",
            RepeatMode::Loop => "loop",
            RepeatMode::Bounce => "bounce",
        };
        write!(f, "{}", s)
    }
}

/// Where to find a recording, and how to interpret it.
///
/// Recordings are headerless: just consecutive frames of little-endian 16-bit samples.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub(crate) struct PlaybackSettings {
    pub(crate) path: PathBuf,

    #[serde(default = "PlaybackSettings::default_width")]
    pub(crate) width: u32,

    #[serde(default = "PlaybackSettings::default_height")]
    pub(crate) height: u32,

    #[serde(default = "PlaybackSettings::default_frame_rate")]
    pub(crate) frame_rate: u32,

    #[serde(default)]
    pub(crate) repeat_mode: RepeatMode,
}

impl PlaybackSettings {
    /// A recording at `path` using the defaults for everything else.
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            width: Self::default_width(),
            height: Self::default_height(),
            frame_rate: Self::default_frame_rate(),
            repeat_mode: RepeatMode::default(),
        }
    }

    /// Lepton 3.x resolution and frame rate.
    fn default_width() -> u32 {
        160
    }

    fn default_height() -> u32 {
        120
    }

    fn default_frame_rate() -> u32 {
        9
    }
}

/// Plays back a Y16 recording as if it were a camera.
#[derive(Clone, Debug)]
pub(crate) struct PlaybackDriver {
    settings: PlaybackSettings,
}

impl PlaybackDriver {
    pub(crate) fn new(settings: PlaybackSettings) -> Self {
        Self { settings }
    }

    fn frame_bytes(&self) -> usize {
        self.settings.width as usize * self.settings.height as usize * 2
    }
}

pub(crate) struct PlaybackHandle {
    recording: Arc<Vec<u8>>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PlaybackHandle {
    pub(crate) fn frame_count(&self, frame_bytes: usize) -> usize {
        self.recording.len() / frame_bytes
    }

    fn stop_worker(&mut self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("Playback thread panicked"))?;
        }
        Ok(())
    }
}

impl CaptureDriver for PlaybackDriver {
    type Context = ();
    type Device = PathBuf;
    type Handle = PlaybackHandle;
    type StreamControl = StreamProfile;

    fn open_context(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn find_device(
        &mut self,
        _context: &mut (),
        vendor_id: u16,
        product_id: u16,
    ) -> anyhow::Result<PathBuf> {
        debug!(
            vendor_id,
            product_id, "USB identifiers are ignored when playing back a recording"
        );
        let path = &self.settings.path;
        if !path.is_file() {
            bail!("No recording found at {}", path.display());
        }
        Ok(path.clone())
    }

    fn open_device(&mut self, path: &PathBuf) -> anyhow::Result<PlaybackHandle> {
        let recording = fs::read(path)
            .with_context(|| format!("Unable to read recording {}", path.display()))?;
        let frame_bytes = self.frame_bytes();
        if frame_bytes == 0 {
            bail!("Recordings must have a non-zero width and height");
        }
        if recording.is_empty() || recording.len() % frame_bytes != 0 {
            bail!(
                "{} is {} bytes, which is not a whole number of {}x{} frames",
                path.display(),
                recording.len(),
                self.settings.width,
                self.settings.height
            );
        }
        info!(
            path = %path.display(),
            frames = recording.len() / frame_bytes,
            "opened recording"
        );
        Ok(PlaybackHandle {
            recording: Arc::new(recording),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    fn format_descriptors(
        &mut self,
        _handle: &PlaybackHandle,
    ) -> anyhow::Result<Vec<FormatDescriptor>> {
        Ok(vec![FormatDescriptor {
            guid: Y16_GUID,
            frames: vec![FrameDescriptor {
                width: self.settings.width,
                height: self.settings.height,
                default_frame_interval: INTERVALS_PER_SECOND
                    .checked_div(self.settings.frame_rate)
                    .unwrap_or(0),
            }],
        }])
    }

    fn negotiate_stream(
        &mut self,
        _handle: &mut PlaybackHandle,
        profile: &StreamProfile,
    ) -> anyhow::Result<StreamProfile> {
        if (profile.width, profile.height) != (self.settings.width, self.settings.height) {
            bail!(
                "Recording is {}x{}, not {}x{}",
                self.settings.width,
                self.settings.height,
                profile.width,
                profile.height
            );
        }
        Ok(*profile)
    }

    fn start_streaming(
        &mut self,
        handle: &mut PlaybackHandle,
        control: &StreamProfile,
        mut callback: FrameCallback,
    ) -> anyhow::Result<()> {
        if handle.worker.is_some() {
            bail!("Playback has already started");
        }
        let recording = Arc::clone(&handle.recording);
        let stop = Arc::clone(&handle.stop);
        stop.store(false, Ordering::Release);
        let frame_bytes = control.frame_bytes();
        let frame_order = self
            .settings
            .repeat_mode
            .frame_order(handle.frame_count(frame_bytes));
        let frame_delay = Duration::from_secs(1) / control.frame_rate.max(1);
        let (width, height) = (control.width, control.height);
        let worker = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                for index in frame_order {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    let start = index * frame_bytes;
                    trace!(index, "playing back frame");
                    callback(&FramePayload {
                        data: &recording[start..start + frame_bytes],
                        width,
                        height,
                    });
                    thread::sleep(frame_delay);
                }
                debug!("playback finished");
            })
            .context("Unable to spawn playback thread")?;
        handle.worker = Some(worker);
        Ok(())
    }

    fn stop_streaming(&mut self, handle: &mut PlaybackHandle) -> anyhow::Result<()> {
        handle.stop_worker()
    }

    fn release_device(
        &mut self,
        _path: PathBuf,
        handle: Option<PlaybackHandle>,
    ) -> anyhow::Result<()> {
        if let Some(mut handle) = handle {
            handle.stop_worker()?;
        }
        Ok(())
    }

    fn close_context(&mut self, _context: ()) -> anyhow::Result<()> {
        Ok(())
    }
}
