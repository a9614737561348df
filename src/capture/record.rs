// SPDX-License-Identifier: GPL-3.0-or-later
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use ndarray::ArrayView2;
use tracing::{debug, info};

use crate::temperature::Centikelvin;

/// Appends raw frames to a file that [`PlaybackDriver`](super::PlaybackDriver) can replay.
#[derive(Debug)]
pub(crate) struct Recorder {
    path: PathBuf,
    output: BufWriter<File>,
    frames: u64,
}

impl Recorder {
    pub(crate) fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Unable to create recording {}", path.display()))?;
        info!(path = %path.display(), "recording raw frames");
        Ok(Self {
            path: path.to_path_buf(),
            output: BufWriter::new(file),
            frames: 0,
        })
    }

    /// Append a frame as row-major little-endian samples.
    pub(crate) fn record(&mut self, frame: ArrayView2<Centikelvin>) -> anyhow::Result<()> {
        for sample in frame.iter() {
            self.output.write_all(&sample.to_le_bytes())?;
        }
        self.frames += 1;
        Ok(())
    }

    pub(crate) fn frames(&self) -> u64 {
        self.frames
    }

    /// Flush everything to disk.
    pub(crate) fn finish(mut self) -> anyhow::Result<()> {
        self.output
            .flush()
            .with_context(|| format!("Unable to finish recording {}", self.path.display()))?;
        debug!(frames = self.frames, path = %self.path.display(), "recording finished");
        Ok(())
    }
}
