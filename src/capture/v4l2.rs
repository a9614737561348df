// SPDX-License-Identifier: GPL-3.0-or-later
//! Capture from UVC cameras through the kernel's V4L2 interface.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, bail, Context as _};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC, Fraction};

use super::driver::{
    CaptureDriver, FormatDescriptor, FrameCallback, FrameDescriptor, FramePayload, StreamProfile,
    INTERVALS_PER_SECOND, Y16_GUID,
};

const BUFFER_COUNT: u32 = 4;

/// Give up on a stream after this many capture errors in a row.
const MAX_CONSECUTIVE_ERRORS: usize = 10;

pub(crate) struct V4l2Context {
    sysfs_root: PathBuf,
}

pub(crate) struct V4l2Handle {
    device: Option<Device>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl V4l2Handle {
    fn stop_worker(&mut self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow!("V4L2 capture thread panicked"))?;
        }
        Ok(())
    }

    fn device(&self) -> anyhow::Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| anyhow!("The V4L2 device is in use by the capture thread"))
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct V4l2Driver {
    /// Skip discovery and use this device node.
    device_path: Option<PathBuf>,
}

impl V4l2Driver {
    pub(crate) fn new(device_path: Option<PathBuf>) -> Self {
        Self { device_path }
    }
}

/// Find the indices of `/dev/video*` nodes belonging to a USB device.
///
/// The `PRODUCT` line in each node's `device/uevent` is `vendor/product/revision` in unpadded
/// hexadecimal.
pub(crate) fn find_video_nodes(
    sysfs_root: &Path,
    vendor_id: u16,
    product_id: u16,
) -> io::Result<Vec<u32>> {
    let target_vendor = format!("{:x}", vendor_id);
    let target_product = format!("{:x}", product_id);
    let mut found = Vec::new();
    for entry in fs::read_dir(sysfs_root)? {
        let path = entry?.path();
        let index = match path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix("video"))
            .and_then(|index| index.parse::<u32>().ok())
        {
            Some(index) => index,
            None => continue,
        };
        let uevent = match fs::read_to_string(path.join("device/uevent")) {
            Ok(uevent) => uevent,
            Err(_) => continue,
        };
        let matches = uevent
            .lines()
            .filter_map(|line| line.strip_prefix("PRODUCT="))
            .any(|product| {
                let mut parts = product.split('/');
                match (parts.next(), parts.next()) {
                    (Some(vendor), Some(product)) => {
                        vendor.eq_ignore_ascii_case(&target_vendor)
                            && product.eq_ignore_ascii_case(&target_product)
                    }
                    _ => false,
                }
            });
        if matches {
            found.push(index);
        }
    }
    found.sort_unstable();
    Ok(found)
}

/// Convert a frame interval in seconds to 100ns units.
fn fraction_to_interval(fraction: Fraction) -> u32 {
    if fraction.denominator == 0 {
        return 0;
    }
    let interval = u64::from(fraction.numerator) * u64::from(INTERVALS_PER_SECOND)
        / u64::from(fraction.denominator);
    interval.min(u64::from(u32::MAX)) as u32
}

fn default_interval(device: &Device, fourcc: FourCC, width: u32, height: u32) -> u32 {
    match device.enum_frameintervals(fourcc, width, height) {
        Ok(intervals) => intervals
            .into_iter()
            .next()
            .map(|interval| match interval.interval {
                FrameIntervalEnum::Discrete(fraction) => fraction_to_interval(fraction),
                FrameIntervalEnum::Stepwise(stepwise) => fraction_to_interval(stepwise.min),
            })
            .unwrap_or(0),
        Err(err) => {
            debug!(%fourcc, width, height, "unable to enumerate frame intervals: {}", err);
            0
        }
    }
}

impl CaptureDriver for V4l2Driver {
    type Context = V4l2Context;
    type Device = PathBuf;
    type Handle = V4l2Handle;
    type StreamControl = StreamProfile;

    fn open_context(&mut self) -> anyhow::Result<V4l2Context> {
        let sysfs_root = PathBuf::from("/sys/class/video4linux");
        if self.device_path.is_none() && !sysfs_root.is_dir() {
            bail!("{} is not available", sysfs_root.display());
        }
        Ok(V4l2Context { sysfs_root })
    }

    fn find_device(
        &mut self,
        context: &mut V4l2Context,
        vendor_id: u16,
        product_id: u16,
    ) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.device_path {
            if !path.exists() {
                bail!("{} does not exist", path.display());
            }
            return Ok(path.clone());
        }
        let nodes = find_video_nodes(&context.sysfs_root, vendor_id, product_id)
            .context("Unable to scan for video devices")?;
        // UVC cameras also expose a metadata node, which comes after the capture node.
        nodes
            .first()
            .map(|index| PathBuf::from(format!("/dev/video{}", index)))
            .ok_or_else(|| anyhow!("No video device with that USB ID is connected"))
    }

    fn open_device(&mut self, path: &PathBuf) -> anyhow::Result<V4l2Handle> {
        let device = Device::with_path(path)
            .with_context(|| format!("Unable to open {}", path.display()))?;
        info!(path = %path.display(), "opened V4L2 device");
        Ok(V4l2Handle {
            device: Some(device),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    fn format_descriptors(
        &mut self,
        handle: &V4l2Handle,
    ) -> anyhow::Result<Vec<FormatDescriptor>> {
        let device = handle.device()?;
        let mut formats = Vec::new();
        for description in device.enum_formats().context("Unable to list formats")? {
            let fourcc = description.fourcc;
            // V4L2 only gives the FourCC, the rest of the GUID follows the UVC pattern.
            let mut guid = Y16_GUID;
            guid[..4].copy_from_slice(&fourcc.repr);
            let mut frames = Vec::new();
            for frame_size in device
                .enum_framesizes(fourcc)
                .with_context(|| format!("Unable to list frame sizes for {}", fourcc))?
            {
                let (width, height) = match frame_size.size {
                    FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
                    FrameSizeEnum::Stepwise(stepwise) => (stepwise.max_width, stepwise.max_height),
                };
                frames.push(FrameDescriptor {
                    width,
                    height,
                    default_frame_interval: default_interval(device, fourcc, width, height),
                });
            }
            formats.push(FormatDescriptor { guid, frames });
        }
        Ok(formats)
    }

    fn negotiate_stream(
        &mut self,
        handle: &mut V4l2Handle,
        profile: &StreamProfile,
    ) -> anyhow::Result<StreamProfile> {
        let device = handle.device()?;
        let y16 = FourCC::new(b"Y16 ");
        let mut format = device.format().context("Unable to read the current format")?;
        format.width = profile.width;
        format.height = profile.height;
        format.fourcc = y16;
        let format = device
            .set_format(&format)
            .context("Unable to set the Y16 format")?;
        if format.fourcc != y16 || (format.width, format.height) != (profile.width, profile.height)
        {
            bail!(
                "Device chose {} {}x{} instead",
                format.fourcc,
                format.width,
                format.height
            );
        }
        if let Err(err) = device.set_params(&Parameters::with_fps(profile.frame_rate)) {
            warn!(frame_rate = profile.frame_rate, "unable to set frame rate: {}", err);
        }
        Ok(*profile)
    }

    fn start_streaming(
        &mut self,
        handle: &mut V4l2Handle,
        control: &StreamProfile,
        mut callback: FrameCallback,
    ) -> anyhow::Result<()> {
        let device = handle
            .device
            .take()
            .ok_or_else(|| anyhow!("Streaming has already started"))?;
        let stop = Arc::clone(&handle.stop);
        stop.store(false, Ordering::Release);
        let (width, height) = (control.width, control.height);
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || {
                let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT);
                let mut stream = match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let mut consecutive_errors = 0;
                while !stop.load(Ordering::Acquire) {
                    match stream.next() {
                        Ok((buffer, meta)) => {
                            consecutive_errors = 0;
                            let used = (meta.bytesused as usize).min(buffer.len());
                            callback(&FramePayload {
                                data: &buffer[..used],
                                width,
                                height,
                            });
                        }
                        Err(err) => {
                            consecutive_errors += 1;
                            warn!(consecutive_errors, "unable to capture frame: {}", err);
                            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                break;
                            }
                        }
                    }
                }
                debug!("V4L2 capture thread exiting");
            })
            .context("Unable to spawn V4L2 capture thread")?;
        handle.worker = Some(worker);
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                handle.stop_worker()?;
                Err(anyhow::Error::new(err).context("Unable to create the capture buffers"))
            }
            Err(_) => {
                handle.stop_worker()?;
                Err(anyhow!("V4L2 capture thread exited before streaming"))
            }
        }
    }

    fn stop_streaming(&mut self, handle: &mut V4l2Handle) -> anyhow::Result<()> {
        handle.stop_worker()
    }

    fn release_device(
        &mut self,
        _path: PathBuf,
        handle: Option<V4l2Handle>,
    ) -> anyhow::Result<()> {
        if let Some(mut handle) = handle {
            handle.stop_worker()?;
        }
        Ok(())
    }

    fn close_context(&mut self, _context: V4l2Context) -> anyhow::Result<()> {
        Ok(())
    }
}
