// SPDX-License-Identifier: GPL-3.0-or-later
//! The boundary between a [`CaptureSession`](super::CaptureSession) and whatever actually talks to
//! the camera.
use std::fmt;

/// USB vendor ID of GroupGets PureThermal boards.
pub(crate) const PURETHERMAL_VENDOR_ID: u16 = 0x1e4e;

/// USB product ID of GroupGets PureThermal boards.
pub(crate) const PURETHERMAL_PRODUCT_ID: u16 = 0x0100;

/// The UVC format GUID for 16-bit grayscale (temperature) frames.
pub(crate) const Y16_GUID: [u8; 16] = *b"Y16 \x00\x00\x10\x00\x80\x00\x00\xaa\x00\x38\x9b\x71";

/// Frame intervals are given in units of 100ns.
pub(crate) const INTERVALS_PER_SECOND: u32 = 10_000_000;

/// One supported frame size (and its default interval) of a format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameDescriptor {
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// In 100ns units.
    pub(crate) default_frame_interval: u32,
}

impl FrameDescriptor {
    /// Frames per second for the default interval, or `None` when the interval is zero.
    pub(crate) fn frame_rate(&self) -> Option<u32> {
        INTERVALS_PER_SECOND.checked_div(self.default_frame_interval)
    }
}

/// A video format advertised by a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FormatDescriptor {
    pub(crate) guid: [u8; 16],
    pub(crate) frames: Vec<FrameDescriptor>,
}

impl FormatDescriptor {
    /// Devices are inconsistent about the trailing bytes of the GUID, so only the FourCC at the
    /// start is compared.
    pub(crate) fn is_y16(&self) -> bool {
        self.guid[..4] == Y16_GUID[..4]
    }

    pub(crate) fn fourcc(&self) -> String {
        String::from_utf8_lossy(&self.guid[..4]).into_owned()
    }
}

/// The stream parameters settled on during negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StreamProfile {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) frame_rate: u32,
}

impl StreamProfile {
    /// The number of bytes in a complete Y16 frame.
    pub(crate) fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 2
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.frame_rate)
    }
}

/// A frame as delivered by the driver. `data.len()` is the number of bytes received.
#[derive(Debug)]
pub(crate) struct FramePayload<'a> {
    pub(crate) data: &'a [u8],
    pub(crate) width: u32,
    pub(crate) height: u32,
}

/// Called by the driver, on a thread of its choosing, for every frame received.
pub(crate) type FrameCallback = Box<dyn FnMut(&FramePayload<'_>) + Send>;

/// The operations a capture backend provides, in the order a session uses them.
///
/// Resources are modelled as associated types so that each backend can hand back whatever it
/// needs to keep alive. Releasing them is always done through the driver, never by dropping.
pub(crate) trait CaptureDriver {
    type Context;
    type Device;
    type Handle;
    type StreamControl;

    fn open_context(&mut self) -> anyhow::Result<Self::Context>;

    fn find_device(
        &mut self,
        context: &mut Self::Context,
        vendor_id: u16,
        product_id: u16,
    ) -> anyhow::Result<Self::Device>;

    fn open_device(&mut self, device: &Self::Device) -> anyhow::Result<Self::Handle>;

    /// Every format the device advertises, with all of their frame descriptors.
    fn format_descriptors(&mut self, handle: &Self::Handle)
        -> anyhow::Result<Vec<FormatDescriptor>>;

    fn negotiate_stream(
        &mut self,
        handle: &mut Self::Handle,
        profile: &StreamProfile,
    ) -> anyhow::Result<Self::StreamControl>;

    fn start_streaming(
        &mut self,
        handle: &mut Self::Handle,
        control: &Self::StreamControl,
        callback: FrameCallback,
    ) -> anyhow::Result<()>;

    fn stop_streaming(&mut self, handle: &mut Self::Handle) -> anyhow::Result<()>;

    /// Release the device, closing the handle first if one was opened.
    fn release_device(
        &mut self,
        device: Self::Device,
        handle: Option<Self::Handle>,
    ) -> anyhow::Result<()>;

    fn close_context(&mut self, context: Self::Context) -> anyhow::Result<()>;
}
