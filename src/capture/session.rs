// SPDX-License-Identifier: GPL-3.0-or-later
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use ndarray::Array2;
use tracing::{debug, error, info, warn};

use super::driver::{CaptureDriver, FormatDescriptor, FrameCallback, FramePayload, StreamProfile};
use crate::error::CaptureError;
use crate::frame_buffer::{DoubleFrameBuffer, FrameGuard, FrameReader, FrameWriter};
use crate::temperature::Centikelvin;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionState {
    Closed,
    Negotiating,
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Closed => "closed",
            SessionState::Negotiating => "negotiating",
            SessionState::Streaming => "streaming",
        })
    }
}

/// The driver resources acquired so far. Whatever has been acquired is released on drop, so any
/// early return while opening cleans up after itself.
struct Connection<D>
where
    D: CaptureDriver,
{
    driver: D,
    context: Option<D::Context>,
    device: Option<D::Device>,
    handle: Option<D::Handle>,
    streaming: bool,
}

impl<D> Connection<D>
where
    D: CaptureDriver,
{
    fn open(driver: D, vendor_id: u16, product_id: u16) -> Result<Self, CaptureError> {
        let mut connection = Self {
            driver,
            context: None,
            device: None,
            handle: None,
            streaming: false,
        };
        let mut context = connection
            .driver
            .open_context()
            .map_err(CaptureError::DeviceOpenFailed)?;
        let device = connection
            .driver
            .find_device(&mut context, vendor_id, product_id);
        connection.context = Some(context);
        let device = device.map_err(|source| CaptureError::DeviceNotFound {
            vendor_id,
            product_id,
            source,
        })?;
        let handle = connection.driver.open_device(&device);
        connection.device = Some(device);
        connection.handle = Some(handle.map_err(CaptureError::DeviceOpenFailed)?);
        Ok(connection)
    }

    fn handle_mut(&mut self) -> Result<(&mut D, &mut D::Handle), anyhow::Error> {
        match self.handle.as_mut() {
            Some(handle) => Ok((&mut self.driver, handle)),
            None => Err(anyhow!("The capture device has already been closed")),
        }
    }

    /// Release everything in reverse order. Every step is attempted even if an earlier one
    /// failed, and failures are only logged. Safe to call more than once.
    fn close(&mut self) {
        if self.streaming {
            self.streaming = false;
            if let Some(handle) = self.handle.as_mut() {
                if let Err(err) = self.driver.stop_streaming(handle) {
                    error!("Unable to stop streaming: {:?}", err);
                }
            }
        }
        if let Some(device) = self.device.take() {
            if let Err(err) = self.driver.release_device(device, self.handle.take()) {
                error!("Unable to release capture device: {:?}", err);
            }
        }
        if let Some(context) = self.context.take() {
            if let Err(err) = self.driver.close_context(context) {
                error!("Unable to close capture context: {:?}", err);
            }
        }
    }
}

impl<D> Drop for Connection<D>
where
    D: CaptureDriver,
{
    fn drop(&mut self) {
        self.close();
    }
}

/// Pick the first frame descriptor of the first Y16 format, ignoring descriptors without a usable
/// frame interval.
pub(crate) fn select_profile(formats: &[FormatDescriptor]) -> Result<StreamProfile, CaptureError> {
    formats
        .iter()
        .filter(|format| format.is_y16())
        .flat_map(|format| format.frames.iter())
        .find_map(|frame| {
            frame.frame_rate().map(|frame_rate| StreamProfile {
                width: frame.width,
                height: frame.height,
                frame_rate,
            })
        })
        .ok_or(CaptureError::UnsupportedFormat)
}

/// Decode a little-endian Y16 payload into the write slot and publish it.
fn write_payload(
    writer: &mut FrameWriter<Centikelvin>,
    payload: &FramePayload<'_>,
) -> Result<(), CaptureError> {
    let (width, height) = writer.dimensions();
    let expected = width * height * 2;
    if payload.data.len() != expected
        || payload.width as usize != width
        || payload.height as usize != height
    {
        return Err(CaptureError::MalformedFrame {
            expected,
            actual: payload.data.len(),
        });
    }
    writer.write_with(|mut slot| {
        for (sample, bytes) in slot.iter_mut().zip(payload.data.chunks_exact(2)) {
            *sample = Centikelvin::from_le_bytes([bytes[0], bytes[1]]);
        }
    });
    Ok(())
}

/// A connection to a thermal camera streaming into a double buffer.
pub(crate) struct CaptureSession<D>
where
    D: CaptureDriver,
{
    connection: Connection<D>,
    state: SessionState,
    profile: StreamProfile,
    control: D::StreamControl,
    writer: Option<FrameWriter<Centikelvin>>,
    reader: FrameReader<Centikelvin>,
    dropped_frames: Arc<AtomicU64>,
}

impl<D> CaptureSession<D>
where
    D: CaptureDriver,
{
    /// Find and open the device, then negotiate a Y16 stream with it.
    ///
    /// Any failure releases whatever had been acquired up to that point.
    pub(crate) fn open(driver: D, vendor_id: u16, product_id: u16) -> Result<Self, CaptureError> {
        let mut connection = Connection::open(driver, vendor_id, product_id)?;
        debug!(state = %SessionState::Negotiating, "capture device opened");
        let (driver, handle) = connection
            .handle_mut()
            .map_err(CaptureError::DeviceOpenFailed)?;
        let formats = driver
            .format_descriptors(handle)
            .map_err(CaptureError::StreamNegotiationFailed)?;
        for format in formats.iter() {
            debug!(
                fourcc = %format.fourcc(),
                frame_sizes = format.frames.len(),
                "device format"
            );
        }
        let profile = select_profile(&formats)?;
        let control = driver
            .negotiate_stream(handle, &profile)
            .map_err(CaptureError::StreamNegotiationFailed)?;
        info!(%profile, "negotiated Y16 stream");
        let (writer, reader) =
            DoubleFrameBuffer::new(profile.width as usize, profile.height as usize);
        Ok(Self {
            connection,
            state: SessionState::Negotiating,
            profile,
            control,
            writer: Some(writer),
            reader,
            dropped_frames: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Start streaming frames into the buffer.
    ///
    /// The session is closed if the driver fails to start.
    pub(crate) fn start(&mut self) -> Result<(), CaptureError> {
        let mut writer = match (self.state, self.writer.take()) {
            (SessionState::Negotiating, Some(writer)) => writer,
            (state, writer) => {
                self.writer = writer;
                return Err(CaptureError::StreamStartFailed(anyhow!(
                    "Cannot start streaming from a {} session",
                    state
                )));
            }
        };
        let dropped_frames = Arc::clone(&self.dropped_frames);
        let callback: FrameCallback = Box::new(move |payload| {
            if let Err(err) = write_payload(&mut writer, payload) {
                let dropped = dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(%err, dropped, "dropping frame");
            }
        });
        let control = &self.control;
        let result = self
            .connection
            .handle_mut()
            .and_then(|(driver, handle)| driver.start_streaming(handle, control, callback));
        match result {
            Ok(()) => {
                self.connection.streaming = true;
                self.state = SessionState::Streaming;
                info!(profile = %self.profile, "streaming started");
                Ok(())
            }
            Err(err) => {
                self.close();
                Err(CaptureError::StreamStartFailed(err))
            }
        }
    }

    /// Stop streaming and release the device. Calling this again does nothing.
    pub(crate) fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(state = %self.state, "closing capture session");
        }
        self.connection.close();
        self.state = SessionState::Closed;
    }

    /// Lock the read slot of the frame buffer. Frames keep arriving while the guard is held, but
    /// none of them become readable until it is dropped.
    pub(crate) fn frame_lock(&self) -> FrameGuard<'_, Centikelvin> {
        self.reader.lock()
    }

    /// Copy the most recent complete frame, returning its sequence number.
    pub(crate) fn copy_latest_into(&self, destination: &mut Array2<Centikelvin>) -> u64 {
        let frame = self.frame_lock();
        destination.assign(&frame.read());
        frame.sequence()
    }

    pub(crate) fn width(&self) -> u32 {
        self.profile.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.profile.height
    }

    pub(crate) fn frame_rate(&self) -> u32 {
        self.profile.frame_rate
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// How many delivered frames were discarded for being the wrong size.
    pub(crate) fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl<D> fmt::Debug for CaptureSession<D>
where
    D: CaptureDriver,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("state", &self.state)
            .field("profile", &self.profile)
            .field("dropped_frames", &self.dropped_frames())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use anyhow::anyhow;
    use ndarray::Array2;
    use parking_lot::Mutex;

    use super::super::driver::{
        CaptureDriver, FormatDescriptor, FrameCallback, FrameDescriptor, FramePayload,
        StreamProfile, Y16_GUID,
    };
    use super::{select_profile, CaptureSession, SessionState};
    use crate::error::CaptureError;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Step {
        OpenContext,
        FindDevice,
        OpenDevice,
        FormatDescriptors,
        Negotiate,
        Start,
        Stop,
        Release,
        CloseContext,
    }

    /// A driver that records every call made to it, and fails at a chosen step.
    #[derive(Clone, Default)]
    struct ScriptedDriver {
        calls: Arc<Mutex<Vec<Step>>>,
        fail_at: Option<Step>,
        formats: Vec<FormatDescriptor>,
        callback: Arc<Mutex<Option<FrameCallback>>>,
    }

    impl ScriptedDriver {
        fn lepton() -> Self {
            Self {
                formats: vec![
                    FormatDescriptor {
                        guid: *b"YUYV\x00\x00\x10\x00\x80\x00\x00\xaa\x00\x38\x9b\x71",
                        frames: vec![FrameDescriptor {
                            width: 640,
                            height: 480,
                            default_frame_interval: 333_333,
                        }],
                    },
                    FormatDescriptor {
                        guid: Y16_GUID,
                        frames: vec![FrameDescriptor {
                            width: 4,
                            height: 2,
                            default_frame_interval: 1_111_111,
                        }],
                    },
                ],
                ..Self::default()
            }
        }

        fn failing_at(step: Step) -> Self {
            Self {
                fail_at: Some(step),
                ..Self::lepton()
            }
        }

        fn record(&self, step: Step) -> anyhow::Result<()> {
            self.calls.lock().push(step);
            if self.fail_at == Some(step) {
                Err(anyhow!("scripted failure at {:?}", step))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<Step> {
            self.calls.lock().clone()
        }

        fn deliver(&self, data: &[u8], width: u32, height: u32) {
            let mut callback = self.callback.lock();
            let callback = callback.as_mut().expect("streaming to have started");
            callback(&FramePayload {
                data,
                width,
                height,
            });
        }
    }

    impl CaptureDriver for ScriptedDriver {
        type Context = ();
        type Device = ();
        type Handle = ();
        type StreamControl = StreamProfile;

        fn open_context(&mut self) -> anyhow::Result<()> {
            self.record(Step::OpenContext)
        }

        fn find_device(&mut self, _: &mut (), _: u16, _: u16) -> anyhow::Result<()> {
            self.record(Step::FindDevice)
        }

        fn open_device(&mut self, _: &()) -> anyhow::Result<()> {
            self.record(Step::OpenDevice)
        }

        fn format_descriptors(&mut self, _: &()) -> anyhow::Result<Vec<FormatDescriptor>> {
            self.record(Step::FormatDescriptors)?;
            Ok(self.formats.clone())
        }

        fn negotiate_stream(
            &mut self,
            _: &mut (),
            profile: &StreamProfile,
        ) -> anyhow::Result<StreamProfile> {
            self.record(Step::Negotiate)?;
            Ok(*profile)
        }

        fn start_streaming(
            &mut self,
            _: &mut (),
            _: &StreamProfile,
            callback: FrameCallback,
        ) -> anyhow::Result<()> {
            self.record(Step::Start)?;
            *self.callback.lock() = Some(callback);
            Ok(())
        }

        fn stop_streaming(&mut self, _: &mut ()) -> anyhow::Result<()> {
            self.record(Step::Stop)
        }

        fn release_device(&mut self, _: (), _: Option<()>) -> anyhow::Result<()> {
            self.record(Step::Release)
        }

        fn close_context(&mut self, _: ()) -> anyhow::Result<()> {
            self.record(Step::CloseContext)
        }
    }

    fn le_bytes(samples: &[u16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes().to_vec()).collect()
    }

    #[test]
    fn open_negotiates_y16() {
        let driver = ScriptedDriver::lepton();
        let session = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100).unwrap();
        assert_eq!(session.state(), SessionState::Negotiating);
        assert_eq!(session.width(), 4);
        assert_eq!(session.height(), 2);
        assert_eq!(session.frame_rate(), 9);
        assert_eq!(
            driver.calls(),
            vec![
                Step::OpenContext,
                Step::FindDevice,
                Step::OpenDevice,
                Step::FormatDescriptors,
                Step::Negotiate
            ]
        );
        let mut frame = Array2::ones((2, 4));
        assert_eq!(session.copy_latest_into(&mut frame), 0);
        assert!(frame.iter().all(|sample| *sample == 0));
    }

    #[test]
    fn teardown_order() {
        let driver = ScriptedDriver::lepton();
        let mut session = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100).unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        session.close();
        drop(session);
        let calls = driver.calls();
        assert_eq!(
            &calls[calls.len() - 3..],
            &[Step::Stop, Step::Release, Step::CloseContext]
        );
        assert_eq!(calls.iter().filter(|s| **s == Step::Stop).count(), 1);
    }

    #[test]
    fn drop_closes() {
        let driver = ScriptedDriver::lepton();
        {
            let mut session = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100).unwrap();
            session.start().unwrap();
        }
        assert_eq!(
            driver.calls().last().copied(),
            Some(Step::CloseContext)
        );
    }

    #[test]
    fn missing_device() {
        let driver = ScriptedDriver::failing_at(Step::FindDevice);
        let result = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100);
        assert!(matches!(
            result,
            Err(CaptureError::DeviceNotFound {
                vendor_id: 0x1e4e,
                product_id: 0x0100,
                ..
            })
        ));
        // Only the context had been acquired.
        assert_eq!(
            driver.calls(),
            vec![Step::OpenContext, Step::FindDevice, Step::CloseContext]
        );
    }

    #[test]
    fn context_failure_is_open_failure() {
        let driver = ScriptedDriver::failing_at(Step::OpenContext);
        let result = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100);
        assert!(matches!(result, Err(CaptureError::DeviceOpenFailed(_))));
        assert_eq!(driver.calls(), vec![Step::OpenContext]);
    }

    #[test]
    fn open_failure_releases_device() {
        let driver = ScriptedDriver::failing_at(Step::OpenDevice);
        let result = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100);
        assert!(matches!(result, Err(CaptureError::DeviceOpenFailed(_))));
        assert_eq!(
            driver.calls(),
            vec![
                Step::OpenContext,
                Step::FindDevice,
                Step::OpenDevice,
                Step::Release,
                Step::CloseContext
            ]
        );
    }

    #[test]
    fn negotiation_failure() {
        let driver = ScriptedDriver::failing_at(Step::Negotiate);
        let result = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100);
        assert!(matches!(
            result,
            Err(CaptureError::StreamNegotiationFailed(_))
        ));
        assert_eq!(
            &driver.calls()[5..],
            &[Step::Release, Step::CloseContext]
        );
    }

    #[test]
    fn start_failure_closes() {
        let driver = ScriptedDriver::failing_at(Step::Start);
        let mut session = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100).unwrap();
        assert!(matches!(
            session.start(),
            Err(CaptureError::StreamStartFailed(_))
        ));
        assert_eq!(session.state(), SessionState::Closed);
        // Streaming never started, so it is never stopped.
        assert!(!driver.calls().contains(&Step::Stop));
        assert_eq!(driver.calls().last().copied(), Some(Step::CloseContext));
    }

    #[test]
    fn start_twice_fails() {
        let driver = ScriptedDriver::lepton();
        let mut session = CaptureSession::open(driver, 0x1e4e, 0x0100).unwrap();
        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(CaptureError::StreamStartFailed(_))
        ));
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn no_y16_format() {
        let driver = ScriptedDriver {
            formats: vec![FormatDescriptor {
                guid: *b"MJPG\x00\x00\x10\x00\x80\x00\x00\xaa\x00\x38\x9b\x71",
                frames: vec![FrameDescriptor {
                    width: 640,
                    height: 480,
                    default_frame_interval: 333_333,
                }],
            }],
            ..ScriptedDriver::default()
        };
        let result = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100);
        assert!(matches!(result, Err(CaptureError::UnsupportedFormat)));
        assert_eq!(driver.calls().last().copied(), Some(Step::CloseContext));
    }

    #[test]
    fn zero_interval_is_skipped() {
        let formats = vec![FormatDescriptor {
            guid: Y16_GUID,
            frames: vec![
                FrameDescriptor {
                    width: 80,
                    height: 60,
                    default_frame_interval: 0,
                },
                FrameDescriptor {
                    width: 160,
                    height: 120,
                    default_frame_interval: 1_111_111,
                },
            ],
        }];
        assert_eq!(
            select_profile(&formats).unwrap(),
            StreamProfile {
                width: 160,
                height: 120,
                frame_rate: 9
            }
        );
        let only_zero = vec![FormatDescriptor {
            guid: Y16_GUID,
            frames: vec![FrameDescriptor {
                width: 80,
                height: 60,
                default_frame_interval: 0,
            }],
        }];
        assert!(matches!(
            select_profile(&only_zero),
            Err(CaptureError::UnsupportedFormat)
        ));
    }

    #[test]
    fn frames_are_decoded_little_endian() {
        let driver = ScriptedDriver::lepton();
        let mut session = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100).unwrap();
        session.start().unwrap();
        let samples = [30000u16, 30001, 30002, 30003, 40000, 1, 2, 0xABCD];
        driver.deliver(&le_bytes(&samples), 4, 2);
        let mut raw = Array2::zeros((2, 4));
        assert_eq!(session.copy_latest_into(&mut raw), 1);
        assert_eq!(raw[(0, 0)], 30000);
        assert_eq!(raw[(1, 0)], 40000);
        assert_eq!(raw[(1, 3)], 0xABCD);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let driver = ScriptedDriver::lepton();
        let mut session = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100).unwrap();
        session.start().unwrap();
        let good = le_bytes(&[7; 8]);
        driver.deliver(&good, 4, 2);
        // Short
        driver.deliver(&good[..10], 4, 2);
        // Right length, wrong shape
        driver.deliver(&le_bytes(&[9; 8]), 2, 4);
        assert_eq!(session.dropped_frames(), 2);
        let mut frame = Array2::zeros((2, 4));
        assert_eq!(session.copy_latest_into(&mut frame), 1);
        assert!(frame.iter().all(|sample| *sample == 7));
    }

    #[test]
    fn frame_lock_reads_in_place() {
        let driver = ScriptedDriver::lepton();
        let mut session = CaptureSession::open(driver.clone(), 0x1e4e, 0x0100).unwrap();
        session.start().unwrap();
        {
            let frame = session.frame_lock();
            assert_eq!(frame.sequence(), 0);
            assert_eq!(frame.read().dim(), (2, 4));
        }
        driver.deliver(&le_bytes(&[30000, 30001, 30002, 30003, 5, 6, 7, 8]), 4, 2);
        let frame = session.frame_lock();
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.read()[(0, 3)], 30003);
        assert_eq!(frame.read()[(1, 0)], 5);
    }
}
