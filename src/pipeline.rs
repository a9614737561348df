// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use image::{GrayImage, RgbImage};
use ndarray::Array2;
use tracing::{debug, info, instrument, trace, warn};

use crate::ambient::{AmbientReading, AmbientSensor};
use crate::capture::{CaptureDriver, CaptureSession, Recorder};
use crate::correlate::{correlate, TemperatureReading};
use crate::detect::{Detection, DetectionSettings, Detector};
use crate::display::{self, Annotation, Display};
use crate::frame_buffer::FrameReader;
use crate::geometry::{BoundingBox, DetectorGrid, DisplayGrid, GridScale, RawGrid};
use crate::normalize::{expand_to_rgb, Calibration, Normalizer};
use crate::temperature::{format_temperature, Centikelvin, TemperatureUnit};

/// Anything the latest complete raw frame can be copied out of.
pub(crate) trait FrameSource {
    /// Copy the latest frame into `destination` and return its sequence number (zero if no frame
    /// has arrived yet).
    fn copy_latest_into(&self, destination: &mut Array2<Centikelvin>) -> u64;
}

impl FrameSource for FrameReader<Centikelvin> {
    fn copy_latest_into(&self, destination: &mut Array2<Centikelvin>) -> u64 {
        FrameReader::copy_latest_into(self, destination)
    }
}

impl<D> FrameSource for CaptureSession<D>
where
    D: CaptureDriver,
{
    fn copy_latest_into(&self, destination: &mut Array2<Centikelvin>) -> u64 {
        CaptureSession::copy_latest_into(self, destination)
    }
}

/// What was found for a single detected region.
#[derive(Clone, Debug)]
pub(crate) struct RegionReport {
    pub(crate) detection: Detection,
    pub(crate) raw_box: BoundingBox<RawGrid>,
    pub(crate) display_box: BoundingBox<DisplayGrid>,
    pub(crate) reading: Option<TemperatureReading>,
    /// The temperature without a unit, as shown on the display.
    pub(crate) label: Option<String>,
}

/// Everything produced by one processing cycle.
#[derive(Clone, Debug)]
pub(crate) struct CycleReport {
    pub(crate) sequence: u64,
    /// `None` when detection is disabled.
    pub(crate) regions: Option<Vec<RegionReport>>,
    pub(crate) window: Option<RgbImage>,
    pub(crate) ambient: Option<AmbientReading>,
}

fn people_count(count: usize) -> String {
    if count == 1 {
        "1 person".to_string()
    } else {
        format!("{} people", count)
    }
}

/// Turns raw frames into temperature reports.
///
/// All of the buffers are allocated once, when the processor is created.
pub(crate) struct Processor {
    raw: Array2<Centikelvin>,
    normalized: GrayImage,
    normalizer: Normalizer,
    unit: TemperatureUnit,
    confidence_threshold: f32,
    max_regions: usize,
    detector: Option<Box<dyn Detector>>,
    ambient: Option<Box<dyn AmbientSensor>>,
    display: Option<Display>,
    recorder: Option<Recorder>,
    to_raw: GridScale<DetectorGrid, RawGrid>,
    to_display: GridScale<DetectorGrid, DisplayGrid>,
    last_sequence: u64,
}

impl Processor {
    /// `frame_size` is the `(width, height)` negotiated with the camera.
    pub(crate) fn new(
        frame_size: (u32, u32),
        calibration: Calibration,
        unit: TemperatureUnit,
        detection: &DetectionSettings,
    ) -> Self {
        let (width, height) = frame_size;
        Self {
            raw: Array2::zeros((height as usize, width as usize)),
            normalized: GrayImage::new(width, height),
            normalizer: Normalizer::new(calibration),
            unit,
            confidence_threshold: detection.confidence_threshold,
            max_regions: detection.max_regions,
            detector: None,
            ambient: None,
            display: None,
            recorder: None,
            // The detector is given the normalized frame, which has the same size as the raw one.
            to_raw: GridScale::between(frame_size, frame_size),
            to_display: GridScale::between(frame_size, frame_size),
            last_sequence: 0,
        }
    }

    pub(crate) fn with_detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub(crate) fn with_ambient(mut self, sensor: Box<dyn AmbientSensor>) -> Self {
        self.ambient = Some(sensor);
        self
    }

    pub(crate) fn with_display(mut self, display: Display) -> Self {
        let frame_size = self.normalized.dimensions();
        self.to_display = GridScale::between(frame_size, display.window_size());
        self.display = Some(display);
        self
    }

    pub(crate) fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    fn read_ambient(&mut self) -> Option<AmbientReading> {
        let sensor = self.ambient.as_mut()?;
        match sensor.read() {
            Ok(reading) => Some(reading),
            Err(err) => {
                warn!("{}: {:?}", err, err.0);
                None
            }
        }
    }

    fn examine(&self, detection: Detection) -> RegionReport {
        let raw_box = detection.bbox.scale(&self.to_raw);
        let reading = correlate(self.raw.view(), &raw_box);
        RegionReport {
            detection,
            raw_box,
            display_box: detection.bbox.scale(&self.to_display),
            reading,
            label: reading.map(|reading| format_temperature(reading.value, self.unit, false)),
        }
    }

    /// Run one cycle on the latest frame from `source`.
    ///
    /// Returns `None` without doing anything if there is no new frame since the last cycle.
    #[instrument(level = "debug", skip(self, source))]
    pub(crate) fn process<S>(&mut self, source: &S) -> anyhow::Result<Option<CycleReport>>
    where
        S: FrameSource + ?Sized,
    {
        let start = Instant::now();
        let sequence = source.copy_latest_into(&mut self.raw);
        if sequence == self.last_sequence {
            trace!(sequence, "no new frame");
            return Ok(None);
        }
        self.last_sequence = sequence;
        if let Some(recorder) = self.recorder.as_mut() {
            recorder
                .record(self.raw.view())
                .context("Unable to record frame")?;
        }
        let ambient = if self.detector.is_some() {
            self.read_ambient()
        } else {
            None
        };
        self.normalizer
            .normalize_into(self.raw.view(), &mut self.normalized);
        let regions = match self.detector.as_mut() {
            Some(detector) => {
                let rgb = expand_to_rgb(&self.normalized);
                let detections = detector
                    .detect(&rgb, self.confidence_threshold, self.max_regions)
                    .context("Detection failed")?;
                Some(
                    detections
                        .into_iter()
                        .map(|detection| self.examine(detection))
                        .collect::<Vec<_>>(),
                )
            }
            None => None,
        };
        let window = self.display.as_ref().map(|display| {
            let annotations: Vec<Annotation<'_>> = regions
                .iter()
                .flatten()
                .map(|region| Annotation {
                    bbox: region.display_box,
                    label: region.label.as_deref(),
                })
                .collect();
            display.render(&self.normalized, &annotations)
        });
        let duration = start.elapsed();
        debug!(
            "Frame took {:.0} ms ({:.2} Hz)",
            duration.as_secs_f64() * 1000.0,
            1.0 / duration.as_secs_f64().max(f64::EPSILON)
        );
        Ok(Some(CycleReport {
            sequence,
            regions,
            window,
            ambient,
        }))
    }

    /// Flush anything buffered (the recording).
    pub(crate) fn finish(self) -> anyhow::Result<()> {
        if let Some(recorder) = self.recorder {
            let frames = recorder.frames();
            recorder.finish()?;
            info!(frames, "recording saved");
        }
        Ok(())
    }
}

/// Logs what each cycle found, and keeps the snapshot file current.
#[derive(Clone, Debug)]
pub(crate) struct Reporter {
    unit: TemperatureUnit,
    snapshot_path: Option<PathBuf>,
}

impl Reporter {
    pub(crate) fn new(unit: TemperatureUnit, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            unit,
            snapshot_path,
        }
    }

    pub(crate) fn report(&self, report: &CycleReport) {
        trace!(sequence = report.sequence, "cycle complete");
        if let Some(ambient) = &report.ambient {
            debug!(
                temperature = %format!("{:#.0}", ambient.temperature),
                pressure = %format!("{:.0} hPa", ambient.pressure),
                humidity = %format!("{:.0}%", ambient.humidity),
                "ambient conditions"
            );
        }
        if let Some(regions) = &report.regions {
            info!("{}", people_count(regions.len()));
            for region in regions {
                match region.reading {
                    Some(reading) => info!(
                        temperature = %format_temperature(reading.value, self.unit, true),
                        confidence = region.detection.confidence,
                        region = ?region.raw_box,
                        "region temperature"
                    ),
                    None => debug!(region = ?region.raw_box, "no temperature for region"),
                }
            }
        }
        if let (Some(window), Some(path)) = (&report.window, &self.snapshot_path) {
            if let Err(err) = display::write_snapshot(window, path) {
                warn!("Unable to save snapshot: {:?}", err);
            }
        }
    }
}

/// Process frames until `running` is cleared, handing every report to `on_cycle`.
///
/// Errors within a cycle are logged and the loop continues. When there is no new frame the loop
/// waits a quarter of a frame period before checking again.
pub(crate) fn run<S, F>(
    source: &S,
    processor: &mut Processor,
    frame_rate: u32,
    running: &AtomicBool,
    mut on_cycle: F,
) where
    S: FrameSource + ?Sized,
    F: FnMut(CycleReport),
{
    let idle = Duration::from_secs(1) / frame_rate.max(1).saturating_mul(4);
    let mut cycles = 0u64;
    let mut failures = 0u64;
    while running.load(Ordering::Acquire) {
        match processor.process(source) {
            Ok(Some(report)) => {
                cycles += 1;
                on_cycle(report);
            }
            Ok(None) => thread::sleep(idle),
            Err(err) => {
                failures += 1;
                warn!("Error processing frame: {:?}", err);
            }
        }
    }
    info!(cycles, failures, "processing stopped");
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    use image::{GenericImageView, RgbImage};
    use ndarray::Array2;
    use parking_lot::Mutex;

    use super::{people_count, run, CycleReport, FrameSource, Processor, Reporter};
    use crate::ambient::{AmbientReading, AmbientSensor};
    use crate::detect::{Detection, DetectionSettings, Detector, HotspotDetector};
    use crate::display::{Display, DisplaySettings};
    use crate::error::SensorNotReady;
    use crate::frame_buffer::DoubleFrameBuffer;
    use crate::geometry::{BoundingBox, DetectorGrid};
    use crate::normalize::Calibration;
    use crate::temperature::{Temperature, TemperatureUnit};

    /// Always returns the same boxes, and remembers the arguments it was called with.
    struct FixedDetector {
        boxes: Vec<BoundingBox<DetectorGrid>>,
        calls: Arc<Mutex<Vec<(f32, usize)>>>,
    }

    impl Detector for FixedDetector {
        fn detect(
            &mut self,
            _image: &RgbImage,
            confidence_threshold: f32,
            max_results: usize,
        ) -> anyhow::Result<Vec<Detection>> {
            self.calls.lock().push((confidence_threshold, max_results));
            Ok(self
                .boxes
                .iter()
                .map(|bbox| Detection {
                    bbox: *bbox,
                    confidence: 0.9,
                })
                .collect())
        }
    }

    /// Fails the first time it is called, then finds nothing.
    #[derive(Default)]
    struct FailsOnce {
        calls: usize,
    }

    impl Detector for FailsOnce {
        fn detect(
            &mut self,
            _image: &RgbImage,
            _confidence_threshold: f32,
            _max_results: usize,
        ) -> anyhow::Result<Vec<Detection>> {
            self.calls += 1;
            if self.calls == 1 {
                Err(anyhow::anyhow!("model not loaded yet"))
            } else {
                Ok(Vec::new())
            }
        }
    }

    /// Has a new (uniform) frame every time it is asked.
    struct EndlessFrames(Cell<u64>);

    impl FrameSource for EndlessFrames {
        fn copy_latest_into(&self, destination: &mut Array2<u16>) -> u64 {
            destination.fill(30000);
            self.0.set(self.0.get() + 1);
            self.0.get()
        }
    }

    struct FlakySensor(bool);

    impl AmbientSensor for FlakySensor {
        fn read(&mut self) -> Result<AmbientReading, SensorNotReady> {
            self.0 = !self.0;
            if self.0 {
                Ok(AmbientReading {
                    temperature: Temperature::Celsius(21.0),
                    pressure: 1013.0,
                    humidity: 40.0,
                })
            } else {
                Err(SensorNotReady(anyhow::anyhow!("busy")))
            }
        }
    }

    fn settings() -> DetectionSettings {
        DetectionSettings {
            confidence_threshold: 0.25,
            max_regions: 3,
            ..DetectionSettings::default()
        }
    }

    fn processor() -> Processor {
        Processor::new(
            (4, 4),
            Calibration::default(),
            TemperatureUnit::Celsius,
            &settings(),
        )
    }

    fn hot_pixel_frame() -> Vec<u16> {
        let mut raw = Array2::from_elem((4, 4), 30000u16);
        raw[(2, 2)] = 31015;
        raw.iter().copied().collect()
    }

    #[test]
    fn people() {
        assert_eq!(people_count(0), "0 people");
        assert_eq!(people_count(1), "1 person");
        assert_eq!(people_count(2), "2 people");
    }

    #[test]
    fn skips_until_new_frame() {
        let (mut writer, reader) = DoubleFrameBuffer::new::<u16>(4, 4);
        let mut processor = processor();
        assert!(processor.process(&reader).unwrap().is_none());
        writer.write(&hot_pixel_frame()).unwrap();
        let report = processor.process(&reader).unwrap().expect("a new frame");
        assert_eq!(report.sequence, 1);
        assert!(report.regions.is_none());
        assert!(report.window.is_none());
        assert!(processor.process(&reader).unwrap().is_none());
    }

    #[test]
    fn reports_region_temperatures() {
        let (mut writer, reader) = DoubleFrameBuffer::new::<u16>(4, 4);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let detector = FixedDetector {
            boxes: vec![
                BoundingBox::new(1.0, 1.0, 3.0, 3.0),
                BoundingBox::new(10.0, 10.0, 12.0, 12.0),
            ],
            calls: Arc::clone(&calls),
        };
        let mut processor = processor()
            .with_detector(Box::new(detector))
            .with_ambient(Box::new(FlakySensor(false)));
        writer.write(&hot_pixel_frame()).unwrap();
        let report = processor.process(&reader).unwrap().unwrap();
        assert_eq!(calls.lock().as_slice(), &[(0.25, 3)]);
        let regions = report.regions.expect("detection ran");
        assert_eq!(regions.len(), 2);
        let first = &regions[0];
        assert_eq!(first.reading.map(|r| r.value), Some(31015));
        assert_eq!(first.label.as_deref(), Some("37"));
        assert_eq!(first.raw_box, BoundingBox::new(1.0, 1.0, 3.0, 3.0));
        let second = &regions[1];
        assert!(second.reading.is_none());
        assert!(second.label.is_none());
        assert!(report.ambient.is_some());

        // The sensor is not ready the second time around.
        writer.write(&hot_pixel_frame()).unwrap();
        let report = processor.process(&reader).unwrap().unwrap();
        assert!(report.ambient.is_none());
        assert_eq!(report.regions.map(|regions| regions.len()), Some(2));
    }

    #[test]
    fn display_boxes_are_scaled() {
        let (mut writer, reader) = DoubleFrameBuffer::new::<u16>(4, 4);
        let detector = FixedDetector {
            boxes: vec![BoundingBox::new(1.0, 1.0, 3.0, 3.0)],
            calls: Arc::default(),
        };
        let display = Display::new(&DisplaySettings {
            width: 40,
            height: 20,
            ..DisplaySettings::default()
        });
        let mut processor = Processor::new(
            (4, 4),
            Calibration::default(),
            TemperatureUnit::Fahrenheit,
            &settings(),
        )
        .with_detector(Box::new(detector))
        .with_display(display);
        writer.write(&hot_pixel_frame()).unwrap();
        let report = processor.process(&reader).unwrap().unwrap();
        let regions = report.regions.unwrap();
        assert_eq!(
            regions[0].display_box,
            BoundingBox::new(10.0, 5.0, 30.0, 15.0)
        );
        assert_eq!(regions[0].label.as_deref(), Some("99"));
        let window = report.window.expect("a rendered window");
        assert_eq!(window.dimensions(), (40, 20));
    }

    #[test]
    fn hotspot_end_to_end() {
        let (mut writer, reader) = DoubleFrameBuffer::new::<u16>(4, 4);
        let mut processor = processor().with_detector(Box::new(HotspotDetector::default()));
        let mut frame = Array2::from_elem((4, 4), 29000u16);
        for row in 1..3 {
            for col in 1..3 {
                frame[(row, col)] = 31015;
            }
        }
        writer
            .write(&frame.iter().copied().collect::<Vec<_>>())
            .unwrap();
        let report = processor.process(&reader).unwrap().unwrap();
        let regions = report.regions.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].reading.map(|r| r.value), Some(31015));
    }

    #[test]
    fn records_processed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycle.y16");
        let (mut writer, reader) = DoubleFrameBuffer::new::<u16>(4, 4);
        let mut processor =
            processor().with_recorder(crate::capture::Recorder::create(&path).unwrap());
        writer.write(&hot_pixel_frame()).unwrap();
        processor.process(&reader).unwrap();
        processor.process(&reader).unwrap();
        processor.finish().unwrap();
        // Only the new frame is recorded.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 32);
    }

    #[test]
    fn reporter_writes_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("window.jpg");
        let reporter = Reporter::new(TemperatureUnit::Celsius, Some(path.clone()));
        let mut report = CycleReport {
            sequence: 1,
            regions: Some(Vec::new()),
            window: None,
            ambient: None,
        };
        reporter.report(&report);
        assert!(!path.exists());
        report.window = Some(RgbImage::new(8, 6));
        reporter.report(&report);
        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (8, 6));
    }

    #[test]
    fn cycle_errors_do_not_stop_the_loop() {
        let source = EndlessFrames(Cell::new(0));
        let mut processor = processor().with_detector(Box::new(FailsOnce::default()));
        let running = AtomicBool::new(true);
        let mut sequences = Vec::new();
        run(&source, &mut processor, 1000, &running, |report| {
            assert_eq!(report.regions.map(|regions| regions.len()), Some(0));
            sequences.push(report.sequence);
            if sequences.len() == 2 {
                running.store(false, Ordering::Release);
            }
        });
        // The first frame failed detection, the loop carried on with the next ones.
        assert_eq!(sequences, vec![2, 3]);
    }

    #[test]
    fn run_stops_when_cleared() {
        let (mut writer, reader) = DoubleFrameBuffer::new::<u16>(4, 4);
        writer.write(&hot_pixel_frame()).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let stopper = Arc::clone(&running);
        let handle = thread::spawn(move || {
            let mut processor = processor();
            let mut reports = 0;
            run(&reader, &mut processor, 1000, &stopper, |_| reports += 1);
            reports
        });
        thread::sleep(std::time::Duration::from_millis(20));
        running.store(false, Ordering::Release);
        assert_eq!(handle.join().unwrap(), 1);
    }
}
