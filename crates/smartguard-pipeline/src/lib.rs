//! Capture loop driving motion and face detection into the activity monitor,
//! plus the report emitter that talks to the remote side.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use smartguard_capture::{FramePacer, VideoSource};
use smartguard_monitor::ActivityMonitor;
use smartguard_network::{FrameUploader, ReportTransport};
use smartguard_ops::TelemetryStore;
use smartguard_types::{
    config::SmartguardConfig,
    events::{EventKind, EventPayload, LifecyclePhase, SystemEvent, TelemetryEvent},
    frame::{AnnotatedFrame, VideoFrame},
    telemetry::CaptureStats,
    Result, SmartguardError,
};
use smartguard_vision::{DebugRecorder, FaceDetector, FaceLocator, MotionDetector};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod emitter;

pub use emitter::{grant_stream, ReportEmitter};

pub struct Pipeline<S, D, T, U>
where
    S: VideoSource,
    D: FaceDetector,
    T: ReportTransport + 'static,
    U: FrameUploader + 'static,
{
    source: S,
    motion: MotionDetector,
    faces: FaceLocator<D>,
    monitor: ActivityMonitor,
    emitter: ReportEmitter<T, U>,
    pacer: FramePacer,
    recorder: Option<DebugRecorder>,
    transport: Arc<T>,
    telemetry: TelemetryStore,
    stats: CaptureStats,
    grant_listener: Option<JoinHandle<()>>,
}

impl<S, D, T, U> Pipeline<S, D, T, U>
where
    S: VideoSource,
    D: FaceDetector,
    T: ReportTransport + 'static,
    U: FrameUploader + 'static,
{
    pub fn new(
        config: &SmartguardConfig,
        source: S,
        detector: D,
        transport: Arc<T>,
        uploader: Arc<U>,
        telemetry: TelemetryStore,
    ) -> Result<Self> {
        let fps = source.fps();
        let recorder = if config.capture.display {
            Some(DebugRecorder::new(&config.capture.debug_dir)?)
        } else {
            None
        };
        let emitter = ReportEmitter::new(
            &config.device,
            &config.privacy,
            &config.network,
            Arc::clone(&transport),
            uploader,
            telemetry.clone(),
        );

        Ok(Self {
            pacer: FramePacer::new(source.pacing(), fps),
            motion: MotionDetector::new(config.motion.clone()),
            faces: FaceLocator::new(detector),
            monitor: ActivityMonitor::new(config.monitor.clone(), fps),
            source,
            emitter,
            recorder,
            transport,
            telemetry,
            stats: CaptureStats::default(),
            grant_listener: None,
        })
    }

    /// Connects the transport and starts listening for upload grants.
    pub async fn boot(&mut self) -> Result<()> {
        self.transport.connect().await?;
        self.grant_listener = Some(self.emitter.spawn_grant_listener());

        let (width, height) = self.source.dimensions();
        self.record(SystemEvent::lifecycle(
            LifecyclePhase::Boot,
            Some(format!("{width}x{height} at {} fps", self.source.fps())),
        ))
        .await
    }

    pub fn monitor(&self) -> &ActivityMonitor {
        &self.monitor
    }

    pub fn emitter(&self) -> &ReportEmitter<T, U> {
        &self.emitter
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Stops the grant listener. Uploads already in progress are not awaited.
    pub fn shutdown(&mut self) {
        if let Some(listener) = self.grant_listener.take() {
            listener.abort();
        }
    }

    /// Reads the next frame. End of stream and read failures both end the
    /// loop; failures are logged.
    async fn read_frame(&mut self) -> Option<VideoFrame> {
        match self.source.next_frame().await {
            Ok(Some(frame)) => {
                self.stats.frames_read += 1;
                Some(frame)
            }
            Ok(None) => {
                info!("Video source exhausted");
                None
            }
            Err(err) => {
                warn!("frame read failed, stopping capture: {err}");
                None
            }
        }
    }

    fn process(&mut self, previous: &RgbImage, current: &Arc<RgbImage>, captured_at: DateTime<Utc>) {
        let motion = self.motion.detect(previous, current);
        let faces = self.faces.locate(current, &motion);
        if !motion.is_empty() {
            debug!(regions = motion.len(), faces = faces.len(), "motion in frame");
            if let Some(recorder) = self.recorder.as_mut() {
                if let Err(err) = recorder.persist(current, &motion, &faces) {
                    warn!("failed to persist debug frame: {err}");
                }
            }
        }
        self.monitor.add_frame(AnnotatedFrame::new(
            captured_at,
            Arc::clone(current),
            motion,
            faces,
        ));
        self.stats.frames_processed += 1;
    }

    async fn record(&self, event: SystemEvent) -> Result<()> {
        self.telemetry.record_event(event).await
    }
}

#[async_trait(?Send)]
pub trait PipelineRunner {
    /// Runs until the video source ends and returns the capture counters.
    async fn run(&mut self) -> Result<CaptureStats>;
}

#[async_trait(?Send)]
impl<S, D, T, U> PipelineRunner for Pipeline<S, D, T, U>
where
    S: VideoSource,
    D: FaceDetector,
    T: ReportTransport + 'static,
    U: FrameUploader + 'static,
{
    async fn run(&mut self) -> Result<CaptureStats> {
        self.record(SystemEvent::lifecycle(LifecyclePhase::CaptureStart, None))
            .await?;
        let budget = self.pacer.period();

        if let Some(first) = self.read_frame().await {
            let mut previous = Arc::new(first.image);
            while let Some(frame) = self.read_frame().await {
                let current = Arc::new(frame.image);
                let admitted = self.pacer.admit().await;

                let started = Instant::now();
                if admitted {
                    self.process(&previous, &current, frame.captured_at);
                }
                if let Some(decision) = self.monitor.check_activity() {
                    self.emitter.emit(decision).await?;
                    self.stats.reports_emitted += 1;
                }
                let elapsed = started.elapsed();

                if elapsed > budget {
                    self.stats.deadline_misses += 1;
                    debug!(elapsed_ms = elapsed.as_millis() as u64, "iteration over frame budget");
                }
                self.stats.worst_iteration_ms =
                    self.stats.worst_iteration_ms.max(elapsed.as_millis() as u64);
                previous = current;
            }
        }

        if let Err(err) = self.source.release().await {
            warn!("failed to release video source: {err}");
        }

        let stats = self.stats.clone();
        info!(
            frames_read = stats.frames_read,
            frames_processed = stats.frames_processed,
            deadline_misses = stats.deadline_misses,
            worst_iteration_ms = stats.worst_iteration_ms,
            reports = stats.reports_emitted,
            "Capture finished"
        );
        self.telemetry.record_run(stats.clone()).await?;
        self.record(SystemEvent::new(
            EventKind::Telemetry,
            EventPayload::Telemetry(TelemetryEvent {
                stats: stats.clone(),
                notes: None,
            }),
        ))
        .await?;
        self.record(SystemEvent::lifecycle(LifecyclePhase::CaptureEnd, None))
            .await?;
        Ok(stats)
    }
}

pub fn pipeline_error(message: impl Into<String>) -> SmartguardError {
    SmartguardError::Pipeline(message.into())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use image::{GrayImage, Rgb};
    use smartguard_capture::MemorySource;
    use smartguard_network::LocalBroker;
    use smartguard_types::{
        frame::Region,
        report::{FrameSummary, RemoteMessage, UploadTarget},
    };

    use super::*;

    /// Reports one face centred in the white blob of the test scene.
    struct FixedDetector(Vec<Region>);

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _gray: &GrayImage) -> Vec<Region> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingUploader {
        targets: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FrameUploader for RecordingUploader {
        async fn upload(&self, target: &UploadTarget, _jpeg: &[u8]) -> Result<()> {
            self.targets.lock().unwrap().push(target.name.clone());
            Ok(())
        }
    }

    fn config() -> SmartguardConfig {
        let mut config = SmartguardConfig::default();
        config.device.client_id = "garage".into();
        config.capture.fps = 10;
        // Check on every iteration so the scenario does not depend on wall time.
        config.monitor.check_interval_secs = 0;
        config
    }

    fn black() -> RgbImage {
        RgbImage::new(600, 400)
    }

    fn with_blob() -> RgbImage {
        let mut image = black();
        for x in 200..350 {
            for y in 150..250 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        image
    }

    fn pipeline(
        frames: Vec<RgbImage>,
        faces: Vec<Region>,
    ) -> (
        Pipeline<MemorySource, FixedDetector, LocalBroker, RecordingUploader>,
        Arc<LocalBroker>,
        Arc<RecordingUploader>,
        TelemetryStore,
    ) {
        let broker = Arc::new(LocalBroker::new(16));
        let uploader = Arc::new(RecordingUploader::default());
        let telemetry = TelemetryStore::new();
        let pipeline = Pipeline::new(
            &config(),
            MemorySource::new(frames, 10),
            FixedDetector(faces),
            Arc::clone(&broker),
            Arc::clone(&uploader),
            telemetry.clone(),
        )
        .unwrap();
        (pipeline, broker, uploader, telemetry)
    }

    #[tokio::test]
    async fn moving_face_produces_a_good_report_and_upload() {
        let (mut pipeline, broker, uploader, telemetry) = pipeline(
            vec![black(), black(), with_blob()],
            vec![Region::from_box(250, 170, 50, 50)],
        );
        let mut detections = broker.detections();
        pipeline.boot().await.unwrap();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.frames_read, 3);
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.reports_emitted, 1);
        let message = tokio::time::timeout(Duration::from_secs(2), detections.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.client_id, "garage");
        assert_eq!(
            message.frames,
            vec![FrameSummary {
                num_faces_detected: 1,
                num_objects_detected: 1
            }]
        );
        let scores: Vec<_> = pipeline
            .monitor()
            .buffer()
            .latest(2)
            .iter()
            .map(|frame| frame.score())
            .collect();
        assert_eq!(scores, [Some(0), Some(6)]);

        broker.deliver(RemoteMessage {
            topic: "to/device/garage".into(),
            payload: br#"{"frame_upload": {"upload_url": {"url": "https://frames.example.com/", "fields": {"key": "k.jpg"}}}}"#.to_vec(),
        });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while uploader.targets.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*uploader.targets.lock().unwrap(), ["frame_upload"]);
        pipeline.shutdown();

        let phases: Vec<_> = telemetry
            .snapshot_events()
            .await
            .into_iter()
            .filter_map(|event| match event.payload {
                EventPayload::Lifecycle(lifecycle) => Some(lifecycle.phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            [
                LifecyclePhase::Boot,
                LifecyclePhase::CaptureStart,
                LifecyclePhase::CaptureEnd
            ]
        );
    }

    #[tokio::test]
    async fn face_outside_motion_is_not_reported() {
        let (mut pipeline, _broker, _uploader, _telemetry) = pipeline(
            vec![black(), with_blob()],
            vec![Region::from_box(10, 10, 40, 40)],
        );
        pipeline.boot().await.unwrap();

        let stats = pipeline.run().await.unwrap();

        let frame = pipeline.monitor().buffer().latest(1).iter().next().cloned().unwrap();
        assert!(frame.face_regions.is_empty());
        assert_eq!(frame.score(), Some(1));
        assert_eq!(stats.reports_emitted, 0);
        pipeline.shutdown();
    }

    #[tokio::test]
    async fn static_scene_never_reports() {
        let frames = vec![black(); 6];
        let (mut pipeline, _broker, _uploader, telemetry) =
            pipeline(frames, vec![Region::from_box(250, 170, 50, 50)]);
        pipeline.boot().await.unwrap();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats.reports_emitted, 0);
        assert_eq!(pipeline.monitor().buffer().len(), 5);
        assert!(pipeline.monitor().state().last_motion_detected_at.is_none());
        assert!(pipeline
            .monitor()
            .buffer()
            .latest(5)
            .iter()
            .all(|frame| frame.raw_pixels().is_none()));
        assert_eq!(pipeline.emitter().pending_len().await, 0);
        assert_eq!(telemetry.snapshot_runs().await.len(), 1);
        pipeline.shutdown();
    }

    #[tokio::test]
    async fn empty_source_ends_cleanly() {
        let (mut pipeline, _broker, _uploader, telemetry) = pipeline(Vec::new(), Vec::new());
        pipeline.boot().await.unwrap();

        let stats = pipeline.run().await.unwrap();

        assert_eq!(stats, CaptureStats::default());
        assert!(telemetry
            .snapshot_events()
            .await
            .iter()
            .any(|event| matches!(
                &event.payload,
                EventPayload::Lifecycle(lifecycle) if lifecycle.phase == LifecyclePhase::CaptureEnd
            )));
        pipeline.shutdown();
    }
}
