//! Report emission and the upload-grant side channel.

use std::sync::Arc;

use async_stream::stream;
use futures::{future::join_all, stream::BoxStream, Stream, StreamExt};
use smartguard_monitor::ReportDecision;
use smartguard_network::{FrameUploader, ReportTransport};
use smartguard_ops::TelemetryStore;
use smartguard_types::{
    config::{DeviceConfig, NetworkConfig, PrivacyConfig},
    events::{EventKind, EventPayload, ReportEvent, SystemEvent, UploadEvent},
    frame::AnnotatedFrame,
    report::{DetectionMessage, FrameSummary, RemoteMessage, UploadGrant, UploadTarget},
    Result,
};
use smartguard_vision::{encode_jpeg, PrivacyFilter};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::pipeline_error;

/// Publishes detection reports and uploads the reported frame once the
/// remote side grants it.
///
/// The pending holding area is the only state shared between the capture
/// path and the grant listener. A new report replaces whatever is pending.
pub struct ReportEmitter<T, U> {
    transport: Arc<T>,
    uploader: Arc<U>,
    telemetry: TelemetryStore,
    pending: Arc<Mutex<Vec<AnnotatedFrame>>>,
    privacy: PrivacyFilter,
    client_id: String,
    grant_topic: String,
    jpeg_quality: u8,
    upload_retries: u8,
}

impl<T, U> Clone for ReportEmitter<T, U> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            uploader: Arc::clone(&self.uploader),
            telemetry: self.telemetry.clone(),
            pending: Arc::clone(&self.pending),
            privacy: self.privacy.clone(),
            client_id: self.client_id.clone(),
            grant_topic: self.grant_topic.clone(),
            jpeg_quality: self.jpeg_quality,
            upload_retries: self.upload_retries,
        }
    }
}

impl<T, U> ReportEmitter<T, U>
where
    T: ReportTransport + 'static,
    U: FrameUploader + 'static,
{
    pub fn new(
        device: &DeviceConfig,
        privacy: &PrivacyConfig,
        network: &NetworkConfig,
        transport: Arc<T>,
        uploader: Arc<U>,
        telemetry: TelemetryStore,
    ) -> Self {
        Self {
            transport,
            uploader,
            telemetry,
            pending: Arc::new(Mutex::new(Vec::new())),
            privacy: PrivacyFilter::new(privacy),
            client_id: device.client_id.clone(),
            grant_topic: device.resolved_grant_topic(),
            jpeg_quality: privacy.jpeg_quality,
            upload_retries: network.upload_retries,
        }
    }

    /// Stores the reported frame as pending and publishes its counts in the
    /// background. Never waits on the network.
    pub async fn emit(&self, decision: ReportDecision) -> Result<()> {
        let frame = decision.frame;
        let summary = FrameSummary {
            num_faces_detected: frame.face_regions.len() as u32,
            num_objects_detected: frame.motion_regions.len() as u32,
        };
        let report = ReportEvent {
            kind: decision.kind,
            score: decision.score,
            faces: summary.num_faces_detected,
            objects: summary.num_objects_detected,
            frame_captured_at: frame.timestamp,
            has_pixels: frame.raw_pixels().is_some(),
        };

        {
            let mut pending = self.pending.lock().await;
            if !pending.is_empty() {
                debug!(replaced = pending.len(), "replacing frames still waiting for a grant");
            }
            *pending = vec![frame];
        }

        self.telemetry
            .record_event(SystemEvent::new(EventKind::Report, EventPayload::Report(report)))
            .await?;

        let message = DetectionMessage {
            client_id: self.client_id.clone(),
            frames: vec![summary],
        };
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            match transport.publish(&message).await {
                Ok(()) => info!(
                    faces = summary.num_faces_detected,
                    objects = summary.num_objects_detected,
                    "Detection report published"
                ),
                Err(err) => error!("failed to publish detection report: {err}"),
            }
        });
        Ok(())
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Consumes grants from the transport until its stream ends.
    pub fn spawn_grant_listener(&self) -> JoinHandle<()> {
        let grants = grant_stream(self.transport.subscribe(), self.grant_topic.clone());
        let emitter = self.clone();
        tokio::spawn(async move {
            futures::pin_mut!(grants);
            while let Some(grant) = grants.next().await {
                match grant {
                    Ok(grant) => {
                        if let Err(err) = emitter.handle_grant(grant).await {
                            error!("grant handling failed: {err}");
                        }
                    }
                    Err(err) => warn!("ignoring malformed upload grant: {err}"),
                }
            }
            debug!("grant stream closed");
        })
    }

    /// Uploads the pending frames to every target of the grant. Returns the
    /// number of successful transfers. The pending area is cleared whatever
    /// the outcome; a grant arriving with nothing pending does nothing.
    pub async fn handle_grant(&self, grant: UploadGrant) -> Result<usize> {
        let frames = std::mem::take(&mut *self.pending.lock().await);
        if frames.is_empty() {
            debug!(targets = grant.targets.len(), "grant arrived with no pending frame");
            return Ok(0);
        }

        let mut delivered = 0;
        for frame in frames {
            let Some(pixels) = frame.raw_pixels().cloned() else {
                warn!(captured_at = %frame.timestamp, "reported frame has no pixels; skipping upload");
                continue;
            };
            let privacy = self.privacy.clone();
            let faces = frame.face_regions.clone();
            let quality = self.jpeg_quality;
            let jpeg = tokio::task::spawn_blocking(move || {
                encode_jpeg(&privacy.apply(&pixels, &faces), quality)
            })
            .await
            .map_err(|err| pipeline_error(format!("privacy filter task failed: {err}")))??;

            let outcomes = join_all(
                grant
                    .targets
                    .iter()
                    .map(|target| self.upload_with_retries(target, &jpeg)),
            )
            .await;

            for (target, outcome) in grant.targets.iter().zip(outcomes) {
                let details = match &outcome {
                    Ok(()) => {
                        delivered += 1;
                        info!(target = %target.name, bytes = jpeg.len(), "Frame uploaded");
                        None
                    }
                    Err(err) => {
                        error!(target = %target.name, "upload failed, dropping frame: {err}");
                        Some(err.to_string())
                    }
                };
                self.telemetry
                    .record_event(SystemEvent::new(
                        EventKind::Upload,
                        EventPayload::Upload(UploadEvent {
                            target: target.name.clone(),
                            success: outcome.is_ok(),
                            details,
                        }),
                    ))
                    .await?;
            }
        }
        Ok(delivered)
    }

    async fn upload_with_retries(&self, target: &UploadTarget, jpeg: &[u8]) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.uploader.upload(target, jpeg).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.upload_retries => {
                    attempt += 1;
                    warn!(target = %target.name, attempt, "retrying upload: {err}");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Typed view over remote messages: only the device's grant topic, parsed.
pub fn grant_stream(
    messages: BoxStream<'static, RemoteMessage>,
    topic: String,
) -> impl Stream<Item = Result<UploadGrant>> {
    stream! {
        for await message in messages {
            if message.topic != topic {
                debug!(topic = %message.topic, "ignoring message on unrelated topic");
                continue;
            }
            yield UploadGrant::from_payload(&message.payload);
        }
    }
}
