//! Transport facade between the device and the remote consumer.
//!
//! The core publishes typed [`DetectionMessage`]s and consumes raw
//! [`RemoteMessage`]s; adapters own the connection lifecycle.

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use smartguard_types::{
    report::{DetectionMessage, RemoteMessage},
    Result, SmartguardError,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

#[cfg(feature = "mqtt")]
mod mqtt;
mod upload;

#[cfg(feature = "mqtt")]
pub use mqtt::MqttTransport;
pub use upload::{FrameUploader, HttpUploader};

#[async_trait]
pub trait ReportTransport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn publish(&self, message: &DetectionMessage) -> Result<()>;
    /// Messages the remote side sends to this device.
    fn subscribe(&self) -> BoxStream<'static, RemoteMessage>;
}

/// In-process broker backed by broadcast channels. The remote side is
/// simulated through [`LocalBroker::detections`] and [`LocalBroker::deliver`].
#[derive(Clone)]
pub struct LocalBroker {
    published: broadcast::Sender<DetectionMessage>,
    remote: broadcast::Sender<RemoteMessage>,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        let (published, _) = broadcast::channel(capacity);
        let (remote, _) = broadcast::channel(capacity);
        Self { published, remote }
    }

    /// Detection messages published by the device.
    pub fn detections(&self) -> BoxStream<'static, DetectionMessage> {
        BroadcastStream::new(self.published.subscribe())
            .filter_map(|message| async move { message.ok() })
            .boxed()
    }

    /// Sends a message from the remote side to the device. Returns the
    /// number of subscribers that received it.
    pub fn deliver(&self, message: RemoteMessage) -> usize {
        self.remote.send(message).unwrap_or(0)
    }
}

#[async_trait]
impl ReportTransport for LocalBroker {
    async fn connect(&self) -> Result<()> {
        info!("Starting local broker (in-process)");
        Ok(())
    }

    async fn publish(&self, message: &DetectionMessage) -> Result<()> {
        let receivers = self.published.send(message.clone()).unwrap_or(0);
        debug!(receivers, client_id = %message.client_id, "published detection");
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, RemoteMessage> {
        BroadcastStream::new(self.remote.subscribe())
            .filter_map(|message| async move { message.ok() })
            .boxed()
    }
}

pub fn network_error(message: impl Into<String>) -> SmartguardError {
    SmartguardError::Network(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartguard_types::report::FrameSummary;

    #[tokio::test]
    async fn local_broker_round_trip() {
        let broker = LocalBroker::new(8);
        broker.connect().await.expect("connect");
        let mut detections = broker.detections();
        let mut inbox = broker.subscribe();

        let message = DetectionMessage {
            client_id: "porch".into(),
            frames: vec![FrameSummary {
                num_faces_detected: 1,
                num_objects_detected: 1,
            }],
        };
        broker.publish(&message).await.expect("publish");
        assert_eq!(detections.next().await, Some(message));

        let delivered = broker.deliver(RemoteMessage {
            topic: "to/device/porch".into(),
            payload: b"{}".to_vec(),
        });
        assert_eq!(delivered, 1);
        let received = inbox.next().await.expect("remote message");
        assert_eq!(received.topic, "to/device/porch");
    }

    #[tokio::test]
    async fn publishing_without_listeners_is_fine() {
        let broker = LocalBroker::new(2);
        let message = DetectionMessage {
            client_id: "porch".into(),
            frames: Vec::new(),
        };
        assert!(broker.publish(&message).await.is_ok());
        assert_eq!(
            broker.deliver(RemoteMessage {
                topic: "t".into(),
                payload: Vec::new()
            }),
            0
        );
    }
}
