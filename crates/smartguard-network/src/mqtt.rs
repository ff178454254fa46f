use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use smartguard_types::{
    config::{DeviceConfig, NetworkConfig},
    report::{DetectionMessage, RemoteMessage},
    Result,
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::{network_error, ReportTransport};

/// MQTT adapter. Publishes reports with at-least-once delivery and forwards
/// every publish received on the grant topic.
pub struct MqttTransport {
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    report_topic: String,
    grant_topic: String,
    incoming: broadcast::Sender<RemoteMessage>,
}

impl MqttTransport {
    pub fn new(device: &DeviceConfig, network: &NetworkConfig) -> Self {
        let mut options =
            MqttOptions::new(device.client_id.clone(), network.broker_host.clone(), network.broker_port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, event_loop) = AsyncClient::new(options, network.channel_capacity);
        let (incoming, _) = broadcast::channel(network.channel_capacity);
        Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            report_topic: device.report_topic.clone(),
            grant_topic: device.resolved_grant_topic(),
            incoming,
        }
    }
}

#[async_trait]
impl ReportTransport for MqttTransport {
    async fn connect(&self) -> Result<()> {
        let event_loop = self
            .event_loop
            .lock()
            .map_err(|_| network_error("mqtt event loop lock poisoned"))?
            .take();
        let Some(mut event_loop) = event_loop else {
            return Err(network_error("mqtt transport already connected"));
        };

        let client = self.client.clone();
        let grant_topic = self.grant_topic.clone();
        let incoming = self.incoming.clone();
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => match route(&event) {
                        Routed::Subscribe => {
                            // Clean sessions drop subscriptions, so every
                            // (re)connect subscribes again.
                            match client.try_subscribe(grant_topic.clone(), QoS::AtLeastOnce) {
                                Ok(()) => info!(topic = %grant_topic, "MQTT connected, subscribing"),
                                Err(err) => warn!("grant topic subscribe failed: {err}"),
                            }
                        }
                        Routed::Forward(message) => {
                            debug!(topic = %message.topic, bytes = message.payload.len(), "mqtt message");
                            let _ = incoming.send(message);
                        }
                        Routed::Ignore => {}
                    },
                    Err(err) => {
                        warn!("mqtt connection error: {err}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(topic = %self.grant_topic, "MQTT transport started");
        Ok(())
    }

    async fn publish(&self, message: &DetectionMessage) -> Result<()> {
        let payload = message.to_payload()?;
        self.client
            .publish(self.report_topic.clone(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|err| network_error(format!("publish failed: {err}")))
    }

    fn subscribe(&self) -> BoxStream<'static, RemoteMessage> {
        BroadcastStream::new(self.incoming.subscribe())
            .filter_map(|message| async move { message.ok() })
            .boxed()
    }
}

#[derive(Debug, PartialEq)]
enum Routed {
    Subscribe,
    Forward(RemoteMessage),
    Ignore,
}

fn route(event: &Event) -> Routed {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Routed::Subscribe,
        Event::Incoming(Packet::Publish(publish)) => Routed::Forward(RemoteMessage {
            topic: publish.topic.clone(),
            payload: publish.payload.to_vec(),
        }),
        _ => Routed::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};

    use super::*;

    #[test]
    fn every_connack_triggers_a_subscribe() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::Success,
            false,
        )));
        assert_eq!(route(&connack), Routed::Subscribe);
        // A reconnect is just another ConnAck on the same loop.
        assert_eq!(route(&connack), Routed::Subscribe);
    }

    #[test]
    fn publishes_are_forwarded_and_the_rest_ignored() {
        let publish = Event::Incoming(Packet::Publish(Publish::new(
            "to/device/porch",
            QoS::AtLeastOnce,
            b"{}".to_vec(),
        )));
        assert_eq!(
            route(&publish),
            Routed::Forward(RemoteMessage {
                topic: "to/device/porch".into(),
                payload: b"{}".to_vec(),
            })
        );
        assert_eq!(route(&Event::Incoming(Packet::PingResp)), Routed::Ignore);
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let transport = MqttTransport::new(&DeviceConfig::default(), &NetworkConfig::default());
        transport.connect().await.expect("first connect");
        assert!(transport.connect().await.is_err());
    }
}
