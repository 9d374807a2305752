//! # MQTT Sink
//!
//! Publishes every display value to `<prefix><topic>` and the net active
//! power to `<prefix>Wirkleistunggesamt`, QoS 1. Each publish waits at most
//! two seconds for the PUBACK carrying its own packet id. A cycle counts as a
//! success on the message-bus channel only when every value was confirmed.
//!
//! The `rumqttc` event loop runs in its own task and reconnects on its own;
//! while the broker is unreachable publishes fail immediately.

use super::Sink;
use crate::constants::{
    MQTT_CLIENT_ID, MQTT_KEEP_ALIVE, MQTT_RECONNECT_DELAY, NET_POWER_NAME, PUBLISH_CONFIRM_TIMEOUT,
};
use crate::instrumentation::metrics::SinkChannel;
use crate::registry::MeasurementRegistry;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSinkConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prepended to every topic
    pub prefix: String,
}

/// MQTT publisher bound to the message-bus channel.
pub struct MqttSink {
    client: AsyncClient,
    prefix: String,
    connected: Arc<AtomicBool>,
    deliveries: DeliveryTracker,
    event_loop: JoinHandle<()>,
}

impl MqttSink {
    /// Start the client; must be called inside a tokio runtime.
    pub fn connect(config: MqttSinkConfig) -> Self {
        let mut options = MqttOptions::new(MQTT_CLIENT_ID, config.host.clone(), config.port);
        options.set_keep_alive(MQTT_KEEP_ALIVE);
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, 16);
        let connected = Arc::new(AtomicBool::new(false));
        let (delivery_tx, deliveries) = mpsc::unbounded_channel();
        let event_loop = tokio::spawn(drive(event_loop, Arc::clone(&connected), delivery_tx));
        info!("MQTT client started for {}:{}", config.host, config.port);

        Self {
            client,
            prefix: config.prefix,
            connected,
            deliveries: DeliveryTracker::new(deliveries),
            event_loop,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_value(&mut self, topic: &str, payload: String) -> bool {
        if !self.is_connected() {
            error!("Failed to queue publish to {}: not connected to broker", topic);
            return false;
        }

        if let Err(e) = self.client.publish(topic, QoS::AtLeastOnce, false, payload).await {
            error!("Failed to queue publish to {}: {}", topic, e);
            return false;
        }
        self.deliveries.queued();

        match timeout(PUBLISH_CONFIRM_TIMEOUT, self.deliveries.confirmation()).await {
            Ok(Some(pkid)) => {
                debug!("Published {} (pkid {})", topic, pkid);
                true
            }
            Ok(None) => {
                error!("Failed to publish to {}: MQTT event loop stopped", topic);
                false
            }
            Err(_) => {
                error!("Failed to publish to {} (Timeout or Broker rejected)", topic);
                false
            }
        }
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait::async_trait]
impl Sink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn channel(&self) -> Option<SinkChannel> {
        Some(SinkChannel::MessageBus)
    }

    async fn publish(&mut self, registry: &MeasurementRegistry) -> bool {
        let mut all_published = true;
        for (topic, payload) in messages(&self.prefix, registry) {
            if !self.publish_value(&topic, payload).await {
                all_published = false;
            }
        }
        all_published
    }
}

/// Topic and payload of every message of one cycle, net power last.
pub fn messages(prefix: &str, registry: &MeasurementRegistry) -> Vec<(String, String)> {
    let mut messages: Vec<(String, String)> = registry
        .iter()
        .map(|entry| (format!("{}{}", prefix, entry.topic()), entry.display().to_string()))
        .collect();
    messages.push((
        format!("{}{}", prefix, NET_POWER_NAME),
        registry.net_active_power().to_string(),
    ));
    messages
}

/// Delivery progress of QoS 1 publishes, as seen by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// PUBLISH written to the broker under this packet id
    Sent(u16),
    /// PUBACK received for this packet id
    Acked(u16),
}

/// Pairs the publish queued last with its own PUBACK.
///
/// The event loop writes publishes in the order they were queued, so the
/// n-th `Sent` after a publish was queued with n publishes still unsent
/// carries its packet id. Acknowledgements of earlier publishes that timed
/// out are skipped.
struct DeliveryTracker {
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    unsent: usize,
}

impl DeliveryTracker {
    fn new(deliveries: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            deliveries,
            unsent: 0,
        }
    }

    /// Record a publish handed to the client.
    fn queued(&mut self) {
        self.unsent += 1;
    }

    /// Wait for the PUBACK of the publish queued last and return its packet id.
    ///
    /// `None` when the event loop stopped.
    async fn confirmation(&mut self) -> Option<u16> {
        let mut own = None;
        while let Some(delivery) = self.deliveries.recv().await {
            match delivery {
                Delivery::Sent(pkid) => {
                    self.unsent = self.unsent.saturating_sub(1);
                    if self.unsent == 0 {
                        own = Some(pkid);
                    }
                }
                Delivery::Acked(pkid) if own == Some(pkid) => return Some(pkid),
                Delivery::Acked(pkid) => debug!("Ignoring late PUBACK (pkid {})", pkid),
            }
        }
        None
    }
}

/// Polls the event loop, tracking the connection and forwarding deliveries.
async fn drive(
    mut event_loop: EventLoop,
    connected: Arc<AtomicBool>,
    deliveries: mpsc::UnboundedSender<Delivery>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT Broker");
                connected.store(true, Ordering::SeqCst);
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                if deliveries.send(Delivery::Sent(pkid)).is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                if deliveries.send(Delivery::Acked(ack.pkid)).is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                info!("Disconnected from MQTT Broker");
                connected.store(false, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                error!("MQTT Connection refused: {:?}", code);
                connected.store(false, Ordering::SeqCst);
                sleep(MQTT_RECONNECT_DELAY).await;
            }
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    warn!("Unexpected disconnection from MQTT Broker: {}", e);
                } else {
                    debug!("MQTT broker not reachable: {}", e);
                }
                sleep(MQTT_RECONNECT_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_messages_follow_registry_order() {
        let mut registry = MeasurementRegistry::new();
        registry.set(&"0100010700FF".parse().unwrap(), 1500);
        registry.set(&"0100020700FF".parse().unwrap(), 200);

        let messages = messages("smartmeter/", &registry);

        assert_eq!(messages.len(), registry.len() + 1);
        assert_eq!(messages[0].0, "smartmeter/WirkenergieBezug");
        assert_eq!(messages[2], ("smartmeter/WirkleistungBezug".to_string(), "1500".to_string()));
        assert_eq!(
            messages.last().unwrap(),
            &("smartmeter/Wirkleistunggesamt".to_string(), "1300".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_fast() {
        let mut sink = MqttSink::connect(MqttSinkConfig {
            host: "127.0.0.1".into(),
            port: 1,
            username: None,
            password: None,
            prefix: "test/".into(),
        });

        assert!(!sink.publish(&MeasurementRegistry::new()).await);
        assert_eq!(sink.channel(), Some(SinkChannel::MessageBus));
    }

    #[tokio::test]
    async fn test_ack_of_matching_pkid_confirms() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tracker = DeliveryTracker::new(rx);

        tracker.queued();
        tx.send(Delivery::Sent(7)).unwrap();
        tx.send(Delivery::Acked(7)).unwrap();

        assert_eq!(tracker.confirmation().await, Some(7));
    }

    #[tokio::test]
    async fn test_stale_ack_does_not_confirm() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tracker = DeliveryTracker::new(rx);

        // First publish times out before its PUBACK arrives
        tracker.queued();
        tx.send(Delivery::Sent(1)).unwrap();
        assert!(timeout(Duration::from_millis(10), tracker.confirmation()).await.is_err());

        tracker.queued();
        tx.send(Delivery::Acked(1)).unwrap();
        tx.send(Delivery::Sent(2)).unwrap();
        drop(tx);

        assert_eq!(tracker.confirmation().await, None);
    }

    #[tokio::test]
    async fn test_late_ack_is_skipped_until_own_arrives() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tracker = DeliveryTracker::new(rx);

        // Two publishes queued before the event loop wrote either of them
        tracker.queued();
        tracker.queued();
        for delivery in [
            Delivery::Sent(1),
            Delivery::Sent(2),
            Delivery::Acked(1),
            Delivery::Acked(2),
        ] {
            tx.send(delivery).unwrap();
        }

        assert_eq!(tracker.confirmation().await, Some(2));
    }
}
