use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{LastWill, MqttOptions, QoS, SubscribeFilter};
use serde_derive::Serialize;
use tokio::sync::mpsc;

use crate::activity::LawnMowerActivity;
use crate::config;
use crate::entity::{BatterySensor, DeviceInfo, LawnMower};
use crate::error::PublishError;
use crate::messages::{BridgeMessage, MowerCommand};

const PAYLOAD_ONLINE: &str = "online";
const PAYLOAD_OFFLINE: &str = "offline";
/// What Home Assistant's MQTT platforms read as "no value".
const PAYLOAD_NONE: &str = "None";

/// Every topic the bridge publishes to or listens on for one mower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub availability: String,
    pub activity: String,
    pub battery: String,
    pub start: String,
    pub pause: String,
    pub dock: String,
    pub lawn_mower_config: String,
    pub battery_config: String,
    pub homeassistant_status: String,
}

impl Topics {
    pub fn new(topic_path: &str, discovery_prefix: &str, unique_id: &str) -> Self {
        let object_id = sanitize_name(unique_id);
        let base = format!("{topic_path}/{object_id}");
        Topics {
            availability: format!("{base}/availability"),
            activity: format!("{base}/activity"),
            battery: format!("{base}/battery"),
            start: format!("{base}/start"),
            pause: format!("{base}/pause"),
            dock: format!("{base}/dock"),
            lawn_mower_config: format!("{discovery_prefix}/lawn_mower/{object_id}/config"),
            battery_config: format!("{discovery_prefix}/sensor/{object_id}_battery/config"),
            homeassistant_status: format!("{discovery_prefix}/status"),
        }
    }

    /// Maps an incoming publish to a message for the manager.
    pub fn route(&self, topic: &str, payload: &[u8]) -> Option<BridgeMessage> {
        match topic {
            t if t == self.start => Some(BridgeMessage::Command(MowerCommand::StartMowing)),
            t if t == self.pause => Some(BridgeMessage::Command(MowerCommand::Pause)),
            t if t == self.dock => Some(BridgeMessage::Command(MowerCommand::Dock)),
            t if t == self.homeassistant_status && payload == PAYLOAD_ONLINE.as_bytes() => {
                Some(BridgeMessage::HomeAssistantOnline)
            }
            _ => None,
        }
    }

    /// Retained messages for one state update, availability first.
    pub fn state_messages(
        &self,
        available: bool,
        activity: Option<LawnMowerActivity>,
        battery_level: Option<u8>,
    ) -> [(&str, String); 3] {
        [
            (self.availability.as_str(), availability_payload(available).to_string()),
            (self.activity.as_str(), activity_payload(activity).to_string()),
            (self.battery.as_str(), battery_payload(battery_level)),
        ]
    }
}

#[derive(Debug, Serialize)]
struct LawnMowerDiscovery<'a> {
    name: &'a str,
    unique_id: &'a str,
    device: &'a DeviceInfo,
    availability_topic: &'a str,
    activity_state_topic: &'a str,
    start_mowing_command_topic: &'a str,
    pause_command_topic: &'a str,
    dock_command_topic: &'a str,
}

#[derive(Debug, Serialize)]
struct SensorDiscovery<'a> {
    name: &'a str,
    unique_id: &'a str,
    device: &'a DeviceInfo,
    availability_topic: &'a str,
    state_topic: &'a str,
    device_class: &'static str,
    state_class: &'static str,
    unit_of_measurement: &'static str,
}

fn lawn_mower_discovery<'a>(mower: &'a LawnMower, topics: &'a Topics) -> LawnMowerDiscovery<'a> {
    LawnMowerDiscovery {
        name: mower.base().name(),
        unique_id: mower.base().unique_id(),
        device: mower.base().device_info(),
        availability_topic: &topics.availability,
        activity_state_topic: &topics.activity,
        start_mowing_command_topic: &topics.start,
        pause_command_topic: &topics.pause,
        dock_command_topic: &topics.dock,
    }
}

fn battery_discovery<'a>(battery: &'a BatterySensor, topics: &'a Topics) -> SensorDiscovery<'a> {
    SensorDiscovery {
        name: battery.base().name(),
        unique_id: battery.base().unique_id(),
        device: battery.base().device_info(),
        availability_topic: &topics.availability,
        state_topic: &topics.battery,
        device_class: "battery",
        state_class: "measurement",
        unit_of_measurement: "%",
    }
}

fn availability_payload(available: bool) -> &'static str {
    if available { PAYLOAD_ONLINE } else { PAYLOAD_OFFLINE }
}

fn activity_payload(activity: Option<LawnMowerActivity>) -> &'static str {
    activity.map_or(PAYLOAD_NONE, LawnMowerActivity::as_str)
}

fn battery_payload(battery_level: Option<u8>) -> String {
    battery_level.map_or_else(|| PAYLOAD_NONE.to_string(), |level| level.to_string())
}

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    topics: Topics,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig, topics: Topics) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "automower-ble-rs".to_string());

        let mut mqttoptions =
            MqttOptions::new(publisher_id, config.host.clone(), config.port.unwrap_or(1883));

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));
        mqttoptions.set_last_will(LastWill::new(
            topics.availability.clone(),
            PAYLOAD_OFFLINE,
            QoS::AtLeastOnce,
            true,
        ));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (MqttClient { client, topics }, eventloop)
    }

    /// Queued without waiting, since it runs inside the event loop task that
    /// drains the request queue.
    pub fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .try_subscribe_many(vec![
                SubscribeFilter::new(self.topics.start.clone(), QoS::AtLeastOnce),
                SubscribeFilter::new(self.topics.pause.clone(), QoS::AtLeastOnce),
                SubscribeFilter::new(self.topics.dock.clone(), QoS::AtLeastOnce),
                SubscribeFilter::new(self.topics.homeassistant_status.clone(), QoS::AtMostOnce),
            ])
    }

    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: mpsc::Sender<BridgeMessage>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        let Some(message) = self.topics.route(&p.topic, &p.payload) else {
                            continue;
                        };
                        if tx.send(message).await.is_err() {
                            debug!("Manager gone, stopping MQTT event loop");
                            return;
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe() {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Stops the connection once queued publishes are flushed.
    pub fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.try_disconnect()
    }

    fn publish(&self, topic: &str, qos: QoS, payload: String) -> Result<(), PublishError> {
        self.client.try_publish(topic, qos, true, payload)?;
        Ok(())
    }
}

/// Sink for discovery configs and entity state.
///
/// Publishing never waits on the broker; a message that can't be queued is
/// reported as an error and superseded by the next update.
pub trait Publisher {
    fn publish_discovery(
        &self,
        mower: &LawnMower,
        battery: &BatterySensor,
    ) -> Result<(), PublishError>;

    fn publish_availability(&self, available: bool) -> Result<(), PublishError>;

    fn publish_state(
        &self,
        available: bool,
        activity: Option<LawnMowerActivity>,
        battery_level: Option<u8>,
    ) -> Result<(), PublishError>;
}

impl Publisher for MqttClient {
    fn publish_discovery(
        &self,
        mower: &LawnMower,
        battery: &BatterySensor,
    ) -> Result<(), PublishError> {
        info!("Announcing {} on MQTT", mower.base().unique_id());
        let mower_config = serde_json::to_string(&lawn_mower_discovery(mower, &self.topics))?;
        let battery_config = serde_json::to_string(&battery_discovery(battery, &self.topics))?;

        self.publish(&self.topics.lawn_mower_config, QoS::AtLeastOnce, mower_config)?;
        self.publish(&self.topics.battery_config, QoS::AtLeastOnce, battery_config)
    }

    fn publish_availability(&self, available: bool) -> Result<(), PublishError> {
        self.publish(
            &self.topics.availability,
            QoS::AtLeastOnce,
            availability_payload(available).to_string(),
        )
    }

    fn publish_state(
        &self,
        available: bool,
        activity: Option<LawnMowerActivity>,
        battery_level: Option<u8>,
    ) -> Result<(), PublishError> {
        debug!(
            "Publishing state: available={} activity={:?} battery={:?}",
            available, activity, battery_level
        );
        for (topic, payload) in self.topics.state_messages(available, activity, battery_level) {
            self.publish(topic, QoS::AtLeastOnce, payload)?;
        }
        Ok(())
    }
}

fn sanitize_name(name: &str) -> String {
    // Remove any non-alphanumeric characters and replace spaces with underscores
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}
