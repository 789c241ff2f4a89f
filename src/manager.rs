use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config;
use crate::coordinator::Coordinator;
use crate::entity::{BatterySensor, LawnMower};
use crate::error::PublishError;
use crate::messages::{BridgeMessage, MowerCommand};
use crate::mower::MowerClient;
use crate::mqtt::{MqttClient, Publisher, Topics};
use crate::scanner::DeviceLocator;

/// Owns the coordinator and both entities and drives them from one task.
pub struct Manager<C, L, P = MqttClient> {
    coordinator: Coordinator<C, L>,
    lawn_mower: LawnMower,
    battery: BatterySensor,
    publisher: P,
}

impl<C, L> Manager<C, L>
where
    C: MowerClient,
    L: DeviceLocator<Device = C::Device>,
{
    pub fn new(
        coordinator: Coordinator<C, L>,
        mqtt_config: &config::MqttConfig,
    ) -> (Self, rumqttc::EventLoop) {
        let lawn_mower = LawnMower::new(&coordinator);
        let topics = Topics::new(
            mqtt_config.topic_path.as_deref().unwrap_or("automower"),
            mqtt_config
                .discovery_prefix
                .as_deref()
                .unwrap_or("homeassistant"),
            lawn_mower.base().unique_id(),
        );
        let (mqtt_client, eventloop) = MqttClient::new(mqtt_config, topics);

        (Manager::with_publisher(coordinator, mqtt_client), eventloop)
    }

    pub async fn run_loop(mut self, mut mqtt_event_loop: rumqttc::EventLoop) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(10);

        // Handle incoming MQTT messages (commands, Home Assistant restarts)
        let mqtt_client = self.publisher.clone();
        tokio::task::spawn(async move {
            mqtt_client.event_loop(&mut mqtt_event_loop, tx).await;
        });

        self.announce();
        self.refresh().await;

        let mut ticker = tokio::time::interval(self.coordinator.update_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately and the initial refresh already ran
        ticker.tick().await;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh().await,
                message = rx.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => {
                        warn!("MQTT event loop stopped");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
            }
        }

        self.shutdown().await?;
        self.publisher.disconnect()?;
        info!("Exiting manager event loop");

        Ok(())
    }
}

impl<C, L, P> Manager<C, L, P>
where
    C: MowerClient,
    L: DeviceLocator<Device = C::Device>,
    P: Publisher,
{
    pub fn with_publisher(coordinator: Coordinator<C, L>, publisher: P) -> Self {
        let lawn_mower = LawnMower::new(&coordinator);
        let battery = BatterySensor::new(&lawn_mower);
        Manager {
            coordinator,
            lawn_mower,
            battery,
            publisher,
        }
    }

    pub async fn handle_message(&mut self, message: BridgeMessage) {
        match message {
            BridgeMessage::Command(command) => self.handle_command(command).await,
            BridgeMessage::HomeAssistantOnline => {
                info!("Home Assistant came online, re-announcing");
                self.announce();
                self.publish_states();
            }
        }
    }

    fn announce(&self) {
        if let Err(err) = self
            .publisher
            .publish_discovery(&self.lawn_mower, &self.battery)
        {
            error!("Error publishing discovery configs: {}", err);
        }
    }

    async fn refresh(&mut self) {
        if let Err(err) = self.coordinator.refresh().await {
            debug!("Poll cycle failed: {}", err);
        }
        self.lawn_mower
            .handle_coordinator_update(self.coordinator.data());
        self.battery.handle_coordinator_update(self.coordinator.data());
        self.publish_states();
    }

    async fn handle_command(&mut self, command: MowerCommand) {
        let result = match command {
            MowerCommand::StartMowing => self.lawn_mower.start_mowing(&mut self.coordinator).await,
            MowerCommand::Pause => self.lawn_mower.pause(&mut self.coordinator).await,
            MowerCommand::Dock => self.lawn_mower.dock(&mut self.coordinator).await,
        };
        match result {
            Ok(true) => {}
            Ok(false) => debug!("{:?} skipped, mower unreachable", command),
            Err(err) => error!("{:?} failed: {}", command, err),
        }

        self.battery.handle_coordinator_update(self.coordinator.data());
        self.publish_states();
    }

    fn publish_states(&self) {
        let available = self.lawn_mower.base().is_available(&self.coordinator);
        if let Err(err) = self.publisher.publish_state(
            available,
            self.lawn_mower.activity(),
            self.battery.native_value(),
        ) {
            error!("Error publishing state: {}", err);
        }
    }

    /// Closes the BLE session and marks both entities offline.
    async fn shutdown(&mut self) -> Result<(), PublishError> {
        self.coordinator.shutdown().await;
        self.publisher.publish_availability(false)
    }
}
