//! The lawn mower and battery entities published to Home Assistant.

use log::debug;
use mac_address::MacAddress;
use serde_derive::Serialize;

use crate::activity::{LawnMowerActivity, map_activity};
use crate::coordinator::{Coordinator, Snapshot};
use crate::error::MowerError;
use crate::mower::MowerClient;
use crate::scanner::DeviceLocator;

pub const DOMAIN: &str = "husqvarna_automower_ble";
pub const MANUFACTURER: &str = "Husqvarna";

/// Device registry block shared by every entity of one mower.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
}

impl DeviceInfo {
    pub fn new(address: MacAddress, channel_id: u32, model: &str) -> Self {
        DeviceInfo {
            identifiers: vec![format!("{DOMAIN}_{address}{channel_id}")],
            manufacturer: MANUFACTURER.to_string(),
            model: model.to_string(),
            name: model.to_string(),
        }
    }
}

/// Identity and availability shared by both entities.
#[derive(Debug, Clone)]
pub struct EntityBase {
    unique_id: String,
    name: String,
    device_info: DeviceInfo,
}

impl EntityBase {
    fn new(unique_id: String, name: &str, device_info: &DeviceInfo) -> Self {
        EntityBase {
            unique_id,
            name: name.to_string(),
            device_info: device_info.clone(),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Entities are only available while the BLE session is up.
    pub fn is_available<C: MowerClient, L>(&self, coordinator: &Coordinator<C, L>) -> bool {
        coordinator.is_connected()
    }
}

fn current_activity(snapshot: Option<&Snapshot>) -> Option<LawnMowerActivity> {
    snapshot.and_then(|s| map_activity(Some(s.state), Some(s.activity)))
}

pub struct LawnMower {
    base: EntityBase,
    activity: Option<LawnMowerActivity>,
}

impl LawnMower {
    pub fn new<C: MowerClient, L>(coordinator: &Coordinator<C, L>) -> Self {
        let unique_id = format!("automower{}_{}", coordinator.model(), coordinator.address());
        LawnMower {
            base: EntityBase::new(unique_id, coordinator.model(), coordinator.device_info()),
            activity: Some(LawnMowerActivity::Error),
        }
    }

    pub fn base(&self) -> &EntityBase {
        &self.base
    }

    pub fn activity(&self) -> Option<LawnMowerActivity> {
        self.activity
    }

    pub fn handle_coordinator_update(&mut self, snapshot: Option<&Snapshot>) {
        debug!("LawnMower: handle_coordinator_update");
        self.activity = current_activity(snapshot);
    }

    /// Resumes mowing, overriding the schedule when sitting in the dock.
    ///
    /// Returns `Ok(false)` without touching the mower when it can't be reached.
    pub async fn start_mowing<C, L>(
        &mut self,
        coordinator: &mut Coordinator<C, L>,
    ) -> Result<bool, MowerError>
    where
        C: MowerClient,
        L: DeviceLocator<Device = C::Device>,
    {
        debug!("Starting mower");
        if !coordinator.ensure_connected().await {
            return Ok(false);
        }

        coordinator.client_mut().mower_resume().await?;
        if self.activity == Some(LawnMowerActivity::Docked) {
            coordinator.client_mut().mower_override().await?;
        }
        self.refresh_after_command(coordinator).await;
        Ok(true)
    }

    pub async fn pause<C, L>(&mut self, coordinator: &mut Coordinator<C, L>) -> Result<bool, MowerError>
    where
        C: MowerClient,
        L: DeviceLocator<Device = C::Device>,
    {
        debug!("Pausing mower");
        if !coordinator.ensure_connected().await {
            return Ok(false);
        }

        coordinator.client_mut().mower_pause().await?;
        self.refresh_after_command(coordinator).await;
        Ok(true)
    }

    pub async fn dock<C, L>(&mut self, coordinator: &mut Coordinator<C, L>) -> Result<bool, MowerError>
    where
        C: MowerClient,
        L: DeviceLocator<Device = C::Device>,
    {
        debug!("Start docking");
        if !coordinator.ensure_connected().await {
            return Ok(false);
        }

        coordinator.client_mut().mower_park().await?;
        self.refresh_after_command(coordinator).await;
        Ok(true)
    }

    async fn refresh_after_command<C, L>(&mut self, coordinator: &mut Coordinator<C, L>)
    where
        C: MowerClient,
        L: DeviceLocator<Device = C::Device>,
    {
        coordinator.request_refresh().await;
        self.activity = current_activity(coordinator.data());
    }
}

pub struct BatterySensor {
    base: EntityBase,
    native_value: Option<u8>,
}

impl BatterySensor {
    pub fn new(lawn_mower: &LawnMower) -> Self {
        let unique_id = format!("{}_battery_level", lawn_mower.base().unique_id());
        BatterySensor {
            base: EntityBase::new(unique_id, "Battery Level", lawn_mower.base().device_info()),
            native_value: None,
        }
    }

    pub fn base(&self) -> &EntityBase {
        &self.base
    }

    pub fn native_value(&self) -> Option<u8> {
        self.native_value
    }

    pub fn handle_coordinator_update(&mut self, snapshot: Option<&Snapshot>) {
        debug!("BatterySensor: handle_coordinator_update");
        self.native_value = snapshot.map(|s| s.battery_level);
    }
}
