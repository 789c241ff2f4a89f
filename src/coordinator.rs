//! Polls the mower on a fixed interval and keeps the latest [`Snapshot`].
//!
//! Any failed read tears the session down and reconnects, so the next tick
//! starts from a fresh connection.

use std::time::Duration;

use log::{debug, error, info, warn};
use mac_address::MacAddress;

use crate::entity::DeviceInfo;
use crate::error::{SetupError, UpdateError};
use crate::mower::MowerClient;
use crate::protocol::{MowerActivity, MowerState};
use crate::scanner::DeviceLocator;

pub const SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// One poll cycle's worth of mower data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub battery_level: u8,
    pub activity: MowerActivity,
    pub state: MowerState,
}

pub struct Coordinator<C, L> {
    client: C,
    locator: L,
    address: MacAddress,
    model: String,
    device_info: DeviceInfo,
    update_interval: Duration,
    data: Option<Snapshot>,
    last_update_success: bool,
}

/// Connects to the mower and reads its model, ready for polling.
pub async fn setup_entry<C, L>(
    mut client: C,
    locator: L,
    address: MacAddress,
    channel_id: u32,
) -> Result<Coordinator<C, L>, SetupError>
where
    C: MowerClient,
    L: DeviceLocator<Device = C::Device>,
{
    debug!("connecting to {} with channel ID {}", address, channel_id);
    let device = locator
        .locate(address)
        .await
        .ok_or(SetupError::DeviceNotFound(address))?;
    if !client.connect(device).await? {
        return Err(SetupError::ConnectFailed(address));
    }
    debug!("connected and paired");

    let model = client.get_model().await?;
    info!("Connected to Automower: {}", model);

    let device_info = DeviceInfo::new(address, channel_id, &model);
    Ok(Coordinator::new(client, locator, address, model, device_info))
}

impl<C: MowerClient, L> Coordinator<C, L> {
    pub fn new(
        client: C,
        locator: L,
        address: MacAddress,
        model: String,
        device_info: DeviceInfo,
    ) -> Self {
        Coordinator {
            client,
            locator,
            address,
            model,
            device_info,
            update_interval: SCAN_INTERVAL,
            data: None,
            last_update_success: false,
        }
    }

    pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// The snapshot from the last successful cycle.
    pub fn data(&self) -> Option<&Snapshot> {
        self.data.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    #[cfg(test)]
    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C, L> Coordinator<C, L>
where
    C: MowerClient,
    L: DeviceLocator<Device = C::Device>,
{
    async fn find_device(&mut self) -> Result<(), UpdateError> {
        debug!("Trying to reconnect");
        let Some(device) = self.locator.locate(self.address).await else {
            error!("Can't find device {}", self.address);
            return Err(UpdateError::DeviceNotFound);
        };

        match self.client.connect(device).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(UpdateError::ConnectFailed),
            Err(err) => {
                warn!("Connecting to {} failed: {}", self.address, err);
                Err(UpdateError::ConnectFailed)
            }
        }
    }

    /// Connects if needed; `false` means the mower could not be reached.
    pub async fn ensure_connected(&mut self) -> bool {
        if self.client.is_connected() {
            return true;
        }
        match self.find_device().await {
            Ok(()) => true,
            Err(err) => {
                debug!("Mower unreachable: {}", err);
                false
            }
        }
    }

    async fn read_snapshot(&mut self) -> Result<Snapshot, UpdateError> {
        let battery_level = self
            .client
            .battery_level()
            .await?
            .ok_or(UpdateError::MissingValue("battery level"))?;
        debug!("battery level: {}", battery_level);

        let activity = self
            .client
            .mower_activity()
            .await?
            .ok_or(UpdateError::MissingValue("activity"))?;
        debug!("activity: {:?}", activity);

        let state = self
            .client
            .mower_state()
            .await?
            .ok_or(UpdateError::MissingValue("state"))?;
        debug!("state: {:?}", state);

        Ok(Snapshot {
            battery_level,
            activity,
            state,
        })
    }

    async fn update_data(&mut self) -> Result<Snapshot, UpdateError> {
        debug!("Polling device");

        if !self.client.is_connected() {
            self.find_device().await?;
        }

        let snapshot = match self.read_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!("Error getting data from device: {}", err);
                if let Err(reconnect) = self.find_device().await {
                    debug!("Reconnect failed: {}", reconnect);
                }
                return Err(err);
            }
        };

        // Parked sessions go stale; start fresh on the next cycle
        if snapshot.activity == MowerActivity::Parked && self.client.is_connected() {
            if let Err(err) = self.client.disconnect().await {
                warn!("Error disconnecting parked mower: {}", err);
            }
        }

        Ok(snapshot)
    }

    /// Runs one poll cycle. On failure the previous snapshot is kept.
    pub async fn refresh(&mut self) -> Result<(), UpdateError> {
        match self.update_data().await {
            Ok(snapshot) => {
                self.data = Some(snapshot);
                self.last_update_success = true;
                Ok(())
            }
            Err(err) => {
                if self.last_update_success {
                    error!("Error fetching mower data: {}", err);
                } else {
                    debug!("Error fetching mower data: {}", err);
                }
                self.last_update_success = false;
                Err(err)
            }
        }
    }

    /// Out-of-cycle refresh; the outcome is recorded, not returned.
    pub async fn request_refresh(&mut self) {
        let _ = self.refresh().await;
    }

    pub async fn shutdown(&mut self) {
        debug!("Shutdown");
        if self.client.is_connected() {
            if let Err(err) = self.client.disconnect().await {
                warn!("Error disconnecting on shutdown: {}", err);
            }
        }
    }
}
