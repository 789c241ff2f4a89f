use std::time::Duration;

use btleplug::api::{BDAddr, Central as _, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt as _;
use log::{debug, info, warn};
use mac_address::MacAddress;

/// Resolves a mower address to something a [`crate::mower::MowerClient`] can connect to.
pub trait DeviceLocator {
    type Device;

    async fn locate(&self, address: MacAddress) -> Option<Self::Device>;
}

pub struct BleScanner {
    adapter: Adapter,
    scan_timeout: Duration,
}

pub fn to_bdaddr(address: MacAddress) -> BDAddr {
    BDAddr::from(address.bytes())
}

impl BleScanner {
    pub fn new(adapter: Adapter, scan_timeout: Duration) -> Self {
        BleScanner {
            adapter,
            scan_timeout,
        }
    }

    async fn cached(&self, target: BDAddr) -> Result<Option<Peripheral>, btleplug::Error> {
        Ok(self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address() == target))
    }

    async fn active_scan(&self, target: BDAddr) -> Result<Option<Peripheral>, btleplug::Error> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let found = tokio::time::timeout(self.scan_timeout, async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) = event {
                    let peripheral = self.adapter.peripheral(&id).await?;
                    if peripheral.address() == target {
                        return Ok(Some(peripheral));
                    }
                }
            }
            Ok::<_, btleplug::Error>(None)
        })
        .await
        .unwrap_or(Ok(None));

        if let Err(err) = self.adapter.stop_scan().await {
            debug!("Error stopping scan: {:?}", err);
        }
        found
    }
}

impl DeviceLocator for BleScanner {
    type Device = Peripheral;

    async fn locate(&self, address: MacAddress) -> Option<Peripheral> {
        let target = to_bdaddr(address);

        match self.cached(target).await {
            Ok(Some(peripheral)) => return Some(peripheral),
            Ok(None) => {}
            Err(err) => warn!("Error reading peripheral cache: {:?}", err),
        }

        info!("{} not cached, scanning for up to {:?}", address, self.scan_timeout);
        match self.active_scan(target).await {
            Ok(found) => found,
            Err(err) => {
                warn!("Error scanning for {}: {:?}", address, err);
                None
            }
        }
    }
}
