//! In-memory stand-ins for the BLE session and discovery layer.

use std::cell::{Cell, RefCell};

use mac_address::MacAddress;

use crate::activity::LawnMowerActivity;
use crate::coordinator::Coordinator;
use crate::entity::{BatterySensor, DeviceInfo, LawnMower};
use crate::error::{MowerError, PublishError};
use crate::mower::MowerClient;
use crate::mqtt::Publisher;
use crate::protocol::{Command, MowerActivity, MowerState};
use crate::scanner::DeviceLocator;

pub const MODEL: &str = "Automower 5.2";
pub const CHANNEL_ID: u32 = 1197489078;

pub fn address() -> MacAddress {
    MacAddress::new([0x60, 0x98, 0x66, 0x0A, 0x1B, 0x2C])
}

pub fn coordinator(mower: FakeMower, locator: FakeLocator) -> Coordinator<FakeMower, FakeLocator> {
    Coordinator::new(
        mower,
        locator,
        address(),
        MODEL.to_string(),
        DeviceInfo::new(address(), CHANNEL_ID, MODEL),
    )
}

/// Scripted mower that reacts to commands the way the real one reports back.
#[derive(Debug)]
pub struct FakeMower {
    pub connected: bool,
    pub connect_succeeds: bool,
    pub fail_reads: bool,
    /// The session drops on its own right after this read answers.
    pub link_drops_after: Option<Command>,
    pub battery_level: Option<u8>,
    pub activity: Option<MowerActivity>,
    pub state: Option<MowerState>,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
    pub reads: Vec<Command>,
    pub commands: Vec<Command>,
}

impl FakeMower {
    pub fn mowing() -> Self {
        FakeMower {
            connected: true,
            connect_succeeds: true,
            fail_reads: false,
            link_drops_after: None,
            battery_level: Some(80),
            activity: Some(MowerActivity::Mowing),
            state: Some(MowerState::InOperation),
            connect_calls: 0,
            disconnect_calls: 0,
            reads: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn docked() -> Self {
        FakeMower {
            activity: Some(MowerActivity::Charging),
            ..FakeMower::mowing()
        }
    }

    fn read<T>(&mut self, command: Command, value: Option<T>) -> Result<Option<T>, MowerError> {
        self.reads.push(command);
        if !self.connected {
            return Err(MowerError::NotConnected);
        }
        if self.fail_reads {
            return Err(MowerError::Timeout(command));
        }
        if self.link_drops_after == Some(command) {
            self.connected = false;
        }
        Ok(value)
    }

    fn command(&mut self, command: Command) -> Result<(), MowerError> {
        if !self.connected {
            return Err(MowerError::NotConnected);
        }
        self.commands.push(command);
        Ok(())
    }
}

impl MowerClient for FakeMower {
    type Device = ();

    async fn connect(&mut self, _device: ()) -> Result<bool, MowerError> {
        self.connect_calls += 1;
        self.connected = self.connect_succeeds;
        Ok(self.connect_succeeds)
    }

    async fn disconnect(&mut self) -> Result<(), MowerError> {
        self.disconnect_calls += 1;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn get_model(&mut self) -> Result<String, MowerError> {
        Ok(MODEL.to_string())
    }

    async fn battery_level(&mut self) -> Result<Option<u8>, MowerError> {
        self.read(Command::GetBatteryLevel, self.battery_level)
    }

    async fn mower_activity(&mut self) -> Result<Option<MowerActivity>, MowerError> {
        self.read(Command::GetActivity, self.activity)
    }

    async fn mower_state(&mut self) -> Result<Option<MowerState>, MowerError> {
        self.read(Command::GetState, self.state)
    }

    async fn mower_resume(&mut self) -> Result<(), MowerError> {
        self.command(Command::Resume)?;
        self.state = Some(MowerState::InOperation);
        Ok(())
    }

    async fn mower_pause(&mut self) -> Result<(), MowerError> {
        self.command(Command::Pause)?;
        self.state = Some(MowerState::Paused);
        Ok(())
    }

    async fn mower_park(&mut self) -> Result<(), MowerError> {
        self.command(Command::Park)?;
        self.state = Some(MowerState::InOperation);
        self.activity = Some(MowerActivity::GoingHome);
        Ok(())
    }

    async fn mower_override(&mut self) -> Result<(), MowerError> {
        self.command(Command::Override)?;
        self.activity = Some(MowerActivity::GoingOut);
        Ok(())
    }
}

/// Discovery layer that either always or never finds the mower.
#[derive(Debug, Default)]
pub struct FakeLocator {
    present: bool,
    pub lookups: Cell<usize>,
}

impl FakeLocator {
    pub fn present() -> Self {
        FakeLocator {
            present: true,
            lookups: Cell::new(0),
        }
    }

    pub fn absent() -> Self {
        FakeLocator::default()
    }
}

impl DeviceLocator for FakeLocator {
    type Device = ();

    async fn locate(&self, _address: MacAddress) -> Option<()> {
        self.lookups.set(self.lookups.get() + 1);
        self.present.then_some(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Discovery { mower: String, battery: String },
    Availability(bool),
    State {
        available: bool,
        activity: Option<LawnMowerActivity>,
        battery_level: Option<u8>,
    },
}

/// Publisher that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: RefCell<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn take(&self) -> Vec<Published> {
        self.published.take()
    }

    fn record(&self, published: Published) -> Result<(), PublishError> {
        self.published.borrow_mut().push(published);
        Ok(())
    }
}

impl Publisher for RecordingPublisher {
    fn publish_discovery(
        &self,
        mower: &LawnMower,
        battery: &BatterySensor,
    ) -> Result<(), PublishError> {
        self.record(Published::Discovery {
            mower: mower.base().unique_id().to_string(),
            battery: battery.base().unique_id().to_string(),
        })
    }

    fn publish_availability(&self, available: bool) -> Result<(), PublishError> {
        self.record(Published::Availability(available))
    }

    fn publish_state(
        &self,
        available: bool,
        activity: Option<LawnMowerActivity>,
        battery_level: Option<u8>,
    ) -> Result<(), PublishError> {
        self.record(Published::State {
            available,
            activity,
            battery_level,
        })
    }
}
