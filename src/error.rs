use mac_address::MacAddress;
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::{Command, ProtocolError};

/// Failures talking to the mower over BLE.
#[derive(Debug, Error)]
pub enum MowerError {
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("mower is not connected")]
    NotConnected,

    #[error("mower does not expose {0}")]
    MissingGatt(Uuid),

    #[error("timed out waiting for a response to {0:?}")]
    Timeout(Command),

    #[error("mower rejected {command:?} with status {status}")]
    Rejected { command: Command, status: u8 },
}

impl MowerError {
    /// Whether the session can no longer be trusted and must be reopened.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            MowerError::Ble(_) | MowerError::NotConnected | MowerError::Timeout(_)
        )
    }
}

/// Why a poll cycle produced no snapshot.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("can't find device")]
    DeviceNotFound,

    #[error("failed to connect")]
    ConnectFailed,

    #[error("device returned no {0}")]
    MissingValue(&'static str),

    #[error("error getting data from device: {0}")]
    Communication(#[from] MowerError),
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("mower {0} not found")]
    DeviceNotFound(MacAddress),

    #[error("could not connect to mower {0}")]
    ConnectFailed(MacAddress),

    #[error(transparent)]
    Mower(#[from] MowerError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}
