use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{Characteristic, Peripheral as _, ValueNotification, WriteType};
use btleplug::platform::Peripheral;
use futures::{Stream, StreamExt as _};
use log::{debug, warn};
use uuid::Uuid;

use crate::error::MowerError;
use crate::protocol::{
    self, CHANNEL_NAME, Command, FrameAssembler, MTU, MowerActivity, MowerState,
    OVERRIDE_SECONDS, READ_CHARACTERISTIC, Response, SERVICE_UUID, WRITE_CHARACTERISTIC,
};

/// Operations the coordinator and entities need from a mower session.
///
/// Reads return `Ok(None)` when the mower answered without a usable value.
pub trait MowerClient {
    type Device;

    async fn connect(&mut self, device: Self::Device) -> Result<bool, MowerError>;
    async fn disconnect(&mut self) -> Result<(), MowerError>;
    fn is_connected(&self) -> bool;

    async fn get_model(&mut self) -> Result<String, MowerError>;
    async fn battery_level(&mut self) -> Result<Option<u8>, MowerError>;
    async fn mower_activity(&mut self) -> Result<Option<MowerActivity>, MowerError>;
    async fn mower_state(&mut self) -> Result<Option<MowerState>, MowerError>;

    async fn mower_resume(&mut self) -> Result<(), MowerError>;
    async fn mower_pause(&mut self) -> Result<(), MowerError>;
    async fn mower_park(&mut self) -> Result<(), MowerError>;
    async fn mower_override(&mut self) -> Result<(), MowerError>;
}

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// One request/response exchange channel to a connected mower.
pub trait Session {
    async fn exchange(
        &mut self,
        channel_id: u32,
        command: Command,
        data: &[u8],
        response_timeout: Duration,
    ) -> Result<Response, MowerError>;

    async fn close(&mut self) -> Result<(), MowerError>;
}

/// The GATT side of a [`Session`].
pub struct Link {
    peripheral: Peripheral,
    write: Characteristic,
    notifications: Notifications,
}

impl Session for Link {
    async fn exchange(
        &mut self,
        channel_id: u32,
        command: Command,
        data: &[u8],
        response_timeout: Duration,
    ) -> Result<Response, MowerError> {
        let request = protocol::encode_request(channel_id, command, data);
        for chunk in request.chunks(MTU) {
            self.peripheral
                .write(&self.write, chunk, WriteType::WithoutResponse)
                .await?;
        }

        let notifications = &mut self.notifications;
        let mut assembler = FrameAssembler::default();
        let frame = tokio::time::timeout(response_timeout, async {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != READ_CHARACTERISTIC {
                    continue;
                }
                if let Some(frame) = assembler.push(&notification.value) {
                    return Ok(frame);
                }
            }
            Err::<Vec<u8>, MowerError>(MowerError::NotConnected)
        })
        .await
        .map_err(|_| MowerError::Timeout(command))??;

        Ok(protocol::decode_response(&frame, channel_id, command)?)
    }

    async fn close(&mut self) -> Result<(), MowerError> {
        debug!("Disconnecting from {}", self.peripheral.address());
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// A BLE session with one Automower on a fixed channel id.
pub struct Mower<S = Link> {
    channel_id: u32,
    response_timeout: Duration,
    link: Option<S>,
}

impl Mower {
    pub fn new(channel_id: u32, response_timeout: Duration) -> Self {
        Mower {
            channel_id,
            response_timeout,
            link: None,
        }
    }
}

impl<S: Session> Mower<S> {
    async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(err) = link.close().await {
                debug!("Error closing mower session: {}", err);
            }
        }
    }

    async fn request(&mut self, command: Command, data: &[u8]) -> Result<Response, MowerError> {
        let link = self.link.as_mut().ok_or(MowerError::NotConnected)?;
        let result = link
            .exchange(self.channel_id, command, data, self.response_timeout)
            .await;
        if let Err(err) = &result {
            if err.is_session_lost() {
                debug!("Dropping mower session after {:?}: {}", command, err);
                self.close().await;
            }
        }
        result
    }

    async fn read_byte(&mut self, command: Command) -> Result<Option<u8>, MowerError> {
        let response = self.request(command, &[]).await?;
        if !response.is_ok() {
            debug!("{:?} answered with status {}", command, response.status);
            return Ok(None);
        }
        Ok(response.data.first().copied())
    }

    async fn send(&mut self, command: Command, data: &[u8]) -> Result<(), MowerError> {
        let response = self.request(command, data).await?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(MowerError::Rejected {
                command,
                status: response.status,
            })
        }
    }
}

impl MowerClient for Mower {
    type Device = Peripheral;

    async fn connect(&mut self, peripheral: Peripheral) -> Result<bool, MowerError> {
        self.close().await;

        if peripheral.is_connected().await? {
            debug!("Closing stale connection to {}", peripheral.address());
            peripheral.disconnect().await?;
        }

        if let Err(err) = peripheral.connect().await {
            warn!("Failed to connect to {}: {:?}", peripheral.address(), err);
            return Ok(false);
        }

        peripheral.discover_services().await?;
        if !peripheral.services().iter().any(|s| s.uuid == SERVICE_UUID) {
            peripheral.disconnect().await?;
            return Err(MowerError::MissingGatt(SERVICE_UUID));
        }

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or(MowerError::MissingGatt(uuid))
        };
        let write = find(WRITE_CHARACTERISTIC)?;
        let read = find(READ_CHARACTERISTIC)?;

        peripheral.subscribe(&read).await?;
        let notifications = peripheral.notifications().await?;
        self.link = Some(Link {
            peripheral,
            write,
            notifications,
        });

        match self.request(Command::OpenChannel, CHANNEL_NAME).await {
            Ok(response) if response.is_ok() => Ok(true),
            Ok(response) => {
                warn!("Mower refused channel {}: status {}", self.channel_id, response.status);
                self.close().await;
                Ok(false)
            }
            Err(err) => {
                warn!("Opening channel {} failed: {}", self.channel_id, err);
                self.close().await;
                Ok(false)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), MowerError> {
        match self.link.take() {
            Some(mut link) => link.close().await,
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// The model as reported by the mower, e.g. `"Automower 5.2"` for device
    /// type 5, variant 2. It ends up in entity unique ids and topic names.
    async fn get_model(&mut self) -> Result<String, MowerError> {
        let response = self.request(Command::GetModel, &[]).await?;
        match response.data.as_slice() {
            [device_type, variant, ..] if response.is_ok() => {
                Ok(protocol::model_name(*device_type, *variant))
            }
            _ => Err(MowerError::Rejected {
                command: Command::GetModel,
                status: response.status,
            }),
        }
    }

    async fn battery_level(&mut self) -> Result<Option<u8>, MowerError> {
        self.read_byte(Command::GetBatteryLevel).await
    }

    async fn mower_activity(&mut self) -> Result<Option<MowerActivity>, MowerError> {
        Ok(self
            .read_byte(Command::GetActivity)
            .await?
            .map(MowerActivity::from))
    }

    async fn mower_state(&mut self) -> Result<Option<MowerState>, MowerError> {
        Ok(self.read_byte(Command::GetState).await?.map(MowerState::from))
    }

    async fn mower_resume(&mut self) -> Result<(), MowerError> {
        self.send(Command::Resume, &[]).await
    }

    async fn mower_pause(&mut self) -> Result<(), MowerError> {
        self.send(Command::Pause, &[]).await
    }

    async fn mower_park(&mut self) -> Result<(), MowerError> {
        self.send(Command::Park, &[]).await
    }

    async fn mower_override(&mut self) -> Result<(), MowerError> {
        self.send(Command::Override, &OVERRIDE_SECONDS.to_le_bytes())
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::protocol::ProtocolError;

    /// Session answering from a script; an exhausted script times out.
    struct ScriptedSession {
        replies: VecDeque<Result<Response, MowerError>>,
        closed: bool,
    }

    impl Session for ScriptedSession {
        async fn exchange(
            &mut self,
            _channel_id: u32,
            command: Command,
            _data: &[u8],
            _response_timeout: Duration,
        ) -> Result<Response, MowerError> {
            self.replies
                .pop_front()
                .unwrap_or(Err(MowerError::Timeout(command)))
        }

        async fn close(&mut self) -> Result<(), MowerError> {
            self.closed = true;
            Ok(())
        }
    }

    fn mower(replies: Vec<Result<Response, MowerError>>) -> Mower<ScriptedSession> {
        Mower {
            channel_id: 1,
            response_timeout: Duration::from_secs(1),
            link: Some(ScriptedSession {
                replies: replies.into(),
                closed: false,
            }),
        }
    }

    fn ok(data: &[u8]) -> Result<Response, MowerError> {
        Ok(Response {
            status: 0,
            data: data.to_vec(),
        })
    }

    #[tokio::test]
    async fn test_read_keeps_session() {
        let mut mower = mower(vec![ok(&[64])]);

        assert_eq!(mower.read_byte(Command::GetBatteryLevel).await.unwrap(), Some(64));
        assert!(mower.link.is_some());
    }

    #[tokio::test]
    async fn test_closed_stream_drops_session() {
        let mut mower = mower(vec![Err(MowerError::NotConnected)]);

        let err = mower.read_byte(Command::GetState).await.unwrap_err();

        assert!(matches!(err, MowerError::NotConnected));
        assert!(mower.link.is_none());
    }

    #[tokio::test]
    async fn test_timeout_drops_session() {
        let mut mower = mower(vec![]);

        let err = mower.send(Command::Pause, &[]).await.unwrap_err();

        assert!(matches!(err, MowerError::Timeout(Command::Pause)));
        assert!(mower.link.is_none());
    }

    #[tokio::test]
    async fn test_rejection_keeps_session() {
        let mut mower = mower(vec![Ok(Response {
            status: 3,
            data: vec![],
        })]);

        let err = mower.send(Command::Resume, &[]).await.unwrap_err();

        assert!(matches!(err, MowerError::Rejected { status: 3, .. }));
        assert!(mower.link.is_some());
        assert!(!mower.link.as_ref().unwrap().closed);
    }

    #[tokio::test]
    async fn test_bad_frame_keeps_session() {
        let mut mower = mower(vec![Err(MowerError::Protocol(ProtocolError::Malformed))]);

        assert!(mower.read_byte(Command::GetActivity).await.is_err());
        assert!(mower.link.is_some());
    }
}
