//! Framing for the Automower BLE command channel.
//!
//! Requests are written to [`WRITE_CHARACTERISTIC`] in [`MTU`]-sized chunks and
//! the mower answers with notifications on [`READ_CHARACTERISTIC`]. Every frame
//! carries the channel id negotiated at pairing time.

use log::debug;
use thiserror::Error;
use uuid::Uuid;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x98bd0001_0b0e_421a_84e5_ddbf75dc6de4);
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x98bd0002_0b0e_421a_84e5_ddbf75dc6de4);
pub const READ_CHARACTERISTIC: Uuid = Uuid::from_u128(0x98bd0003_0b0e_421a_84e5_ddbf75dc6de4);

/// Largest chunk the mower accepts in a single GATT write.
pub const MTU: usize = 20;

/// Name sent when opening the command channel.
pub const CHANNEL_NAME: &[u8] = b"Main\0";

/// Duration sent with [`Command::Override`], in seconds.
pub const OVERRIDE_SECONDS: u32 = 3 * 60 * 60;

const FRAME_START: u8 = 0x02;
const FRAME_VERSION: u8 = 0xFD;
const FRAME_END: u8 = 0x03;
const MESSAGE_TYPE_COMMAND: u8 = 0x01;
const PAYLOAD_MARKER: u8 = 0xAF;

// start, version, length (2), channel id (4), message type, header crc, reserved
const HEADER_LEN: usize = 11;
// trailing crc, end
const TRAILER_LEN: usize = 2;
// marker, major (2), minor, status, data length (2)
const PAYLOAD_HEADER_LEN: usize = 7;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),

    #[error("malformed frame")]
    Malformed,

    #[error("frame length {declared} does not match received {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("crc mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Crc { expected: u8, actual: u8 },

    #[error("frame for channel {actual}, expected {expected}")]
    WrongChannel { expected: u32, actual: u32 },

    #[error("response to {actual:?} while waiting for {expected:?}")]
    UnexpectedResponse { expected: (u16, u8), actual: (u16, u8) },

    #[error("response data truncated")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    OpenChannel,
    GetModel,
    GetBatteryLevel,
    GetActivity,
    GetState,
    Resume,
    Pause,
    Park,
    Override,
}

impl Command {
    /// The `(major, minor)` pair identifying this command on the wire.
    pub fn id(self) -> (u16, u8) {
        match self {
            Command::OpenChannel => (4664, 1),
            Command::GetModel => (4698, 2),
            Command::GetBatteryLevel => (4108, 11),
            Command::GetState => (4586, 2),
            Command::GetActivity => (4586, 3),
            Command::Pause => (4586, 4),
            Command::Resume => (4586, 5),
            Command::Park => (4586, 6),
            Command::Override => (4658, 3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MowerState {
    Off,
    WaitForSafetyPin,
    Stopped,
    FatalError,
    PendingStart,
    Paused,
    InOperation,
    Restricted,
    Error,
    Unknown(u8),
}

impl From<u8> for MowerState {
    fn from(code: u8) -> Self {
        match code {
            0 => MowerState::Off,
            1 => MowerState::WaitForSafetyPin,
            2 => MowerState::Stopped,
            3 => MowerState::FatalError,
            4 => MowerState::PendingStart,
            5 => MowerState::Paused,
            6 => MowerState::InOperation,
            7 => MowerState::Restricted,
            8 => MowerState::Error,
            other => MowerState::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MowerActivity {
    None,
    Charging,
    GoingOut,
    Mowing,
    GoingHome,
    Parked,
    StoppedInGarden,
    Unknown(u8),
}

impl From<u8> for MowerActivity {
    fn from(code: u8) -> Self {
        match code {
            0 => MowerActivity::None,
            1 => MowerActivity::Charging,
            2 => MowerActivity::GoingOut,
            3 => MowerActivity::Mowing,
            4 => MowerActivity::GoingHome,
            5 => MowerActivity::Parked,
            6 => MowerActivity::StoppedInGarden,
            other => MowerActivity::Unknown(other),
        }
    }
}

/// A decoded answer to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u8,
    pub data: Vec<u8>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// CRC-8/MAXIM (reflected polynomial 0x31, zero init).
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| {
        let mut crc = crc ^ byte;
        for _ in 0..8 {
            crc = if crc & 0x01 != 0 {
                (crc >> 1) ^ 0x8C
            } else {
                crc >> 1
            };
        }
        crc
    })
}

/// Display name for the model bytes of a `GetModel` answer, e.g. `Automower 5.2`.
pub fn model_name(device_type: u8, variant: u8) -> String {
    format!("Automower {device_type}.{variant}")
}

pub fn encode_request(channel_id: u32, command: Command, data: &[u8]) -> Vec<u8> {
    let (major, minor) = command.id();
    let mut payload = Vec::with_capacity(PAYLOAD_HEADER_LEN + data.len());
    payload.push(PAYLOAD_MARKER);
    payload.extend_from_slice(&major.to_le_bytes());
    payload.push(minor);
    payload.push(0x00);
    payload.extend_from_slice(&(data.len() as u16).to_le_bytes());
    payload.extend_from_slice(data);
    encode_frame(channel_id, &payload)
}

fn encode_frame(channel_id: u32, payload: &[u8]) -> Vec<u8> {
    let total = HEADER_LEN + payload.len() + TRAILER_LEN;
    let mut frame = Vec::with_capacity(total);
    frame.push(FRAME_START);
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&((total - 4) as u16).to_le_bytes());
    frame.extend_from_slice(&channel_id.to_le_bytes());
    frame.push(MESSAGE_TYPE_COMMAND);
    frame.push(crc8(&frame[1..9]));
    frame.push(0x00);
    frame.extend_from_slice(payload);
    frame.push(crc8(&frame[1..]));
    frame.push(FRAME_END);
    frame
}

fn decode_frame(frame: &[u8], channel_id: u32) -> Result<&[u8], ProtocolError> {
    if frame.len() < HEADER_LEN + TRAILER_LEN {
        return Err(ProtocolError::TooShort(frame.len()));
    }
    if frame[0] != FRAME_START || frame[1] != FRAME_VERSION || frame[frame.len() - 1] != FRAME_END
    {
        return Err(ProtocolError::Malformed);
    }

    let declared = u16::from_le_bytes([frame[2], frame[3]]) as usize + 4;
    if declared != frame.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: frame.len(),
        });
    }

    let header_crc = crc8(&frame[1..9]);
    if header_crc != frame[9] {
        return Err(ProtocolError::Crc {
            expected: header_crc,
            actual: frame[9],
        });
    }

    let crc_index = frame.len() - TRAILER_LEN;
    let frame_crc = crc8(&frame[1..crc_index]);
    if frame_crc != frame[crc_index] {
        return Err(ProtocolError::Crc {
            expected: frame_crc,
            actual: frame[crc_index],
        });
    }

    let actual = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    if actual != channel_id {
        return Err(ProtocolError::WrongChannel {
            expected: channel_id,
            actual,
        });
    }

    Ok(&frame[HEADER_LEN..crc_index])
}

pub fn decode_response(
    frame: &[u8],
    channel_id: u32,
    command: Command,
) -> Result<Response, ProtocolError> {
    let payload = decode_frame(frame, channel_id)?;
    if payload.len() < PAYLOAD_HEADER_LEN || payload[0] != PAYLOAD_MARKER {
        return Err(ProtocolError::Malformed);
    }

    let actual = (u16::from_le_bytes([payload[1], payload[2]]), payload[3]);
    if actual != command.id() {
        return Err(ProtocolError::UnexpectedResponse {
            expected: command.id(),
            actual,
        });
    }

    let status = payload[4];
    let data_len = u16::from_le_bytes([payload[5], payload[6]]) as usize;
    let data = payload
        .get(PAYLOAD_HEADER_LEN..PAYLOAD_HEADER_LEN + data_len)
        .ok_or(ProtocolError::Truncated)?;

    Ok(Response {
        status,
        data: data.to_vec(),
    })
}

/// Reassembles a frame from notification chunks.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    /// Feeds one notification; returns the frame once all of it has arrived.
    ///
    /// Chunks that cannot start a frame are dropped so a late tail from an
    /// earlier exchange does not poison the next one.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if self.buffer.is_empty() && chunk.first().is_some_and(|&b| b != FRAME_START) {
            debug!("Dropping {} stray notification bytes", chunk.len());
            return None;
        }
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() < 4 {
            return None;
        }

        let expected = u16::from_le_bytes([self.buffer[2], self.buffer[3]]) as usize + 4;
        if self.buffer.len() < expected {
            return None;
        }

        let rest = self.buffer.split_off(expected);
        Some(std::mem::replace(&mut self.buffer, rest))
    }
}
