use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::input::InputEvent;

/// Control frames at or above this length kill the connection as malformed.
pub const MAX_CONTROL_FRAME: usize = 1_000_000;

/// Typed messages carried on the TCP control channel.
///
/// Wire format per message: 4-byte big-endian length, then a UTF-8 JSON
/// object whose `type` field is the discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Sender proposes a beam to the receiver.
    #[serde(rename = "beam_offer")]
    BeamOffer {
        #[serde(rename = "senderName")]
        sender_name: String,
        #[serde(rename = "windowTitle")]
        window_title: String,
        width: u32,
        height: u32,
        #[serde(rename = "hasAudio")]
        has_audio: bool,
        #[serde(rename = "bundleID")]
        bundle_id: String,
    },

    /// Receiver accepts and declares its media ports.
    #[serde(rename = "beam_accept")]
    BeamAccept {
        #[serde(rename = "videoPort")]
        video_port: u16,
        #[serde(rename = "audioPort")]
        audio_port: u16,
    },

    /// Either side terminates the beam.
    #[serde(rename = "beam_end")]
    BeamEnd,

    /// Receiver forwards one normalized input event to the sender.
    #[serde(rename = "input")]
    Input { event: InputEvent },

    /// Receiver asks the sender's encoder for a fresh IDR.
    #[serde(rename = "keyframe_request")]
    KeyframeRequest,

    /// Sender reports its polled cursor visibility so the receiver can
    /// enter or leave cursor-capture mode.
    #[serde(rename = "cursor_state")]
    CursorState { visible: bool },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "pong")]
    Pong,
}

/// Encode a message into a length-prefixed frame for TCP transmission.
pub fn encode_message(msg: &ControlMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() >= MAX_CONTROL_FRAME {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a message from a frame payload (without the length prefix).
pub fn decode_message(payload: &[u8]) -> Result<ControlMessage, ProtocolError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Attempt to extract one complete length-prefixed frame from a byte buffer.
///
/// Returns `Ok(Some(payload))` if a complete frame is available, `Ok(None)`
/// if more data is needed, or `Err` if the declared length is at or above
/// [`MAX_CONTROL_FRAME`] (the caller must drop the connection).
///
/// Advances the buffer past the consumed frame.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<Vec<u8>>, ProtocolError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length >= MAX_CONTROL_FRAME {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    if buf.len() < 4 + length {
        return Ok(None);
    }

    buf.advance(4);
    let payload = buf.split_to(length).to_vec();
    Ok(Some(payload))
}
