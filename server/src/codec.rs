//! Mapping between WebSocket frames and protocol messages.
//!
//! Text frames carry JSON, binary frames carry bincode. Control frames
//! decode to `None` so the caller can treat them as liveness only.

use crate::error::CodecError;
use shared::{decode_binary, decode_json, encode_binary, encode_json, ClientMessage, ServerMessage};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    Binary,
}

/// Decodes and validates one inbound frame.
pub fn decode(frame: &Message) -> Result<Option<(ClientMessage, Encoding)>, CodecError> {
    let (message, encoding) = match frame {
        Message::Text(text) => (decode_json::<ClientMessage>(text)?, Encoding::Json),
        Message::Binary(bytes) => (decode_binary::<ClientMessage>(bytes)?, Encoding::Binary),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => return Ok(None),
        Message::Frame(_) => return Err(CodecError::UnsupportedFrame),
    };

    message.validate()?;
    Ok(Some((message, encoding)))
}

pub fn encode(message: &ServerMessage, encoding: Encoding) -> Result<Message, CodecError> {
    match encoding {
        Encoding::Json => Ok(Message::Text(encode_json(message)?)),
        Encoding::Binary => Ok(Message::Binary(encode_binary(message)?)),
    }
}
