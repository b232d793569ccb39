//! Data channel message types
//!
//! Defines the message format for control channel communication.
//! Supports text and binary message types.

use serde::{Deserialize, Serialize};
use webrtc::data_channel::data_channel_message::DataChannelMessage;

/// Maximum message size for data channels (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Message types that can be sent over the control channel
///
/// Two formats are supported:
/// - Text: UTF-8 strings for simple text messages
/// - Binary: Raw bytes for efficient data transfer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum ChannelMessage {
    /// Text payload for simple string messages
    Text(String),

    /// Binary payload for raw data
    #[serde(with = "base64_bytes")]
    Binary(Vec<u8>),
}

impl ChannelMessage {
    /// Create a new text message
    pub fn text(text: impl Into<String>) -> Self {
        ChannelMessage::Text(text.into())
    }

    /// Create a new binary message
    pub fn binary(data: Vec<u8>) -> Self {
        ChannelMessage::Binary(data)
    }

    /// Classify a raw engine message by its string flag
    pub fn from_engine(msg: &DataChannelMessage) -> Self {
        if msg.is_string {
            ChannelMessage::Text(String::from_utf8_lossy(&msg.data).into_owned())
        } else {
            ChannelMessage::Binary(msg.data.to_vec())
        }
    }

    /// Get the size of this message in bytes
    pub fn size(&self) -> usize {
        match self {
            ChannelMessage::Text(t) => t.len(),
            ChannelMessage::Binary(b) => b.len(),
        }
    }

    /// Check if this message exceeds the maximum size
    pub fn exceeds_max_size(&self) -> bool {
        self.size() > MAX_MESSAGE_SIZE
    }

    /// Serialize message to bytes for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Check if this is a text message
    pub fn is_text(&self) -> bool {
        matches!(self, ChannelMessage::Text(_))
    }

    /// Check if this is a binary message
    pub fn is_binary(&self) -> bool {
        matches!(self, ChannelMessage::Binary(_))
    }

    /// Get the text payload if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ChannelMessage::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Get the binary payload if this is a binary message
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            ChannelMessage::Binary(b) => Some(b),
            _ => None,
        }
    }
}

/// Custom serialization for binary data as base64
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_text_round_trip() {
        let msg = ChannelMessage::text("hello");
        let bytes = msg.to_bytes().unwrap();
        let parsed = ChannelMessage::from_bytes(&bytes).unwrap();
        assert_eq!(msg, parsed);
        assert_eq!(parsed.as_text(), Some("hello"));
    }

    #[test]
    fn test_binary_round_trip() {
        let msg = ChannelMessage::binary(vec![0, 1, 2, 255]);
        let bytes = msg.to_bytes().unwrap();
        let parsed = ChannelMessage::from_bytes(&bytes).unwrap();
        assert!(parsed.is_binary());
        assert_eq!(parsed.as_binary(), Some(&[0u8, 1, 2, 255][..]));
    }

    #[test]
    fn test_binary_serializes_as_base64() {
        let msg = ChannelMessage::binary(vec![1, 2, 3]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("AQID"));
    }

    #[test]
    fn test_from_engine_string_flag() {
        let raw = DataChannelMessage {
            is_string: true,
            data: Bytes::from_static(b"ping"),
        };
        assert_eq!(ChannelMessage::from_engine(&raw).as_text(), Some("ping"));

        let raw = DataChannelMessage {
            is_string: false,
            data: Bytes::from_static(&[9, 8, 7]),
        };
        assert!(ChannelMessage::from_engine(&raw).is_binary());
    }

    #[test]
    fn test_size_limit() {
        let msg = ChannelMessage::binary(vec![0u8; 64]);
        assert_eq!(msg.size(), 64);
        assert!(!msg.exceeds_max_size());
    }
}
