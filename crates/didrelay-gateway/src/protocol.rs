//! Relay wire protocol
//!
//! Clients exchange JSON text frames of two shapes. A registration claims an
//! identifier for the sending connection:
//!
//! ```json
//! {"type": "register", "did": "did:example:alice"}
//! ```
//!
//! Anything carrying a `to` identifier and a `payload` key is a routed message
//! and is forwarded to the target exactly as it was received. The payload is
//! opaque; `null`, `false`, `0` and `""` are all valid payloads:
//!
//! ```json
//! {"type": "M1", "from": "did:example:alice", "to": "did:example:bob", "payload": {}}
//! ```

use serde_json::{Map, Value};

/// `type` value that marks a registration envelope
pub const REGISTER_TYPE: &str = "register";

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Identifier claim for the sending connection
    Register {
        /// Claimed identifier
        did: String,
    },
    /// Message addressed to another identifier
    Routed(RoutedMessage),
}

impl Envelope {
    /// Decode a raw frame.
    ///
    /// A `"type": "register"` object is always treated as a registration, even
    /// if it also carries routing fields.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
        Self::decode_str(text)
    }

    /// Decode a text frame
    pub fn decode_str(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(fields) = value else {
            return Err(DecodeError::NotAnObject);
        };

        if string_field(&fields, "type") == Some(REGISTER_TYPE) {
            return match string_field(&fields, "did") {
                Some(did) if !did.is_empty() => Ok(Envelope::Register {
                    did: did.to_string(),
                }),
                _ => Err(DecodeError::MissingIdentifier),
            };
        }

        let to = string_field(&fields, "to").filter(|to| !to.is_empty());
        let has_payload = fields.contains_key("payload");

        match to {
            Some(to) if has_payload => Ok(Envelope::Routed(RoutedMessage {
                to: to.to_string(),
                from: string_field(&fields, "from").map(str::to_string),
                kind: string_field(&fields, "type").map(str::to_string),
                frame: text.to_string(),
            })),
            _ => Err(DecodeError::Unrecognized),
        }
    }
}

fn string_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// A routed envelope together with the exact frame it arrived in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    /// Target identifier
    pub to: String,
    /// Sender identifier as claimed in the frame; informational only
    pub from: Option<String>,
    /// Application-defined `type`, if any
    pub kind: Option<String>,
    frame: String,
}

impl RoutedMessage {
    /// The frame as received, forwarded unmodified
    pub fn frame(&self) -> &str {
        &self.frame
    }
}

/// Reasons an inbound frame is not a usable envelope
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("register envelope without a non-empty did")]
    MissingIdentifier,
    #[error("envelope is neither a registration nor a routed message")]
    Unrecognized,
}
