//! Inbound response envelopes.
//!
//! Every message on the responses topic is a JSON object:
//!
//! ```text
//! {
//!   "in_response_to": "<id returned by POST /job>",
//!   "code":           0,            // 0 = success, anything else = application error
//!   "message_type":   "response",   // "response" (data chunk) or "eof" (end marker)
//!   "serial":         3,            // on "eof": total number of data chunks
//!   "payload":        "..."         // raw string or base64(gzip(json))
//! }
//! ```
//!
//! Envelopes are immutable once parsed. Payload decoding is a separate step
//! (see [`crate::codec`]) because error payloads are forwarded untouched.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Code carried by successful envelopes.
pub const SUCCESS_CODE: i64 = 0;

/// Code assumed when an envelope carries no `code` at all.
///
/// Absence of a code is not evidence of success, so such envelopes are routed
/// down the error path.
pub const MISSING_CODE: i64 = -1;

/// Opaque identifier assigned by the controller to one outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap a raw id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Kind of a successful envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    /// A data chunk. Zero or more precede the end marker.
    #[default]
    Response,
    /// End of stream. Its `serial` is the total number of data chunks.
    Eof,
    /// Anything the client does not understand, kept verbatim.
    Other(String),
}

impl MessageType {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Response => "response",
            Self::Eof => "eof",
            Self::Other(other) => other,
        }
    }
}

impl From<&str> for MessageType {
    fn from(kind: &str) -> Self {
        match kind {
            "response" => Self::Response,
            "eof" => Self::Eof,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kind = String::deserialize(deserializer)?;
        Ok(Self::from(kind.as_str()))
    }
}

const fn missing_code() -> i64 {
    MISSING_CODE
}

// `null` is treated like an absent field.
fn code_or_missing<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(Option::<i64>::deserialize(deserializer)?.unwrap_or(MISSING_CODE))
}

fn message_type_or_default<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<MessageType, D::Error> {
    Ok(Option::<MessageType>::deserialize(deserializer)?.unwrap_or_default())
}

/// One inbound message from the responses topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Id of the request this envelope answers.
    #[serde(default)]
    pub in_response_to: Option<CorrelationId>,

    /// Application status code; `0` means success.
    #[serde(default = "missing_code", deserialize_with = "code_or_missing")]
    pub code: i64,

    /// Data chunk or end marker.
    #[serde(default, deserialize_with = "message_type_or_default")]
    pub message_type: MessageType,

    /// On the end marker, the number of data chunks in the stream.
    #[serde(default)]
    pub serial: Option<u64>,

    /// Still-encoded payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ResponseEnvelope {
    /// Parse an envelope from raw message bytes.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] when the bytes are not a
    /// JSON object of the expected shape.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether the controller reported success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Whether this is the end-of-stream marker.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.message_type == MessageType::Eof
    }
}
