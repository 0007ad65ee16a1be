//! Builders for response envelopes as they appear on the wire.

use receptor_client_core::codec::encode_payload;
use serde_json::{Value, json};

/// A successful data chunk for `id`.
#[must_use]
pub fn response_json(id: &str, payload: Value) -> Value {
    json!({
        "code": 0,
        "in_response_to": id,
        "message_type": "response",
        "payload": payload,
    })
}

/// A successful data chunk whose payload is gzipped and base64 encoded.
#[must_use]
pub fn encoded_response_json(id: &str, payload: &Value) -> Value {
    response_json(id, Value::String(encode_payload(payload)))
}

/// The end marker for `id`, announcing `serial` chunks.
#[must_use]
pub fn eof_json(id: &str, serial: Option<u64>) -> Value {
    let mut envelope = json!({
        "code": 0,
        "in_response_to": id,
        "message_type": "eof",
        "payload": null,
    });
    if let (Some(serial), Some(fields)) = (serial, envelope.as_object_mut()) {
        fields.insert("serial".to_string(), json!(serial));
    }
    envelope
}

/// An error response for `id`.
#[must_use]
pub fn error_json(id: &str, code: i64, payload: Value) -> Value {
    json!({
        "code": code,
        "in_response_to": id,
        "message_type": "response",
        "payload": payload,
    })
}

/// A successful envelope of an arbitrary message type.
#[must_use]
pub fn typed_json(id: &str, message_type: &str, payload: Value) -> Value {
    json!({
        "code": 0,
        "in_response_to": id,
        "message_type": message_type,
        "payload": payload,
    })
}
