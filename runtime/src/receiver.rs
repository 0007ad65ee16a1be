//! The contract between the correlator and whatever waits for a response.

use receptor_client_core::{CorrelationId, MessageType};
use serde_json::Value;

/// Target of routed response envelopes.
///
/// The correlator calls these from its listener and sweep tasks, so
/// implementations must return quickly; long-running work belongs on a
/// separate task. A panicking callback is logged and does not stop the
/// listener.
pub trait ResponseReceiver: Send + Sync {
    /// A successful envelope arrived.
    ///
    /// `kind` is [`MessageType::Response`] for every data chunk (with its
    /// decoded payload) and [`MessageType::Eof`] exactly once, as the terminal
    /// signal after the whole stream has been delivered. Envelopes of unknown
    /// kinds are forwarded with their kind untouched.
    fn response_callback(&self, id: &CorrelationId, kind: MessageType, payload: Value);

    /// The controller reported an application error. Terminal.
    fn error_callback(&self, id: &CorrelationId, code: i64, payload: Value);

    /// Nothing arrived for this id within the response timeout. Terminal.
    ///
    /// Receivers that do not care about timeouts can keep the default.
    fn timeout_callback(&self, id: &CorrelationId) {
        tracing::debug!(correlation_id = %id, "Receiver ignores timeouts");
    }
}
