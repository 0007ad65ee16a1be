//! Transport abstraction.
//!
//! The receptor controller speaks over two channels:
//!
//! ```text
//!  ┌──────────────┐  POST /job {account, recipient, payload, directive}  ┌────────────┐
//!  │              │ ───────────────────────────────────────────────────► │            │
//!  │    client    │ ◄─────────────────────── {"id": "<correlation id>"}  │ controller │
//!  │              │                                                      │            │
//!  │              │ ◄──── responses topic: {in_response_to, code, ...} ─ │            │
//!  └──────────────┘                                                      └────────────┘
//! ```
//!
//! [`JobTransport`] is the synchronous half and [`ResponseSource`] the
//! asynchronous half. Both traits return boxed futures instead of using
//! `async fn` so that they stay dyn compatible (`Arc<dyn JobTransport>`).
//!
//! # Implementations
//!
//! - `HttpJobTransport` (receptor-client-http): reqwest
//! - `RedpandaResponseSource` (receptor-client-redpanda): rdkafka
//! - `MockJobTransport` / `InMemoryResponseSource` (receptor-client-testing)

use crate::error::TransportError;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// HTTP-level reply to an outbound request.
///
/// Any status is a valid reply; only failures to obtain a reply at all are
/// [`TransportError`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw response body
    pub body: String,
}

impl TransportResponse {
    /// Create a response.
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Outbound half: issue a request and receive the synchronous reply.
pub trait JobTransport: Send + Sync {
    /// Send `body` as JSON to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::RequestFailed`] (or
    /// [`TransportError::ConnectionFailed`]) when no reply could be obtained.
    fn send_request(
        &self,
        method: &str,
        url: &str,
        body: &serde_json::Value,
        headers: &[(String, String)],
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>>;
}

/// Options for subscribing to the responses topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    /// Topic carrying controller responses
    pub topic: String,
    /// Let the transport acknowledge messages on delivery
    pub auto_ack: bool,
    /// Upper bound on bytes fetched per request
    pub max_bytes: Option<u32>,
    /// Consumer group; `None` means every subscriber receives every message
    pub persist_ref: Option<String>,
}

impl SubscribeOptions {
    /// Options for `topic` with auto-ack enabled and no consumer group.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            auto_ack: true,
            max_bytes: None,
            persist_ref: None,
        }
    }
}

type AckFn = Box<dyn FnOnce() -> Result<(), TransportError> + Send>;

/// One message pulled from the responses topic.
pub struct InboundMessage {
    payload: Vec<u8>,
    ack: Option<AckFn>,
}

impl InboundMessage {
    /// A message without a manual acknowledge operation.
    #[must_use]
    pub const fn new(payload: Vec<u8>) -> Self {
        Self { payload, ack: None }
    }

    /// Attach the operation used to acknowledge this message manually.
    #[must_use]
    pub fn with_ack<F>(mut self, ack: F) -> Self
    where
        F: FnOnce() -> Result<(), TransportError> + Send + 'static,
    {
        self.ack = Some(Box::new(ack));
        self
    }

    /// Raw message bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledge the message. A no-op when no acknowledge operation is attached.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AckFailed`] when the transport rejects the acknowledgement.
    pub fn ack(self) -> Result<(), TransportError> {
        self.ack.map_or(Ok(()), |ack| ack())
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("payload", &String::from_utf8_lossy(&self.payload))
            .field("manual_ack", &self.ack.is_some())
            .finish()
    }
}

/// Lazy, infinite, non-restartable stream of inbound messages.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<InboundMessage, TransportError>> + Send>>;

/// Inbound half: subscribe to the responses topic.
pub trait ResponseSource: Send + Sync {
    /// Subscribe and return the message stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Pin<Box<dyn Future<Output = Result<InboundStream, TransportError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use futures::StreamExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EchoTransport;

    impl JobTransport for EchoTransport {
        fn send_request(
            &self,
            _method: &str,
            url: &str,
            body: &serde_json::Value,
            _headers: &[(String, String)],
        ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>>
        {
            let reply = format!("{url} {body}");
            Box::pin(async move { Ok(TransportResponse::new(200, reply)) })
        }
    }

    struct FixedSource(Vec<&'static str>);

    impl ResponseSource for FixedSource {
        fn subscribe(
            &self,
            _options: SubscribeOptions,
        ) -> Pin<Box<dyn Future<Output = Result<InboundStream, TransportError>> + Send + '_>>
        {
            let messages: Vec<_> = self
                .0
                .iter()
                .map(|m| Ok(InboundMessage::new(m.as_bytes().to_vec())))
                .collect();
            Box::pin(async move { Ok(Box::pin(futures::stream::iter(messages)) as InboundStream) })
        }
    }

    #[test]
    fn transports_are_dyn_compatible() {
        let transport: Arc<dyn JobTransport> = Arc::new(EchoTransport);
        let reply = tokio_test::block_on(transport.send_request(
            "POST",
            "http://localhost/job",
            &serde_json::json!({"a": 1}),
            &[],
        ))
        .unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.body, r#"http://localhost/job {"a":1}"#);

        let source: Arc<dyn ResponseSource> = Arc::new(FixedSource(vec!["one", "two"]));
        let stream = tokio_test::block_on(source.subscribe(SubscribeOptions::new("t"))).unwrap();
        let payloads: Vec<Vec<u8>> = tokio_test::block_on(
            stream.map(|m| m.unwrap().payload().to_vec()).collect::<Vec<_>>(),
        );
        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn ack_without_operation_is_noop() {
        assert!(InboundMessage::new(b"x".to_vec()).ack().is_ok());
    }

    #[test]
    fn ack_runs_attached_operation_once() {
        let acked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&acked);
        let message = InboundMessage::new(b"x".to_vec()).with_ack(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        message.ack().unwrap();
        assert!(acked.load(Ordering::SeqCst));
    }

    #[test]
    fn status_classification() {
        assert!(TransportResponse::new(204, "").is_success());
        assert!(!TransportResponse::new(401, "").is_success());
        assert!(!TransportResponse::new(500, "").is_success());
    }
}
