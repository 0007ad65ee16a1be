//! # Receptor Client Testing
//!
//! Test doubles and helpers for the receptor controller client.
//!
//! This crate provides:
//! - In-memory implementations of both transport halves
//! - A receiver that records every callback
//! - Builders for wire envelopes
//! - Small async assertion helpers
//!
//! ## Example
//!
//! ```ignore
//! use receptor_client_testing::{envelopes, InMemoryResponseSource, MockJobTransport};
//!
//! #[tokio::test]
//! async fn blocking_call_returns_last_chunk() {
//!     let transport = MockJobTransport::new();
//!     transport.accept_job("m1");
//!     let source = InMemoryResponseSource::new();
//!
//!     let client = ReceptorClient::new(config, transport.into_shared(), source.clone().into_shared());
//!     client.start();
//!
//!     source.publish_json(&envelopes::response_json("m1", json!("pong")));
//!     source.publish_json(&envelopes::eof_json("m1", Some(1)));
//!
//!     let directive = client.blocking_directive("0000001", "node-a", json!({}), "receptor:ping");
//!     assert_eq!(directive.call(None).await.unwrap(), Some(json!("pong")));
//! }
//! ```

pub mod envelopes;
pub mod mocks;

/// Recording receivers.
pub mod receivers {
    use receptor_client_core::{CorrelationId, MessageType};
    use receptor_client_runtime::ResponseReceiver;
    use serde_json::Value;
    use std::sync::{Mutex, PoisonError};

    /// One callback observed by a [`RecordingReceiver`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum ReceivedCall {
        /// `response_callback`
        Response {
            /// Correlation id
            id: CorrelationId,
            /// Message type
            kind: MessageType,
            /// Decoded payload
            payload: Value,
        },
        /// `error_callback`
        Error {
            /// Correlation id
            id: CorrelationId,
            /// Error code
            code: i64,
            /// Raw payload
            payload: Value,
        },
        /// `timeout_callback`
        Timeout {
            /// Correlation id
            id: CorrelationId,
        },
    }

    impl ReceivedCall {
        /// Whether no further callbacks are expected after this one.
        #[must_use]
        pub fn is_terminal(&self) -> bool {
            match self {
                Self::Response { kind, .. } => *kind == MessageType::Eof,
                Self::Error { .. } | Self::Timeout { .. } => true,
            }
        }
    }

    /// Receiver that records every callback in arrival order.
    #[derive(Debug, Default)]
    pub struct RecordingReceiver {
        calls: Mutex<Vec<ReceivedCall>>,
    }

    impl RecordingReceiver {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything recorded so far.
        #[must_use]
        pub fn calls(&self) -> Vec<ReceivedCall> {
            self.lock().clone()
        }

        /// Number of callbacks recorded so far.
        #[must_use]
        pub fn len(&self) -> usize {
            self.lock().len()
        }

        /// Whether nothing has been recorded.
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.lock().is_empty()
        }

        /// Payloads of the recorded data chunks, in order.
        #[must_use]
        pub fn chunks(&self) -> Vec<Value> {
            self.lock()
                .iter()
                .filter_map(|call| match call {
                    ReceivedCall::Response {
                        kind: MessageType::Response,
                        payload,
                        ..
                    } => Some(payload.clone()),
                    _ => None,
                })
                .collect()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ReceivedCall>> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl ResponseReceiver for RecordingReceiver {
        fn response_callback(&self, id: &CorrelationId, kind: MessageType, payload: Value) {
            self.lock().push(ReceivedCall::Response {
                id: id.clone(),
                kind,
                payload,
            });
        }

        fn error_callback(&self, id: &CorrelationId, code: i64, payload: Value) {
            self.lock().push(ReceivedCall::Error {
                id: id.clone(),
                code,
                payload,
            });
        }

        fn timeout_callback(&self, id: &CorrelationId) {
            self.lock().push(ReceivedCall::Timeout { id: id.clone() });
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::time::Duration;

    /// Poll `condition` every few milliseconds until it holds or `within` elapses.
    ///
    /// Returns whether the condition was met. Works with paused time.
    pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Install a `tracing` subscriber honoring `RUST_LOG`, once per process.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::{eventually, init_tracing};
pub use mocks::{InMemoryResponseSource, MockJobTransport, RecordedRequest};
pub use receivers::{ReceivedCall, RecordingReceiver};
