//! # Receptor Client Core
//!
//! Types shared by every part of the receptor controller client.
//!
//! Requests to the receptor controller are issued synchronously (`POST /job`),
//! while their responses arrive later, out of band, on a shared Kafka topic.
//! The synchronous call returns an id; every asynchronous response envelope
//! names that id in its `in_response_to` field. This crate holds the pieces
//! both halves of that split transport agree on:
//!
//! - [`envelope`]: the inbound wire envelope and correlation id
//! - [`codec`]: decoding of (possibly gzipped, base64 encoded) payloads
//! - [`error`]: the client error taxonomy
//! - [`transport`]: the outbound/inbound transport traits
//! - [`config`]: controller and queue configuration
//!
//! ## Example
//!
//! ```
//! use receptor_client_core::envelope::{MessageType, ResponseEnvelope};
//!
//! let raw = br#"{"code":0,"in_response_to":"m1","message_type":"response","payload":"hello"}"#;
//! let envelope = ResponseEnvelope::parse(raw).unwrap();
//!
//! assert!(envelope.is_success());
//! assert_eq!(envelope.message_type, MessageType::Response);
//! assert_eq!(envelope.in_response_to.unwrap().as_str(), "m1");
//! ```

pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod transport;

pub use config::Configuration;
pub use envelope::{CorrelationId, MessageType, ResponseEnvelope};
pub use error::{ClientError, ConfigError, TransportError};
pub use transport::{
    InboundMessage, InboundStream, JobTransport, ResponseSource, SubscribeOptions,
    TransportResponse,
};
