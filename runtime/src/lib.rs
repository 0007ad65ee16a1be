//! # Receptor Client Runtime
//!
//! Request/response over a split transport: directives are sent to the
//! receptor controller with a synchronous HTTP call, and the node's answers
//! arrive later on a shared Kafka topic, matched to their request by id.
//!
//! ## Core Components
//!
//! - **[`ResponseCorrelator`]**: listens on the responses topic, routes
//!   envelopes to registered receivers, evicts silent correlations
//! - **[`ResponseReceiver`]**: the callback contract the correlator drives
//! - **[`DirectiveBlocking`]** / **[`DirectiveNonBlocking`]**: the two ways of
//!   waiting for a directive's response
//! - **[`ReceptorClient`]**: configuration, transports and directive factory
//!
//! ## Example
//!
//! ```ignore
//! use receptor_client_runtime::ReceptorClient;
//!
//! let client = ReceptorClient::new(config, job_transport, response_source);
//! client.start();
//!
//! let directive = client.blocking_directive("0000001", "node-a", payload, "receptor:ping");
//! let response = directive.call(None).await?;
//!
//! client.stop().await;
//! ```

/// Client facade and directive factory
pub mod client;

/// Routing of response envelopes to registered receivers
pub mod correlator;

pub mod directive;

mod dispatch;

/// Metric names recorded by the correlator
pub mod metrics;

pub mod receiver;

pub use client::{PSK_HEADER, ReceptorClient, status_disconnected};
pub use correlator::{CorrelatorSettings, PendingStatus, ResponseCorrelator};
pub use directive::{
    ConcurrencyPolicy, Directive, DirectiveBlocking, DirectiveCall, DirectiveNonBlocking,
    MailboxState,
};
pub use receiver::ResponseReceiver;
