//! Error types for the receptor controller client.
//!
//! All errors carry owned strings only, so they are `Clone` and can be stored
//! in a directive's mailbox and handed back to the waiting caller.

use thiserror::Error;

/// Failures of the transport itself (HTTP or message queue).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the broker or controller
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The outbound request could not be issued or its response not read
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Subscribing to the responses topic failed
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Pulling the next inbound message failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Acknowledging an inbound message failed
    #[error("Acknowledge failed: {0}")]
    AckFailed(String),
}

/// Errors surfaced to callers of a directive.
///
/// Blocking directives return these from `call`; non-blocking directives
/// never return them and report failures through callbacks instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request never reached the controller; nothing was registered
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The controller rejected the synchronous request
    #[error("Controller response error{}: {message}", http_status(.status.as_ref()))]
    ControllerResponse {
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Description including request context
        message: String,
    },

    /// An asynchronous response carried a non-zero code
    #[error("{message} (code: {code})")]
    Response {
        /// Application error code from the envelope
        code: i64,
        /// Error payload and request context
        message: String,
    },

    /// No terminal response arrived within the configured deadline
    #[error("Timeout ({0})")]
    ResponseTimeout(String),

    /// A successful envelope had a message type other than `response`/`eof`
    #[error("Unknown response type ({0})")]
    UnknownResponseType(String),
}

fn http_status(status: Option<&u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed
    #[error("Invalid value for environment variable {name}: {reason}")]
    EnvVar {
        /// Variable name
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A configuration document could not be parsed
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// The configuration is internally inconsistent
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_response_error_mentions_status() {
        let err = ClientError::ControllerResponse {
            status: Some(401),
            message: "Directive health_check failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Controller response error (HTTP 401): Directive health_check failed"
        );

        let err = ClientError::ControllerResponse {
            status: None,
            message: "no id".to_string(),
        };
        assert_eq!(err.to_string(), "Controller response error: no id");
    }

    #[test]
    fn transport_errors_convert_transparently() {
        let err: ClientError = TransportError::RequestFailed("connection refused".to_string()).into();
        assert_eq!(err.to_string(), "Request failed: connection refused");
    }

    #[test]
    fn response_error_includes_code() {
        let err = ClientError::Response {
            code: 1,
            message: "bad node".to_string(),
        };
        assert_eq!(err.to_string(), "bad node (code: 1)");
    }
}
