//! Directives: one request to a receptor node plus its response policy.
//!
//! A directive is sent with `POST /job`; the controller answers with an id
//! and forwards the directive to the node. The node's answers come back on the
//! responses topic and are routed by the [`ResponseCorrelator`] to the
//! directive that registered the id.
//!
//! Two policies exist:
//!
//! - [`DirectiveBlocking`]: `call` resolves only once the response stream is
//!   finished, with the last data chunk or the error.
//! - [`DirectiveNonBlocking`]: `call` resolves with the id right away; chunks,
//!   end of stream, errors and timeouts are delivered to callbacks.
//!
//! [`ResponseCorrelator`]: crate::correlator::ResponseCorrelator

mod blocking;
mod non_blocking;

pub use blocking::{DirectiveBlocking, MailboxState};
pub use non_blocking::DirectiveNonBlocking;

use crate::client::ReceptorClient;
use receptor_client_core::{ClientError, CorrelationId};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;

/// How a directive waits for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// The caller waits until the response stream is finished
    Blocking,
    /// The caller gets the id immediately; responses go to callbacks
    #[default]
    NonBlocking,
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => write!(f, "blocking"),
            Self::NonBlocking => write!(f, "non_blocking"),
        }
    }
}

/// Fields shared by both directive variants.
#[derive(Clone)]
pub struct Directive {
    name: String,
    account: String,
    node_id: String,
    payload: Value,
    log_message_common: Option<String>,
    client: ReceptorClient,
}

#[derive(Deserialize)]
struct JobAccepted {
    id: String,
}

impl Directive {
    /// Describe a directive for `node_id` of `account`.
    #[must_use]
    pub fn new(
        client: ReceptorClient,
        name: impl Into<String>,
        account: impl Into<String>,
        node_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            name: name.into(),
            account: account.into(),
            node_id: node_id.into(),
            payload,
            log_message_common: None,
            client,
        }
    }

    /// Extra context appended to log lines and error messages (for example
    /// the API path that triggered the directive).
    #[must_use]
    pub fn with_log_message_common(mut self, context: impl Into<String>) -> Self {
        self.log_message_common = Some(context.into());
        self
    }

    /// Directive name, e.g. `receptor_satellite:health_check`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tenant account.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Receptor node the directive is addressed to.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Directive payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Log context, if any.
    #[must_use]
    pub fn log_message_common(&self) -> Option<&str> {
        self.log_message_common.as_deref()
    }

    /// Client this directive is sent through.
    #[must_use]
    pub const fn client(&self) -> &ReceptorClient {
        &self.client
    }

    /// The canonical `POST /job` body.
    #[must_use]
    pub fn default_body(&self) -> Value {
        json!({
            "account": self.account,
            "recipient": self.node_id,
            "payload": self.payload,
            "directive": self.name,
        })
    }

    /// Short description used in error messages.
    pub(crate) fn context(&self) -> String {
        self.log_message_common
            .clone()
            .unwrap_or_else(|| format!("directive {}", self.name))
    }

    /// Send `body` to the job endpoint and return the id the controller assigned.
    pub(crate) async fn post(&self, body: &Value) -> Result<CorrelationId, ClientError> {
        let config = self.client.config();
        let url = config.job_url();
        let headers = self.client.headers();

        let response = self
            .client
            .transport()
            .send_request("POST", &url, body, &headers)
            .await?;

        if !response.is_success() {
            return Err(ClientError::ControllerResponse {
                status: Some(response.status),
                message: format!(
                    "Directive {} failed ({}): {}",
                    self.name,
                    self.context(),
                    response.body
                ),
            });
        }

        let accepted: JobAccepted =
            serde_json::from_str(&response.body).map_err(|e| ClientError::ControllerResponse {
                status: Some(response.status),
                message: format!(
                    "Directive {} failed ({}): unreadable job response: {e}",
                    self.name,
                    self.context()
                ),
            })?;

        Ok(CorrelationId::from(accepted.id))
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directive")
            .field("name", &self.name)
            .field("account", &self.account)
            .field("node_id", &self.node_id)
            .field("payload", &self.payload)
            .field("log_message_common", &self.log_message_common)
            .finish_non_exhaustive()
    }
}

/// A directive of either policy, as built by [`ReceptorClient::directive`].
pub enum DirectiveCall {
    /// See [`DirectiveBlocking`]
    Blocking(DirectiveBlocking),
    /// See [`DirectiveNonBlocking`]
    NonBlocking(DirectiveNonBlocking),
}

impl DirectiveCall {
    /// Policy of the wrapped directive.
    #[must_use]
    pub const fn policy(&self) -> ConcurrencyPolicy {
        match self {
            Self::Blocking(_) => ConcurrencyPolicy::Blocking,
            Self::NonBlocking(_) => ConcurrencyPolicy::NonBlocking,
        }
    }

    /// Shared directive fields.
    #[must_use]
    pub const fn directive(&self) -> &Directive {
        match self {
            Self::Blocking(d) => d.directive(),
            Self::NonBlocking(d) => d.directive(),
        }
    }
}
