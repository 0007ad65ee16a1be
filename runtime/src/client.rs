//! Client facade.
//!
//! [`ReceptorClient`] ties the configuration, the outbound job transport and
//! the response correlator together, and is the factory for directives.

use crate::correlator::{CorrelatorSettings, ResponseCorrelator};
use crate::directive::{
    ConcurrencyPolicy, Directive, DirectiveBlocking, DirectiveCall, DirectiveNonBlocking,
};
use receptor_client_core::{Configuration, JobTransport, ResponseSource};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

/// Header carrying the pre-shared key, which replaces the identity header.
pub const PSK_HEADER: &str = "x-rh-rbac-psk";

/// Returned by [`ReceptorClient::connection_status`] when the node state is unknown.
#[must_use]
pub fn status_disconnected() -> Value {
    json!({"status": "disconnected"})
}

/// Entry point for talking to the receptor controller.
///
/// Cloning is cheap; every clone shares one correlator, so responses for any
/// directive built from any clone are routed by the same listener.
#[derive(Clone)]
pub struct ReceptorClient {
    config: Arc<Configuration>,
    transport: Arc<dyn JobTransport>,
    correlator: Arc<ResponseCorrelator>,
    identity_header: Option<(String, String)>,
}

impl ReceptorClient {
    /// Build a client with its own correlator reading from `source`.
    #[must_use]
    pub fn new(
        config: Configuration,
        transport: Arc<dyn JobTransport>,
        source: Arc<dyn ResponseSource>,
    ) -> Self {
        let correlator = Arc::new(ResponseCorrelator::new(
            CorrelatorSettings::from(&config),
            source,
        ));
        Self::with_correlator(config, transport, correlator)
    }

    /// Build a client around an existing correlator.
    #[must_use]
    pub fn with_correlator(
        config: Configuration,
        transport: Arc<dyn JobTransport>,
        correlator: Arc<ResponseCorrelator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            correlator,
            identity_header: None,
        }
    }

    /// Forward a caller identity with every request, e.g. `x-rh-identity`.
    ///
    /// Ignored when a pre-shared key is configured.
    #[must_use]
    pub fn with_identity_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.identity_header = Some((name.into(), value.into()));
        self
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Outbound job transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn JobTransport> {
        &self.transport
    }

    /// The correlator routing responses for this client.
    #[must_use]
    pub fn correlator(&self) -> &Arc<ResponseCorrelator> {
        &self.correlator
    }

    /// Headers sent with every controller request.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];

        if let Some(psk) = &self.config.pre_shared_key {
            headers.push((PSK_HEADER.to_string(), psk.clone()));
        } else if let Some(identity) = &self.identity_header {
            headers.push(identity.clone());
        }

        headers
    }

    /// Ask the controller whether `node_id` is connected.
    ///
    /// Returns the controller's JSON answer, or [`status_disconnected`] when
    /// the request fails for any reason.
    pub async fn connection_status(&self, account: &str, node_id: &str) -> Value {
        let body = json!({"account": account, "node_id": node_id});
        let url = self.config.connection_status_url();

        let response = match self
            .transport
            .send_request("POST", &url, &body, &self.headers())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(account, node_id, error = %e, "Connection status request failed");
                return status_disconnected();
            },
        };

        if !response.is_success() {
            tracing::error!(
                account,
                node_id,
                status = response.status,
                "Connection status request failed"
            );
            return status_disconnected();
        }

        serde_json::from_str(&response.body).unwrap_or_else(|e| {
            tracing::error!(account, node_id, error = %e, "Unreadable connection status response");
            status_disconnected()
        })
    }

    /// Build a directive with the given policy.
    #[must_use]
    pub fn directive(
        &self,
        account: &str,
        node_id: &str,
        payload: Value,
        name: &str,
        policy: ConcurrencyPolicy,
    ) -> DirectiveCall {
        match policy {
            ConcurrencyPolicy::Blocking => {
                DirectiveCall::Blocking(self.blocking_directive(account, node_id, payload, name))
            },
            ConcurrencyPolicy::NonBlocking => DirectiveCall::NonBlocking(
                self.non_blocking_directive(account, node_id, payload, name),
            ),
        }
    }

    /// Build a directive whose `call` waits for the response.
    #[must_use]
    pub fn blocking_directive(
        &self,
        account: &str,
        node_id: &str,
        payload: Value,
        name: &str,
    ) -> DirectiveBlocking {
        DirectiveBlocking::new(Directive::new(self.clone(), name, account, node_id, payload))
    }

    /// Build a directive that reports responses through callbacks.
    #[must_use]
    pub fn non_blocking_directive(
        &self,
        account: &str,
        node_id: &str,
        payload: Value,
        name: &str,
    ) -> DirectiveNonBlocking {
        DirectiveNonBlocking::new(Directive::new(self.clone(), name, account, node_id, payload))
    }

    /// Start listening for responses. See [`ResponseCorrelator::start`].
    pub fn start(&self) {
        self.correlator.start();
    }

    /// Stop listening for responses. See [`ResponseCorrelator::stop`].
    pub async fn stop(&self) {
        self.correlator.stop().await;
    }
}

impl fmt::Debug for ReceptorClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceptorClient")
            .field("controller_url", &self.config.controller_url())
            .field("identity_header", &self.identity_header.as_ref().map(|(name, _)| name))
            .field("started", &self.correlator.is_started())
            .finish_non_exhaustive()
    }
}
