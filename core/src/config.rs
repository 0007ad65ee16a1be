//! Client configuration.
//!
//! Holds the controller address, queue settings and response deadlines.
//! Defaults match a locally running receptor controller.
//!
//! # Example
//!
//! ```
//! use receptor_client_core::Configuration;
//!
//! let mut config = Configuration::default();
//! config.set_controller_host("https://receptor.example.com/api/v1");
//!
//! assert_eq!(config.controller_host(), "receptor.example.com");
//! assert_eq!(config.job_url(), "http://receptor.example.com/job");
//! ```
//!
//! Configuration can also be loaded from TOML or from `RECEPTOR_CONTROLLER_*`
//! environment variables:
//!
//! ```no_run
//! use receptor_client_core::Configuration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Configuration::from_env()?;
//! config.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::ConfigError;
use crate::transport::SubscribeOptions;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Prefix shared by all configuration environment variables.
pub const ENV_PREFIX: &str = "RECEPTOR_CONTROLLER_";

/// Receptor controller client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    controller_scheme: String,
    controller_host: String,

    /// Path of connection status requests
    pub connection_status_path: String,
    /// Path of directive (job) requests
    pub job_path: String,

    /// Sent as `x-rh-rbac-psk`, replacing the identity header
    pub pre_shared_key: Option<String>,

    /// Acknowledge queue messages automatically
    pub queue_auto_ack: bool,
    /// Broker host
    pub queue_host: Option<String>,
    /// Broker port
    pub queue_port: Option<u16>,
    /// Max bytes fetched in one response
    pub queue_max_bytes: Option<u32>,
    /// Consumer group. When unset, every subscriber receives every message.
    pub queue_persist_ref: Option<String>,
    /// Topic with the controller's responses
    pub queue_topic: String,

    /// How long a registered request may stay silent before it times out
    pub response_timeout_secs: u64,
    /// Interval between timeout sweeps
    pub response_timeout_poll_secs: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            controller_scheme: "http".to_string(),
            controller_host: "localhost:9090".to_string(),
            connection_status_path: "/connection/status".to_string(),
            job_path: "/job".to_string(),
            pre_shared_key: None,
            queue_auto_ack: true,
            queue_host: None,
            queue_port: None,
            queue_max_bytes: None,
            queue_persist_ref: None,
            queue_topic: "platform.receptor-controller.responses".to_string(),
            response_timeout_secs: 120,
            response_timeout_poll_secs: 10,
        }
    }
}

impl Configuration {
    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// Scheme and host go through the same normalization as their setters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is not valid TOML or has
    /// mistyped values.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            toml::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let (scheme, host) = (config.controller_scheme.clone(), config.controller_host.clone());
        config.set_controller_scheme(&scheme);
        config.set_controller_host(&host);
        Ok(config)
    }

    /// Defaults overridden by `RECEPTOR_CONTROLLER_*` environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `RECEPTOR_CONTROLLER_SCHEME` | controller scheme |
    /// | `RECEPTOR_CONTROLLER_HOST` | controller host |
    /// | `RECEPTOR_CONTROLLER_PSK` | pre-shared key |
    /// | `RECEPTOR_CONTROLLER_QUEUE_HOST` / `_QUEUE_PORT` | broker |
    /// | `RECEPTOR_CONTROLLER_QUEUE_TOPIC` | responses topic |
    /// | `RECEPTOR_CONTROLLER_QUEUE_AUTO_ACK` | auto ack |
    /// | `RECEPTOR_CONTROLLER_QUEUE_MAX_BYTES` | fetch limit |
    /// | `RECEPTOR_CONTROLLER_QUEUE_PERSIST_REF` | consumer group |
    /// | `RECEPTOR_CONTROLLER_RESPONSE_TIMEOUT` | seconds |
    /// | `RECEPTOR_CONTROLLER_RESPONSE_TIMEOUT_POLL_TIME` | seconds |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVar`] when a numeric or boolean variable
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut config = Self::default();

        if let Some(scheme) = var("SCHEME") {
            config.set_controller_scheme(&scheme);
        }
        if let Some(host) = var("HOST") {
            config.set_controller_host(&host);
        }
        if let Some(psk) = var("PSK") {
            config.pre_shared_key = Some(psk);
        }
        if let Some(host) = var("QUEUE_HOST") {
            config.queue_host = Some(host);
        }
        if let Some(port) = var("QUEUE_PORT") {
            config.queue_port = Some(parse_var("QUEUE_PORT", &port)?);
        }
        if let Some(topic) = var("QUEUE_TOPIC") {
            config.queue_topic = topic;
        }
        if let Some(auto_ack) = var("QUEUE_AUTO_ACK") {
            config.queue_auto_ack = parse_var("QUEUE_AUTO_ACK", &auto_ack)?;
        }
        if let Some(max_bytes) = var("QUEUE_MAX_BYTES") {
            config.queue_max_bytes = Some(parse_var("QUEUE_MAX_BYTES", &max_bytes)?);
        }
        if let Some(group) = var("QUEUE_PERSIST_REF") {
            config.queue_persist_ref = Some(group);
        }
        if let Some(timeout) = var("RESPONSE_TIMEOUT") {
            config.response_timeout_secs = parse_var("RESPONSE_TIMEOUT", &timeout)?;
        }
        if let Some(poll) = var("RESPONSE_TIMEOUT_POLL_TIME") {
            config.response_timeout_poll_secs = parse_var("RESPONSE_TIMEOUT_POLL_TIME", &poll)?;
        }

        Ok(config)
    }

    /// Check for values that cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller_host.is_empty() {
            return Err(ConfigError::Validation("controller host cannot be empty".to_string()));
        }
        if self.queue_topic.is_empty() {
            return Err(ConfigError::Validation("queue topic cannot be empty".to_string()));
        }
        if self.queue_port.is_some() && self.queue_host.is_none() {
            return Err(ConfigError::Validation(
                "queue port is set but queue host is not".to_string(),
            ));
        }
        if self.response_timeout_poll_secs == 0 {
            return Err(ConfigError::Validation(
                "response timeout poll time must be at least one second".to_string(),
            ));
        }
        if self.response_timeout_poll_secs > self.response_timeout_secs {
            return Err(ConfigError::Validation(
                "response timeout poll time must not exceed the response timeout".to_string(),
            ));
        }
        Ok(())
    }

    /// Scheme of the controller URL, without `://`.
    #[must_use]
    pub fn controller_scheme(&self) -> &str {
        &self.controller_scheme
    }

    /// Set the scheme. A trailing `://` is removed.
    pub fn set_controller_scheme(&mut self, scheme: &str) {
        self.controller_scheme = scheme.replacen("://", "", 1);
    }

    /// Host (and port) of the controller.
    #[must_use]
    pub fn controller_host(&self) -> &str {
        &self.controller_host
    }

    /// Set the host. Any `http://`/`https://` prefix and everything from the
    /// first `/` on are removed.
    pub fn set_controller_host(&mut self, host: &str) {
        let host = host
            .strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(host);
        self.controller_host = host.split('/').next().unwrap_or_default().to_string();
    }

    /// `scheme://host` without trailing slashes.
    #[must_use]
    pub fn controller_url(&self) -> String {
        format!("{}://{}", self.controller_scheme, self.controller_host)
            .trim_end_matches('/')
            .to_string()
    }

    /// URL of connection status requests.
    #[must_use]
    pub fn connection_status_url(&self) -> String {
        join_url(&self.controller_url(), &self.connection_status_path)
    }

    /// URL of directive requests.
    #[must_use]
    pub fn job_url(&self) -> String {
        join_url(&self.controller_url(), &self.job_path)
    }

    /// `host:port` of the broker, when configured.
    #[must_use]
    pub fn queue_brokers(&self) -> Option<String> {
        let host = self.queue_host.as_deref()?;
        Some(self.queue_port.map_or_else(|| host.to_string(), |port| format!("{host}:{port}")))
    }

    /// [`Self::response_timeout_secs`] as a duration.
    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// [`Self::response_timeout_poll_secs`] as a duration.
    #[must_use]
    pub const fn response_timeout_poll_time(&self) -> Duration {
        Duration::from_secs(self.response_timeout_poll_secs)
    }

    /// Subscription options for the responses topic.
    #[must_use]
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            topic: self.queue_topic.clone(),
            auto_ack: self.queue_auto_ack,
            max_bytes: self.queue_max_bytes,
            persist_ref: self.queue_persist_ref.clone(),
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn parse_var<T>(suffix: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::EnvVar {
        name: format!("{ENV_PREFIX}{suffix}"),
        reason: e.to_string(),
    })
}
