//! # Receptor Client HTTP
//!
//! [`JobTransport`] over [`reqwest`], used for `POST /job` and
//! `POST /connection/status` against the receptor controller.
//!
//! Non-2xx answers are returned as ordinary [`TransportResponse`]s; only
//! failures to reach the controller or read its answer are errors.
//!
//! ## Example
//!
//! ```ignore
//! use receptor_client_http::HttpJobTransport;
//!
//! let transport = HttpJobTransport::with_timeout(Duration::from_secs(30))?;
//! let client = ReceptorClient::new(config, Arc::new(transport), source);
//! ```

use receptor_client_core::{JobTransport, TransportError, TransportResponse};
use reqwest::{Client, Method};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// HTTP job transport
#[derive(Clone, Debug, Default)]
pub struct HttpJobTransport {
    client: Client,
}

impl HttpJobTransport {
    /// Create a transport without a request timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose requests fail after `timeout`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the TLS backend cannot be
    /// initialized
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

impl From<Client> for HttpJobTransport {
    fn from(client: Client) -> Self {
        Self { client }
    }
}

fn classify(error: &reqwest::Error) -> TransportError {
    if error.is_connect() {
        TransportError::ConnectionFailed(error.to_string())
    } else {
        TransportError::RequestFailed(error.to_string())
    }
}

impl JobTransport for HttpJobTransport {
    fn send_request(
        &self,
        method: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|e| TransportError::RequestFailed(format!("invalid method {method}: {e}")));
        let url = url.to_string();
        let body = body.clone();
        let headers = headers.to_vec();

        Box::pin(async move {
            let mut request = self.client.request(method?, &url).json(&body);
            for (name, value) in &headers {
                request = request.header(name.as_str(), value.as_str());
            }

            tracing::debug!(url = %url, "Sending controller request");

            let response = request.send().await.map_err(|e| {
                tracing::error!(url = %url, error = %e, "Controller request failed");
                classify(&e)
            })?;

            let status = response.status().as_u16();
            let body = response.text().await.map_err(|e| classify(&e))?;

            tracing::debug!(url = %url, status, "Controller responded");
            Ok(TransportResponse::new(status, body))
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn headers() -> Vec<(String, String)> {
        vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("x-rh-rbac-psk".to_string(), "secret".to_string()),
        ]
    }

    #[tokio::test]
    async fn posts_json_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/job"))
            .and(header("x-rh-rbac-psk", "secret"))
            .and(body_json(json!({"directive": "receptor:ping"})))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":"m1"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let response = HttpJobTransport::new()
            .send_request(
                "POST",
                &format!("{}/job", server.uri()),
                &json!({"directive": "receptor:ping"}),
                &headers(),
            )
            .await
            .unwrap();

        assert_eq!(response, TransportResponse::new(201, r#"{"id":"m1"}"#));
    }

    #[tokio::test]
    async fn error_statuses_are_responses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let response = HttpJobTransport::new()
            .send_request("POST", &server.uri(), &json!({}), &headers())
            .await
            .unwrap();

        assert!(!response.is_success());
        assert_eq!(response.body, "down");
    }

    #[tokio::test]
    async fn unreachable_controller_is_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/job", listener.local_addr().unwrap());
        drop(listener);

        let result = HttpJobTransport::new()
            .send_request("POST", &url, &json!({}), &headers())
            .await;

        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn slow_controller_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = HttpJobTransport::with_timeout(Duration::from_millis(100)).unwrap();
        let result = transport
            .send_request("POST", &server.uri(), &json!({}), &headers())
            .await;

        assert!(matches!(result, Err(TransportError::RequestFailed(_))));
    }

    #[test]
    fn invalid_method_is_rejected() {
        let result = tokio_test::block_on(HttpJobTransport::new().send_request(
            "NOT A METHOD",
            "http://localhost/job",
            &json!({}),
            &[],
        ));
        assert!(matches!(result, Err(TransportError::RequestFailed(_))));
    }
}
