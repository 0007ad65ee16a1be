//! In-memory transports.

use async_stream::stream;
use receptor_client_core::{
    InboundMessage, InboundStream, JobTransport, ResponseSource, SubscribeOptions,
    TransportError, TransportResponse,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

type Item = Result<InboundMessage, TransportError>;

/// Responses topic backed by an unbounded channel.
///
/// Messages published before the subscription are buffered. Only one
/// subscription is served; the stream ends when [`close`](Self::close) is
/// called. Every message carries an acknowledge operation counted by
/// [`acks`](Self::acks).
#[derive(Clone)]
pub struct InMemoryResponseSource {
    inner: Arc<SourceInner>,
}

struct SourceInner {
    sender: Mutex<Option<mpsc::UnboundedSender<Item>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Item>>>,
    subscriptions: Mutex<Vec<SubscribeOptions>>,
    acks: Arc<AtomicUsize>,
    reject_subscribe: bool,
}

impl InMemoryResponseSource {
    /// Create an open topic.
    #[must_use]
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create a topic whose subscription always fails.
    #[must_use]
    pub fn unreachable() -> Self {
        Self::build(true)
    }

    fn build(reject_subscribe: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(SourceInner {
                sender: Mutex::new(Some(sender)),
                receiver: Mutex::new(Some(receiver)),
                subscriptions: Mutex::new(Vec::new()),
                acks: Arc::new(AtomicUsize::new(0)),
                reject_subscribe,
            }),
        }
    }

    /// Wrap for use as a trait object.
    #[must_use]
    pub fn into_shared(self) -> Arc<dyn ResponseSource> {
        Arc::new(self)
    }

    /// Publish an envelope serialized as JSON.
    pub fn publish_json(&self, envelope: &Value) {
        self.publish_raw(envelope.to_string().into_bytes());
    }

    /// Publish raw bytes.
    pub fn publish_raw(&self, payload: Vec<u8>) {
        let acks = Arc::clone(&self.inner.acks);
        let message = InboundMessage::new(payload).with_ack(move || {
            acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        self.send(Ok(message));
    }

    /// Publish a receive failure.
    pub fn publish_error(&self, error: TransportError) {
        self.send(Err(error));
    }

    /// End the stream after the messages already published.
    pub fn close(&self) {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Number of messages acknowledged.
    #[must_use]
    pub fn acks(&self) -> usize {
        self.inner.acks.load(Ordering::SeqCst)
    }

    /// Options of every subscription attempt.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscribeOptions> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send(&self, item: Item) {
        if let Some(sender) = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            // The receiver lives as long as the source; a dropped stream just discards.
            let _ = sender.send(item);
        }
    }
}

impl Default for InMemoryResponseSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSource for InMemoryResponseSource {
    fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Pin<Box<dyn Future<Output = Result<InboundStream, TransportError>> + Send + '_>> {
        Box::pin(async move {
            self.inner
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(options.clone());

            if self.inner.reject_subscribe {
                return Err(TransportError::SubscriptionFailed {
                    topic: options.topic,
                    reason: "broker unreachable".to_string(),
                });
            }

            let receiver = self
                .inner
                .receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            let Some(mut receiver) = receiver else {
                return Err(TransportError::SubscriptionFailed {
                    topic: options.topic,
                    reason: "already subscribed".to_string(),
                });
            };

            let messages: InboundStream = Box::pin(stream! {
                while let Some(item) = receiver.recv().await {
                    yield item;
                }
            });
            Ok(messages)
        })
    }
}

/// One request seen by a [`MockJobTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: String,
    /// Target URL
    pub url: String,
    /// JSON body
    pub body: Value,
    /// Request headers
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    /// Value of the header `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Job transport answering from a script.
///
/// Each request pops the next scripted outcome; an empty script yields
/// [`TransportError::ConnectionFailed`].
#[derive(Clone, Default)]
pub struct MockJobTransport {
    script: Arc<Mutex<VecDeque<Result<TransportResponse, TransportError>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockJobTransport {
    /// Create a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap for use as a trait object.
    #[must_use]
    pub fn into_shared(self) -> Arc<dyn JobTransport> {
        Arc::new(self)
    }

    /// Queue a response with `status` and `body`.
    pub fn respond_with(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push(Ok(TransportResponse::new(status, body)));
        self
    }

    /// Queue the controller's acceptance of a job with `id`.
    pub fn accept_job(&self, id: &str) -> &Self {
        self.respond_with(201, json!({"id": id}).to_string())
    }

    /// Queue a transport failure.
    pub fn fail_with(&self, error: TransportError) -> &Self {
        self.push(Err(error));
        self
    }

    /// Requests sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, outcome: Result<TransportResponse, TransportError>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }
}

impl JobTransport for MockJobTransport {
    fn send_request(
        &self,
        method: &str,
        url: &str,
        body: &Value,
        headers: &[(String, String)],
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                method: method.to_string(),
                url: url.to_string(),
                body: body.clone(),
                headers: headers.to_vec(),
            });

        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(TransportError::ConnectionFailed(format!(
                    "no scripted response for {method} {url}"
                )))
            });

        Box::pin(async move { outcome })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn buffered_messages_are_delivered_and_acked() {
        let source = InMemoryResponseSource::new();
        source.publish_json(&json!({"in_response_to": "m1"}));
        source.close();

        let mut stream = source.subscribe(SubscribeOptions::new("responses")).await.unwrap();
        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.payload(), br#"{"in_response_to":"m1"}"#);
        message.ack().unwrap();

        assert!(stream.next().await.is_none());
        assert_eq!(source.acks(), 1);
    }

    #[tokio::test]
    async fn second_subscription_is_rejected() {
        let source = InMemoryResponseSource::new();
        assert!(source.subscribe(SubscribeOptions::new("t")).await.is_ok());
        assert!(matches!(
            source.subscribe(SubscribeOptions::new("t")).await,
            Err(TransportError::SubscriptionFailed { .. })
        ));
        assert_eq!(source.subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn transport_follows_script_then_fails() {
        let transport = MockJobTransport::new();
        transport.accept_job("m1").respond_with(500, "boom");

        let first = transport.send_request("POST", "http://c/job", &json!({}), &[]).await.unwrap();
        assert_eq!(first.status, 201);
        let second = transport.send_request("POST", "http://c/job", &json!({}), &[]).await.unwrap();
        assert!(!second.is_success());
        assert!(transport.send_request("POST", "http://c/job", &json!({}), &[]).await.is_err());
        assert_eq!(transport.requests().len(), 3);
    }
}
