//! Kafka/Redpanda response source for the receptor controller client.
//!
//! Implements [`ResponseSource`] with rdkafka. The receptor controller
//! publishes every node response to one shared topic; each client instance
//! reads the whole topic and keeps only the envelopes it is waiting for.
//!
//! # Consumer groups
//!
//! - **`persist_ref` set**: it becomes the `group.id`. Instances sharing it
//!   split the partitions between them, and the group's committed offsets
//!   survive restarts.
//! - **`persist_ref` unset**: every subscription gets a fresh, unique group,
//!   so each instance sees every message, starting from the latest offset.
//!
//! # Acknowledgement
//!
//! With `auto_ack` the consumer commits offsets on its own
//! (`enable.auto.commit`). Without it, every [`InboundMessage`] carries an
//! acknowledge operation committing the offset after that message.
//!
//! # Example
//!
//! ```no_run
//! use receptor_client_core::{ResponseSource, SubscribeOptions};
//! use receptor_client_redpanda::RedpandaResponseSource;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = RedpandaResponseSource::new("localhost:9092")?;
//!
//! let mut stream = source
//!     .subscribe(SubscribeOptions::new("platform.receptor-controller.responses"))
//!     .await?;
//! while let Some(message) = stream.next().await {
//!     let message = message?;
//!     println!("{}", String::from_utf8_lossy(message.payload()));
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use receptor_client_core::{
    Configuration, InboundMessage, InboundStream, ResponseSource, SubscribeOptions,
    TransportError,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(6);

/// Response source reading the controller's responses topic.
///
/// Each [`subscribe`](ResponseSource::subscribe) call creates its own
/// consumer, owned by a background task that forwards messages through a
/// bounded channel.
#[derive(Debug, Clone)]
pub struct RedpandaResponseSource {
    brokers: String,
    client_ref: String,
    buffer_size: usize,
    auto_offset_reset: String,
    session_timeout: Duration,
}

impl RedpandaResponseSource {
    /// Source with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if `brokers` is empty.
    pub fn new(brokers: &str) -> Result<Self, TransportError> {
        Self::builder().brokers(brokers).build()
    }

    /// Source for the broker named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if no queue host is configured.
    pub fn from_config(config: &Configuration) -> Result<Self, TransportError> {
        let brokers = config.queue_brokers().ok_or_else(|| {
            TransportError::ConnectionFailed("Queue host not configured".to_string())
        })?;
        Self::new(&brokers)
    }

    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RedpandaResponseSourceBuilder {
        RedpandaResponseSourceBuilder::default()
    }

    /// Broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn group_id(&self, options: &SubscribeOptions) -> String {
        options.persist_ref.clone().unwrap_or_else(|| {
            let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            format!("{}-{}-{stamp}", self.client_ref, std::process::id())
        })
    }

    fn consumer_config(&self, options: &SubscribeOptions) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_ref)
            .set("group.id", self.group_id(options))
            .set("enable.auto.commit", options.auto_ack.to_string())
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");

        if let Some(max_bytes) = options.max_bytes {
            config.set("fetch.max.bytes", max_bytes.to_string());
        }

        config
    }
}

/// Builder for [`RedpandaResponseSource`].
#[derive(Default)]
pub struct RedpandaResponseSourceBuilder {
    brokers: Option<String>,
    client_ref: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaResponseSourceBuilder {
    /// Comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Client id, also the prefix of generated group ids.
    ///
    /// Default: `receptor-client`
    #[must_use]
    pub fn client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }

    /// Messages buffered between the consumer and the subscriber.
    ///
    /// Default: 1000. Zero is replaced by the default.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where a group without committed offsets starts reading.
    ///
    /// Default: `latest`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Consumer session timeout.
    ///
    /// Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the source. No connection is made until subscription.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if brokers are missing or empty.
    pub fn build(self) -> Result<RedpandaResponseSource, TransportError> {
        let brokers = self
            .brokers
            .filter(|brokers| !brokers.trim().is_empty())
            .ok_or_else(|| TransportError::ConnectionFailed("Brokers not configured".to_string()))?;

        Ok(RedpandaResponseSource {
            brokers,
            client_ref: self.client_ref.unwrap_or_else(|| "receptor-client".to_string()),
            buffer_size: self
                .buffer_size
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_BUFFER_SIZE),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
            session_timeout: self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT),
        })
    }
}

fn commit_after(
    consumer: &StreamConsumer,
    topic: &str,
    partition: i32,
    offset: i64,
) -> Result<(), TransportError> {
    let mut offsets = TopicPartitionList::new();
    offsets
        .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
        .map_err(|e| TransportError::AckFailed(e.to_string()))?;
    consumer
        .commit(&offsets, CommitMode::Async)
        .map_err(|e| TransportError::AckFailed(e.to_string()))
}

impl ResponseSource for RedpandaResponseSource {
    fn subscribe(
        &self,
        options: SubscribeOptions,
    ) -> Pin<Box<dyn Future<Output = Result<InboundStream, TransportError>> + Send + '_>> {
        let config = self.consumer_config(&options);
        let buffer_size = self.buffer_size;

        Box::pin(async move {
            let topic = options.topic.clone();
            let consumer: StreamConsumer =
                config.create().map_err(|e| TransportError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| TransportError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                group_id = config.get("group.id").unwrap_or_default(),
                auto_ack = options.auto_ack,
                max_bytes = ?options.max_bytes,
                "Subscribed to responses topic"
            );

            let consumer = Arc::new(consumer);
            let manual_ack = !options.auto_ack;
            let (tx, mut rx) = tokio::sync::mpsc::channel(buffer_size);

            // The task owns the consumer and forwards messages
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(received) = stream.next().await {
                    let item = match received {
                        Ok(message) => {
                            tracing::trace!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Received response message"
                            );

                            let inbound =
                                InboundMessage::new(message.payload().unwrap_or_default().to_vec());
                            if manual_ack {
                                let consumer = Arc::clone(&consumer);
                                let (topic, partition, offset) = (
                                    message.topic().to_string(),
                                    message.partition(),
                                    message.offset(),
                                );
                                Ok(inbound.with_ack(move || {
                                    commit_after(&consumer, &topic, partition, offset)
                                }))
                            } else {
                                Ok(inbound)
                            }
                        },
                        Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
                    };

                    if tx.send(item).await.is_err() {
                        tracing::debug!("Response stream dropped, exiting consumer task");
                        break;
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as InboundStream)
        })
    }
}
