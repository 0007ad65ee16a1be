//! Response correlation.
//!
//! The [`ResponseCorrelator`] listens on the responses topic and routes every
//! envelope to the receiver registered under its `in_response_to` id.
//!
//! # Lifecycle of a correlation
//!
//! ```text
//!  register(id)                       ┌──────────────────────────────┐
//!  ───────────► pending ──response──► │ received += 1, forward chunk │ ─┐
//!                  │  ▲               └──────────────────────────────┘  │
//!                  │  └─────────────────────────────────────────────────┘
//!                  │
//!                  ├──eof(serial)──► expected = serial
//!                  │                 received == expected ──► removed, terminal eof callback
//!                  ├──code != 0───► removed, error callback
//!                  └──silent > timeout──► removed by sweep, timeout callback
//! ```
//!
//! Every envelope for an id refreshes its activity timestamp, so long
//! multi-chunk streams never time out halfway through.
//!
//! # Shared topic
//!
//! All instances of a service subscribe without a consumer group and see every
//! envelope. An envelope whose id is not registered here most likely belongs
//! to a sibling instance and is dropped without complaint.
//!
//! # Example
//!
//! ```rust,ignore
//! let correlator = ResponseCorrelator::new(CorrelatorSettings::from(&config), source);
//! correlator.start();
//!
//! correlator.register(id, receiver);
//! // ... receiver callbacks fire as envelopes arrive ...
//!
//! correlator.stop().await;
//! ```

use crate::metrics::{
    CALLBACK_PANICS, CORRELATIONS_COMPLETED, CORRELATIONS_FAILED, CORRELATIONS_TIMED_OUT,
    ENVELOPES_MALFORMED, ENVELOPES_RECEIVED, ENVELOPES_UNMATCHED, PENDING_CORRELATIONS,
};
use crate::receiver::ResponseReceiver;
use dashmap::DashMap;
use futures::StreamExt;
use receptor_client_core::codec::decode_payload;
use receptor_client_core::{
    Configuration, CorrelationId, InboundMessage, MessageType, ResponseEnvelope, ResponseSource,
    SubscribeOptions,
};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Timing and subscription settings of a [`ResponseCorrelator`].
#[derive(Debug, Clone)]
pub struct CorrelatorSettings {
    /// Silence after which a pending correlation is evicted
    pub response_timeout: Duration,
    /// Pause between timeout sweeps
    pub poll_interval: Duration,
    /// Subscription to the responses topic
    pub subscribe: SubscribeOptions,
}

/// Floor for the sweep interval taken from a [`Configuration`].
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

impl From<&Configuration> for CorrelatorSettings {
    fn from(config: &Configuration) -> Self {
        Self {
            response_timeout: config.response_timeout(),
            poll_interval: config.response_timeout_poll_time().max(MIN_POLL_INTERVAL),
            subscribe: config.subscribe_options(),
        }
    }
}

/// Progress of one pending correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStatus {
    /// Data chunks received so far
    pub received_chunks: u64,
    /// Total announced by the end marker, once it has arrived
    pub expected_chunks: Option<u64>,
    /// Size of all envelopes received for this id
    pub accumulated_bytes: usize,
    /// Time since the last envelope (or registration)
    pub idle_for: Duration,
}

struct PendingCorrelation {
    receiver: Arc<dyn ResponseReceiver>,
    last_activity_at: Instant,
    received_chunks: u64,
    expected_chunks: Option<u64>,
    accumulated_bytes: usize,
}

impl PendingCorrelation {
    fn new(receiver: Arc<dyn ResponseReceiver>) -> Self {
        Self {
            receiver,
            last_activity_at: Instant::now(),
            received_chunks: 0,
            expected_chunks: None,
            accumulated_bytes: 0,
        }
    }

    fn touch(&mut self, bytes: usize) {
        self.last_activity_at = Instant::now();
        self.accumulated_bytes += bytes;
    }

    fn is_complete(&self) -> bool {
        self.expected_chunks == Some(self.received_chunks)
    }

    fn is_expired(&self, now: Instant, threshold: Duration) -> bool {
        now.saturating_duration_since(self.last_activity_at) > threshold
    }

    fn status(&self) -> PendingStatus {
        PendingStatus {
            received_chunks: self.received_chunks,
            expected_chunks: self.expected_chunks,
            accumulated_bytes: self.accumulated_bytes,
            idle_for: self.last_activity_at.elapsed(),
        }
    }
}

/// What routing an envelope asks for once the table entry is released.
enum Routed {
    Failed {
        receiver: Arc<dyn ResponseReceiver>,
        code: i64,
        payload: Value,
    },
    Delivered {
        receiver: Arc<dyn ResponseReceiver>,
        chunk: Option<(MessageType, Value)>,
        terminal: Option<Value>,
    },
}

struct Shared {
    settings: CorrelatorSettings,
    source: Arc<dyn ResponseSource>,
    pending: DashMap<CorrelationId, PendingCorrelation>,
}

struct Workers {
    shutdown: watch::Sender<bool>,
    listener: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// Routes asynchronous response envelopes to registered receivers.
///
/// Owns the table of pending correlations and two background tasks: a
/// listener pulling envelopes from the [`ResponseSource`] and a sweeper
/// evicting correlations that stayed silent for longer than the response
/// timeout. The table is a sharded concurrent map; no lock is ever held across
/// a whole sweep, or while a receiver callback runs.
pub struct ResponseCorrelator {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl ResponseCorrelator {
    /// Create a stopped correlator.
    #[must_use]
    pub fn new(settings: CorrelatorSettings, source: Arc<dyn ResponseSource>) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                source,
                pending: DashMap::new(),
            }),
            workers: Mutex::new(None),
        }
    }

    /// Correlator settings.
    #[must_use]
    pub fn settings(&self) -> &CorrelatorSettings {
        &self.shared.settings
    }

    /// Start the listener and sweep tasks. Does nothing if already started.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if workers.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(Arc::clone(&self.shared).sweep(shutdown_rx));
        let listener = tokio::spawn(Arc::clone(&self.shared).listen());

        tracing::info!(
            topic = %self.shared.settings.subscribe.topic,
            response_timeout = ?self.shared.settings.response_timeout,
            poll_interval = ?self.shared.settings.poll_interval,
            "Response correlator started"
        );

        *workers = Some(Workers {
            shutdown,
            listener,
            sweeper,
        });
    }

    /// Stop both background tasks. Does nothing if not started.
    ///
    /// The sweeper is signalled and joined; the listener is cancelled at its
    /// next suspension point. Pending correlations stay registered, and
    /// callback tasks already dispatched keep running.
    pub async fn stop(&self) {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(workers) = workers else {
            return;
        };

        workers.shutdown.send_replace(true);
        workers.listener.abort();

        if let Err(e) = workers.sweeper.await {
            tracing::warn!(error = %e, "Timeout sweeper ended abnormally");
        }
        if let Err(e) = workers.listener.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "Response listener ended abnormally");
            }
        }

        tracing::info!(
            pending = self.shared.pending.len(),
            "Response correlator stopped"
        );
    }

    /// Whether the background tasks are running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Route responses for `id` to `receiver`.
    ///
    /// Registering an id that is already pending replaces the previous
    /// receiver and restarts its progress.
    pub fn register(&self, id: CorrelationId, receiver: Arc<dyn ResponseReceiver>) {
        tracing::debug!(correlation_id = %id, "Registering response correlation");
        if self
            .shared
            .pending
            .insert(id.clone(), PendingCorrelation::new(receiver))
            .is_some()
        {
            tracing::debug!(correlation_id = %id, "Replaced existing registration");
        }
        self.shared.record_pending();
    }

    /// Whether `id` is still waiting for responses.
    #[must_use]
    pub fn is_registered(&self, id: &CorrelationId) -> bool {
        self.shared.pending.contains_key(id)
    }

    /// Number of correlations waiting for responses.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Progress of a pending correlation.
    #[must_use]
    pub fn status(&self, id: &CorrelationId) -> Option<PendingStatus> {
        self.shared.pending.get(id).map(|entry| entry.status())
    }

    /// Route one inbound message and acknowledge it when auto-ack is off.
    ///
    /// Malformed messages are logged and dropped; receiver panics are logged
    /// and swallowed.
    pub fn process_message(&self, message: InboundMessage) {
        self.shared.process_message(message);
    }

    /// Evict every correlation silent for longer than the response timeout
    /// and fire its timeout callback. Returns the number evicted.
    pub fn check_timeouts(&self) -> usize {
        self.shared.check_timeouts()
    }
}

impl Drop for ResponseCorrelator {
    fn drop(&mut self) {
        if let Some(workers) = self
            .workers
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            workers.shutdown.send_replace(true);
            workers.listener.abort();
        }
    }
}

impl Shared {
    async fn listen(self: Arc<Self>) {
        let topic = self.settings.subscribe.topic.clone();
        let mut stream = match self.source.subscribe(self.settings.subscribe.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "Response listener failed to subscribe");
                return;
            },
        };

        tracing::info!(topic = %topic, "Response listener started");

        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => self.process_message(message),
                Err(e) => {
                    tracing::error!(topic = %topic, error = %e, "Failed to receive response message");
                },
            }
        }

        tracing::warn!(topic = %topic, "Response stream ended, listener exiting");
    }

    async fn sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.check_timeouts();

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
                () = tokio::time::sleep(self.settings.poll_interval) => {},
            }
        }

        tracing::debug!("Timeout sweeper exiting");
    }

    fn process_message(&self, message: InboundMessage) {
        self.route(message.payload());

        if !self.settings.subscribe.auto_ack {
            if let Err(e) = message.ack() {
                tracing::warn!(error = %e, "Failed to acknowledge response message");
            }
        }
    }

    fn route(&self, bytes: &[u8]) {
        metrics::counter!(ENVELOPES_RECEIVED).increment(1);

        let envelope = match ResponseEnvelope::parse(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::counter!(ENVELOPES_MALFORMED).increment(1);
                tracing::error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(bytes),
                    "Failed to parse response envelope"
                );
                return;
            },
        };

        let Some(id) = envelope.in_response_to.clone() else {
            metrics::counter!(ENVELOPES_MALFORMED).increment(1);
            tracing::error!(envelope = ?envelope, "Message id (in_response_to) not received");
            return;
        };

        let Some(routed) = self.advance(&id, envelope, bytes.len()) else {
            metrics::counter!(ENVELOPES_UNMATCHED).increment(1);
            tracing::trace!(correlation_id = %id, "Envelope not registered here, ignoring");
            return;
        };

        match routed {
            Routed::Failed {
                receiver,
                code,
                payload,
            } => {
                if self.remove_owned(&id, &receiver).is_some() {
                    metrics::counter!(CORRELATIONS_FAILED).increment(1);
                    tracing::debug!(correlation_id = %id, code, "Error response received");
                    invoke(&id, "error", || receiver.error_callback(&id, code, payload));
                }
            },
            Routed::Delivered {
                receiver,
                chunk,
                terminal,
            } => {
                if let Some((kind, payload)) = chunk {
                    invoke(&id, "response", || {
                        receiver.response_callback(&id, kind, payload);
                    });
                }
                if let Some(payload) = terminal {
                    if let Some(finished) = self.remove_owned(&id, &receiver) {
                        metrics::counter!(CORRELATIONS_COMPLETED).increment(1);
                        tracing::debug!(
                            correlation_id = %id,
                            chunks = finished.received_chunks,
                            bytes = finished.accumulated_bytes,
                            "Response stream complete"
                        );
                        invoke(&id, "response", || {
                            receiver.response_callback(&id, MessageType::Eof, payload);
                        });
                    }
                }
            },
        }
    }

    /// Update the entry for `id` and decide which callbacks to run.
    ///
    /// The entry's shard lock is released before returning.
    fn advance(&self, id: &CorrelationId, envelope: ResponseEnvelope, bytes: usize) -> Option<Routed> {
        let mut entry = self.pending.get_mut(id)?;
        entry.touch(bytes);
        let receiver = Arc::clone(&entry.receiver);

        if !envelope.is_success() {
            return Some(Routed::Failed {
                receiver,
                code: envelope.code,
                payload: envelope.payload,
            });
        }

        let payload = decode_payload(&envelope.payload);
        let chunk = match envelope.message_type {
            MessageType::Eof => {
                // Without a serial, everything received so far is the whole stream.
                entry.expected_chunks = Some(envelope.serial.unwrap_or(entry.received_chunks));
                None
            },
            MessageType::Response => {
                entry.received_chunks += 1;
                Some((MessageType::Response, payload.clone()))
            },
            other @ MessageType::Other(_) => Some((other, payload.clone())),
        };

        let terminal = entry.is_complete().then_some(payload);

        tracing::trace!(
            correlation_id = %id,
            received = entry.received_chunks,
            expected = ?entry.expected_chunks,
            "Envelope routed"
        );

        Some(Routed::Delivered {
            receiver,
            chunk,
            terminal,
        })
    }

    /// Remove `id` only while it still routes to `receiver`.
    ///
    /// A re-registration between [`Self::advance`] and here keeps its entry.
    fn remove_owned(
        &self,
        id: &CorrelationId,
        receiver: &Arc<dyn ResponseReceiver>,
    ) -> Option<PendingCorrelation> {
        let removed = self
            .pending
            .remove_if(id, |_, pending| Arc::ptr_eq(&pending.receiver, receiver))
            .map(|(_, pending)| pending);
        self.record_pending();
        removed
    }

    fn check_timeouts(&self) -> usize {
        let threshold = self.settings.response_timeout;
        let now = Instant::now();

        // Collect first: iteration holds a read lock on one shard at a time.
        let expired: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| entry.is_expired(now, threshold))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in expired {
            // Activity may have arrived since the scan.
            let Some((id, pending)) = self
                .pending
                .remove_if(&id, |_, pending| pending.is_expired(Instant::now(), threshold))
            else {
                continue;
            };

            evicted += 1;
            metrics::counter!(CORRELATIONS_TIMED_OUT).increment(1);
            tracing::debug!(
                correlation_id = %id,
                received = pending.received_chunks,
                "Response timed out"
            );
            invoke(&id, "timeout", || pending.receiver.timeout_callback(&id));
        }

        if evicted > 0 {
            self.record_pending();
        }
        evicted
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_pending(&self) {
        metrics::gauge!(PENDING_CORRELATIONS).set(self.pending.len() as f64);
    }
}

fn invoke(id: &CorrelationId, callback: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        metrics::counter!(CALLBACK_PANICS).increment(1);
        tracing::warn!(correlation_id = %id, callback, "Receiver callback panicked");
    }
}
