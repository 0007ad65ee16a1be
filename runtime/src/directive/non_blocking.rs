//! Non-blocking directive.

use super::Directive;
use crate::dispatch::DispatchTracker;
use crate::receiver::ResponseReceiver;
use receptor_client_core::{CorrelationId, MessageType};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

type SuccessCallback = Arc<dyn Fn(&CorrelationId, &Value) + Send + Sync>;
type EofCallback = Arc<dyn Fn(&CorrelationId) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&CorrelationId, i64, &Value) + Send + Sync>;
type TimeoutCallback = Arc<dyn Fn(&CorrelationId) + Send + Sync>;

struct Handlers {
    success: Mutex<Vec<SuccessCallback>>,
    eof: Mutex<Vec<EofCallback>>,
    error: Mutex<Vec<ErrorCallback>>,
    timeout: Mutex<Vec<TimeoutCallback>>,
    tracker: DispatchTracker,
}

fn snapshot<T: Clone>(list: &Mutex<Vec<T>>) -> Vec<T> {
    list.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

fn push<T>(list: &Mutex<Vec<T>>, item: T) {
    list.lock().unwrap_or_else(PoisonError::into_inner).push(item);
}

/// Run every callback, isolating panics so the rest of the list still fires.
fn run_each<T>(id: &CorrelationId, kind: &'static str, callbacks: &[T], f: impl Fn(&T)) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| f(callback))).is_err() {
            tracing::warn!(correlation_id = %id, callback = kind, "Directive callback panicked");
        }
    }
}

impl Handlers {
    fn new() -> Self {
        Self {
            success: Mutex::new(Vec::new()),
            eof: Mutex::new(Vec::new()),
            error: Mutex::new(Vec::new()),
            timeout: Mutex::new(Vec::new()),
            tracker: DispatchTracker::new(),
        }
    }
}

impl ResponseReceiver for Handlers {
    fn response_callback(&self, id: &CorrelationId, kind: MessageType, payload: Value) {
        let id = id.clone();

        if kind == MessageType::Eof {
            let callbacks = snapshot(&self.eof);
            self.tracker.spawn_after_idle(move || {
                run_each(&id, "eof", &callbacks, |f| f(&id));
            });
            return;
        }

        if let MessageType::Other(other) = &kind {
            tracing::debug!(correlation_id = %id, message_type = %other, "Dispatching unknown message type as success");
        }

        let callbacks = snapshot(&self.success);
        self.tracker.spawn_tracked(move || {
            run_each(&id, "success", &callbacks, |f| f(&id, &payload));
        });
    }

    fn error_callback(&self, id: &CorrelationId, code: i64, payload: Value) {
        let id = id.clone();
        let callbacks = snapshot(&self.error);
        self.tracker.spawn_tracked(move || {
            run_each(&id, "error", &callbacks, |f| f(&id, code, &payload));
        });
    }

    fn timeout_callback(&self, id: &CorrelationId) {
        let id = id.clone();
        let callbacks = snapshot(&self.timeout);
        self.tracker.spawn_tracked(move || {
            run_each(&id, "timeout", &callbacks, |f| f(&id));
        });
    }
}

/// Directive whose `call` returns the correlation id right away.
///
/// Responses are delivered to the registered callbacks, each batch on its
/// own blocking-pool task so callbacks may issue further requests. Every
/// success callback of a stream finishes before its `on_eof` callbacks start.
///
/// Callbacks of one kind fire in registration order. They are read when a
/// response arrives, so registering after `call` is allowed but may miss
/// responses that arrived first.
///
/// ```rust,ignore
/// let directive = client.non_blocking_directive("0000001", "node-a", payload, "receptor:ping");
/// directive
///     .on_success(|id, response| println!("{id}: {response}"))
///     .on_error(|id, code, response| eprintln!("{id} failed with {code}: {response}"))
///     .on_timeout(|id| eprintln!("{id} timed out"))
///     .on_eof(|id| println!("{id} done"));
///
/// let id = directive.call(None).await;
/// ```
pub struct DirectiveNonBlocking {
    directive: Directive,
    handlers: Arc<Handlers>,
}

impl DirectiveNonBlocking {
    /// Wrap `directive` with the non-blocking policy.
    #[must_use]
    pub fn new(directive: Directive) -> Self {
        Self {
            directive,
            handlers: Arc::new(Handlers::new()),
        }
    }

    /// Shared directive fields.
    #[must_use]
    pub const fn directive(&self) -> &Directive {
        &self.directive
    }

    /// Called with every data chunk.
    pub fn on_success<F>(&self, callback: F) -> &Self
    where
        F: Fn(&CorrelationId, &Value) + Send + Sync + 'static,
    {
        push(&self.handlers.success, Arc::new(callback) as SuccessCallback);
        self
    }

    /// Called once the whole stream has been delivered.
    pub fn on_eof<F>(&self, callback: F) -> &Self
    where
        F: Fn(&CorrelationId) + Send + Sync + 'static,
    {
        push(&self.handlers.eof, Arc::new(callback) as EofCallback);
        self
    }

    /// Called with the code and raw payload of an error response.
    pub fn on_error<F>(&self, callback: F) -> &Self
    where
        F: Fn(&CorrelationId, i64, &Value) + Send + Sync + 'static,
    {
        push(&self.handlers.error, Arc::new(callback) as ErrorCallback);
        self
    }

    /// Called when the response stream went silent for too long.
    pub fn on_timeout<F>(&self, callback: F) -> &Self
    where
        F: Fn(&CorrelationId) + Send + Sync + 'static,
    {
        push(&self.handlers.timeout, Arc::new(callback) as TimeoutCallback);
        self
    }

    /// The receiver registered with the correlator.
    #[must_use]
    pub fn receiver(&self) -> Arc<dyn ResponseReceiver> {
        Arc::clone(&self.handlers) as Arc<dyn ResponseReceiver>
    }

    /// Callback tasks dispatched but not finished yet.
    #[must_use]
    pub fn outstanding_callbacks(&self) -> usize {
        self.handlers.tracker.outstanding()
    }

    /// Send the directive and register for its responses.
    ///
    /// `body` defaults to [`Directive::default_body`]. Returns `None` when the
    /// request could not be sent or was rejected; the failure is logged.
    pub async fn call(&self, body: Option<Value>) -> Option<CorrelationId> {
        let directive = &self.directive;
        let body = body.unwrap_or_else(|| directive.default_body());

        let id = match directive.post(&body).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    directive = %directive.name(),
                    account = %directive.account(),
                    node_id = %directive.node_id(),
                    context = ?directive.log_message_common(),
                    error = %e,
                    "Directive request failed"
                );
                return None;
            },
        };

        directive.client().correlator().register(id.clone(), self.receiver());
        tracing::debug!(
            directive = %directive.name(),
            correlation_id = %id,
            persist_ref = ?directive.client().config().queue_persist_ref,
            context = ?directive.log_message_common(),
            "Registered non-blocking directive"
        );

        Some(id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic, clippy::unused_unit)]

    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn eof_callbacks_run_after_slow_chunks() {
        let handlers = Handlers::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let chunk_tx = tx.clone();
        push(
            &handlers.success,
            Arc::new(move |_: &CorrelationId, payload: &Value| {
                std::thread::sleep(Duration::from_millis(50));
                chunk_tx.send(payload.to_string()).unwrap();
            }) as SuccessCallback,
        );
        push(
            &handlers.eof,
            Arc::new(move |_: &CorrelationId| {
                tx.send("eof".to_string()).unwrap();
            }) as EofCallback,
        );

        let id = CorrelationId::from("m1");
        for i in 0..3 {
            handlers.response_callback(&id, MessageType::Response, json!(i));
        }
        handlers.response_callback(&id, MessageType::Eof, Value::Null);

        let mut seen = Vec::new();
        while seen.len() < 4 {
            let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(next);
        }

        assert_eq!(seen.last().map(String::as_str), Some("eof"));
        seen.pop();
        seen.sort();
        assert_eq!(seen, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn callbacks_of_one_kind_fire_in_registration_order() {
        let handlers = Handlers::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for label in ["first", "second", "third"] {
            let tx = tx.clone();
            push(
                &handlers.timeout,
                Arc::new(move |_: &CorrelationId| {
                    tx.send(label).unwrap();
                }) as TimeoutCallback,
            );
        }

        handlers.timeout_callback(&CorrelationId::from("m2"));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_skip_the_rest() {
        let handlers = Handlers::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        push(
            &handlers.error,
            Arc::new(|_: &CorrelationId, _: i64, _: &Value| -> () { panic!("boom") })
                as ErrorCallback,
        );
        push(
            &handlers.error,
            Arc::new(move |id: &CorrelationId, code: i64, payload: &Value| {
                tx.send(format!("{id}:{code}:{payload}")).unwrap();
            }) as ErrorCallback,
        );

        handlers.error_callback(&CorrelationId::from("m3"), 2, json!("nope"));

        assert_eq!(rx.recv().await.unwrap(), r#"m3:2:"nope""#);
        tokio::time::timeout(Duration::from_secs(5), handlers.tracker.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_message_type_goes_to_success_callbacks() {
        let handlers = Handlers::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        push(
            &handlers.success,
            Arc::new(move |_: &CorrelationId, payload: &Value| {
                tx.send(payload.clone()).unwrap();
            }) as SuccessCallback,
        );

        handlers.response_callback(
            &CorrelationId::from("m4"),
            MessageType::Other("progress".to_string()),
            json!(42),
        );

        assert_eq!(rx.recv().await.unwrap(), json!(42));
    }
}
