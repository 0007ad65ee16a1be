//! Blocking directive.

use super::Directive;
use crate::receiver::ResponseReceiver;
use receptor_client_core::{ClientError, CorrelationId, MessageType};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Single-slot mailbox of a blocking directive.
///
/// Only the most recent data chunk is retained: the end marker is what the
/// caller waits for, and typical blocking calls produce a single chunk.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MailboxState {
    /// Nothing received yet
    #[default]
    Pending,
    /// A data chunk arrived; more may follow
    Data(Value),
    /// The stream finished, with the last data chunk if there was one
    Done(Option<Value>),
    /// The request failed
    Failed(ClientError),
}

impl MailboxState {
    /// Whether the waiting caller can be released.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}

struct Mailbox {
    context: String,
    state: watch::Sender<MailboxState>,
}

impl Mailbox {
    /// Apply `next` unless the mailbox already holds a terminal state.
    fn update(&self, next: impl FnOnce(MailboxState) -> MailboxState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            let current = std::mem::take(state);
            *state = next(current);
            true
        });
    }

    fn fail(&self, error: ClientError) {
        self.update(|_| MailboxState::Failed(error));
    }
}

impl ResponseReceiver for Mailbox {
    fn response_callback(&self, id: &CorrelationId, kind: MessageType, payload: Value) {
        match kind {
            MessageType::Response => self.update(|_| MailboxState::Data(payload)),
            MessageType::Eof => self.update(|previous| match previous {
                MailboxState::Data(data) => MailboxState::Done(Some(data)),
                _ => MailboxState::Done(None),
            }),
            MessageType::Other(kind) => self.fail(ClientError::UnknownResponseType(format!(
                "{kind}: {} [MSG: {id}]",
                self.context
            ))),
        }
    }

    fn error_callback(&self, id: &CorrelationId, code: i64, payload: Value) {
        let detail = match payload {
            Value::String(message) => message,
            other => other.to_string(),
        };
        self.fail(ClientError::Response {
            code,
            message: format!("{detail} ({}) [MSG: {id}]", self.context),
        });
    }

    fn timeout_callback(&self, id: &CorrelationId) {
        self.fail(ClientError::ResponseTimeout(format!(
            "{} [MSG: {id}]",
            self.context
        )));
    }
}

/// Directive whose `call` waits for the complete response.
///
/// The waiting task is parked until the correlator delivers the end of
/// stream, an error or a timeout. One instance serves one call; overlapping
/// calls on the same instance are not supported.
///
/// # Example
///
/// ```rust,ignore
/// let directive = client.blocking_directive(
///     "0000001",
///     "node-a",
///     json!({"satellite_instance_id": "1234"}).to_string().into(),
///     "receptor_satellite:health_check",
/// );
/// let response = directive.call(None).await?;
/// ```
pub struct DirectiveBlocking {
    directive: Directive,
    mailbox: Arc<Mailbox>,
}

impl DirectiveBlocking {
    /// Wrap `directive` with the blocking policy.
    #[must_use]
    pub fn new(directive: Directive) -> Self {
        let (state, _) = watch::channel(MailboxState::Pending);
        let mailbox = Arc::new(Mailbox {
            context: directive.context(),
            state,
        });
        Self { directive, mailbox }
    }

    /// Shared directive fields.
    #[must_use]
    pub const fn directive(&self) -> &Directive {
        &self.directive
    }

    /// Current mailbox contents.
    #[must_use]
    pub fn state(&self) -> MailboxState {
        self.mailbox.state.borrow().clone()
    }

    /// The receiver registered with the correlator, for routing responses
    /// to this directive by hand.
    #[must_use]
    pub fn receiver(&self) -> Arc<dyn ResponseReceiver> {
        Arc::clone(&self.mailbox) as Arc<dyn ResponseReceiver>
    }

    /// Send the directive and wait for its response.
    ///
    /// `body` defaults to [`Directive::default_body`]. Resolves to the last
    /// data chunk received before the end of stream (`None` if the stream
    /// carried no data).
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] if the request could not be sent
    /// - [`ClientError::ControllerResponse`] if the controller rejected it
    /// - [`ClientError::Response`] if the node answered with an error code
    /// - [`ClientError::ResponseTimeout`] if the response stream went silent
    /// - [`ClientError::UnknownResponseType`] for an unexpected message type
    pub async fn call(&self, body: Option<Value>) -> Result<Option<Value>, ClientError> {
        let directive = &self.directive;
        let body = body.unwrap_or_else(|| directive.default_body());

        self.mailbox.state.send_replace(MailboxState::Pending);

        let id = directive.post(&body).await.inspect_err(|e| {
            tracing::error!(
                directive = %directive.name(),
                account = %directive.account(),
                node_id = %directive.node_id(),
                context = ?directive.log_message_common(),
                error = %e,
                "Directive request failed"
            );
        })?;

        tracing::debug!(
            directive = %directive.name(),
            correlation_id = %id,
            context = ?directive.log_message_common(),
            "Registering blocking directive"
        );
        directive.client().correlator().register(id.clone(), self.receiver());

        self.wait_for_response(&id).await
    }

    async fn wait_for_response(&self, id: &CorrelationId) -> Result<Option<Value>, ClientError> {
        let mut state = self.mailbox.state.subscribe();
        let terminal = state.wait_for(MailboxState::is_terminal).await.map_err(|_| {
            ClientError::ResponseTimeout(format!("{} [MSG: {id}]", self.mailbox.context))
        })?;

        match &*terminal {
            MailboxState::Failed(error) => Err(error.clone()),
            MailboxState::Done(data) => Ok(data.clone()),
            MailboxState::Pending | MailboxState::Data(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mailbox() -> Mailbox {
        let (state, _) = watch::channel(MailboxState::Pending);
        Mailbox {
            context: "test".to_string(),
            state,
        }
    }

    fn id() -> CorrelationId {
        CorrelationId::from("m1")
    }

    #[test]
    fn keeps_only_latest_chunk() {
        let mailbox = mailbox();
        mailbox.response_callback(&id(), MessageType::Response, json!("first"));
        mailbox.response_callback(&id(), MessageType::Response, json!("second"));

        assert_eq!(*mailbox.state.borrow(), MailboxState::Data(json!("second")));
    }

    #[test]
    fn end_marker_finishes_with_last_chunk() {
        let mailbox = mailbox();
        mailbox.response_callback(&id(), MessageType::Response, json!({"k": 1}));
        mailbox.response_callback(&id(), MessageType::Eof, Value::Null);

        assert_eq!(*mailbox.state.borrow(), MailboxState::Done(Some(json!({"k": 1}))));
    }

    #[test]
    fn end_marker_without_data() {
        let mailbox = mailbox();
        mailbox.response_callback(&id(), MessageType::Eof, Value::Null);

        assert_eq!(*mailbox.state.borrow(), MailboxState::Done(None));
    }

    #[test]
    fn unknown_kind_fails() {
        let mailbox = mailbox();
        mailbox.response_callback(&id(), MessageType::Other("progress".to_string()), Value::Null);

        assert!(matches!(
            *mailbox.state.borrow(),
            MailboxState::Failed(ClientError::UnknownResponseType(ref msg)) if msg.contains("progress") && msg.contains("m1")
        ));
    }

    #[test]
    fn error_message_carries_payload_and_id() {
        let mailbox = mailbox();
        mailbox.error_callback(&id(), 1, json!("bad node"));

        assert_eq!(
            *mailbox.state.borrow(),
            MailboxState::Failed(ClientError::Response {
                code: 1,
                message: "bad node (test) [MSG: m1]".to_string(),
            })
        );
    }

    #[test]
    fn terminal_state_is_sticky() {
        let mailbox = mailbox();
        mailbox.timeout_callback(&id());
        mailbox.response_callback(&id(), MessageType::Response, json!("late"));
        mailbox.response_callback(&id(), MessageType::Eof, Value::Null);

        assert!(matches!(
            *mailbox.state.borrow(),
            MailboxState::Failed(ClientError::ResponseTimeout(_))
        ));
    }
}
