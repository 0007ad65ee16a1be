//! Correlator behavior against an in-memory responses topic.

#![allow(clippy::unwrap_used, clippy::panic)]

use proptest::prelude::*;
use receptor_client_core::{
    Configuration, CorrelationId, InboundMessage, MessageType, TransportError,
};
use receptor_client_runtime::{CorrelatorSettings, ResponseCorrelator, ResponseReceiver};
use receptor_client_testing::{
    InMemoryResponseSource, ReceivedCall, RecordingReceiver, envelopes, eventually, init_tracing,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

fn settings(config: &Configuration) -> CorrelatorSettings {
    CorrelatorSettings::from(config)
}

fn started(config: &Configuration, source: &InMemoryResponseSource) -> ResponseCorrelator {
    init_tracing();
    let correlator = ResponseCorrelator::new(settings(config), source.clone().into_shared());
    correlator.start();
    correlator
}

struct PanickingReceiver;

impl ResponseReceiver for PanickingReceiver {
    fn response_callback(&self, _: &CorrelationId, _: MessageType, _: Value) {
        panic!("receiver failure");
    }

    fn error_callback(&self, _: &CorrelationId, _: i64, _: Value) {
        panic!("receiver failure");
    }
}

#[tokio::test]
async fn streamed_response_is_routed_in_order() {
    let source = InMemoryResponseSource::new();
    let correlator = started(&Configuration::default(), &source);
    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("m1".into(), receiver.clone());

    for i in 0..3 {
        source.publish_json(&envelopes::response_json("m1", json!(i)));
    }
    source.publish_json(&envelopes::eof_json("m1", Some(3)));

    assert!(eventually(Duration::from_secs(5), || receiver.len() == 4).await);
    assert_eq!(receiver.chunks(), vec![json!(0), json!(1), json!(2)]);
    assert!(receiver.calls().last().unwrap().is_terminal());
    assert!(!correlator.is_registered(&"m1".into()));

    correlator.stop().await;
}

#[tokio::test]
async fn encoded_payloads_are_decoded() {
    let source = InMemoryResponseSource::new();
    let correlator = started(&Configuration::default(), &source);
    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("m1".into(), receiver.clone());

    let structured = json!({"hosts": ["a", "b"], "ok": true});
    source.publish_json(&envelopes::encoded_response_json("m1", &structured));

    assert!(eventually(Duration::from_secs(5), || receiver.len() == 1).await);
    assert_eq!(receiver.chunks(), vec![structured]);

    correlator.stop().await;
}

#[tokio::test]
async fn unregistered_ids_are_ignored() {
    let source = InMemoryResponseSource::new();
    let correlator = started(&Configuration::default(), &source);
    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("mine".into(), receiver.clone());

    source.publish_json(&envelopes::error_json("m3", 1, json!("not ours")));
    source.publish_json(&envelopes::response_json("other", json!("not ours either")));
    source.publish_json(&envelopes::response_json("mine", json!("ours")));

    assert!(eventually(Duration::from_secs(5), || receiver.len() == 1).await);
    assert_eq!(receiver.chunks(), vec![json!("ours")]);
    assert_eq!(correlator.pending_count(), 1);

    correlator.stop().await;
}

#[tokio::test]
async fn listener_survives_bad_input_and_panicking_receivers() {
    let source = InMemoryResponseSource::new();
    let correlator = started(&Configuration::default(), &source);
    correlator.register("boom".into(), Arc::new(PanickingReceiver));
    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("m1".into(), receiver.clone());

    source.publish_raw(b"not json at all".to_vec());
    source.publish_json(&json!({"code": 0, "message_type": "response", "payload": "no id"}));
    source.publish_error(TransportError::ReceiveFailed("broker hiccup".to_string()));
    source.publish_json(&envelopes::response_json("boom", json!(1)));
    source.publish_json(&envelopes::response_json("m1", json!("still alive")));

    assert!(eventually(Duration::from_secs(5), || receiver.len() == 1).await);
    assert_eq!(receiver.chunks(), vec![json!("still alive")]);

    correlator.stop().await;
}

#[tokio::test]
async fn error_response_is_terminal() {
    let source = InMemoryResponseSource::new();
    let correlator = started(&Configuration::default(), &source);
    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("m1".into(), receiver.clone());

    source.publish_json(&envelopes::error_json("m1", 2, json!("node unreachable")));
    source.publish_json(&envelopes::response_json("m1", json!("too late")));

    assert!(eventually(Duration::from_secs(5), || !correlator.is_registered(&"m1".into())).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        receiver.calls(),
        vec![ReceivedCall::Error {
            id: "m1".into(),
            code: 2,
            payload: json!("node unreachable"),
        }]
    );

    correlator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn silent_correlation_times_out() {
    let mut config = Configuration::default();
    config.response_timeout_secs = 2;
    config.response_timeout_poll_secs = 1;
    let source = InMemoryResponseSource::new();
    let correlator = started(&config, &source);
    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("m2".into(), receiver.clone());

    assert!(eventually(Duration::from_secs(10), || receiver.len() == 1).await);
    assert_eq!(receiver.calls(), vec![ReceivedCall::Timeout { id: "m2".into() }]);
    assert_eq!(correlator.pending_count(), 0);

    correlator.stop().await;
}

#[tokio::test(start_paused = true)]
async fn long_stream_outlives_the_timeout_while_active() {
    let mut config = Configuration::default();
    config.response_timeout_secs = 5;
    config.response_timeout_poll_secs = 1;
    let source = InMemoryResponseSource::new();
    let correlator = started(&config, &source);
    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("m1".into(), receiver.clone());

    // Twelve seconds of streaming, one chunk every three seconds.
    for i in 1..=4_u64 {
        tokio::time::sleep(Duration::from_secs(3)).await;
        source.publish_json(&envelopes::response_json("m1", json!(i)));
        let expected = usize::try_from(i).unwrap();
        assert!(eventually(Duration::from_millis(500), || receiver.len() == expected).await);
    }
    source.publish_json(&envelopes::eof_json("m1", Some(4)));

    assert!(eventually(Duration::from_secs(1), || receiver.len() == 5).await);
    assert!(
        !receiver
            .calls()
            .iter()
            .any(|call| matches!(call, ReceivedCall::Timeout { .. }))
    );

    correlator.stop().await;
}

#[tokio::test]
async fn manual_ack_when_auto_ack_is_off() {
    let mut config = Configuration::default();
    config.queue_auto_ack = false;
    config.queue_persist_ref = Some("catalog-group".to_string());
    let source = InMemoryResponseSource::new();
    let correlator = started(&config, &source);

    source.publish_json(&envelopes::response_json("unknown", json!(1)));
    source.publish_raw(b"garbage".to_vec());

    assert!(eventually(Duration::from_secs(5), || source.acks() == 2).await);

    let subscription = source.subscriptions().remove(0);
    assert_eq!(subscription.topic, config.queue_topic);
    assert!(!subscription.auto_ack);
    assert_eq!(subscription.persist_ref.as_deref(), Some("catalog-group"));

    correlator.stop().await;
}

#[tokio::test]
async fn no_manual_ack_when_auto_ack_is_on() {
    let source = InMemoryResponseSource::new();
    let correlator = started(&Configuration::default(), &source);
    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("m1".into(), receiver.clone());

    source.publish_json(&envelopes::response_json("m1", json!(1)));

    assert!(eventually(Duration::from_secs(5), || receiver.len() == 1).await);
    assert_eq!(source.acks(), 0);

    correlator.stop().await;
}

#[tokio::test]
async fn failed_subscription_leaves_correlator_usable() {
    let source = InMemoryResponseSource::unreachable();
    let correlator = started(&Configuration::default(), &source);

    assert!(eventually(Duration::from_secs(5), || source.subscriptions().len() == 1).await);

    let receiver = Arc::new(RecordingReceiver::new());
    correlator.register("m1".into(), receiver.clone());
    correlator.process_message(InboundMessage::new(
        envelopes::response_json("m1", json!("direct")).to_string().into_bytes(),
    ));
    assert_eq!(receiver.chunks(), vec![json!("direct")]);

    correlator.stop().await;
    assert!(!correlator.is_started());
}

proptest! {
    #[test]
    fn any_chunk_count_completes_with_one_terminal_call(n in 0_u64..25) {
        let correlator = ResponseCorrelator::new(
            settings(&Configuration::default()),
            InMemoryResponseSource::new().into_shared(),
        );
        let receiver = Arc::new(RecordingReceiver::new());
        correlator.register("m1".into(), receiver.clone());

        let deliver = |envelope: Value| {
            correlator.process_message(InboundMessage::new(envelope.to_string().into_bytes()));
        };
        for i in 0..n {
            deliver(envelopes::response_json("m1", json!(i)));
        }
        deliver(envelopes::eof_json("m1", Some(n)));

        let calls = receiver.calls();
        prop_assert_eq!(calls.len() as u64, n + 1);
        prop_assert_eq!(calls.iter().filter(|c| c.is_terminal()).count(), 1);
        prop_assert!(calls.last().unwrap().is_terminal());
        prop_assert!(!correlator.is_registered(&"m1".into()));
    }
}
