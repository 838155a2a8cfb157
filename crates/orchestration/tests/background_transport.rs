#![cfg(unix)]
//! Drives the transport with `sh -c` scripts standing in for the worker:
//! `$1` is the encoded envelope and `$2` its tag.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bgtask_common::{
    AppSecret, DispatchError, Envelope, EnvelopeCodec, HandledCallbackStamp, HandledStamp, ObjectRef,
    ProcessHandle, Shape, ShapeRegistry, StampKind,
};
use bgtask_orchestration::{BackgroundTransport, DispatchEvent, Transport, TransportConfig};
use serde_json::json;
use tokio::time::timeout;

const WAIT_LIMIT: Duration = Duration::from_secs(10);

fn codec() -> EnvelopeCodec {
    let mut registry = ShapeRegistry::new();
    registry
        .register(
            Shape::builder("Note")
                .read_only("text")
                .mutable("response")
                .build(),
        )
        .unwrap();
    EnvelopeCodec::new(Arc::new(registry))
}

fn note(codec: &EnvelopeCodec, text: &str) -> ObjectRef {
    ObjectRef::new(codec.shapes().get("Note").unwrap())
        .init("text", text)
        .unwrap()
}

fn transport(codec: &EnvelopeCodec, config: TransportConfig) -> (BackgroundTransport, Arc<Mutex<Vec<DispatchEvent>>>) {
    let transport = BackgroundTransport::new(config, codec.clone(), AppSecret::new("test"));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    transport
        .events()
        .subscribe(move |event: &DispatchEvent| sink.lock().unwrap().push(event.clone()));
    (transport, events)
}

fn script(body: &str) -> TransportConfig {
    TransportConfig::for_program("sh").with_args(["-c", body, "worker"])
}

#[tokio::test]
async fn echoed_envelope_completes_and_notifies_once() {
    let codec = codec();
    let (transport, events) = transport(&codec, script(r#"printf '%s' "$1""#));
    let task = note(&codec, "hello");
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let envelope = Envelope::new(task.clone()).with(HandledCallbackStamp::new(move |_| {
        *counter.lock().unwrap() += 1;
    }));

    let sent = transport.send(envelope).await.unwrap();
    assert!(sent.callback().is_none());
    let handle = sent.process().unwrap().clone();

    let result = timeout(WAIT_LIMIT, handle.wait()).await.unwrap().unwrap();
    assert!(result.task().as_object().unwrap().ptr_eq(&task));
    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(!handle.is_running());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DispatchEvent::Handled { transport, .. } if transport == "background-async"));
}

#[tokio::test]
async fn worker_result_is_folded_into_the_original_task() {
    let codec = codec();
    let task = note(&codec, "hello");
    let result_task = note(&codec, "hello");
    result_task.set("response", "done").unwrap();
    let result = codec
        .encode(
            &Envelope::new(result_task).with(HandledStamp {
                handler: "NoteHandler".into(),
                result: json!("ok"),
            }),
        )
        .unwrap();

    let config = script(r#"printf '%s' "$RESULT""#).with_env("RESULT", result);
    let (transport, _events) = transport(&codec, config);
    let sent = transport.send(Envelope::new(task.clone())).await.unwrap();
    assert!(task.get("response").unwrap().is_null());

    let reconciled = timeout(WAIT_LIMIT, sent.process().unwrap().wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.get("response").unwrap().as_str(), Some("done"));
    assert!(reconciled.task().as_object().unwrap().ptr_eq(&task));
    assert_eq!(reconciled.handled()[0].handler, "NoteHandler");
    assert_eq!(reconciled.count(&StampKind::Process), 0);
}

#[tokio::test]
async fn send_returns_before_the_worker_finishes() {
    let codec = codec();
    let (transport, _events) = transport(&codec, script(r#"sleep 2; printf '%s' "$1""#));
    let started = Instant::now();
    let sent = transport.send(Envelope::new(note(&codec, "slow"))).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    let handle = sent.process().unwrap();
    assert!(handle.is_running());
    assert!(handle.pid().is_some());
    timeout(WAIT_LIMIT, handle.wait()).await.unwrap().unwrap();
}

#[tokio::test]
async fn stderr_output_is_a_worker_fault() {
    let codec = codec();
    let (transport, events) = transport(&codec, script("echo boom >&2; sleep 30"));
    let started = Instant::now();
    let sent = transport.send(Envelope::new(note(&codec, "x"))).await.unwrap();

    let err = timeout(WAIT_LIMIT, sent.process().unwrap().wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, DispatchError::WorkerFault(ref text) if text.contains("boom")));
    assert!(started.elapsed() < Duration::from_secs(10));

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DispatchEvent::Failed { error, .. } if *error == err));
}

#[tokio::test]
async fn killed_worker_reports_nothing() {
    let codec = codec();
    let (transport, events) = transport(&codec, script(r#"sleep 30; printf '%s' "$1""#));
    let sent = transport.send(Envelope::new(note(&codec, "x"))).await.unwrap();
    let handle = sent.process().unwrap();

    assert!(handle.kill());
    assert!(!handle.kill());
    let err = timeout(WAIT_LIMIT, handle.wait()).await.unwrap().unwrap_err();
    assert_eq!(err, DispatchError::Killed);
    assert!(!handle.is_running());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_exit_without_output_is_a_fault() {
    let codec = codec();
    let (transport, _events) = transport(&codec, script("exit 3"));
    let sent = transport.send(Envelope::new(note(&codec, "x"))).await.unwrap();
    let err = timeout(WAIT_LIMIT, sent.process().unwrap().wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, DispatchError::WorkerFault(ref text) if text.contains("code 3")));
}

#[tokio::test]
async fn worker_receives_a_verifiable_tag() {
    let codec = codec();
    let secret = AppSecret::new("test");
    // Exits non-zero unless the tag matches the one computed here.
    let expected_task = Envelope::new(note(&codec, "tagged"));
    let encoded = codec.encode(&expected_task).unwrap();
    let tag = bgtask_common::fingerprint(&encoded, &secret);
    let config = script(r#"[ "$2" = "$TAG" ] && printf '%s' "$1""#).with_env("TAG", tag);
    let (transport, _events) = transport(&codec, config);

    let sent = transport.send(expected_task).await.unwrap();
    timeout(WAIT_LIMIT, sent.process().unwrap().wait())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn kill_during_delivery_is_refused() {
    let codec = codec();
    let (transport, events) = transport(&codec, script(r#"sleep 1; printf '%s' "$1""#));
    let slot: Arc<Mutex<Option<ProcessHandle>>> = Arc::new(Mutex::new(None));
    let kill_results = Arc::new(Mutex::new(Vec::new()));
    let callback = {
        let slot = slot.clone();
        let kill_results = kill_results.clone();
        HandledCallbackStamp::new(move |_| {
            if let Some(handle) = slot.lock().unwrap().as_ref() {
                kill_results.lock().unwrap().push(handle.kill());
            }
        })
    };

    let sent = transport
        .send(Envelope::new(note(&codec, "x")).with(callback))
        .await
        .unwrap();
    let handle = sent.process().unwrap().clone();
    *slot.lock().unwrap() = Some(handle.clone());

    timeout(WAIT_LIMIT, handle.wait()).await.unwrap().unwrap();
    assert_eq!(*kill_results.lock().unwrap(), vec![false]);
    assert!(!handle.kill());

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DispatchEvent::Handled { .. }));
}
