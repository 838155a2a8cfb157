//! End-to-end: the background transport spawning the real worker binary.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bgtask_common::{
    AppSecret, DispatchError, Envelope, EnvelopeCodec, HandledCallbackStamp, ObjectRef, Value,
};
use bgtask_orchestration::{BackgroundTransport, DispatchEvent, Transport, TransportConfig};
use bgtask_worker::demo::add_child;
use bgtask_worker::{DemoShapes, INVALID_ENVELOPE};
use tokio::time::timeout;

const SECRET: &str = "e2e-secret";
const WAIT_LIMIT: Duration = Duration::from_secs(30);

struct Harness {
    demo: DemoShapes,
    transport: BackgroundTransport,
    events: Arc<Mutex<Vec<DispatchEvent>>>,
}

fn harness_with_worker_secret(worker_secret: &str) -> Harness {
    let demo = DemoShapes::new();
    let codec = EnvelopeCodec::new(Arc::new(demo.registry().unwrap()));
    let config = TransportConfig::for_program(env!("CARGO_BIN_EXE_bgtask-worker"))
        .with_env("BGTASK_SECRET", worker_secret);
    let transport = BackgroundTransport::new(config, codec, AppSecret::new(SECRET));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    transport
        .events()
        .subscribe(move |event: &DispatchEvent| sink.lock().unwrap().push(event.clone()));
    Harness {
        demo,
        transport,
        events,
    }
}

fn harness() -> Harness {
    harness_with_worker_secret(SECRET)
}

async fn dispatch(transport: &BackgroundTransport, envelope: Envelope) -> Result<Envelope, DispatchError> {
    let sent = transport.send(envelope).await?;
    let handle = sent.process().unwrap().clone();
    timeout(WAIT_LIMIT, handle.wait()).await.unwrap()
}

#[tokio::test]
async fn send_does_not_wait_for_the_handler() {
    let h = harness();
    let task = h.demo.example_message("Hello", 3).unwrap();

    let started = Instant::now();
    let sent = h.transport.send(Envelope::new(task.clone())).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(task.get("response").unwrap().is_null());

    let handle = sent.process().unwrap();
    let result = timeout(WAIT_LIMIT, handle.wait()).await.unwrap().unwrap();
    assert!(result.task().as_object().unwrap().ptr_eq(&task));
    assert!(task.get("response").unwrap().as_str().is_some());
    assert_eq!(result.handled()[0].handler, "ExampleHandler");
}

#[tokio::test]
async fn success_notifies_listeners_and_callback_once() {
    let h = harness();
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let envelope = Envelope::new(h.demo.second_example_message("hi", 0).unwrap())
        .with(HandledCallbackStamp::new(move |_| *counter.lock().unwrap() += 1));

    let result = dispatch(&h.transport, envelope).await.unwrap();
    assert_eq!(*calls.lock().unwrap(), 1);

    let task = result.task().as_object().unwrap().clone();
    let response = task.get("response").unwrap();
    assert_eq!(response.as_map().unwrap()["foo"], Value::from("bar"));

    let events = h.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DispatchEvent::Handled { .. }));
}

#[tokio::test]
async fn tasks_complete_in_handler_order() {
    let h = harness();
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();

    for (index, sleep) in [(1, 3), (2, 1), (3, 2)] {
        let record = order.clone();
        let envelope = Envelope::new(h.demo.example_message("ordered", sleep).unwrap())
            .with(HandledCallbackStamp::new(move |_| record.lock().unwrap().push(index)));
        let sent = h.transport.send(envelope).await.unwrap();
        handles.push(sent.process().unwrap().clone());
    }
    for handle in handles {
        timeout(WAIT_LIMIT, handle.wait()).await.unwrap().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![2, 3, 1]);
}

#[tokio::test]
async fn entity_graph_keeps_its_identity() {
    let h = harness();
    let root = h.demo.root("root").unwrap();
    let first = h.demo.child("first").unwrap();
    root.set("child1", first.clone()).unwrap();
    add_child(&root, &first).unwrap();
    let children = root.get("children").unwrap().as_collection().unwrap().clone();

    let task = h.demo.entity_message(&root).unwrap();
    let result = dispatch(&h.transport, Envelope::new(task.clone())).await.unwrap();
    assert!(result.task().as_object().unwrap().ptr_eq(&task));

    assert_eq!(root.get("response").unwrap().as_str(), Some("Response from the worker"));
    let child1 = root.get("child1").unwrap();
    assert!(child1.as_object().unwrap().ptr_eq(&first));
    assert_eq!(
        first.get("response").unwrap().as_str(),
        Some("Child response from the worker")
    );

    let child2 = root.get("child2").unwrap();
    let child2: &ObjectRef = child2.as_object().unwrap();
    assert_eq!(child2.get("name").unwrap().as_str(), Some("child 2 from the worker"));

    let current = root.get("children").unwrap();
    let current = current.as_collection().unwrap();
    assert!(current.ptr_eq(&children));
    assert_eq!(current.len(), 4);
    assert!(current.first().unwrap().as_object().unwrap().ptr_eq(&first));
    for item in current.items().iter().skip(1) {
        let child = item.as_object().unwrap();
        let back = child.get("root").unwrap();
        assert!(back.as_object().unwrap().ptr_eq(&root));
    }
}

#[tokio::test]
async fn handler_failure_carries_its_code() {
    let h = harness();
    let err = dispatch(
        &h.transport,
        Envelope::new(h.demo.failing_message("boom", 42).unwrap()),
    )
    .await
    .unwrap_err();

    assert!(matches!(&err, DispatchError::HandlerFailed(details) if details.kind == "RuntimeError"));
    assert_eq!(err.code(), Some(42));

    let events = h.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DispatchEvent::Failed { error, .. } if *error == err));
}

#[tokio::test]
async fn killed_worker_never_reports() {
    let h = harness();
    let sent = h
        .transport
        .send(Envelope::new(h.demo.example_message("long", 20).unwrap()))
        .await
        .unwrap();
    let handle = sent.process().unwrap();
    assert!(handle.kill());

    let err = timeout(WAIT_LIMIT, handle.wait()).await.unwrap().unwrap_err();
    assert_eq!(err, DispatchError::Killed);
    assert!(h.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn worker_with_another_secret_rejects_the_envelope() {
    let h = harness_with_worker_secret("not-the-same");
    let err = dispatch(
        &h.transport,
        Envelope::new(h.demo.example_message("hello", 0).unwrap()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, DispatchError::HandlerFailed(ref details) if details.kind == INVALID_ENVELOPE));
}
