//! Sample tasks and handlers compiled into the worker binary. Applications
//! embedding the transport register their own shapes the same way.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde_json::json;
use tracing::info;

use bgtask_common::{CollectionRef, GraphError, ObjectRef, RegistryError, Shape, ShapeRegistry, Value};

use crate::bus::{HandlerError, MessageBus, MessageHandler};

pub const EXAMPLE_MESSAGE: &str = "ExampleMessage";
pub const SECOND_EXAMPLE_MESSAGE: &str = "SecondExampleMessage";
pub const ENTITY_EXAMPLE_MESSAGE: &str = "EntityExampleMessage";
pub const ROOT: &str = "Root";
pub const CHILD: &str = "Child";
pub const FAILING_MESSAGE: &str = "FailingMessage";

/// The demo shape set. Both sides of the boundary build it with
/// [`DemoShapes::new`] so task graphs decode into the same shapes.
#[derive(Debug, Clone)]
pub struct DemoShapes {
    pub example: Arc<Shape>,
    pub second: Arc<Shape>,
    pub entity: Arc<Shape>,
    pub root: Arc<Shape>,
    pub child: Arc<Shape>,
    pub failing: Arc<Shape>,
}

impl DemoShapes {
    pub fn new() -> Self {
        let timed = |name: &str| {
            Shape::builder(name)
                .read_only("message")
                .read_only("sleep_time")
                .read_only("created_at")
                .mutable("response")
                .build()
        };

        Self {
            example: timed(EXAMPLE_MESSAGE),
            second: timed(SECOND_EXAMPLE_MESSAGE),
            entity: Shape::builder(ENTITY_EXAMPLE_MESSAGE).read_only("root").build(),
            root: Shape::builder(ROOT)
                .read_only("id")
                .read_only("name")
                .mutable("response")
                .mutable("child1")
                .mutable("child2")
                .read_only("children")
                .build(),
            child: Shape::builder(CHILD)
                .read_only("id")
                .read_only("name")
                .mutable("response")
                .mutable("root")
                .build(),
            failing: Shape::builder(FAILING_MESSAGE)
                .read_only("message")
                .read_only("code")
                .build(),
        }
    }

    pub fn registry(&self) -> Result<ShapeRegistry, RegistryError> {
        let mut registry = ShapeRegistry::new();
        for shape in [&self.example, &self.second, &self.entity, &self.root, &self.child, &self.failing] {
            registry.register(shape.clone())?;
        }
        Ok(registry)
    }

    pub fn bus(&self) -> Result<MessageBus, RegistryError> {
        let mut bus = MessageBus::new();
        bus.register(EXAMPLE_MESSAGE, ExampleHandler)?;
        bus.register(SECOND_EXAMPLE_MESSAGE, SecondExampleHandler)?;
        bus.register(
            ENTITY_EXAMPLE_MESSAGE,
            EntityExampleHandler {
                child: self.child.clone(),
            },
        )?;
        bus.register(FAILING_MESSAGE, FailingHandler)?;
        Ok(bus)
    }

    pub fn example_message(&self, message: &str, sleep_time: u32) -> Result<ObjectRef, GraphError> {
        ObjectRef::new(self.example.clone())
            .init("message", message)?
            .init("sleep_time", sleep_time)?
            .init("created_at", now())
    }

    pub fn second_example_message(&self, message: &str, sleep_time: u32) -> Result<ObjectRef, GraphError> {
        ObjectRef::new(self.second.clone())
            .init("message", message)?
            .init("sleep_time", sleep_time)?
            .init("created_at", now())?
            .init("response", BTreeMap::<String, Value>::new())
    }

    pub fn root(&self, name: &str) -> Result<ObjectRef, GraphError> {
        ObjectRef::new(self.root.clone())
            .init("name", name)?
            .init("children", CollectionRef::empty())
    }

    pub fn child(&self, name: &str) -> Result<ObjectRef, GraphError> {
        ObjectRef::new(self.child.clone()).init("name", name)
    }

    pub fn entity_message(&self, root: &ObjectRef) -> Result<ObjectRef, GraphError> {
        ObjectRef::new(self.entity.clone()).init("root", root.clone())
    }

    pub fn failing_message(&self, message: &str, code: i64) -> Result<ObjectRef, GraphError> {
        ObjectRef::new(self.failing.clone())
            .init("message", message)?
            .init("code", code)
    }
}

impl Default for DemoShapes {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends `child` to the root's children unless it is already there, and
/// points the child back at the root.
pub fn add_child(root: &ObjectRef, child: &ObjectRef) -> Result<(), GraphError> {
    let children = root.get("children")?;
    let Some(children) = children.as_collection() else {
        return Ok(());
    };
    if children.items().iter().any(|item| item.as_object().is_some_and(|c| c.ptr_eq(child))) {
        return Ok(());
    }
    child.set("root", root.clone())?;
    children.push(child.clone());
    Ok(())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn format_time(time: DateTime<FixedOffset>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Shared prologue of the two timed handlers: log, then sleep as asked.
async fn start_timed(task: &ObjectRef) -> Result<DateTime<FixedOffset>, HandlerError> {
    let message = task.get("message")?;
    let raw = task.get("created_at")?;
    let created_at = raw
        .as_str()
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .ok_or_else(|| HandlerError::new("InvalidArgument", "created_at is not an RFC 3339 timestamp"))?;

    info!(
        created_at = %format_time(created_at),
        "{}",
        message.as_str().unwrap_or_default()
    );

    let sleep_time = task.get("sleep_time")?.as_i64().unwrap_or(0);
    if sleep_time > 0 {
        tokio::time::sleep(Duration::from_secs(sleep_time as u64)).await;
    }
    Ok(created_at)
}

struct ExampleHandler;

#[async_trait]
impl MessageHandler for ExampleHandler {
    fn name(&self) -> &str {
        "ExampleHandler"
    }

    async fn handle(&self, task: &ObjectRef) -> Result<serde_json::Value, HandlerError> {
        let created_at = start_timed(task).await?;
        task.set("response", format_time(created_at + chrono::Duration::minutes(2)))?;
        Ok(json!(format!("createdAt: {}", format_time(created_at))))
    }
}

struct SecondExampleHandler;

#[async_trait]
impl MessageHandler for SecondExampleHandler {
    fn name(&self) -> &str {
        "SecondExampleHandler"
    }

    async fn handle(&self, task: &ObjectRef) -> Result<serde_json::Value, HandlerError> {
        let created_at = start_timed(task).await?;

        let baz = BTreeMap::from([
            ("sub1.1key".to_string(), Value::from("Sub 1.1 value")),
            ("sub1.2key".to_string(), Value::from("Sub 1.2 value")),
        ]);
        let response = BTreeMap::from([
            (
                "responseTime".to_string(),
                Value::from(format_time(created_at + chrono::Duration::minutes(2))),
            ),
            ("foo".to_string(), Value::from("bar")),
            ("baz".to_string(), Value::from(baz)),
        ]);
        task.set("response", response)?;
        Ok(json!(format!("Second createdAt: {}", format_time(created_at))))
    }
}

struct EntityExampleHandler {
    child: Arc<Shape>,
}

impl EntityExampleHandler {
    fn new_child(&self, name: &str) -> Result<ObjectRef, GraphError> {
        ObjectRef::new(self.child.clone()).init("name", name)
    }
}

#[async_trait]
impl MessageHandler for EntityExampleHandler {
    fn name(&self) -> &str {
        "EntityExampleHandler"
    }

    async fn handle(&self, task: &ObjectRef) -> Result<serde_json::Value, HandlerError> {
        let root = task.get("root")?;
        let root = root
            .as_object()
            .ok_or_else(|| HandlerError::new("InvalidArgument", "message has no root"))?;

        root.set("response", "Response from the worker")?;
        if let Some(child1) = root.get("child1")?.as_object() {
            child1.set("response", "Child 1 response from the worker")?;
        }
        root.set("child2", self.new_child("child 2 from the worker")?)?;

        let children = root.get("children")?;
        if let Some(first) = children.as_collection().and_then(CollectionRef::first) {
            if let Some(first) = first.as_object() {
                first.set("response", "Child response from the worker")?;
            }
        }
        for name in ["child 1", "child 2", "child 3"] {
            add_child(root, &self.new_child(name)?)?;
        }
        Ok(serde_json::Value::Null)
    }
}

struct FailingHandler;

#[async_trait]
impl MessageHandler for FailingHandler {
    fn name(&self) -> &str {
        "FailingHandler"
    }

    async fn handle(&self, task: &ObjectRef) -> Result<serde_json::Value, HandlerError> {
        let message = task.get("message")?.as_str().unwrap_or_default().to_string();
        let mut err = HandlerError::new("RuntimeError", message);
        if let Some(code) = task.get("code")?.as_i64() {
            err = err.with_code(code);
        }
        Err(err)
    }
}
