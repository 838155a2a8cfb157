use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use bgtask_common::{Envelope, ErrorDetails, GraphError, HandledStamp, ObjectRef, RegistryError};

pub const NO_HANDLER: &str = "NoHandlerForMessage";

/// Failure raised by a message handler; travels back as error details.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
    pub code: Option<i64>,
}

impl HandlerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn into_details(self) -> ErrorDetails {
        ErrorDetails {
            kind: self.kind,
            message: self.message,
            code: self.code,
        }
    }
}

impl From<GraphError> for HandlerError {
    fn from(err: GraphError) -> Self {
        HandlerError::new("GraphError", err.to_string())
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Handles the task in place; the returned value is recorded in the
    /// handled stamp.
    async fn handle(&self, task: &ObjectRef) -> Result<serde_json::Value, HandlerError>;
}

/// In-process bus: one handler per task shape.
#[derive(Default)]
pub struct MessageBus {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        shape: impl Into<String>,
        handler: impl MessageHandler + 'static,
    ) -> Result<(), RegistryError> {
        let shape = shape.into();
        if self.handlers.contains_key(&shape) {
            return Err(RegistryError::HandlerAlreadyRegistered(shape));
        }
        self.handlers.insert(shape, Arc::new(handler));
        Ok(())
    }

    pub fn handles(&self, shape: &str) -> bool {
        self.handlers.contains_key(shape)
    }

    pub async fn dispatch(&self, envelope: Envelope) -> Result<Envelope, HandlerError> {
        let kind = envelope.task().kind_name();
        let no_handler = || HandlerError::new(NO_HANDLER, format!("No handler for message \"{kind}\"."));
        let task = envelope.task().as_object().cloned().ok_or_else(no_handler)?;
        let handler = self
            .handlers
            .get(task.shape_name())
            .cloned()
            .ok_or_else(no_handler)?;

        debug!(handler = handler.name(), task = %kind, "Dispatching message");
        let result = handler.handle(&task).await?;
        Ok(envelope.with(HandledStamp {
            handler: handler.name().to_string(),
            result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgtask_common::{Shape, Value};
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl MessageHandler for Upper {
        fn name(&self) -> &str {
            "Upper"
        }

        async fn handle(&self, task: &ObjectRef) -> Result<serde_json::Value, HandlerError> {
            let text = task.get("text")?.as_str().unwrap_or_default().to_uppercase();
            task.set("text", text.clone())?;
            Ok(json!(text))
        }
    }

    fn shout() -> ObjectRef {
        ObjectRef::new(Shape::builder("Shout").mutable("text").build())
            .init("text", "hi")
            .unwrap()
    }

    #[tokio::test]
    async fn dispatch_appends_handled_stamp() {
        let mut bus = MessageBus::new();
        bus.register("Shout", Upper).unwrap();
        assert!(bus.handles("Shout"));

        let task = shout();
        let handled = bus.dispatch(Envelope::new(task.clone())).await.unwrap();
        assert_eq!(task.get("text").unwrap().as_str(), Some("HI"));
        let stamps = handled.handled();
        assert_eq!(stamps.len(), 1);
        assert_eq!(stamps[0].handler, "Upper");
        assert_eq!(stamps[0].result, json!("HI"));
    }

    #[tokio::test]
    async fn unknown_tasks_have_no_handler() {
        let bus = MessageBus::new();
        let err = bus.dispatch(Envelope::new(shout())).await.unwrap_err();
        assert_eq!(err.kind, NO_HANDLER);
        assert!(err.message.contains("Shout"));

        let err = bus.dispatch(Envelope::new(Value::from(3))).await.unwrap_err();
        assert!(err.message.contains("int"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut bus = MessageBus::new();
        bus.register("Shout", Upper).unwrap();
        assert_eq!(
            bus.register("Shout", Upper).unwrap_err(),
            RegistryError::HandlerAlreadyRegistered("Shout".into())
        );
    }

    #[test]
    fn handler_errors_become_details() {
        let details = HandlerError::new("RuntimeError", "boom").with_code(42).into_details();
        assert_eq!(details, ErrorDetails::new("RuntimeError", "boom").with_code(42));
    }
}
