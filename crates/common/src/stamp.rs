use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::process::ProcessHandle;

pub type CompletionCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Invoked with the reconciled envelope once a dispatch has been handled.
/// Never leaves the dispatching process.
#[derive(Clone)]
pub struct HandledCallbackStamp(CompletionCallback);

impl HandledCallbackStamp {
    pub fn new(callback: impl Fn(&Envelope) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn invoke(&self, envelope: &Envelope) {
        (self.0)(envelope)
    }

    pub fn ptr_eq(&self, other: &HandledCallbackStamp) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for HandledCallbackStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandledCallbackStamp")
    }
}

/// Failure reported by the worker in place of a handled result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl ErrorDetails {
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
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.code {
            write!(f, " (code {code})")?;
        }
        Ok(())
    }
}

/// Appended by the worker's bus for every handler that ran successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandledStamp {
    pub handler: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

/// Application metadata that should survive the round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomStamp {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum Stamp {
    HandledCallback(HandledCallbackStamp),
    Process(ProcessHandle),
    ErrorDetails(ErrorDetails),
    Handled(HandledStamp),
    Custom(CustomStamp),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StampKind {
    HandledCallback,
    Process,
    ErrorDetails,
    Handled,
    Custom(String),
}

impl Stamp {
    pub fn kind(&self) -> StampKind {
        match self {
            Stamp::HandledCallback(_) => StampKind::HandledCallback,
            Stamp::Process(_) => StampKind::Process,
            Stamp::ErrorDetails(_) => StampKind::ErrorDetails,
            Stamp::Handled(_) => StampKind::Handled,
            Stamp::Custom(custom) => StampKind::Custom(custom.name.clone()),
        }
    }

    /// Callbacks and process handles are local to the dispatching process.
    pub fn is_transportable(&self) -> bool {
        !matches!(self, Stamp::HandledCallback(_) | Stamp::Process(_))
    }

    pub fn custom(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Stamp::Custom(CustomStamp {
            name: name.into(),
            payload,
        })
    }
}

impl PartialEq for Stamp {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Stamp::HandledCallback(a), Stamp::HandledCallback(b)) => a.ptr_eq(b),
            (Stamp::Process(a), Stamp::Process(b)) => a.ptr_eq(b),
            (Stamp::ErrorDetails(a), Stamp::ErrorDetails(b)) => a == b,
            (Stamp::Handled(a), Stamp::Handled(b)) => a == b,
            (Stamp::Custom(a), Stamp::Custom(b)) => a == b,
            _ => false,
        }
    }
}

impl From<ErrorDetails> for Stamp {
    fn from(details: ErrorDetails) -> Self {
        Stamp::ErrorDetails(details)
    }
}

impl From<HandledStamp> for Stamp {
    fn from(stamp: HandledStamp) -> Self {
        Stamp::Handled(stamp)
    }
}

impl From<CustomStamp> for Stamp {
    fn from(stamp: CustomStamp) -> Self {
        Stamp::Custom(stamp)
    }
}

impl From<HandledCallbackStamp> for Stamp {
    fn from(stamp: HandledCallbackStamp) -> Self {
        Stamp::HandledCallback(stamp)
    }
}

impl From<ProcessHandle> for Stamp {
    fn from(handle: ProcessHandle) -> Self {
        Stamp::Process(handle)
    }
}
