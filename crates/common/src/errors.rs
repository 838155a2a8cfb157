use thiserror::Error;

use crate::stamp::ErrorDetails;

/// Errors raised by direct manipulation of the object graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("shape '{shape}' has no field '{field}'")]
    UnknownField { shape: String, field: String },

    #[error("field '{shape}.{field}' is not writable")]
    NotWritable { shape: String, field: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("shape '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("a handler for '{0}' is already registered")]
    HandlerAlreadyRegistered(String),
}

/// Failures of the reconciliation engine. There is no rollback: fields copied
/// before the failure stay copied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("cannot reconcile {source_kind} into {target_kind}")]
    ShapeMismatch {
        source_kind: String,
        target_kind: String,
    },

    #[error("can not copy {value_shape} into {target_shape}.{field} as that field is not writable")]
    NotWritable {
        value_shape: String,
        target_shape: String,
        field: String,
    },

    #[error("no reconciliation target for nested object in {shape}.{field}")]
    NoTarget { shape: String, field: String },
}

/// Envelope encode/decode failures. Payloads are kept as text so the error can
/// be cloned to every party waiting on a dispatch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("envelope is not valid base64: {0}")]
    Base64(String),

    #[error("envelope is not valid JSON: {0}")]
    Json(String),

    #[error("unknown shape '{0}'")]
    UnknownShape(String),

    #[error("shape '{shape}' has no field '{field}'")]
    UnknownField { shape: String, field: String },

    #[error("reference to unknown node #{0}")]
    DanglingReference(u64),

    #[error("map key '{0}' is reserved by the envelope format")]
    ReservedKey(String),

    #[error("number {0} cannot be represented")]
    UnrepresentableNumber(String),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl From<base64::DecodeError> for CodecError {
    fn from(err: base64::DecodeError) -> Self {
        CodecError::Base64(err.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Json(err.to_string())
    }
}

/// Everything that can go wrong with one background dispatch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("worker fault: {0}")]
    WorkerFault(String),

    #[error("handling failed: {0}")]
    HandlerFailed(ErrorDetails),

    #[error(transparent)]
    Decode(#[from] CodecError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("failed to start worker '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("{0}")]
    InvalidOperation(String),

    #[error("worker was killed before it reported a result")]
    Killed,

    #[error("worker supervisor stopped without reporting a result")]
    Abandoned,
}

impl DispatchError {
    pub fn send_only(operation: &str) -> Self {
        DispatchError::InvalidOperation(format!(
            "You cannot call {operation}() on the background transport: it is send-only."
        ))
    }

    /// Error code reported by the failed handler, when there is one.
    pub fn code(&self) -> Option<i64> {
        match self {
            DispatchError::HandlerFailed(details) => details.code,
            _ => None,
        }
    }
}
