// # -----------------------------
// # crates/common/src/lib.rs
// # -----------------------------
//! Building blocks shared by the dispatching process and the worker: the
//! task graph, the reconciliation engine, envelopes and their wire codec.

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod fingerprint;
pub mod graph;
pub mod process;
pub mod reconcile;
pub mod stamp;

pub use codec::EnvelopeCodec;
pub use envelope::Envelope;
pub use errors::{CodecError, DispatchError, GraphError, ReconcileError, RegistryError};
pub use fingerprint::{fingerprint, verify, AppSecret};
pub use graph::{CollectionRef, FieldAccess, ObjectRef, Shape, ShapeRegistry, Value, PLACEHOLDER_SHAPE};
pub use process::{ProcessHandle, WorkerControl, WorkerState};
pub use reconcile::{reconcile, Reconciler};
pub use stamp::{CustomStamp, ErrorDetails, HandledCallbackStamp, HandledStamp, Stamp, StampKind};

/// Transport name reported in dispatch events and used as DSN scheme.
pub const TRANSPORT_NAME: &str = "background-async";
