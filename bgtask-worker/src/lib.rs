//! Worker side of the background transport. The `bgtask-worker` binary is
//! spawned once per dispatched task and answers on stdout.

pub mod bus;
pub mod demo;
pub mod logging;
pub mod runner;

pub use bus::{HandlerError, MessageBus, MessageHandler, NO_HANDLER};
pub use demo::DemoShapes;
pub use logging::{init_logging, LOG_FILE_ENV};
pub use runner::{ConsumeError, RunOutcome, SingleMessageRunner, DECODE_ERROR, INVALID_ENVELOPE};
