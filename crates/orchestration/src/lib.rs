pub mod background;
pub mod events;
pub mod factory;
pub mod transport;
pub mod types;
mod watcher;

pub use background::BackgroundTransport;
pub use events::{DispatchEvent, EventDispatcher, EventListener, TracingListener};
pub use factory::{BackgroundTransportFactory, DSN_SCHEME};
pub use transport::Transport;
pub use types::*;
