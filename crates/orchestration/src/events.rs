use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use bgtask_common::{DispatchError, Envelope};

/// Raised once per dispatch that reached a conclusion. Killed dispatches
/// raise nothing.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Handled {
        envelope: Envelope,
        transport: String,
    },
    Failed {
        envelope: Envelope,
        transport: String,
        error: DispatchError,
    },
}

impl DispatchEvent {
    pub fn envelope(&self) -> &Envelope {
        match self {
            DispatchEvent::Handled { envelope, .. } | DispatchEvent::Failed { envelope, .. } => {
                envelope
            }
        }
    }

    pub fn transport(&self) -> &str {
        match self {
            DispatchEvent::Handled { transport, .. } | DispatchEvent::Failed { transport, .. } => {
                transport
            }
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

impl<F> EventListener for F
where
    F: Fn(&DispatchEvent) + Send + Sync,
{
    fn on_event(&self, event: &DispatchEvent) {
        self(event)
    }
}

/// Fan-out of dispatch events to every subscribed listener, in subscription
/// order.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl EventListener + 'static) {
        self.subscribe_arc(Arc::new(listener));
    }

    pub fn subscribe_arc(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn dispatch(&self, event: &DispatchEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

/// Logs every dispatch outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::Handled { envelope, transport } => {
                info!(
                    transport = %transport,
                    task = %envelope.task().kind_name(),
                    handlers = envelope.handled().len(),
                    "Background task handled"
                );
            }
            DispatchEvent::Failed {
                envelope,
                transport,
                error,
            } => {
                warn!(
                    transport = %transport,
                    task = %envelope.task().kind_name(),
                    error = %error,
                    "Background task failed"
                );
            }
        }
    }
}
