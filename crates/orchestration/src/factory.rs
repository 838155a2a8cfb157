use std::path::PathBuf;
use std::sync::Arc;

use bgtask_common::{AppSecret, DispatchError, EnvelopeCodec};

use crate::background::BackgroundTransport;
use crate::events::EventDispatcher;
use crate::types::TransportConfig;

pub const DSN_SCHEME: &str = "background-async://";

/// Builds background transports from `background-async://[program]` DSNs.
pub struct BackgroundTransportFactory {
    codec: EnvelopeCodec,
    secret: AppSecret,
    events: Arc<EventDispatcher>,
}

impl BackgroundTransportFactory {
    pub fn new(codec: EnvelopeCodec, secret: AppSecret) -> Self {
        Self {
            codec,
            secret,
            events: Arc::new(EventDispatcher::new()),
        }
    }

    /// Transports created afterwards publish to `events`.
    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn supports(&self, dsn: &str) -> bool {
        dsn.starts_with(DSN_SCHEME)
    }

    /// A non-empty DSN path replaces the configured worker program.
    pub fn create_transport(
        &self,
        dsn: &str,
        mut config: TransportConfig,
    ) -> Result<BackgroundTransport, DispatchError> {
        let rest = dsn.strip_prefix(DSN_SCHEME).ok_or_else(|| {
            DispatchError::InvalidOperation(format!("unsupported transport DSN '{dsn}'"))
        })?;
        let program = rest.split('?').next().unwrap_or_default();
        if !program.is_empty() {
            config.worker.program = PathBuf::from(program);
        }
        Ok(
            BackgroundTransport::new(config, self.codec.clone(), self.secret.clone())
                .with_events(self.events.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DEFAULT_WORKER_PROGRAM;
    use bgtask_common::ShapeRegistry;

    fn factory() -> BackgroundTransportFactory {
        BackgroundTransportFactory::new(
            EnvelopeCodec::new(Arc::new(ShapeRegistry::new())),
            AppSecret::new("test"),
        )
    }

    #[test]
    fn supports_only_its_scheme() {
        let factory = factory();
        assert!(factory.supports("background-async://"));
        assert!(factory.supports("background-async:///usr/local/bin/worker"));
        assert!(!factory.supports("amqp://localhost"));
        assert!(!factory.supports("background-async:"));
    }

    #[test]
    fn dsn_path_overrides_program() {
        let factory = factory();
        let plain = factory
            .create_transport("background-async://", TransportConfig::default())
            .unwrap();
        assert_eq!(
            plain.config().worker.program,
            PathBuf::from(DEFAULT_WORKER_PROGRAM)
        );

        let custom = factory
            .create_transport("background-async:///opt/worker?x=1", TransportConfig::default())
            .unwrap();
        assert_eq!(custom.config().worker.program, PathBuf::from("/opt/worker"));
        assert!(Arc::ptr_eq(custom.events(), plain.events()));

        assert!(matches!(
            factory.create_transport("redis://", TransportConfig::default()),
            Err(DispatchError::InvalidOperation(_))
        ));
    }
}
