use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

use bgtask_common::{fingerprint, AppSecret, DispatchError, Envelope, EnvelopeCodec, ProcessHandle, StampKind};

use crate::events::EventDispatcher;
use crate::transport::Transport;
use crate::types::TransportConfig;
use crate::watcher::OutputWatcher;

/// Send-only transport that runs every envelope in its own worker process.
pub struct BackgroundTransport {
    config: TransportConfig,
    codec: EnvelopeCodec,
    secret: AppSecret,
    events: Arc<EventDispatcher>,
}

impl BackgroundTransport {
    pub fn new(config: TransportConfig, codec: EnvelopeCodec, secret: AppSecret) -> Self {
        Self {
            config,
            codec,
            secret,
            events: Arc::new(EventDispatcher::new()),
        }
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn command(&self, encoded: &str, tag: &str) -> TokioCommand {
        let worker = &self.config.worker;
        let mut command = TokioCommand::new(&worker.program);
        command.args(&worker.args);
        command.arg(encoded);
        command.arg(tag);
        command.envs(&worker.env);
        if let Some(dir) = &worker.working_dir {
            command.current_dir(dir);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        command
    }

    fn spawn_worker(&self, envelope: Envelope) -> Result<Envelope, DispatchError> {
        let callback = envelope.callback().cloned();
        let outgoing = envelope.without_all(&StampKind::HandledCallback);
        let encoded = self.codec.encode(&outgoing)?;
        let tag = fingerprint(&encoded, &self.secret);

        let program = self.config.worker.program.display().to_string();
        let spawn_error = |reason: String| DispatchError::Spawn {
            program: program.clone(),
            reason,
        };
        let mut child = self
            .command(&encoded, &tag)
            .spawn()
            .map_err(|err| spawn_error(err.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("worker stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("worker stderr unavailable".into()))?;

        let pid = child.id();
        let (handle, control) = ProcessHandle::new(pid, program.clone());
        info!(
            transport = %self.config.name,
            pid = ?pid,
            program = %program,
            task = %outgoing.task().kind_name(),
            "Started background worker"
        );
        debug!(bytes = encoded.len(), "Encoded envelope handed to worker");

        let watcher = OutputWatcher {
            child,
            stdout,
            stderr,
            control,
            codec: self.codec.clone(),
            original: outgoing.clone(),
            callback,
            events: self.events.clone(),
            transport: self.config.name.clone(),
        };
        tokio::spawn(watcher.run());

        Ok(outgoing.with(handle))
    }
}

#[async_trait]
impl Transport for BackgroundTransport {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn send(&self, envelope: Envelope) -> Result<Envelope, DispatchError> {
        self.spawn_worker(envelope)
    }

    async fn get(&self) -> Result<Vec<Envelope>, DispatchError> {
        Err(DispatchError::send_only("get"))
    }

    async fn ack(&self, _envelope: &Envelope) -> Result<(), DispatchError> {
        Err(DispatchError::send_only("ack"))
    }

    async fn reject(&self, _envelope: &Envelope) -> Result<(), DispatchError> {
        Err(DispatchError::send_only("reject"))
    }
}
