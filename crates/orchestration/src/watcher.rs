use std::process::ExitStatus;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tracing::{debug, info, warn};

use bgtask_common::{
    CodecError, DispatchError, Envelope, EnvelopeCodec, HandledCallbackStamp, Reconciler,
    WorkerControl, WorkerState,
};

use crate::events::{DispatchEvent, EventDispatcher};

const READ_CHUNK: usize = 8 * 1024;

enum Collected {
    Exited { output: Vec<u8>, status: ExitStatus },
    Fault(String),
    Killed,
}

/// Supervises one worker process: reads its streams to completion, then
/// classifies the output and folds the result into the original envelope.
pub(crate) struct OutputWatcher {
    pub(crate) child: Child,
    pub(crate) stdout: ChildStdout,
    pub(crate) stderr: ChildStderr,
    pub(crate) control: WorkerControl,
    pub(crate) codec: EnvelopeCodec,
    pub(crate) original: Envelope,
    pub(crate) callback: Option<HandledCallbackStamp>,
    pub(crate) events: Arc<EventDispatcher>,
    pub(crate) transport: String,
}

impl OutputWatcher {
    pub(crate) async fn run(mut self) {
        let pid = self.child.id();
        match self.collect().await {
            Collected::Killed => {
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
                info!(pid = ?pid, "Background worker killed, output discarded");
            }
            Collected::Fault(diagnostic) => {
                warn!(pid = ?pid, "Background worker wrote to stderr, stopping it");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
                self.fail(DispatchError::WorkerFault(diagnostic));
            }
            Collected::Exited { output, status } => {
                debug!(pid = ?pid, status = %status, bytes = output.len(), "Background worker exited");
                match classify(&self.codec, &output, status.success(), status.code()) {
                    Ok(result) => self.complete(result),
                    Err(err) => self.fail(err),
                }
            }
        }
    }

    async fn collect(&mut self) -> Collected {
        let mut output = Vec::new();
        let mut out_chunk = [0u8; READ_CHUNK];
        let mut err_chunk = [0u8; READ_CHUNK];
        let mut stdout_open = true;
        let mut stderr_open = true;

        while stdout_open || stderr_open {
            tokio::select! {
                biased;
                _ = self.control.cancelled() => return Collected::Killed,
                read = self.stderr.read(&mut err_chunk), if stderr_open => match read {
                    Ok(0) => stderr_open = false,
                    Ok(n) => {
                        return Collected::Fault(String::from_utf8_lossy(&err_chunk[..n]).into_owned());
                    }
                    Err(err) => {
                        debug!(error = %err, "stderr of background worker unreadable");
                        stderr_open = false;
                    }
                },
                read = self.stdout.read(&mut out_chunk), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => output.extend_from_slice(&out_chunk[..n]),
                    Err(err) => {
                        return Collected::Fault(format!("failed to read worker output: {err}"));
                    }
                },
            }
        }

        tokio::select! {
            biased;
            _ = self.control.cancelled() => Collected::Killed,
            status = self.child.wait() => match status {
                Ok(status) => Collected::Exited { output, status },
                Err(err) => Collected::Fault(format!("failed to wait for worker: {err}")),
            },
        }
    }

    fn complete(&self, result: Envelope) {
        if !self.control.claim() {
            return;
        }
        if let Err(err) = Reconciler::new().reconcile(result.task(), self.original.task()) {
            self.report_failure(err.into());
            return;
        }

        let reconciled = self.original.with_new_stamps_from(&result);
        self.events.dispatch(&DispatchEvent::Handled {
            envelope: reconciled.clone(),
            transport: self.transport.clone(),
        });
        if let Some(callback) = &self.callback {
            callback.invoke(&reconciled);
        }
        self.control.finish(WorkerState::Completed(reconciled));
    }

    fn fail(&self, error: DispatchError) {
        if self.control.claim() {
            self.report_failure(error);
        }
    }

    fn report_failure(&self, error: DispatchError) {
        warn!(transport = %self.transport, error = %error, "Background dispatch failed");
        self.events.dispatch(&DispatchEvent::Failed {
            envelope: self.original.clone(),
            transport: self.transport.clone(),
            error: error.clone(),
        });
        self.control.finish(WorkerState::Failed(error));
    }
}

/// Turns what the worker printed into a result envelope or the reason the
/// dispatch failed.
pub(crate) fn classify(
    codec: &EnvelopeCodec,
    output: &[u8],
    success: bool,
    code: Option<i32>,
) -> Result<Envelope, DispatchError> {
    let text = String::from_utf8_lossy(output);
    let text = text.trim();
    let exit = code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}"));

    if text.is_empty() {
        return Err(if success {
            CodecError::Malformed("worker produced no output".into()).into()
        } else {
            DispatchError::WorkerFault(format!("worker exited with {exit} and no output"))
        });
    }

    let result = match codec.decode(text) {
        Ok(result) => result,
        Err(err) if !success => {
            return Err(DispatchError::WorkerFault(format!(
                "worker exited with {exit}: {err}"
            )));
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(details) = result.error_details() {
        return Err(DispatchError::HandlerFailed(details.clone()));
    }
    Ok(result)
}
