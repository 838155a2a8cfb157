use thiserror::Error;
use tracing::{debug, error};

use bgtask_common::{verify, AppSecret, CodecError, Envelope, EnvelopeCodec, ErrorDetails, ObjectRef};

use crate::bus::{HandlerError, MessageBus};

pub const INVALID_ENVELOPE: &str = "InvalidEnvelopeError";
pub const DECODE_ERROR: &str = "DecodeError";
pub const ENCODE_ERROR: &str = "EncodeError";

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("Invalid envelope")]
    InvalidEnvelope,

    #[error(transparent)]
    Decode(#[from] CodecError),

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl ConsumeError {
    pub fn details(&self) -> ErrorDetails {
        match self {
            ConsumeError::InvalidEnvelope => ErrorDetails::new(INVALID_ENVELOPE, "Invalid envelope"),
            ConsumeError::Decode(err) => ErrorDetails::new(DECODE_ERROR, err.to_string()),
            ConsumeError::Handler(err) => err.clone().into_details(),
        }
    }
}

/// What the worker prints and how it exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub output: String,
    pub success: bool,
}

impl RunOutcome {
    pub fn exit_status(&self) -> u8 {
        if self.success {
            0
        } else {
            1
        }
    }
}

/// Runs exactly one task: authenticate, decode, handle, re-encode.
pub struct SingleMessageRunner {
    codec: EnvelopeCodec,
    bus: MessageBus,
    secret: AppSecret,
}

impl SingleMessageRunner {
    pub fn new(codec: EnvelopeCodec, bus: MessageBus, secret: AppSecret) -> Self {
        Self { codec, bus, secret }
    }

    /// Every outcome, failures included, is reported as one encoded envelope.
    pub async fn run(&self, encoded: &str, tag: &str) -> RunOutcome {
        let mut received = None;
        let (envelope, success) = match self.consume(encoded, tag, &mut received).await {
            Ok(handled) => (handled, true),
            Err(err) => {
                error!(error = %err, "Error while consuming message");
                let envelope =
                    received.unwrap_or_else(|| Envelope::new(ObjectRef::placeholder()));
                (envelope.with(err.details()), false)
            }
        };

        match self.codec.encode(&envelope) {
            Ok(output) => RunOutcome { output, success },
            Err(err) => {
                error!(error = %err, "Failed to encode result envelope");
                let fallback = Envelope::new(ObjectRef::placeholder())
                    .with(ErrorDetails::new(ENCODE_ERROR, err.to_string()));
                RunOutcome {
                    output: self.codec.encode(&fallback).unwrap_or_default(),
                    success: false,
                }
            }
        }
    }

    async fn consume(
        &self,
        encoded: &str,
        tag: &str,
        received: &mut Option<Envelope>,
    ) -> Result<Envelope, ConsumeError> {
        if !verify(encoded, tag, &self.secret) {
            return Err(ConsumeError::InvalidEnvelope);
        }
        let envelope = self.codec.decode(encoded)?;
        debug!(task = %envelope.task().kind_name(), "Received message");
        *received = Some(envelope.clone());
        Ok(self.bus.dispatch(envelope).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::DemoShapes;
    use bgtask_common::{fingerprint, PLACEHOLDER_SHAPE};
    use std::sync::Arc;

    fn runner(demo: &DemoShapes, secret: &str) -> (SingleMessageRunner, EnvelopeCodec) {
        let codec = EnvelopeCodec::new(Arc::new(demo.registry().unwrap()));
        let runner = SingleMessageRunner::new(codec.clone(), demo.bus().unwrap(), AppSecret::new(secret));
        (runner, codec)
    }

    #[tokio::test]
    async fn handles_authenticated_task() {
        let demo = DemoShapes::new();
        let (runner, codec) = runner(&demo, "s");
        let task = demo.example_message("Hello", 0).unwrap();
        let encoded = codec.encode(&Envelope::new(task)).unwrap();

        let outcome = runner.run(&encoded, &fingerprint(&encoded, &AppSecret::new("s"))).await;
        assert!(outcome.success);
        assert_eq!(outcome.exit_status(), 0);

        let result = codec.decode(&outcome.output).unwrap();
        assert!(result.error_details().is_none());
        let response = result.task().as_object().unwrap().get("response").unwrap();
        assert!(response.as_str().is_some());
        assert_eq!(result.handled()[0].handler, "ExampleHandler");
    }

    #[tokio::test]
    async fn wrong_tag_answers_with_placeholder() {
        let demo = DemoShapes::new();
        let (runner, codec) = runner(&demo, "s");
        let encoded = codec
            .encode(&Envelope::new(demo.example_message("Hello", 0).unwrap()))
            .unwrap();

        let outcome = runner.run(&encoded, &fingerprint(&encoded, &AppSecret::new("other"))).await;
        assert!(!outcome.success);
        assert_eq!(outcome.exit_status(), 1);

        let result = codec.decode(&outcome.output).unwrap();
        assert_eq!(result.task().kind_name(), PLACEHOLDER_SHAPE);
        let details = result.error_details().unwrap();
        assert_eq!(details.kind, INVALID_ENVELOPE);
        assert_eq!(details.message, "Invalid envelope");
    }

    #[tokio::test]
    async fn undecodable_envelope_reports_decode_error() {
        let demo = DemoShapes::new();
        let (runner, codec) = runner(&demo, "s");
        let garbage = "bm90IGpzb24=";
        let outcome = runner.run(garbage, &fingerprint(garbage, &AppSecret::new("s"))).await;
        assert!(!outcome.success);
        let result = codec.decode(&outcome.output).unwrap();
        assert_eq!(result.error_details().unwrap().kind, DECODE_ERROR);
    }

    #[tokio::test]
    async fn handler_failure_keeps_the_task() {
        let demo = DemoShapes::new();
        let (runner, codec) = runner(&demo, "s");
        let encoded = codec
            .encode(&Envelope::new(demo.failing_message("nope", 42).unwrap()))
            .unwrap();
        let outcome = runner.run(&encoded, &fingerprint(&encoded, &AppSecret::new("s"))).await;
        assert!(!outcome.success);

        let result = codec.decode(&outcome.output).unwrap();
        assert_eq!(result.task().kind_name(), "FailingMessage");
        let details = result.error_details().unwrap();
        assert_eq!(details.code, Some(42));
        assert_eq!(details.message, "nope");
        assert!(result.handled().is_empty());
    }
}
