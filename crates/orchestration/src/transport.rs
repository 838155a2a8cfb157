use async_trait::async_trait;

use bgtask_common::{DispatchError, Envelope};

/// Message transport seam. Receiving operations exist for transports that
/// queue; send-only transports refuse them.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Hands the envelope over and returns the envelope the caller keeps.
    async fn send(&self, envelope: Envelope) -> Result<Envelope, DispatchError>;

    async fn get(&self) -> Result<Vec<Envelope>, DispatchError>;

    async fn ack(&self, envelope: &Envelope) -> Result<(), DispatchError>;

    async fn reject(&self, envelope: &Envelope) -> Result<(), DispatchError>;
}
