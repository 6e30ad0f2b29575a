//! Message handler trait
//!
//! Each pipeline stage implements this for the topic it consumes. The pool calls
//! `handle` once per delivery; returning `Ok` acknowledges the message.

use async_trait::async_trait;
use lectio_core::events::Envelope;
use lectio_core::TaskError;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stage name used in logs.
    fn name(&self) -> &'static str;

    /// Processes one delivery. `cancel` fires when the pool shuts down; long
    /// collaborator calls should race against it.
    ///
    /// A recoverable [`TaskError`] asks for redelivery, an unrecoverable one drops the
    /// message after logging.
    async fn handle(&self, envelope: &Envelope, cancel: CancellationToken)
        -> Result<(), TaskError>;
}
