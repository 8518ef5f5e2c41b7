//! Transport and factory traits

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{Result, TargetDescriptor};

/// A physical connection to the document store
///
/// The pool never speaks the wire protocol. It only needs to know whether a
/// connection is still usable and whether it is in the middle of a response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Cheap liveness test: connected, valid and not closed
    fn is_healthy(&self) -> bool;

    /// Whether unread bytes are waiting on the connection
    ///
    /// A connection with pending data is mid-response and must not be handed
    /// to another caller.
    fn has_pending_data(&self) -> bool;

    /// Close the underlying stream
    async fn close(&self) -> Result<()>;

    /// Access the concrete transport for protocol-level use
    fn as_any(&self) -> &dyn Any;
}

/// Opens new transports for a target
///
/// Supplied by the transport layer. Implementations own credential handling
/// and protocol negotiation; the pool surfaces their errors unchanged in kind
/// and never retries.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new connection to `target`
    async fn open(&self, target: &TargetDescriptor) -> Result<Arc<dyn Transport>>;
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn open(&self, target: &TargetDescriptor) -> Result<Arc<dyn Transport>> {
        (**self).open(target).await
    }
}
