//! The connection trait driven by the multiplexer

use std::future::Future;
use std::pin::Pin;

use crate::command::OutboundFrame;
use crate::error::NativeResult;
use crate::message::NativeMessage;

/// Boxed future returned by [`NativeConnection`] methods
pub type ConnectionFuture<'a, T> = Pin<Box<dyn Future<Output = NativeResult<T>> + Send + 'a>>;

/// One live link to a debug engine.
///
/// The multiplexer runs a reader task and a writer task per session, so
/// `send` and `receive` are called concurrently from different tasks.
/// Implementations must keep the two directions independent.
pub trait NativeConnection: Send + Sync + std::fmt::Debug {
    /// Write one command frame
    fn send(&self, frame: OutboundFrame) -> ConnectionFuture<'_, ()>;

    /// Read the next packet; `Ok(None)` means the engine hung up
    fn receive(&self) -> ConnectionFuture<'_, Option<NativeMessage>>;

    /// Close the link. Calling it more than once is harmless.
    fn close(&self) -> ConnectionFuture<'_, ()>;

    /// Remote address or other identifier, for logs and session info
    fn endpoint(&self) -> Option<String> {
        None
    }
}
