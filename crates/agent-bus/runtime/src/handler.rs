//! Topic handlers

use crate::HandlerError;
use agent_bus_types::Message;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Async callback invoked for each message delivered on a topic
pub type MessageHandler =
    Arc<dyn Fn(Message) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
///
/// ```ignore
/// let handler = handler_fn(move |message| async move {
///     tracing::info!(id = %message.message_id(), "Got message");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |message| f(message).boxed())
}
