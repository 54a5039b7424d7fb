use async_trait::async_trait;

use super::IntoResponse;
use crate::{dispatch::MessageContext, Message};

/// Handler of a `M` typed message, invoked inline on its dispatch queue.
///
/// Handlers must implement this trait to be able to handle particular messages
pub trait Handler<M: Message> {
    type Response: IntoResponse;

    /// Handle `message`
    fn handle(&mut self, message: M, context: &MessageContext) -> Self::Response;
}

/// Handler of a `M` typed message with an asynchronous body.
///
/// The handler runs cooperatively on its dispatch queue: continuations are marshaled back to
/// the queue worker, and the worker keeps processing other batches while the handler is
/// suspended
#[async_trait]
pub trait AsyncHandler<M: Message> {
    type Response: IntoResponse + Send;

    /// Handle `message`
    async fn handle(&mut self, message: M, context: &MessageContext) -> Self::Response;
}

/// Handler of merged batches of `M` typed messages.
///
/// Consecutive dispatches of the same message type to the same handler are merged into a
/// single invocation, up to the queue's configured batch size
pub trait BatchedHandler<M: Message> {
    type Response: IntoResponse;

    /// Handle a batch of `messages`
    fn handle(&mut self, messages: Vec<M>, context: &MessageContext) -> Self::Response;
}

/// Capability for handlers that want the ambient [`MessageContext`] installed on them right
/// before invocation
pub trait ContextAwareHandler {
    fn set_context(&mut self, context: MessageContext);
}
