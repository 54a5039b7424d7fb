use std::sync::Arc;

use futures_core::future::BoxFuture;

use super::pipe::{BatchOutcome, Pipe};
use super::MessageDispatch;
use crate::{BindingKey, MessageTypeDescriptor, SubscriptionMode};

/// Execution mode of an invoker
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum InvocationMode {
    /// The handler runs inline on the queue worker; the batch completes before the next pull
    Synchronous,

    /// The handler runs cooperatively; continuations are marshaled back onto the queue and
    /// the worker keeps pulling while the batch is in flight
    Asynchronous,
}

/// A descriptor for an invoker of a specific type of message
#[derive(Debug, Clone)]
pub(crate) struct MessageInvokerDescriptor {
    /// The `type_name()` of the handler
    pub invoker_type: &'static str,

    /// Name of the dispatch queue the handler runs on
    pub dispatch_queue: &'static str,

    /// Descriptor of the handled message type
    pub message: MessageTypeDescriptor,

    /// Mode of subscription for the message
    pub subscription_mode: SubscriptionMode,

    /// Subscription bindings sent at registration for the message
    pub bindings: Vec<BindingKey>,

    /// Execution mode of the invoker
    pub mode: InvocationMode,

    /// `true` if consecutive dispatches for this invoker can merge into one invocation
    pub batchable: bool,
}

/// An invoker of a message handler, bound to a dispatch queue
pub(crate) trait MessageInvoker: Send + Sync {
    fn descriptor(&self) -> &MessageInvokerDescriptor;

    /// Returns `true` if a dispatch for `other` can join a batch headed by this invoker
    fn can_merge_with(&self, other: &dyn MessageInvoker) -> bool {
        let (this, that) = (self.descriptor(), other.descriptor());

        this.batchable
            && that.batchable
            && this.mode == that.mode
            && this.invoker_type == that.invoker_type
            && this.message.full_name == that.message.full_name
    }

    /// Run the handler inline over `batch`.
    ///
    /// Only meaningful for [`InvocationMode::Synchronous`] invokers
    fn invoke(&self, batch: &[MessageDispatch], pipes: &[Arc<dyn Pipe>]) -> BatchOutcome;

    /// Build the asynchronous form of the invocation over a clone of the batch.
    ///
    /// Returns `None` when the invoker has no asynchronous form; for an
    /// [`InvocationMode::Asynchronous`] invoker this is a contract violation surfaced by the
    /// queue as a handler failure
    fn invoke_async(
        &self,
        batch: Vec<MessageDispatch>,
        pipes: Arc<[Arc<dyn Pipe>]>,
    ) -> Option<BoxFuture<'static, BatchOutcome>>;
}
