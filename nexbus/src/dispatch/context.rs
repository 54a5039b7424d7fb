use std::cell::RefCell;

use crate::{transport::OriginatorInfo, MessageId, Peer};

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<MessageContext>> = const { RefCell::new(None) };
}

/// Ambient context of a message being handled.
///
/// The context is installed for the duration of a handler invocation and restored on every
/// exit path, including panics and suspension points of asynchronous handlers
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Id of the message being handled, when it came from the wire
    message_id: Option<MessageId>,

    /// Information about the originator of the message
    originator: OriginatorInfo,

    /// Environment the message was sent from
    environment: Option<String>,
}

impl MessageContext {
    pub(crate) fn new(
        message_id: Option<MessageId>,
        originator: OriginatorInfo,
        environment: Option<String>,
    ) -> Self {
        Self {
            message_id,
            originator,
            environment,
        }
    }

    /// Get the ambient context of the currently handled message, if any
    pub fn current() -> Option<MessageContext> {
        CURRENT_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    pub fn originator(&self) -> &OriginatorInfo {
        &self.originator
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// The peer that sent the message being handled
    pub fn sender(&self) -> Peer {
        Peer {
            id: self.originator.sender_id.clone(),
            endpoint: self.originator.sender_endpoint.clone(),
            is_up: true,
            is_responding: true,
        }
    }

    /// Install this context as the ambient one. The previous context is restored when the
    /// returned guard drops
    pub(crate) fn install(&self) -> ContextGuard {
        let previous = CURRENT_CONTEXT.with(|ctx| ctx.borrow_mut().replace(self.clone()));
        ContextGuard { previous }
    }
}

/// Guard restoring the previously installed [`MessageContext`] on drop
pub(crate) struct ContextGuard {
    previous: Option<MessageContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_CONTEXT.with(|ctx| *ctx.borrow_mut() = previous);
    }
}
