//! Interceptors running paired hooks around handler invocations
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::future::BoxFuture;

use super::{InvocationError, MessageContext};
use crate::core::Response;

/// Opaque state produced by a [`Pipe`] in `before_invoke` and handed back to `after_invoke`
pub type PipeState = Option<Box<dyn Any + Send>>;

/// Outcome of a handler invocation, as seen by the `after_invoke` hooks
#[derive(Debug)]
pub enum InvocationOutcome {
    /// The handler ran to completion
    Succeeded,

    /// The handler faulted
    Faulted(InvocationError),
}

impl InvocationOutcome {
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted(_))
    }

    pub fn error(&self) -> Option<&InvocationError> {
        match self {
            Self::Succeeded => None,
            Self::Faulted(error) => Some(error),
        }
    }
}

/// An interceptor with paired hooks around a handler invocation.
///
/// `before_invoke` hooks run in registration order and each produces an opaque state slot.
/// `after_invoke` hooks run in reverse order with the preserved state, on every outcome
pub trait Pipe: Send + Sync {
    fn name(&self) -> &'static str;

    fn before_invoke(&self, context: &MessageContext) -> PipeState;

    fn after_invoke(&self, context: &MessageContext, state: PipeState, outcome: &InvocationOutcome);
}

/// Per-batch result of a handler invocation: one optional [`Response`] per batch entry
pub(crate) type BatchOutcome = Result<Vec<Option<Response>>, InvocationError>;

/// A single run of a handler through the pipe chain
pub(crate) struct PipeInvocation<'a> {
    pipes: &'a [Arc<dyn Pipe>],
    context: &'a MessageContext,
    invoker_type: &'static str,
    message_type: &'a str,
}

impl<'a> PipeInvocation<'a> {
    pub(crate) fn new(
        pipes: &'a [Arc<dyn Pipe>],
        context: &'a MessageContext,
        invoker_type: &'static str,
        message_type: &'a str,
    ) -> Self {
        Self {
            pipes,
            context,
            invoker_type,
            message_type,
        }
    }

    /// Run a synchronous handler invocation through the pipe chain.
    ///
    /// The ambient [`MessageContext`] is installed around `invoke` and the `after_invoke`
    /// hooks always run, including when the handler faults or panics
    pub(crate) fn run(&self, invoke: impl FnOnce() -> BatchOutcome) -> BatchOutcome {
        let states = self
            .pipes
            .iter()
            .map(|pipe| pipe.before_invoke(self.context))
            .collect::<Vec<_>>();

        let result = {
            let _guard = self.context.install();
            match panic::catch_unwind(AssertUnwindSafe(invoke)) {
                Ok(result) => result,
                Err(panic) => Err(InvocationError::failed(
                    self.invoker_type,
                    self.message_type,
                    super::panic_reason(panic),
                )),
            }
        };

        let outcome = match &result {
            Ok(_) => InvocationOutcome::Succeeded,
            Err(error) => InvocationOutcome::Faulted(error.clone()),
        };

        for (pipe, state) in self.pipes.iter().zip(states).rev() {
            pipe.after_invoke(self.context, state, &outcome);
        }

        result
    }
}

/// [`Future`] running an asynchronous handler invocation through the pipe chain.
///
/// `before_invoke` hooks run at the first poll. The ambient [`MessageContext`] is installed
/// around every poll of the inner future and the `after_invoke` hooks run once the future
/// resolves
pub(crate) struct AsyncPipeInvocation {
    pipes: Arc<[Arc<dyn Pipe>]>,
    context: MessageContext,
    invoker_type: &'static str,
    message_type: String,
    states: Option<Vec<PipeState>>,
    future: Option<BoxFuture<'static, BatchOutcome>>,
}

impl AsyncPipeInvocation {
    pub(crate) fn new(
        pipes: Arc<[Arc<dyn Pipe>]>,
        context: MessageContext,
        invoker_type: &'static str,
        message_type: String,
        future: BoxFuture<'static, BatchOutcome>,
    ) -> Self {
        Self {
            pipes,
            context,
            invoker_type,
            message_type,
            states: None,
            future: Some(future),
        }
    }
}

impl Future for AsyncPipeInvocation {
    type Output = BatchOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.states.is_none() {
            this.states = Some(
                this.pipes
                    .iter()
                    .map(|pipe| pipe.before_invoke(&this.context))
                    .collect(),
            );
        }

        let Some(future) = this.future.as_mut() else {
            return Poll::Pending;
        };

        let result = {
            let _guard = this.context.install();
            match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
                Ok(poll) => poll,
                Err(panic) => Poll::Ready(Err(InvocationError::failed(
                    this.invoker_type,
                    this.message_type.as_str(),
                    super::panic_reason(panic),
                ))),
            }
        };

        match result {
            Poll::Ready(result) => {
                this.future = None;

                let outcome = match &result {
                    Ok(_) => InvocationOutcome::Succeeded,
                    Err(error) => InvocationOutcome::Faulted(error.clone()),
                };

                let states = this.states.take().unwrap_or_default();
                for (pipe, state) in this.pipes.iter().zip(states).rev() {
                    pipe.after_invoke(&this.context, state, &outcome);
                }

                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
