use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{Mutex, MutexGuard};

use super::invoker::{InvocationMode, MessageInvoker, MessageInvokerDescriptor};
use super::pipe::{AsyncPipeInvocation, BatchOutcome, Pipe, PipeInvocation};
use super::{DispatchMessage, InvocationError, MessageContext, MessageDispatch};
use crate::core::{
    AsyncHandler, BatchedHandler, ContextAwareHandler, Handler, IntoResponse, MessagePayload,
};
use crate::{
    BindingKey, DispatchHandler, Message, MessageDescriptor, MessageTypeDescriptor,
    SubscriptionMode,
};

/// A mutation applied to the handler right before its invocation, in registration order
type HandlerMutation = Arc<dyn Fn(&mut dyn Any, &MessageContext) + Send + Sync>;

type Pipes = Arc<[Arc<dyn Pipe>]>;

type InvokerBuilder<H> =
    Box<dyn FnOnce(Arc<Mutex<H>>, Arc<[HandlerMutation]>) -> Arc<dyn MessageInvoker>>;

/// Registration of the messages a handler can be invoked for.
///
/// A handler is registered with [`for_handler`] and declares its handled messages with the
/// `handles*` methods. The registered invokers all share the handler instance and run on the
/// handler's declared dispatch queue
pub struct Registry<H>
where
    H: DispatchHandler + Send + 'static,
{
    handler: Arc<Mutex<H>>,
    builders: Vec<InvokerBuilder<H>>,
    mutations: Vec<HandlerMutation>,
}

/// Create a [`Registry`] for `handler`
pub fn for_handler<H>(handler: H) -> Registry<H>
where
    H: DispatchHandler + Send + 'static,
{
    Registry {
        handler: Arc::new(Mutex::new(handler)),
        builders: Vec::new(),
        mutations: Vec::new(),
    }
}

impl<H> Registry<H>
where
    H: DispatchHandler + Send + 'static,
{
    /// Declares a synchronous handler for the message type `M`
    pub fn handles<M>(self) -> Self
    where
        H: Handler<M>,
        M: Message + MessageDescriptor + prost::Message + Default + Clone,
    {
        self.handles_with::<M>(Vec::new(), SubscriptionMode::default())
    }

    /// Declares a synchronous handler for the message type `M` with explicit subscription
    /// bindings
    pub fn handles_with<M>(
        mut self,
        bindings: Vec<BindingKey>,
        subscription_mode: SubscriptionMode,
    ) -> Self
    where
        H: Handler<M>,
        M: Message + MessageDescriptor + prost::Message + Default + Clone,
    {
        let descriptor = descriptor::<H, M>(
            subscription_mode,
            bindings,
            InvocationMode::Synchronous,
            false,
        );
        self.builders.push(Box::new(move |handler, mutations| {
            Arc::new(SyncInvoker::<H, M> {
                descriptor,
                handler,
                mutations,
                _marker: PhantomData,
            })
        }));
        self
    }

    /// Declares an asynchronous handler for the message type `M`
    pub fn handles_async<M>(mut self) -> Self
    where
        H: AsyncHandler<M>,
        M: Message + MessageDescriptor + prost::Message + Default + Clone,
    {
        let descriptor = descriptor::<H, M>(
            SubscriptionMode::default(),
            Vec::new(),
            InvocationMode::Asynchronous,
            false,
        );
        self.builders.push(Box::new(move |handler, mutations| {
            Arc::new(AsyncInvoker::<H, M> {
                descriptor,
                handler,
                mutations,
                _marker: PhantomData,
            })
        }));
        self
    }

    /// Declares a batch handler for the message type `M`.
    ///
    /// Consecutive dispatches of `M` merge into a single invocation, up to the batch size of
    /// the dispatch queue
    pub fn handles_batched<M>(mut self) -> Self
    where
        H: BatchedHandler<M>,
        M: Message + MessageDescriptor + prost::Message + Default + Clone,
    {
        let descriptor = descriptor::<H, M>(
            SubscriptionMode::default(),
            Vec::new(),
            InvocationMode::Synchronous,
            true,
        );
        self.builders.push(Box::new(move |handler, mutations| {
            Arc::new(BatchedInvoker::<H, M> {
                descriptor,
                handler,
                mutations,
                _marker: PhantomData,
            })
        }));
        self
    }

    /// Install the ambient [`MessageContext`] on the handler before each invocation
    pub fn context_aware(self) -> Self
    where
        H: ContextAwareHandler,
    {
        self.mutate(|handler: &mut H, context: &MessageContext| {
            handler.set_context(context.clone());
        })
    }

    /// Register a mutation applied to the handler before each invocation.
    ///
    /// Mutations run in registration order
    pub fn mutate(
        mut self,
        mutation: impl Fn(&mut H, &MessageContext) + Send + Sync + 'static,
    ) -> Self {
        self.mutations.push(Arc::new(move |handler, context| {
            if let Some(handler) = handler.downcast_mut::<H>() {
                mutation(handler, context);
            }
        }));
        self
    }

    /// Consume the registry and build the registered invokers
    pub(crate) fn into_invokers(self) -> Vec<Arc<dyn MessageInvoker>> {
        let mutations: Arc<[HandlerMutation]> = Arc::from(self.mutations);
        let handler = self.handler;

        self.builders
            .into_iter()
            .map(|builder| builder(Arc::clone(&handler), Arc::clone(&mutations)))
            .collect()
    }
}

fn descriptor<H, M>(
    subscription_mode: SubscriptionMode,
    bindings: Vec<BindingKey>,
    mode: InvocationMode,
    batchable: bool,
) -> MessageInvokerDescriptor
where
    H: DispatchHandler,
    M: MessageDescriptor + 'static,
{
    MessageInvokerDescriptor {
        invoker_type: type_name::<H>(),
        dispatch_queue: H::DISPATCH_QUEUE,
        message: MessageTypeDescriptor::of::<M>(),
        subscription_mode,
        bindings,
        mode,
        batchable,
    }
}

/// Decode every entry of a batch to the concrete message type
fn decode_batch<M>(
    batch: &[MessageDispatch],
    descriptor: &MessageInvokerDescriptor,
) -> Result<Vec<M>, InvocationError>
where
    M: Message + MessageDescriptor + prost::Message + Default + Clone,
{
    batch
        .iter()
        .map(|dispatch| match dispatch.request().message() {
            DispatchMessage::Remote(message) => message
                .decode_as::<M>()
                .ok_or_else(|| {
                    InvocationError::failed(
                        descriptor.invoker_type,
                        descriptor.message.full_name,
                        "unexpected message type",
                    )
                })?
                .map_err(|e| {
                    InvocationError::failed(
                        descriptor.invoker_type,
                        descriptor.message.full_name,
                        e,
                    )
                }),
            DispatchMessage::Local(message) => {
                message
                    .as_any()
                    .downcast_ref::<M>()
                    .cloned()
                    .ok_or_else(|| {
                        InvocationError::failed(
                            descriptor.invoker_type,
                            descriptor.message.full_name,
                            "unexpected local message type",
                        )
                    })
            }
        })
        .collect()
}

/// Lock the handler for a synchronous invocation.
///
/// The lock is only contended by in-flight asynchronous batches of the same handler
fn lock_handler<H>(handler: &Arc<Mutex<H>>) -> MutexGuard<'_, H> {
    loop {
        match handler.try_lock() {
            Ok(guard) => return guard,
            Err(_) => std::thread::yield_now(),
        }
    }
}

fn apply_mutations<H: Any>(
    handler: &mut H,
    mutations: &[HandlerMutation],
    context: &MessageContext,
) {
    for mutation in mutations {
        mutation(handler as &mut dyn Any, context);
    }
}

struct SyncInvoker<H, M> {
    descriptor: MessageInvokerDescriptor,
    handler: Arc<Mutex<H>>,
    mutations: Arc<[HandlerMutation]>,
    _marker: PhantomData<fn(M)>,
}

impl<H, M> MessageInvoker for SyncInvoker<H, M>
where
    H: Handler<M> + DispatchHandler + Send + 'static,
    M: Message + MessageDescriptor + prost::Message + Default + Clone,
{
    fn descriptor(&self) -> &MessageInvokerDescriptor {
        &self.descriptor
    }

    fn invoke(&self, batch: &[MessageDispatch], pipes: &[Arc<dyn Pipe>]) -> BatchOutcome {
        let Some(first) = batch.first() else {
            return Ok(vec![]);
        };
        let context = first.context();

        let invocation = PipeInvocation::new(
            pipes,
            context,
            self.descriptor.invoker_type,
            self.descriptor.message.full_name,
        );

        invocation.run(|| {
            let messages = decode_batch::<M>(batch, &self.descriptor)?;

            let mut handler = lock_handler(&self.handler);
            apply_mutations(&mut *handler, &self.mutations, context);

            let mut responses = Vec::with_capacity(messages.len());
            for message in messages {
                responses.push(handler.handle(message, context).into_response());
            }
            Ok(responses)
        })
    }

    fn invoke_async(
        &self,
        _batch: Vec<MessageDispatch>,
        _pipes: Pipes,
    ) -> Option<BoxFuture<'static, BatchOutcome>> {
        None
    }
}

struct BatchedInvoker<H, M> {
    descriptor: MessageInvokerDescriptor,
    handler: Arc<Mutex<H>>,
    mutations: Arc<[HandlerMutation]>,
    _marker: PhantomData<fn(M)>,
}

impl<H, M> MessageInvoker for BatchedInvoker<H, M>
where
    H: BatchedHandler<M> + DispatchHandler + Send + 'static,
    M: Message + MessageDescriptor + prost::Message + Default + Clone,
{
    fn descriptor(&self) -> &MessageInvokerDescriptor {
        &self.descriptor
    }

    fn invoke(&self, batch: &[MessageDispatch], pipes: &[Arc<dyn Pipe>]) -> BatchOutcome {
        let Some(first) = batch.first() else {
            return Ok(vec![]);
        };
        let context = first.context();

        let invocation = PipeInvocation::new(
            pipes,
            context,
            self.descriptor.invoker_type,
            self.descriptor.message.full_name,
        );

        invocation.run(|| {
            let messages = decode_batch::<M>(batch, &self.descriptor)?;

            let mut handler = lock_handler(&self.handler);
            apply_mutations(&mut *handler, &self.mutations, context);

            // The batch runs as one invocation; its response is reported on the first entry
            let response = handler.handle(messages, context).into_response();

            let mut responses: Vec<Option<_>> = (0..batch.len()).map(|_| None).collect();
            responses[0] = response;
            Ok(responses)
        })
    }

    fn invoke_async(
        &self,
        _batch: Vec<MessageDispatch>,
        _pipes: Pipes,
    ) -> Option<BoxFuture<'static, BatchOutcome>> {
        None
    }
}

struct AsyncInvoker<H, M> {
    descriptor: MessageInvokerDescriptor,
    handler: Arc<Mutex<H>>,
    mutations: Arc<[HandlerMutation]>,
    _marker: PhantomData<fn(M)>,
}

impl<H, M> MessageInvoker for AsyncInvoker<H, M>
where
    H: AsyncHandler<M> + DispatchHandler + Send + 'static,
    M: Message + MessageDescriptor + prost::Message + Default + Clone,
{
    fn descriptor(&self) -> &MessageInvokerDescriptor {
        &self.descriptor
    }

    fn invoke(&self, batch: &[MessageDispatch], _pipes: &[Arc<dyn Pipe>]) -> BatchOutcome {
        let _ = batch;
        Err(InvocationError::contract_violation(
            self.descriptor.invoker_type,
            self.descriptor.message.full_name,
        ))
    }

    fn invoke_async(
        &self,
        batch: Vec<MessageDispatch>,
        pipes: Pipes,
    ) -> Option<BoxFuture<'static, BatchOutcome>> {
        let context = batch.first()?.context().clone();

        let handler = Arc::clone(&self.handler);
        let mutations = Arc::clone(&self.mutations);
        let descriptor = self.descriptor.clone();

        let handler_future = {
            let context = context.clone();
            async move {
                let messages = decode_batch::<M>(&batch, &descriptor)?;

                let mut handler = handler.lock().await;
                apply_mutations(&mut *handler, &mutations, &context);

                let mut responses = Vec::with_capacity(messages.len());
                for message in messages {
                    responses.push(handler.handle(message, &context).await.into_response());
                }
                Ok(responses)
            }
            .boxed()
        };

        Some(
            AsyncPipeInvocation::new(
                pipes,
                context,
                self.descriptor.invoker_type,
                self.descriptor.message.full_name.to_string(),
                handler_future,
            )
            .boxed(),
        )
    }
}
