use std::collections::{hash_map, HashMap};
use std::sync::Arc;

use tracing::{error, warn};

use super::invoker::{MessageInvoker, MessageInvokerDescriptor};
use super::queue::DispatchQueue;
use super::{DispatchFuture, DispatchRequest, Error, MessageDispatch, Pipe};

/// Predicate on the handler type name selecting the handlers allowed to receive a
/// dispatched message
pub(crate) type HandlerFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

struct Registrations {
    /// Queues keyed by their name. A queue is created when the first handler declares it
    queues: HashMap<&'static str, DispatchQueue>,

    /// Invokers keyed by the full name of their handled message
    invokers: HashMap<&'static str, Vec<Arc<dyn MessageInvoker>>>,

    /// Dispatch queue registered for each message, used to refuse split registrations
    message_queue: HashMap<&'static str, &'static str>,

    /// Pipes installed around every handler invocation
    pipes: Vec<Arc<dyn Pipe>>,

    /// Optional predicate restricting the handlers invoked for a dispatch
    filter: Option<HandlerFilter>,

    batch_size: usize,
}

/// Inner state of the dispatcher
enum Inner {
    Init(Registrations),
    Started(Registrations),
}

/// Routes dispatched messages to the queues of their registered handler invokers
pub(crate) struct MessageDispatcher {
    inner: Option<Inner>,
}

impl MessageDispatcher {
    /// Create a new empty dispatcher. Queues pull batches of up to `batch_size` entries
    pub(crate) fn new(batch_size: usize) -> Self {
        Self {
            inner: Some(Inner::Init(Registrations {
                queues: HashMap::new(),
                invokers: HashMap::new(),
                message_queue: HashMap::new(),
                pipes: Vec::new(),
                filter: None,
                batch_size: batch_size.max(1),
            })),
        }
    }

    /// Add the invokers of a handler registry to the dispatcher
    pub(crate) fn add(
        &mut self,
        invokers: Vec<Arc<dyn MessageInvoker>>,
    ) -> Result<(), Error> {
        match self.inner.as_mut() {
            Some(Inner::Init(registrations)) => {
                for invoker in invokers {
                    let descriptor = invoker.descriptor();
                    let message_type = descriptor.message.full_name;
                    let dispatch_queue = descriptor.dispatch_queue;

                    // All the handlers of a message must share one dispatch queue, otherwise
                    // ordering within the message type would depend on handler registration
                    match registrations.message_queue.entry(message_type) {
                        hash_map::Entry::Occupied(e) if *e.get() != dispatch_queue => {
                            return Err(Error::DoubleRegister {
                                message_type: message_type.to_string(),
                                dispatch_queue,
                                previous: e.get().to_string(),
                            });
                        }
                        hash_map::Entry::Occupied(_) => {}
                        hash_map::Entry::Vacant(e) => {
                            e.insert(dispatch_queue);
                        }
                    }

                    registrations
                        .queues
                        .entry(dispatch_queue)
                        .or_insert_with(|| {
                            DispatchQueue::new(
                                dispatch_queue.to_string(),
                                registrations.batch_size,
                            )
                        });

                    registrations
                        .invokers
                        .entry(message_type)
                        .or_default()
                        .push(invoker);
                }

                Ok(())
            }
            _ => Err(Error::InvalidOperation),
        }
    }

    /// Install a pipe around every handler invocation
    pub(crate) fn add_pipe(&mut self, pipe: Arc<dyn Pipe>) -> Result<(), Error> {
        match self.inner.as_mut() {
            Some(Inner::Init(registrations)) => {
                registrations.pipes.push(pipe);
                Ok(())
            }
            _ => Err(Error::InvalidOperation),
        }
    }

    /// Restrict the handlers invoked for dispatched messages to those accepted by `filter`
    pub(crate) fn set_handler_filter(&mut self, filter: HandlerFilter) -> Result<(), Error> {
        match self.inner.as_mut() {
            Some(Inner::Init(registrations)) => {
                registrations.filter = Some(filter);
                Ok(())
            }
            _ => Err(Error::InvalidOperation),
        }
    }

    /// Get the descriptors of every registered invoker
    pub(crate) fn descriptors(&self) -> Result<Vec<MessageInvokerDescriptor>, Error> {
        match self.inner.as_ref() {
            Some(Inner::Init(registrations)) | Some(Inner::Started(registrations)) => {
                Ok(registrations
                    .invokers
                    .values()
                    .flatten()
                    .map(|invoker| invoker.descriptor().clone())
                    .collect())
            }
            None => Err(Error::InvalidOperation),
        }
    }

    /// Start the dispatcher. This will start all the registered dispatch queues
    pub(crate) fn start(&mut self) -> Result<(), Error> {
        let (inner, res) = match self.inner.take() {
            Some(Inner::Init(mut registrations)) => {
                let pipes: Arc<[Arc<dyn Pipe>]> = Arc::from(registrations.pipes.clone());

                let mut result = Ok(());
                for queue in registrations.queues.values_mut() {
                    if let Err(e) = queue.start(Arc::clone(&pipes)) {
                        result = Err(Error::Queue(e));
                        break;
                    }
                }

                match result {
                    // Transition to Started state
                    Ok(()) => (Some(Inner::Started(registrations)), Ok(())),
                    Err(e) => (Some(Inner::Init(registrations)), Err(e)),
                }
            }
            x => (x, Err(Error::InvalidOperation)),
        };

        self.inner = inner;
        res
    }

    /// Stop the dispatcher, draining every dispatch queue
    pub(crate) fn stop(&mut self) -> Result<(), Error> {
        let (inner, res) = match self.inner.take() {
            Some(Inner::Started(mut registrations)) => {
                for queue in registrations.queues.values_mut() {
                    if let Err(e) = queue.stop() {
                        warn!("failed to stop dispatch queue {}: {e}", queue.name());
                    }
                }

                // Transition back to Init state
                (Some(Inner::Init(registrations)), Ok(()))
            }
            x => (x, Err(Error::InvalidOperation)),
        };

        self.inner = inner;
        res
    }

    /// Dispatch a message to the queues of its registered invokers.
    ///
    /// The returned future resolves once every selected invoker has reported its outcome.
    /// A message without any matching invoker completes right away with an empty result
    pub(crate) fn dispatch(&self, request: DispatchRequest) -> DispatchFuture {
        let (dispatch, future) = MessageDispatch::new(request);
        self.route(&dispatch);
        dispatch.enqueued_all();
        future
    }

    fn route(&self, dispatch: &MessageDispatch) {
        let registrations = match self.inner.as_ref() {
            Some(Inner::Init(registrations)) | Some(Inner::Started(registrations)) => {
                registrations
            }
            None => return,
        };

        let message_type = dispatch.request().message().message_type().to_string();
        let Some(invokers) = registrations.invokers.get(message_type.as_str()) else {
            return;
        };

        for invoker in invokers {
            let descriptor = invoker.descriptor();

            if let Some(filter) = &registrations.filter {
                if !filter(descriptor.invoker_type) {
                    continue;
                }
            }

            let Some(queue) = registrations.queues.get(descriptor.dispatch_queue) else {
                error!(
                    "no dispatch queue {} for handler {}",
                    descriptor.dispatch_queue, descriptor.invoker_type
                );
                continue;
            };

            if let Err(e) = queue.run_or_enqueue(dispatch.clone(), Arc::clone(invoker)) {
                error!(
                    "failed to enqueue {} on dispatch queue {}: {e}",
                    message_type, descriptor.dispatch_queue
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::super::registry;
    use super::*;
    use crate::core::{AsyncHandler, Handler};
    use crate::MessageContext;
    use crate::transport::TransportMessage;
    use crate::{DispatchHandler, Peer};
    use async_trait::async_trait;

    #[derive(Clone, prost::Message)]
    struct SyncCommand {
        #[prost(uint32, tag = "1")]
        value: u32,
    }

    nexbus_core::impl_command!(SyncCommand, "Test.Dispatcher.SyncCommand");

    #[derive(Clone, prost::Message)]
    struct AsyncEvent {
        #[prost(uint32, tag = "1")]
        value: u32,
    }

    nexbus_core::impl_event!(AsyncEvent, "Test.Dispatcher.AsyncEvent");

    struct TestHandler {
        sync_count: Arc<AtomicUsize>,
        async_values: Arc<Mutex<Vec<u32>>>,
    }

    impl DispatchHandler for TestHandler {
        const DISPATCH_QUEUE: &'static str = nexbus_core::DEFAULT_DISPATCH_QUEUE;
    }

    impl Handler<SyncCommand> for TestHandler {
        type Response = ();

        fn handle(&mut self, _message: SyncCommand, _context: &MessageContext) {
            self.sync_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AsyncHandler<AsyncEvent> for TestHandler {
        type Response = ();

        async fn handle(&mut self, message: AsyncEvent, _context: &MessageContext) {
            tokio::task::yield_now().await;
            self.async_values.lock().unwrap().push(message.value);
        }
    }

    fn dispatcher(
        sync_count: &Arc<AtomicUsize>,
        async_values: &Arc<Mutex<Vec<u32>>>,
    ) -> MessageDispatcher {
        let mut dispatcher = MessageDispatcher::new(16);
        dispatcher
            .add(
                registry::for_handler(TestHandler {
                    sync_count: Arc::clone(sync_count),
                    async_values: Arc::clone(async_values),
                })
                .handles::<SyncCommand>()
                .handles_async::<AsyncEvent>()
                .into_invokers(),
            )
            .unwrap();
        dispatcher
    }

    fn remote<M: crate::Message + prost::Message>(message: &M) -> DispatchRequest {
        let peer = Peer::test();
        let (_, transport) = TransportMessage::create(&peer, "Test".to_string(), message);
        DispatchRequest::remote(transport)
    }

    #[tokio::test]
    async fn dispatches_to_a_synchronous_handler() {
        let sync_count = Arc::new(AtomicUsize::new(0));
        let async_values = Arc::new(Mutex::new(vec![]));
        let mut dispatcher = dispatcher(&sync_count, &async_values);
        dispatcher.start().unwrap();

        let dispatched = dispatcher
            .dispatch(remote(&SyncCommand { value: 1 }))
            .await
            .unwrap();

        assert!(dispatched.result().is_ok());
        assert_eq!(sync_count.load(Ordering::SeqCst), 1);
        dispatcher.stop().unwrap();
    }

    #[tokio::test]
    async fn dispatches_to_an_asynchronous_handler() {
        let sync_count = Arc::new(AtomicUsize::new(0));
        let async_values = Arc::new(Mutex::new(vec![]));
        let mut dispatcher = dispatcher(&sync_count, &async_values);
        dispatcher.start().unwrap();

        let dispatched = dispatcher
            .dispatch(remote(&AsyncEvent { value: 42 }))
            .await
            .unwrap();

        assert!(dispatched.result().is_ok());
        assert_eq!(*async_values.lock().unwrap(), vec![42]);
        dispatcher.stop().unwrap();
    }

    #[tokio::test]
    async fn message_without_handler_completes_with_an_empty_result() {
        let sync_count = Arc::new(AtomicUsize::new(0));
        let async_values: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(vec![]));
        let mut dispatcher = MessageDispatcher::new(16);
        dispatcher.start().unwrap();

        let dispatched = dispatcher
            .dispatch(remote(&SyncCommand { value: 1 }))
            .await
            .unwrap();

        assert!(matches!(dispatched.result(), Ok(None)));
        assert_eq!(sync_count.load(Ordering::SeqCst), 0);
        drop(async_values);
        dispatcher.stop().unwrap();
    }

    #[test]
    fn split_registration_across_queues_is_refused() {
        struct OtherHandler;

        impl DispatchHandler for OtherHandler {
            const DISPATCH_QUEUE: &'static str = "OtherQueue";
        }

        impl Handler<SyncCommand> for OtherHandler {
            type Response = ();

            fn handle(&mut self, _message: SyncCommand, _context: &MessageContext) {}
        }

        let sync_count = Arc::new(AtomicUsize::new(0));
        let async_values = Arc::new(Mutex::new(vec![]));
        let mut dispatcher = dispatcher(&sync_count, &async_values);

        let result = dispatcher.add(
            registry::for_handler(OtherHandler)
                .handles::<SyncCommand>()
                .into_invokers(),
        );

        assert!(matches!(result, Err(Error::DoubleRegister { .. })));
    }

    #[tokio::test]
    async fn handler_filter_excludes_invokers() {
        let sync_count = Arc::new(AtomicUsize::new(0));
        let async_values = Arc::new(Mutex::new(vec![]));
        let mut dispatcher = dispatcher(&sync_count, &async_values);
        dispatcher
            .set_handler_filter(Arc::new(|handler_type| {
                !handler_type.contains("TestHandler")
            }))
            .unwrap();
        dispatcher.start().unwrap();

        let dispatched = dispatcher
            .dispatch(remote(&SyncCommand { value: 1 }))
            .await
            .unwrap();

        assert!(matches!(dispatched.result(), Ok(None)));
        assert_eq!(sync_count.load(Ordering::SeqCst), 0);
        dispatcher.stop().unwrap();
    }
}
