use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures_core::future::BoxFuture;
use futures_util::task::{waker, ArcWake};
use thiserror::Error;
use tracing::{debug, warn};

use super::invoker::{InvocationMode, MessageInvoker};
use super::pipe::{BatchOutcome, Pipe};
use super::{InvocationError, MessageDispatch};

thread_local! {
    /// Name of the dispatch queue owning the current thread, when the current thread is a
    /// queue worker
    static CURRENT_QUEUE: RefCell<Option<String>> = const { RefCell::new(None) };
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// IO Error
    #[error("IO {0}")]
    Io(io::Error),

    /// An error occured when attempting to push an entry to the queue
    #[error("error sending entry to dispatch queue")]
    SendError,

    /// An operation was attempted while the queue was not in a valid state
    #[error("an operation was attempted while the dispatch queue was not in a valid state")]
    InvalidOperation,
}

/// An entry of the queue: either a message dispatch bound to its invoker, or an opaque
/// action to run on the worker thread
pub(crate) enum Entry {
    Dispatch(MessageDispatch, Arc<dyn MessageInvoker>),
    Action(Action),
}

type Action = Box<dyn FnOnce() + Send + 'static>;

type Pipes = Arc<[Arc<dyn Pipe>]>;

/// State shared between the queue handle, its worker thread and in-flight async batches
struct Shared {
    name: String,
    batch_size: usize,
    entries: Mutex<VecDeque<Entry>>,
    available: Condvar,

    /// Set when the queue is sealed: entries are refused and the worker drains then exits
    sealed: AtomicBool,

    /// Number of asynchronous batches currently in flight
    async_in_flight: AtomicUsize,

    /// Count of asynchronous batches completed since the queue started
    async_completed: AtomicU64,

    /// Pipes installed around every invocation, set when the queue starts
    pipes: Mutex<Pipes>,
}

impl Shared {
    fn new(name: String, batch_size: usize) -> Self {
        Self {
            name,
            batch_size: batch_size.max(1),
            entries: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            sealed: AtomicBool::new(false),
            async_in_flight: AtomicUsize::new(0),
            async_completed: AtomicU64::new(0),
            pipes: Mutex::new(Arc::from(Vec::new())),
        }
    }

    fn enqueue(&self, entry: Entry) -> Result<(), QueueError> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(QueueError::SendError);
        }

        let mut entries = self.entries.lock().expect("dispatch queue poisoned");
        entries.push_back(entry);
        self.available.notify_one();
        Ok(())
    }

    /// Pop the next entry, waiting until one is available or the queue is sealed and drained
    fn pop(&self) -> Option<Entry> {
        let mut entries = self.entries.lock().expect("dispatch queue poisoned");
        loop {
            if let Some(entry) = entries.pop_front() {
                return Some(entry);
            }

            if self.sealed.load(Ordering::SeqCst) {
                return None;
            }

            entries = self
                .available
                .wait_timeout(entries, Duration::from_millis(100))
                .expect("dispatch queue poisoned")
                .0;
        }
    }

    /// Pop the next entry iff it is a dispatch that can merge into a batch headed by `head`
    fn pop_mergeable(&self, head: &dyn MessageInvoker) -> Option<MessageDispatch> {
        let mut entries = self.entries.lock().expect("dispatch queue poisoned");

        let mergeable = matches!(
            entries.front(),
            Some(Entry::Dispatch(_, invoker)) if head.can_merge_with(invoker.as_ref())
        );

        if !mergeable {
            return None;
        }

        match entries.pop_front() {
            Some(Entry::Dispatch(dispatch, _)) => Some(dispatch),
            _ => unreachable!("front entry changed under the queue lock"),
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().expect("dispatch queue poisoned").len()
    }

    fn drain(&self) -> usize {
        let mut entries = self.entries.lock().expect("dispatch queue poisoned");
        let count = entries.len();
        entries.clear();
        count
    }

    fn pipes(&self) -> Pipes {
        Arc::clone(&self.pipes.lock().expect("dispatch queue poisoned"))
    }
}

/// Report a batch outcome to every entry of the batch
fn settle(batch: &[MessageDispatch], invoker: &dyn MessageInvoker, outcome: BatchOutcome) {
    let invoker_type = invoker.descriptor().invoker_type;

    match outcome {
        Ok(responses) => {
            let mut responses = responses.into_iter();
            for dispatch in batch {
                dispatch.set_handled(invoker_type, responses.next().flatten(), None);
            }
        }
        Err(error) => {
            warn!("{error}");
            for dispatch in batch {
                dispatch.set_handled(invoker_type, None, Some(error.clone()));
            }
        }
    }
}

/// An asynchronous batch in flight.
///
/// The task is its own waker: a wake-up re-enqueues a poll step as an action entry on the
/// owning queue, which is how continuations of asynchronous handlers land back on the queue
/// worker
struct AsyncBatchTask {
    shared: Arc<Shared>,
    invoker: Arc<dyn MessageInvoker>,
    batch: Vec<MessageDispatch>,
    future: Mutex<Option<BoxFuture<'static, BatchOutcome>>>,
}

impl AsyncBatchTask {
    fn start(
        shared: Arc<Shared>,
        invoker: Arc<dyn MessageInvoker>,
        batch: Vec<MessageDispatch>,
        future: BoxFuture<'static, BatchOutcome>,
    ) {
        shared.async_in_flight.fetch_add(1, Ordering::SeqCst);

        let task = Arc::new(Self {
            shared,
            invoker,
            batch,
            future: Mutex::new(Some(future)),
        });

        task.poll();
    }

    fn poll(self: &Arc<Self>) {
        let waker = waker(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock().expect("async batch poisoned");
        let Some(future) = slot.as_mut() else {
            // The batch already completed; a late wake-up is a no-op
            return;
        };

        if let Poll::Ready(outcome) = future.as_mut().poll(&mut cx) {
            *slot = None;
            drop(slot);

            settle(&self.batch, self.invoker.as_ref(), outcome);
            self.shared.async_completed.fetch_add(1, Ordering::SeqCst);
            self.shared.async_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl ArcWake for AsyncBatchTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let task = Arc::clone(arc_self);
        let entry = Entry::Action(Box::new(move || task.poll()));

        if arc_self.shared.enqueue(entry).is_err() {
            warn!(
                "dropped continuation for sealed dispatch queue {}",
                arc_self.shared.name
            );
        }
    }
}

/// Run a future to completion on the current thread, parking between polls
fn block_on<F: Future>(future: F) -> F::Output {
    struct ThreadWaker(thread::Thread);

    impl ArcWake for ThreadWaker {
        fn wake_by_ref(arc_self: &Arc<Self>) {
            arc_self.0.unpark();
        }
    }

    let waker = waker(Arc::new(ThreadWaker(thread::current())));
    let mut cx = Context::from_waker(&waker);

    let mut future = Box::pin(future);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => thread::park(),
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    fn start(shared: Arc<Shared>) -> Result<JoinHandle<()>, QueueError> {
        let worker = Worker {
            shared: Arc::clone(&shared),
        };

        let thread_name = format!("dispatch-{}", shared.name);
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run())
            .map_err(QueueError::Io)
    }

    fn run(self) {
        CURRENT_QUEUE.with(|name| *name.borrow_mut() = Some(self.shared.name.clone()));

        while let Some(entry) = self.shared.pop() {
            match entry {
                Entry::Action(action) => action(),
                Entry::Dispatch(dispatch, invoker) => self.run_batch(dispatch, invoker),
            }
        }

        CURRENT_QUEUE.with(|name| *name.borrow_mut() = None);
        debug!("dispatch queue {} stopped", self.shared.name);
    }

    /// Pull mergeable entries behind `first` and execute the resulting batch.
    ///
    /// An action entry or a non-mergeable dispatch at the front of the queue flushes the
    /// batch: it stays queued and the batch runs first
    fn run_batch(&self, first: MessageDispatch, invoker: Arc<dyn MessageInvoker>) {
        let mut batch = vec![first];

        while batch.len() < self.shared.batch_size {
            match self.shared.pop_mergeable(invoker.as_ref()) {
                Some(dispatch) => batch.push(dispatch),
                None => break,
            }
        }

        execute_batch(&self.shared, invoker, batch);
    }
}

/// Execute a batch according to the execution mode of its head invoker
fn execute_batch(shared: &Arc<Shared>, invoker: Arc<dyn MessageInvoker>, batch: Vec<MessageDispatch>) {
    let pipes = shared.pipes();

    match invoker.descriptor().mode {
        InvocationMode::Synchronous => {
            let outcome = invoker.invoke(&batch, &pipes);
            settle(&batch, invoker.as_ref(), outcome);
        }
        InvocationMode::Asynchronous => {
            // The async form runs over a clone of the batch; the original entries are
            // settled when the invocation completes
            match invoker.invoke_async(batch.clone(), pipes) {
                Some(future) => {
                    AsyncBatchTask::start(Arc::clone(shared), invoker, batch, future)
                }
                None => {
                    let descriptor = invoker.descriptor();
                    let error = InvocationError::contract_violation(
                        descriptor.invoker_type,
                        descriptor.message.full_name,
                    );
                    settle(&batch, invoker.as_ref(), Err(error));
                }
            }
        }
    }
}

/// Run a single dispatch entry inline on the current thread
fn run_inline(shared: &Arc<Shared>, dispatch: MessageDispatch, invoker: Arc<dyn MessageInvoker>) {
    let pipes = shared.pipes();
    let batch = vec![dispatch];

    match invoker.descriptor().mode {
        InvocationMode::Synchronous => {
            let outcome = invoker.invoke(&batch, &pipes);
            settle(&batch, invoker.as_ref(), outcome);
        }
        InvocationMode::Asynchronous => match invoker.invoke_async(batch.clone(), pipes) {
            Some(future) => {
                let outcome = block_on(future);
                settle(&batch, invoker.as_ref(), outcome);
            }
            None => {
                let descriptor = invoker.descriptor();
                let error = InvocationError::contract_violation(
                    descriptor.invoker_type,
                    descriptor.message.full_name,
                );
                settle(&batch, invoker.as_ref(), Err(error));
            }
        },
    }
}

enum Inner {
    Stopped {
        shared: Arc<Shared>,
    },

    Running {
        shared: Arc<Shared>,
        handle: JoinHandle<()>,
    },
}

/// A named single-consumer queue owning one background worker thread.
///
/// Entries are consumed in FIFO order. Consecutive dispatch entries merge into batches of up
/// to `batch_size` when the head invoker accepts them. Synchronous batches run to completion
/// on the worker; asynchronous batches run cooperatively, their continuations re-enqueued as
/// action entries on the same queue while the worker keeps pulling
pub(crate) struct DispatchQueue {
    inner: Option<Inner>,
}

impl DispatchQueue {
    /// Create a new stopped dispatch queue named `name`
    pub(crate) fn new(name: String, batch_size: usize) -> Self {
        Self {
            inner: Some(Inner::Stopped {
                shared: Arc::new(Shared::new(name, batch_size)),
            }),
        }
    }

    /// Get the name of the dispatch queue owning the current thread, if any
    pub(crate) fn current_queue_name() -> Option<String> {
        CURRENT_QUEUE.with(|name| name.borrow().clone())
    }

    /// Get the name of this dispatch queue
    pub(crate) fn name(&self) -> &str {
        match self.inner.as_ref() {
            Some(Inner::Stopped { shared }) | Some(Inner::Running { shared, .. }) => &shared.name,
            None => "",
        }
    }

    /// Get the number of entries waiting in the queue
    pub(crate) fn queue_length(&self) -> usize {
        self.shared().map(|shared| shared.len()).unwrap_or(0)
    }

    /// Start the worker thread
    pub(crate) fn start(&mut self, pipes: Pipes) -> Result<(), QueueError> {
        let (inner, res) = match self.inner.take() {
            Some(Inner::Stopped { shared }) => {
                *shared.pipes.lock().expect("dispatch queue poisoned") = pipes;

                let handle = Worker::start(Arc::clone(&shared))?;

                // Transition to Running state
                (Some(Inner::Running { shared, handle }), Ok(()))
            }
            x => (x, Err(QueueError::InvalidOperation)),
        };

        self.inner = inner;
        res
    }

    /// Stop the queue.
    ///
    /// Waits for quiescence, then seals the queue and joins the worker. After `stop` returns
    /// the queue is empty and no asynchronous batch is in flight
    pub(crate) fn stop(&mut self) -> Result<(), QueueError> {
        let (inner, res) = match self.inner.take() {
            Some(Inner::Running { shared, handle }) => {
                self::wait_until_all_messages_are_processed(&shared);

                shared.sealed.store(true, Ordering::SeqCst);
                shared.available.notify_all();

                if handle.join().is_err() {
                    warn!("dispatch queue {} worker panicked", shared.name);
                }

                // Transition back to a fresh Stopped state
                let name = shared.name.clone();
                let batch_size = shared.batch_size;
                (
                    Some(Inner::Stopped {
                        shared: Arc::new(Shared::new(name, batch_size)),
                    }),
                    Ok(()),
                )
            }
            x => (x, Err(QueueError::InvalidOperation)),
        };

        self.inner = inner;
        res
    }

    /// Push a dispatch entry, or run it inline when the current thread is already this
    /// queue's worker or the dispatch requires synchronous execution
    pub(crate) fn run_or_enqueue(
        &self,
        dispatch: MessageDispatch,
        invoker: Arc<dyn MessageInvoker>,
    ) -> Result<(), QueueError> {
        let shared = self.shared().ok_or(QueueError::InvalidOperation)?;

        let reentrant = Self::current_queue_name().as_deref() == Some(shared.name.as_str());
        dispatch.before_enqueue();

        if reentrant || dispatch.should_run_synchronously() {
            run_inline(shared, dispatch, invoker);
            Ok(())
        } else {
            shared.enqueue(Entry::Dispatch(dispatch, invoker))
        }
    }

    /// Push an action entry to run on the worker thread
    #[cfg(test)]
    pub(crate) fn enqueue_action(
        &self,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<(), QueueError> {
        let shared = self.shared().ok_or(QueueError::InvalidOperation)?;
        shared.enqueue(Entry::Action(Box::new(action)))
    }

    /// Atomically drain the pending entries without running them.
    /// Returns the number of purged entries
    pub(crate) fn purge(&self) -> usize {
        self.shared().map(|shared| shared.drain()).unwrap_or(0)
    }

    /// Spin until the queue is empty, no asynchronous batch is in flight and no asynchronous
    /// batch completed since the last observation.
    ///
    /// Returns `true` iff work was observed, i.e. the call waited at least one full cycle
    pub(crate) fn wait_until_all_messages_are_processed(&self) -> bool {
        match self.shared() {
            Some(shared) => self::wait_until_all_messages_are_processed(shared),
            None => false,
        }
    }

    fn shared(&self) -> Option<&Arc<Shared>> {
        match self.inner.as_ref() {
            Some(Inner::Stopped { shared }) | Some(Inner::Running { shared, .. }) => Some(shared),
            None => None,
        }
    }
}

fn wait_until_all_messages_are_processed(shared: &Arc<Shared>) -> bool {
    let mut waited = false;
    let mut last_completed = shared.async_completed.load(Ordering::SeqCst);

    loop {
        let busy = shared.len() > 0 || shared.async_in_flight.load(Ordering::SeqCst) > 0;
        let completed = shared.async_completed.load(Ordering::SeqCst);

        if !busy && completed == last_completed {
            return waited;
        }

        last_completed = completed;
        thread::sleep(Duration::from_millis(1));
        waited = true;
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::super::registry;
    use super::super::{DispatchFuture, DispatchRequest, Dispatched, MessageContext};
    use super::*;
    use crate::core::BatchedHandler;
    use crate::transport::TransportMessage;
    use crate::{DispatchHandler, Peer};

    #[derive(Clone, prost::Message)]
    struct CountCommand {
        #[prost(uint32, tag = "1")]
        value: u32,
    }

    nexbus_core::impl_command!(CountCommand, "Test.Queue.CountCommand");

    struct CountingHandler {
        invocations: Arc<AtomicUsize>,
        batch_sizes: Arc<Mutex<Vec<usize>>>,
    }

    impl DispatchHandler for CountingHandler {
        const DISPATCH_QUEUE: &'static str = "TestQueue";
    }

    impl crate::core::BatchedHandler<CountCommand> for CountingHandler {
        type Response = ();

        fn handle(&mut self, messages: Vec<CountCommand>, _context: &MessageContext) {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(messages.len());
        }
    }

    fn remote_dispatch(message: &CountCommand) -> (MessageDispatch, DispatchFuture) {
        let peer = Peer::test();
        let (_, transport) =
            TransportMessage::create(&peer, "Test".to_string(), message);
        MessageDispatch::new(DispatchRequest::remote(transport))
    }

    fn dispatch_and_complete(
        queue: &DispatchQueue,
        invoker: &Arc<dyn MessageInvoker>,
        message: &CountCommand,
    ) -> DispatchFuture {
        let (dispatch, future) = remote_dispatch(message);
        queue
            .run_or_enqueue(dispatch.clone(), Arc::clone(invoker))
            .unwrap();
        dispatch.enqueued_all();
        future
    }

    fn await_dispatched(future: DispatchFuture) -> Dispatched {
        block_on(future).expect("dispatch dropped")
    }

    fn batched_invoker(
        invocations: &Arc<AtomicUsize>,
        batch_sizes: &Arc<Mutex<Vec<usize>>>,
    ) -> Arc<dyn MessageInvoker> {
        let mut invokers = registry::for_handler(CountingHandler {
            invocations: Arc::clone(invocations),
            batch_sizes: Arc::clone(batch_sizes),
        })
        .handles_batched::<CountCommand>()
        .into_invokers();

        invokers.remove(0)
    }

    #[test]
    fn entries_are_processed_in_fifo_order() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(Mutex::new(vec![]));
        let invoker = batched_invoker(&invocations, &batch_sizes);

        let mut queue = DispatchQueue::new("TestQueue".to_string(), 1);
        queue.start(Arc::from(Vec::new())).unwrap();

        for value in 0..4 {
            let future = dispatch_and_complete(&queue, &invoker, &CountCommand { value });
            await_dispatched(future);
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        queue.stop().unwrap();
    }

    #[test]
    fn mergeable_dispatches_run_as_one_batch() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(Mutex::new(vec![]));
        let invoker = batched_invoker(&invocations, &batch_sizes);

        let mut queue = DispatchQueue::new("TestQueue".to_string(), 16);

        // Enqueue while the queue is stopped so that the batch forms before the worker pulls
        let futures = (0..3)
            .map(|value| dispatch_and_complete(&queue, &invoker, &CountCommand { value }))
            .collect::<Vec<_>>();

        queue.start(Arc::from(Vec::new())).unwrap();
        for future in futures {
            await_dispatched(future);
        }

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(*batch_sizes.lock().unwrap(), vec![3]);
        queue.stop().unwrap();
    }

    #[test]
    fn batches_are_limited_to_the_configured_size() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(Mutex::new(vec![]));
        let invoker = batched_invoker(&invocations, &batch_sizes);

        let mut queue = DispatchQueue::new("TestQueue".to_string(), 2);

        let futures = (0..5)
            .map(|value| dispatch_and_complete(&queue, &invoker, &CountCommand { value }))
            .collect::<Vec<_>>();

        queue.start(Arc::from(Vec::new())).unwrap();
        for future in futures {
            await_dispatched(future);
        }

        let sizes = batch_sizes.lock().unwrap().clone();
        assert!(sizes.iter().all(|&size| size <= 2), "batches {sizes:?}");
        assert_eq!(sizes.iter().sum::<usize>(), 5);
        queue.stop().unwrap();
    }

    #[test]
    fn purge_drains_pending_entries_without_running_them() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(Mutex::new(vec![]));
        let invoker = batched_invoker(&invocations, &batch_sizes);

        let queue = DispatchQueue::new("TestQueue".to_string(), 16);

        for value in 0..3 {
            let (dispatch, _future) = remote_dispatch(&CountCommand { value });
            queue.run_or_enqueue(dispatch, Arc::clone(&invoker)).unwrap();
        }

        assert_eq!(queue.purge(), 3);
        assert_eq!(queue.queue_length(), 0);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_waits_for_quiescence() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(Mutex::new(vec![]));
        let invoker = batched_invoker(&invocations, &batch_sizes);

        let mut queue = DispatchQueue::new("TestQueue".to_string(), 1);
        queue.start(Arc::from(Vec::new())).unwrap();

        let futures = (0..8)
            .map(|value| dispatch_and_complete(&queue, &invoker, &CountCommand { value }))
            .collect::<Vec<_>>();

        queue.stop().unwrap();

        assert_eq!(queue.queue_length(), 0);
        assert_eq!(invocations.load(Ordering::SeqCst), 8);
        drop(futures);
    }

    #[derive(Clone, prost::Message)]
    struct OtherCommand {}

    nexbus_core::impl_command!(OtherCommand, "Test.Queue.OtherCommand");

    struct OtherHandler {
        invocations: Arc<AtomicUsize>,
    }

    impl DispatchHandler for OtherHandler {
        const DISPATCH_QUEUE: &'static str = "TestQueue";
    }

    impl crate::core::BatchedHandler<OtherCommand> for OtherHandler {
        type Response = ();

        fn handle(&mut self, _messages: Vec<OtherCommand>, _context: &MessageContext) {
            self.invocations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn non_mergeable_entry_flushes_the_batch() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(Mutex::new(vec![]));
        let invoker = batched_invoker(&invocations, &batch_sizes);

        let other_invocations = Arc::new(AtomicUsize::new(0));
        let other_invoker: Arc<dyn MessageInvoker> = registry::for_handler(OtherHandler {
            invocations: Arc::clone(&other_invocations),
        })
        .handles_batched::<OtherCommand>()
        .into_invokers()
        .remove(0);

        let mut queue = DispatchQueue::new("TestQueue".to_string(), 16);

        // Three mergeable dispatches followed by a non-mergeable one
        let mut futures = (0..3)
            .map(|value| dispatch_and_complete(&queue, &invoker, &CountCommand { value }))
            .collect::<Vec<_>>();

        let (dispatch, future) = {
            let peer = Peer::test();
            let (_, transport) =
                TransportMessage::create(&peer, "Test".to_string(), &OtherCommand {});
            MessageDispatch::new(DispatchRequest::remote(transport))
        };
        queue
            .run_or_enqueue(dispatch.clone(), Arc::clone(&other_invoker))
            .unwrap();
        dispatch.enqueued_all();
        futures.push(future);

        queue.start(Arc::from(Vec::new())).unwrap();
        for future in futures {
            await_dispatched(future);
        }

        // The first batch runs once with the three merged messages, the fourth entry
        // starts a new batch
        assert_eq!(*batch_sizes.lock().unwrap(), vec![3]);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(other_invocations.load(Ordering::SeqCst), 1);
        queue.stop().unwrap();
    }

    /// An asynchronous invoker that never produces its invocation
    struct BrokenAsyncInvoker {
        descriptor: super::super::MessageInvokerDescriptor,
    }

    impl MessageInvoker for BrokenAsyncInvoker {
        fn descriptor(&self) -> &super::super::MessageInvokerDescriptor {
            &self.descriptor
        }

        fn invoke(
            &self,
            _batch: &[MessageDispatch],
            _pipes: &[Arc<dyn crate::dispatch::Pipe>],
        ) -> super::super::pipe::BatchOutcome {
            Ok(vec![])
        }

        fn invoke_async(
            &self,
            _batch: Vec<MessageDispatch>,
            _pipes: Arc<[Arc<dyn crate::dispatch::Pipe>]>,
        ) -> Option<futures_core::future::BoxFuture<'static, super::super::pipe::BatchOutcome>>
        {
            None
        }
    }

    #[test]
    fn async_invoker_without_invocation_is_a_handler_failure() {
        use crate::dispatch::{InvocationError, InvocationMode};
        use crate::{MessageTypeDescriptor, SubscriptionMode};

        let invoker: Arc<dyn MessageInvoker> = Arc::new(BrokenAsyncInvoker {
            descriptor: super::super::MessageInvokerDescriptor {
                invoker_type: "BrokenAsyncHandler",
                dispatch_queue: "TestQueue",
                message: MessageTypeDescriptor::of::<CountCommand>(),
                subscription_mode: SubscriptionMode::Auto,
                bindings: vec![],
                mode: InvocationMode::Asynchronous,
                batchable: false,
            },
        });

        let mut queue = DispatchQueue::new("TestQueue".to_string(), 1);
        queue.start(Arc::from(Vec::new())).unwrap();

        let future = dispatch_and_complete(&queue, &invoker, &CountCommand { value: 1 });
        let dispatched = await_dispatched(future);

        match dispatched.result() {
            Err(errors) => match &errors.errors()[0] {
                InvocationError::ContractViolation { handler_type, .. } => {
                    assert_eq!(*handler_type, "BrokenAsyncHandler");
                }
                other => panic!("expected a contract violation, got {other}"),
            },
            Ok(_) => panic!("expected a contract violation"),
        }

        // The queue keeps processing entries after the failure
        let invocations = Arc::new(AtomicUsize::new(0));
        let batch_sizes = Arc::new(Mutex::new(vec![]));
        let healthy = batched_invoker(&invocations, &batch_sizes);
        await_dispatched(dispatch_and_complete(&queue, &healthy, &CountCommand { value: 2 }));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        queue.stop().unwrap();
    }

    struct SlowHandler;

    impl DispatchHandler for SlowHandler {
        const DISPATCH_QUEUE: &'static str = "TestQueue";
    }

    impl crate::core::BatchedHandler<CountCommand> for SlowHandler {
        type Response = ();

        fn handle(&mut self, _messages: Vec<CountCommand>, _context: &MessageContext) {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn wait_returns_true_when_work_was_observed() {
        let invoker: Arc<dyn MessageInvoker> = registry::for_handler(SlowHandler)
            .handles_batched::<CountCommand>()
            .into_invokers()
            .remove(0);

        let mut queue = DispatchQueue::new("TestQueue".to_string(), 1);
        queue.start(Arc::from(Vec::new())).unwrap();

        let futures = (0..3)
            .map(|value| dispatch_and_complete(&queue, &invoker, &CountCommand { value }))
            .collect::<Vec<_>>();
        assert!(queue.wait_until_all_messages_are_processed());

        for future in futures {
            await_dispatched(future);
        }
        assert_eq!(queue.queue_length(), 0);
        queue.stop().unwrap();
    }

    #[test]
    fn wait_returns_false_when_the_queue_is_idle() {
        let mut queue = DispatchQueue::new("TestQueue".to_string(), 1);
        queue.start(Arc::from(Vec::new())).unwrap();

        assert!(!queue.wait_until_all_messages_are_processed());
        queue.stop().unwrap();
    }

    #[test]
    fn worker_thread_knows_its_queue_name() {
        let mut queue = DispatchQueue::new("TestQueue".to_string(), 1);
        queue.start(Arc::from(Vec::new())).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        queue
            .enqueue_action(move || {
                let _ = tx.send(DispatchQueue::current_queue_name());
            })
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("TestQueue"));
        assert_eq!(DispatchQueue::current_queue_name(), None);
        queue.stop().unwrap();
    }
}
