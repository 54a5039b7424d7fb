use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use dyn_clone::clone_box;
use itertools::Itertools;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    bus::{BusEvent, CommandFuture, CommandResult, Error, Result, SendError},
    directory::{registration, PeerDirectory, PeerEvent},
    dispatch::{DispatchRequest, MessageDispatcher},
    routing::MessageBinding,
    sync::stream::EventStream,
    transport::{MessageExecutionCompleted, SendContext, Transport, TransportMessage},
    BindingKey, BusConfiguration, Command, Event, Message, MessageTypeId, Peer, PeerId,
    Subscription, SubscriptionMode,
};

use super::MessagePayload;

/// An entry pushed to the sender loop
enum SendEntry {
    Message {
        message: TransportMessage,
        peers: Vec<Peer>,
    },
    Unregister {
        tx: oneshot::Sender<Result<()>>,
    },
}

/// Loop owning the transport for outbound traffic
struct Sender<T: Transport> {
    transport: T,
    self_peer: Peer,
    environment: String,
    configuration: BusConfiguration,
    cancellation: CancellationToken,
    rx: mpsc::Receiver<SendEntry>,
}

/// Yielded back by the sender loop when it stops
struct TxHandle<T: Transport> {
    transport: T,
}

impl<T: Transport> Sender<T> {
    fn new(
        transport: T,
        self_peer: Peer,
        environment: String,
        configuration: BusConfiguration,
        cancellation: CancellationToken,
    ) -> (mpsc::Sender<SendEntry>, Self) {
        let (tx, rx) = mpsc::channel(128);
        (
            tx,
            Self {
                transport,
                self_peer,
                environment,
                configuration,
                cancellation,
                rx,
            },
        )
    }

    async fn run(mut self) -> TxHandle<T> {
        loop {
            tokio::select! {
                // We have been cancelled
                _ = self.cancellation.cancelled() => break,

                // We received an entry
                Some(entry) = self.rx.recv() => {
                    if let Err(e) = self.handle_entry(entry).await {
                        error!("{e}");
                    }
                }
            }
        }

        // Yield back the transport
        TxHandle {
            transport: self.transport,
        }
    }

    async fn handle_entry(&mut self, entry: SendEntry) -> Result<()> {
        match entry {
            SendEntry::Message { message, peers } => self
                .transport
                .send(peers.into_iter(), message, SendContext::default())
                .map_err(|e| Error::Transport(e.into()))?
                .await
                .map_err(|e| Error::Transport(e.into())),
            SendEntry::Unregister { tx } => {
                let result = registration::unregister(
                    &mut self.transport,
                    &self.self_peer,
                    &self.environment,
                    &self.configuration,
                )
                .await
                .map_err(Error::Registration);

                let _ = tx.send(result);
                Ok(())
            }
        }
    }
}

/// A message to be dispatched locally
enum LocalDispatchRequest {
    /// A [`Command`] to be dispatched locally
    Command {
        tx: oneshot::Sender<CommandResult>,
        message: Arc<dyn Message>,
    },

    /// An [`Event`] to be dispatched locally
    Event {
        tx: oneshot::Sender<()>,
        message: Arc<dyn Message>,
    },
}

impl LocalDispatchRequest {
    fn for_command(command: &dyn Command) -> (Self, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        let message: Arc<dyn Message> = Arc::from(clone_box(command.up()));

        (Self::Command { tx, message }, rx)
    }

    fn for_event(event: &dyn Event) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let message: Arc<dyn Message> = Arc::from(clone_box(event.up()));

        (Self::Event { tx, message }, rx)
    }
}

/// Yielded back by the receiver loop when it stops
struct RxHandle {
    dispatcher: MessageDispatcher,
}

/// Loop consuming inbound frames and local dispatch requests
struct Receiver<S> {
    rcv_rx: S,
    dispatch_rx: mpsc::Receiver<LocalDispatchRequest>,
    tx: mpsc::Sender<SendEntry>,
    self_peer: Peer,
    environment: String,
    configuration: BusConfiguration,
    directory: Arc<PeerDirectory>,
    pending_commands: Arc<Mutex<HashMap<uuid::Uuid, oneshot::Sender<CommandResult>>>>,
    pending_messages: Vec<TransportMessage>,
    dispatcher: MessageDispatcher,
    cancellation: CancellationToken,
}

type PendingCommands = Arc<Mutex<HashMap<uuid::Uuid, oneshot::Sender<CommandResult>>>>;

impl<S> Receiver<S>
where
    S: futures_core::Stream<Item = TransportMessage> + Unpin + Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    fn new(
        rcv_rx: S,
        tx: mpsc::Sender<SendEntry>,
        self_peer: Peer,
        environment: String,
        configuration: BusConfiguration,
        directory: Arc<PeerDirectory>,
        pending_messages: Vec<TransportMessage>,
        dispatcher: MessageDispatcher,
        cancellation: CancellationToken,
    ) -> (Self, mpsc::Sender<LocalDispatchRequest>, PendingCommands) {
        let pending_commands = Arc::new(Mutex::new(HashMap::new()));
        let (dispatch_tx, dispatch_rx) = mpsc::channel(128);

        (
            Self {
                rcv_rx,
                dispatch_rx,
                tx,
                self_peer,
                environment,
                configuration,
                directory,
                pending_commands: pending_commands.clone(),
                pending_messages,
                dispatcher,
                cancellation,
            },
            dispatch_tx,
            pending_commands,
        )
    }

    async fn run(mut self) -> RxHandle {
        // Replay the messages that were received while registering
        let pending_messages = std::mem::take(&mut self.pending_messages);
        for message in pending_messages {
            self.handle_message(message).await;
        }

        loop {
            tokio::select! {
                // We have been cancelled
                _ = self.cancellation.cancelled() => break,

                // Handle inbound TransportMessage
                Some(message) = self.rcv_rx.next() => {
                    self.handle_message(message).await;
                }

                // Handle local message dispatch request
                Some(request) = self.dispatch_rx.recv() => {
                    self.handle_local_dispatch(request).await;
                }
            }
        }

        // Yield back the dispatcher
        RxHandle {
            dispatcher: self.dispatcher,
        }
    }

    async fn handle_message(&mut self, message: TransportMessage) {
        // Handle MessageExecutionCompleted
        if let Some(completed) = message.decode_as::<MessageExecutionCompleted>() {
            match completed {
                Ok(completed) => self.handle_completed(completed),
                Err(e) => warn!("failed to decode MessageExecutionCompleted: {e}"),
            }
            return;
        }

        // Dispatch the message to the local handlers
        match self.dispatcher.dispatch(DispatchRequest::remote(message)).await {
            Ok(dispatched) => {
                let output = dispatched.into_output();

                // If the dispatched message is a Command, send back the
                // MessageExecutionCompleted to the originator
                if let Some(completed) = output.completed {
                    if let Some(originator) = output.originator {
                        self.send_to(&completed, vec![originator]).await;
                    }
                }

                // Publish MessageProcessingFailed if some handlers failed
                if let Some(failed) = output.failed {
                    if self.configuration.enable_error_publication {
                        self.send_to_handling_peers(&failed).await;
                    }
                }
            }
            Err(e) => {
                error!("failed to dispatch: {e}");
            }
        }
    }

    fn handle_completed(&mut self, completed: MessageExecutionCompleted) {
        let command_id = uuid::Uuid::from(completed.command_id.value);

        // Resolve the pending command with the execution result
        let pending = self.pending_commands.lock().unwrap().remove(&command_id);
        match pending {
            Some(tx) => {
                let _ = tx.send(completed.into());
            }
            None => warn!("received completion for unknown command {command_id}"),
        }
    }

    async fn handle_local_dispatch(&mut self, request: LocalDispatchRequest) {
        match request {
            LocalDispatchRequest::Command { tx, message } => {
                let request =
                    DispatchRequest::local(message, &self.self_peer, self.environment.clone());

                match self.dispatcher.dispatch(request).await {
                    Ok(dispatched) => {
                        if let Ok(command_result) = CommandResult::try_from(dispatched) {
                            let _ = tx.send(command_result);
                        }
                    }
                    Err(e) => error!("failed to dispatch local command: {e}"),
                }
            }
            LocalDispatchRequest::Event { tx, message } => {
                let request =
                    DispatchRequest::local(message, &self.self_peer, self.environment.clone());

                if let Err(e) = self.dispatcher.dispatch(request).await {
                    error!("failed to dispatch local event: {e}");
                }

                // Notify that the event has been dispatched
                let _ = tx.send(());
            }
        }
    }

    async fn send_to_handling_peers(&mut self, message: &dyn Message) {
        let binding = MessageBinding::of_val(message);
        let peers = self.directory.get_peers_handling_message(&binding);
        if !peers.is_empty() {
            self.send_to(message, peers).await;
        }
    }

    async fn send_to(&mut self, message: &dyn Message, peers: Vec<Peer>) {
        let (_id, message) =
            TransportMessage::create(&self.self_peer, self.environment.clone(), message);

        let _ = self.tx.send(SendEntry::Message { message, peers }).await;
    }
}

/// Load the list of subscriptions to send at registration from the dispatcher
fn get_startup_subscriptions(dispatcher: &MessageDispatcher) -> Result<Vec<Subscription>> {
    let descriptors = dispatcher.descriptors()?;
    let mut subscriptions = vec![];

    for descriptor in descriptors {
        // Only `Auto` subscriptions are sent at startup
        if descriptor.subscription_mode != SubscriptionMode::Auto {
            continue;
        }

        let message_type = MessageTypeId::from(descriptor.message.clone());

        // If the handler declared bindings, create a subscription for every binding,
        // otherwise subscribe with the empty binding key
        if descriptor.bindings.is_empty() {
            subscriptions.push(Subscription::new(message_type, BindingKey::default()));
        } else {
            subscriptions.extend(
                descriptor
                    .bindings
                    .iter()
                    .map(|b| Subscription::new(message_type.clone(), b.clone())),
            );
        }
    }

    Ok(subscriptions)
}

/// Operations of a started bus
struct Core {
    self_peer: Peer,
    environment: String,
    directory: Arc<PeerDirectory>,
    pending_commands: PendingCommands,
    snd_tx: mpsc::Sender<SendEntry>,
    dispatch_tx: mpsc::Sender<LocalDispatchRequest>,
}

impl Core {
    async fn send(&self, command: &dyn Command) -> Result<CommandFuture> {
        // Retrieve the list of peers handling the command from the directory
        let binding = MessageBinding::of_val(command.up());
        let peers = self.directory.get_peers_handling_message(&binding);

        // If we are the receiver of the command, do a local dispatch
        if peers.iter().any(|p| p.id == self.self_peer.id) {
            let (request, rx) = LocalDispatchRequest::for_command(command);

            self.dispatch_tx
                .send(request)
                .await
                .map_err(|_| Error::Send(SendError::Closed))?;

            return Ok(CommandFuture(rx));
        }

        // Make sure there is exactly one peer handling the command
        let dst_peer = peers
            .into_iter()
            .at_most_one()
            .map_err(|e| Error::Send(SendError::MultiplePeers(e.collect())))?
            .ok_or(Error::Send(SendError::NoPeer))?;

        self.send_to(command, dst_peer).await
    }

    async fn send_to(&self, command: &dyn Command, peer: Peer) -> Result<CommandFuture> {
        // Attempting to send a non-persistent command to a non-responding peer is an error
        if !peer.is_responding && command.is_transient() && !command.is_infrastructure() {
            return Err(Error::Send(SendError::PeerNotResponding(peer)));
        }

        // Create the reception channel for the result of the command
        let (tx, rx) = oneshot::channel();

        // Create the TransportMessage
        let (id, message) =
            TransportMessage::create(&self.self_peer, self.environment.clone(), command.up());

        // Track the command until its completion comes back
        self.pending_commands.lock().unwrap().insert(id, tx);

        // Enqueue the message
        self.snd_tx
            .send(SendEntry::Message {
                message,
                peers: vec![peer],
            })
            .await
            .map_err(|_| Error::Send(SendError::Closed))?;

        Ok(CommandFuture(rx))
    }

    async fn publish(&self, event: &dyn Event) -> Result<()> {
        // Retrieve the list of peers handling the event from the directory
        let binding = MessageBinding::of_val(event.up());
        let peers = self.directory.get_peers_handling_message(&binding);

        // If we are a receiver of the event, do a local dispatch first
        if peers.iter().any(|p| p.id == self.self_peer.id) {
            let (request, rx) = LocalDispatchRequest::for_event(event);

            self.dispatch_tx
                .send(request)
                .await
                .map_err(|_| Error::Send(SendError::Closed))?;

            // Wait for the event to be handled prior to sending it over the bus
            rx.await.map_err(|_| Error::Send(SendError::Closed))?;
        }

        let dst_peers = peers
            .into_iter()
            .filter(|p| p.id != self.self_peer.id)
            .collect::<Vec<_>>();

        if dst_peers.is_empty() {
            return Ok(());
        }

        let (_id, message) =
            TransportMessage::create(&self.self_peer, self.environment.clone(), event.up());

        self.snd_tx
            .send(SendEntry::Message {
                message,
                peers: dst_peers,
            })
            .await
            .map_err(|_| Error::Send(SendError::Closed))?;

        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        self.snd_tx
            .send(SendEntry::Unregister { tx })
            .await
            .map_err(|_| Error::Send(SendError::Closed))?;

        rx.await.map_err(|_| Error::Send(SendError::Closed))?
    }
}

/// Inner state of the bus
enum State<T: Transport> {
    Init {
        configuration: BusConfiguration,
        transport: T,
        directory: Arc<PeerDirectory>,
        dispatcher: MessageDispatcher,
    },

    Configured {
        configuration: BusConfiguration,
        transport: T,
        directory: Arc<PeerDirectory>,
        dispatcher: MessageDispatcher,

        peer_id: PeerId,
        environment: String,
    },

    Started {
        core: Arc<Core>,

        configuration: BusConfiguration,

        directory: Arc<PeerDirectory>,
        peer_id: PeerId,
        environment: String,

        cancellation: CancellationToken,

        tx_handle: tokio::task::JoinHandle<TxHandle<T>>,
        rx_handle: tokio::task::JoinHandle<RxHandle>,
        event_handle: tokio::task::JoinHandle<()>,
    },
}

/// The bus runtime.
///
/// Built through a [`BusBuilder`](crate::BusBuilder); drives the transport, the peer
/// directory and the message dispatcher
pub struct BusCore<T: Transport> {
    inner: Mutex<Option<State<T>>>,
    events: EventStream<BusEvent>,
}

impl<T: Transport> BusCore<T> {
    pub(crate) fn new(
        configuration: BusConfiguration,
        transport: T,
        directory: Arc<PeerDirectory>,
        dispatcher: MessageDispatcher,
    ) -> Self {
        Self {
            inner: Mutex::new(Some(State::Init {
                configuration,
                transport,
                directory,
                dispatcher,
            })),
            events: EventStream::new(128),
        }
    }

    fn core(&self) -> Result<Arc<Core>> {
        let inner = self.inner.lock().unwrap();
        match inner.as_ref() {
            Some(State::Started { core, .. }) => Ok(Arc::clone(core)),
            _ => Err(Error::InvalidOperation),
        }
    }

    fn configure_impl(&self, peer_id: PeerId, environment: String) -> Result<()> {
        let mut state = self.inner.lock().unwrap();

        let (inner, res) = match state.take() {
            Some(State::Init {
                configuration,
                mut transport,
                directory,
                dispatcher,
            }) => {
                // Configure transport
                transport
                    .configure(peer_id.clone(), environment.clone(), self.events.clone())
                    .map_err(|e| Error::Transport(e.into()))?;

                (
                    Some(State::Configured {
                        configuration,
                        transport,
                        directory,
                        dispatcher,
                        peer_id,
                        environment,
                    }),
                    Ok(()),
                )
            }
            x => (x, Err(Error::InvalidOperation)),
        };

        *state = inner;
        res
    }

    async fn start_impl(&self) -> Result<()> {
        info!("starting bus...");
        let _ = self.events.send(BusEvent::Starting);

        let state = self.inner.lock().unwrap().take();

        let Some(State::Configured {
            configuration,
            mut transport,
            directory,
            mut dispatcher,
            peer_id,
            environment,
        }) = state
        else {
            return Err(Error::InvalidOperation);
        };

        // Start the transport and resolve the bound endpoint
        transport
            .start()
            .map_err(|e| Error::Transport(e.into()))?
            .await
            .map_err(|e| Error::Transport(e.into()))?;

        let endpoint = transport
            .inbound_endpoint()
            .map_err(|e| Error::Transport(e.into()))?
            .into_owned();

        let self_peer = Peer {
            id: peer_id.clone(),
            endpoint,
            is_up: true,
            is_responding: true,
        };

        // Register the peer directory event handlers
        dispatcher.add(directory.registry().into_invokers())?;

        // Retrieve the list of subscriptions that should be sent at startup
        let startup_subscriptions = get_startup_subscriptions(&dispatcher)?;

        // Register to the directory
        let _ = self.events.send(BusEvent::Registering);
        let registration = registration::register(
            &mut transport,
            &self_peer,
            startup_subscriptions,
            &environment,
            &configuration,
        )
        .await
        .map_err(Error::Registration)?;

        // Seed the local directory from the response
        directory.handle_registration(registration.response);
        let _ = self.events.send(BusEvent::Registered);

        // Start the dispatcher
        dispatcher.start()?;

        // Create the transport reception stream
        let rcv_rx = transport
            .subscribe()
            .map_err(|e| Error::Transport(e.into()))?;

        // Create cancellation token
        let cancellation = CancellationToken::new();

        // Create sender
        let (snd_tx, sender) = Sender::new(
            transport,
            self_peer.clone(),
            environment.clone(),
            configuration.clone(),
            cancellation.clone(),
        );

        // Create receiver
        let (receiver, dispatch_tx, pending_commands) = Receiver::new(
            rcv_rx,
            snd_tx.clone(),
            self_peer.clone(),
            environment.clone(),
            configuration.clone(),
            Arc::clone(&directory),
            registration.pending_messages,
            dispatcher,
            cancellation.clone(),
        );

        // Forward peer events to the bus event stream
        let event_handle = {
            let mut peer_events = directory.subscribe();
            let events = self.events.clone();
            let cancellation = cancellation.clone();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        Some(event) = peer_events.next() => {
                            let _ = events.send(BusEvent::Peer(event));
                        }
                        else => break,
                    }
                }
            })
        };

        // Create Core
        let core = Arc::new(Core {
            self_peer,
            environment: environment.clone(),
            directory: Arc::clone(&directory),
            pending_commands,
            snd_tx,
            dispatch_tx,
        });

        // Start sender and receiver
        let tx_handle = tokio::spawn(sender.run());
        let rx_handle = tokio::spawn(receiver.run());

        // Transition to started state
        let mut state_lock = self.inner.lock().unwrap();
        *state_lock = Some(State::Started {
            core,
            configuration,
            directory,
            peer_id,
            environment,
            cancellation,
            tx_handle,
            rx_handle,
            event_handle,
        });

        let _ = self.events.send(BusEvent::Started);
        info!("... bus started");
        Ok(())
    }

    async fn stop_impl(&self) -> Result<()> {
        // Take the state so that we do not hold a `MutexGuard` across await points
        let state = self.inner.lock().unwrap().take();

        info!("stopping bus...");
        let _ = self.events.send(BusEvent::Stopping);

        let (inner, res) = match state {
            Some(State::Started {
                core,
                configuration,
                directory,
                peer_id,
                environment,
                cancellation,
                tx_handle,
                rx_handle,
                event_handle,
                ..
            }) => {
                // Unregister from the directory
                core.unregister().await?;

                // Cancel receiver and sender
                cancellation.cancel();

                // Wait for the receiver to stop and yield us back the dispatcher
                let rx_handle = rx_handle.await?;

                // Wait for the sender to stop and yield us back the transport
                let tx_handle = tx_handle.await?;
                event_handle.abort();

                // Stop the dispatcher, waiting for the queues to drain
                let mut dispatcher = rx_handle.dispatcher;
                dispatcher.stop()?;

                // Stop the transport
                let mut transport = tx_handle.transport;
                transport
                    .stop()
                    .map_err(|e| Error::Transport(e.into()))?
                    .await
                    .map_err(|e| Error::Transport(e.into()))?;

                // Transition back to the configured state
                (
                    Some(State::Configured {
                        configuration,
                        transport,
                        directory,
                        dispatcher,
                        peer_id,
                        environment,
                    }),
                    Ok(()),
                )
            }
            x => (x, Err(Error::InvalidOperation)),
        };

        *self.inner.lock().unwrap() = inner;
        let _ = self.events.send(BusEvent::Stopped);
        info!("... bus stopped");
        res
    }
}

#[async_trait]
impl<T: Transport> crate::Bus for BusCore<T> {
    fn configure(&self, peer_id: PeerId, environment: String) -> Result<()> {
        self.configure_impl(peer_id, environment)
    }

    async fn start(&self) -> Result<()> {
        self.start_impl().await
    }

    async fn stop(&self) -> Result<()> {
        self.stop_impl().await
    }

    async fn send(&self, command: &dyn Command) -> Result<CommandFuture> {
        self.core()?.send(command).await
    }

    async fn send_to(&self, command: &dyn Command, peer: Peer) -> Result<CommandFuture> {
        self.core()?.send_to(command, peer).await
    }

    async fn publish(&self, event: &dyn Event) -> Result<()> {
        self.core()?.publish(event).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::directory::commands::{RegisterPeerCommand, RegisterPeerResponse};
    use crate::dispatch::{registry, MessageContext};
    use crate::proto::IntoProtobuf;
    use crate::transport::memory::MemoryTransport;
    use crate::{Bus as _, DispatchHandler, Subscription};

    #[derive(Clone, prost::Message)]
    struct UserConnected {
        #[prost(string, tag = "1")]
        name: String,
    }

    nexbus_core::impl_event!(UserConnected, "Test.Bus.UserConnected");

    struct UserConnectedHandler {
        connected: Arc<AtomicUsize>,
    }

    impl DispatchHandler for UserConnectedHandler {
        const DISPATCH_QUEUE: &'static str = nexbus_core::DEFAULT_DISPATCH_QUEUE;
    }

    impl super::super::Handler<UserConnected> for UserConnectedHandler {
        type Response = ();

        fn handle(&mut self, _message: UserConnected, _context: &MessageContext) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn configuration() -> BusConfiguration {
        BusConfiguration::default()
            .with_directory_endpoints(["tcp://directory:129"])
            .with_random_directory(false)
    }

    fn transport_for(peer: &Peer, self_subscriptions: Vec<Subscription>) -> MemoryTransport {
        let transport = MemoryTransport::new(peer.clone());

        // Script the directory answer to the registration command
        let self_descriptor = crate::PeerDescriptor {
            peer: peer.clone(),
            subscriptions: self_subscriptions,
            is_persistent: false,
            timestamp_utc: Some(chrono::Utc::now()),
            has_debugger_attached: false,
        };

        transport.queue_response(
            |message, _peer| message.is::<RegisterPeerCommand>(),
            move |message: TransportMessage| {
                let response = RegisterPeerResponse {
                    peers: vec![self_descriptor.clone().into_protobuf()],
                };
                MessageExecutionCompleted {
                    command_id: message.id.into_protobuf(),
                    error_code: 0,
                    payload_type_id: Some(
                        crate::message_type_id::proto::MessageTypeId::of::<RegisterPeerResponse>(),
                    ),
                    payload: Some(prost::Message::encode_to_vec(&response)),
                    response_message: None,
                }
            },
        );

        transport
    }

    #[tokio::test]
    async fn start_registers_to_the_configured_directory() {
        let peer = Peer::new("Abc.Service.0", "tcp://abc:42");
        let transport = transport_for(&peer, vec![]);

        let directory = Arc::new(PeerDirectory::new(configuration()));
        let bus = BusCore::new(
            configuration(),
            transport.clone(),
            directory,
            MessageDispatcher::new(16),
        );

        bus.configure(peer.id.clone(), "Test".to_string()).unwrap();
        bus.start().await.unwrap();

        let registrations = transport.get::<RegisterPeerCommand>();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].0.peer.peer, peer);

        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn publish_dispatches_locally_when_the_self_peer_subscribes() {
        let peer = Peer::new("Abc.Service.0", "tcp://abc:42");
        let transport = transport_for(&peer, vec![Subscription::any::<UserConnected>()]);

        let connected = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = MessageDispatcher::new(16);
        dispatcher
            .add(
                registry::for_handler(UserConnectedHandler {
                    connected: Arc::clone(&connected),
                })
                .handles::<UserConnected>()
                .into_invokers(),
            )
            .unwrap();

        let directory = Arc::new(PeerDirectory::new(configuration()));
        let bus = BusCore::new(configuration(), transport.clone(), directory, dispatcher);

        bus.configure(peer.id.clone(), "Test".to_string()).unwrap();
        bus.start().await.unwrap();

        bus.publish(&UserConnected {
            name: "john".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(connected.load(Ordering::SeqCst), 1);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn send_without_a_handling_peer_is_an_error() {
        let peer = Peer::new("Abc.Service.0", "tcp://abc:42");
        let transport = transport_for(&peer, vec![]);

        #[derive(Clone, prost::Message)]
        struct OrphanCommand {}

        nexbus_core::impl_command!(OrphanCommand, "Test.Bus.OrphanCommand");

        let directory = Arc::new(PeerDirectory::new(configuration()));
        let bus = BusCore::new(
            configuration(),
            transport,
            directory,
            MessageDispatcher::new(16),
        );

        bus.configure(peer.id.clone(), "Test".to_string()).unwrap();
        bus.start().await.unwrap();

        let result = bus.send(&OrphanCommand {}).await;
        assert!(matches!(
            result,
            Err(Error::Send(SendError::NoPeer))
        ));

        bus.stop().await.unwrap();
    }
}
