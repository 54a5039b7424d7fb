#![allow(dead_code)]

use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tokio::sync::{broadcast, Notify};

use crate::{
    bus::BusEvent, core::MessagePayload, sync::stream::EventStream, Message, MessageDescriptor,
    MessageTypeId, Peer, PeerId,
};

use super::{SendContext, Transport, TransportMessage};

/// Inner [`MemoryTransport`] state
struct MemoryTransportInner {
    /// Configured peer id
    peer_id: Option<PeerId>,

    /// Configured environment
    environment: Option<String>,

    /// Flag indicating whether the transport has been started
    started: bool,

    /// Sender channel for transport messages
    rcv_tx: Option<broadcast::Sender<TransportMessage>>,

    /// Transmit queue.
    /// Messages that are sent through the transport are stored in this queue along with
    /// the recipient peers
    tx_queue: Vec<(TransportMessage, Vec<Peer>)>,

    /// Waiting transmission queue
    tx_wait_queue: HashMap<String, Arc<Notify>>,

    /// Reception queue.
    /// Scripted responses to send back when a message matching the predicate is sent.
    /// The first callback decides whether to respond to a particular message, the second
    /// builds the response transport message
    rx_queue: Vec<(
        Box<dyn Fn(&TransportMessage, &Peer) -> bool + Send + 'static>,
        Box<dyn FnOnce(TransportMessage, Peer, String) -> TransportMessage + Send + 'static>,
    )>,
}

/// A [`Transport`] that stores state in memory and has simplified logic for test purposes
#[derive(Clone)]
pub(crate) struct MemoryTransport {
    /// The peer the transport is operating on
    peer: Peer,

    /// Shared transport state
    inner: Arc<Mutex<MemoryTransportInner>>,
}

#[derive(Debug, Error)]
pub(crate) enum MemoryTransportError {
    #[error("invalid operation")]
    InvalidOperation,
}

impl MemoryTransport {
    pub(crate) fn new(peer: Peer) -> Self {
        Self {
            peer,
            inner: Arc::new(Mutex::new(MemoryTransportInner {
                peer_id: None,
                environment: None,
                started: false,
                rcv_tx: None,
                tx_queue: Vec::new(),
                tx_wait_queue: HashMap::new(),
                rx_queue: Vec::new(),
            })),
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.started
    }

    /// Queue a response that will be sent back when a message matching `predicate` is sent
    pub(crate) fn queue_response<M: Message + prost::Message>(
        &self,
        predicate: impl Fn(&TransportMessage, &Peer) -> bool + Send + 'static,
        message_fn: impl Fn(TransportMessage) -> M + Send + Sync + 'static,
    ) {
        let create_fn = Box::new(
            move |transport_message, sender: Peer, environment: String| {
                let message = message_fn(transport_message);
                let (_id, transport) = TransportMessage::create(&sender, environment, &message);
                transport
            },
        );

        let mut inner = self.inner.lock().unwrap();
        inner.rx_queue.push((Box::new(predicate), create_fn));
    }

    /// Simulate the reception of `message` from `sender`
    pub(crate) fn message_received<M: Message + prost::Message>(
        &self,
        message: M,
        sender: &Peer,
        environment: String,
    ) -> Option<uuid::Uuid> {
        let (id, transport) = TransportMessage::create(sender, environment, &message);
        self.transport_message_received(transport)?;
        Some(id)
    }

    pub(crate) fn transport_message_received(&self, message: TransportMessage) -> Option<()> {
        let inner = self.inner.lock().unwrap();
        let rcv_tx = inner.rcv_tx.as_ref()?;
        rcv_tx.send(message).ok()?;
        Some(())
    }

    /// Wait for `count` messages of type `M` to be sent through the transport
    pub(crate) async fn wait_for<M: MessageDescriptor + prost::Message + Default + 'static>(
        &self,
        count: usize,
    ) -> Vec<(M, Vec<Peer>)> {
        loop {
            // First attempt to retrieve messages from the tx_queue
            let tx_messages = self.get::<M>();

            // If there are enough messages already in the tx_queue, return right away
            if tx_messages.len() >= count {
                return tx_messages;
            }

            let message_type = MessageTypeId::of::<M>();

            // We need to wait for more messages to be sent through the transport
            let notify = {
                let mut inner = self.inner.lock().unwrap();

                inner
                    .tx_wait_queue
                    .entry(message_type.into_name())
                    .or_insert_with(|| Arc::new(Notify::new()))
                    .clone()
            };

            notify.notified().await;
        }
    }

    /// Get the list of messages of type `M` that have been sent through the transport
    pub(crate) fn get<M: MessageDescriptor + prost::Message + Default>(
        &self,
    ) -> Vec<(M, Vec<Peer>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .tx_queue
            .iter()
            .filter_map(|(msg, peers)| {
                let message = msg.decode_as::<M>()?.ok()?;
                Some((message, peers.clone()))
            })
            .collect()
    }

    /// Get the configured peer id
    pub(crate) fn get_peer_id(&self) -> Option<PeerId> {
        let inner = self.inner.lock().unwrap();
        inner.peer_id.clone()
    }

    /// Get the configured environment
    pub(crate) fn get_environment(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.environment.clone()
    }
}

impl Transport for MemoryTransport {
    type Err = MemoryTransportError;
    type MessageStream = crate::sync::stream::BroadcastStream<TransportMessage>;

    type StartCompletionFuture = futures_util::future::Ready<Result<(), Self::Err>>;
    type StopCompletionFuture = futures_util::future::Ready<Result<(), Self::Err>>;
    type SendFuture = futures_util::future::Ready<Result<(), Self::Err>>;

    fn configure(
        &mut self,
        peer_id: PeerId,
        environment: String,
        _event: EventStream<BusEvent>,
    ) -> Result<(), MemoryTransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.peer_id = Some(peer_id);
        inner.environment = Some(environment);
        Ok(())
    }

    fn subscribe(&self) -> Result<Self::MessageStream, Self::Err> {
        let inner = self.inner.lock().unwrap();
        match inner.rcv_tx.as_ref() {
            Some(rcv_tx) => Ok(rcv_tx.subscribe().into()),
            None => Err(MemoryTransportError::InvalidOperation),
        }
    }

    fn start(&mut self) -> Result<Self::StartCompletionFuture, MemoryTransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.started = true;
        let (rcv_tx, _) = broadcast::channel(128);
        inner.rcv_tx = Some(rcv_tx);
        Ok(futures_util::future::ready(Ok(())))
    }

    fn stop(&mut self) -> Result<Self::StopCompletionFuture, MemoryTransportError> {
        Ok(futures_util::future::ready(Ok(())))
    }

    fn peer_id(&self) -> Result<&PeerId, Self::Err> {
        Ok(&self.peer.id)
    }

    fn environment(&self) -> Result<Cow<'_, str>, Self::Err> {
        let inner = self.inner.lock().unwrap();
        match inner.environment.clone() {
            Some(environment) => Ok(Cow::Owned(environment)),
            None => Ok(Cow::Borrowed("Test")),
        }
    }

    fn inbound_endpoint(&self) -> Result<Cow<'_, str>, Self::Err> {
        Ok(Cow::Borrowed(self.peer.endpoint.as_str()))
    }

    fn send(
        &mut self,
        peers: impl Iterator<Item = Peer>,
        message: TransportMessage,
        _context: SendContext,
    ) -> Result<Self::SendFuture, Self::Err> {
        let peers: Vec<_> = peers.collect();

        let mut inner = self.inner.lock().unwrap();
        let environment = inner.environment.clone().unwrap_or_else(|| "Test".to_string());

        for peer in &peers {
            let mut i = 0;
            while i < inner.rx_queue.len() {
                if (inner.rx_queue[i].0)(&message, peer) {
                    let entry = inner.rx_queue.remove(i);
                    let response =
                        (entry.1)(message.clone(), self.peer.clone(), environment.clone());
                    if let Some(tx) = inner.rcv_tx.as_ref() {
                        let _ = tx.send(response);
                    }
                } else {
                    i += 1;
                }
            }
        }

        let msg_type = message
            .message_type()
            .expect("a TransportMessage always has a message type")
            .to_string();
        inner.tx_queue.push((message, peers));

        // Notify any waiter that some messages have been sent
        if let Some(notify) = inner.tx_wait_queue.get(&msg_type) {
            notify.notify_waiters();
        }

        Ok(futures_util::future::ready(Ok(())))
    }
}
