//! Transport base layer for peer-to-peer communication
#[cfg(test)]
pub(crate) mod memory;
mod message_execution_completed;
mod originator_info;
mod send_context;
pub(crate) mod transport_message;

use std::borrow::Cow;

use futures_core::{future::BoxFuture, Future, Stream};
use futures_util::FutureExt;

use crate::{
    bus::{BoxError, BusEvent},
    sync::stream::EventStream,
    Message, Peer, PeerId,
};

pub use message_execution_completed::MessageExecutionCompleted;
pub use originator_info::OriginatorInfo;
pub use send_context::SendContext;
pub use transport_message::TransportMessage;

/// Transport layer trait.
///
/// The concrete socket library lives behind this seam. Implementations bind an inbound
/// endpoint when starting and expose the resolved endpoint string; their receive path honors
/// a configurable timeout by yielding nothing rather than an error, and teardown unbinds
/// without blocking on in-flight frames
pub trait Transport: Send + Sync + 'static {
    /// The associated error type which can be returned from the transport layer.
    /// The error type must be convertible to a [`BoxError`]
    type Err: Into<BoxError> + std::error::Error + Send;

    /// Type of [`TransportMessage`] [`Stream`]
    /// The stream is used to receive messages from the transport
    type MessageStream: Stream<Item = TransportMessage> + Unpin + Send + 'static;

    /// A [`Future`] type returned by `start` that will resolve when the start operation
    /// completes.
    /// The start operation begins immediately; the future only signals its completion
    type StartCompletionFuture: Future<Output = Result<(), Self::Err>> + Send + 'static;

    /// A [`Future`] type returned by `stop` that will resolve when the stop operation
    /// completes
    type StopCompletionFuture: Future<Output = Result<(), Self::Err>> + Send + 'static;

    /// A [`Future`] type returned by `send`.
    /// This future must be polled or awaited for the operation to make progress
    type SendFuture: Future<Output = Result<(), Self::Err>> + Send + 'static;

    /// Configure this transport layer with a [`PeerId`]
    fn configure(
        &mut self,
        peer_id: PeerId,
        environment: String,
        event: EventStream<BusEvent>,
    ) -> Result<(), Self::Err>;

    /// Create a new subscription to the transport messages stream
    fn subscribe(&self) -> Result<Self::MessageStream, Self::Err>;

    /// Start the transport layer
    fn start(&mut self) -> Result<Self::StartCompletionFuture, Self::Err>;

    /// Stop the transport layer
    fn stop(&mut self) -> Result<Self::StopCompletionFuture, Self::Err>;

    /// Get the [`PeerId`] associated with the transport layer.
    /// This can fail if the transport layer has not been configured properly
    fn peer_id(&self) -> Result<&PeerId, Self::Err>;

    /// Retrieve the environment associated with this transport layer.
    /// This can fail if the transport layer has not been configured properly
    fn environment(&self) -> Result<Cow<'_, str>, Self::Err>;

    /// Get the endpoint bound by the transport layer, with wildcards resolved.
    /// This can fail if the transport layer has not been started
    fn inbound_endpoint(&self) -> Result<Cow<'_, str>, Self::Err>;

    /// Send a [`TransportMessage`] to a list of peers
    fn send(
        &mut self,
        peers: impl Iterator<Item = Peer>,
        message: TransportMessage,
        context: SendContext,
    ) -> Result<Self::SendFuture, Self::Err>;
}

/// Extension methods for [`Transport`]
pub trait TransportExt: Transport {
    /// Retrieve the [`Peer`] associated with this transport layer.
    /// This can fail if the transport layer has not been configured properly
    fn peer(&self) -> Result<Peer, <Self as Transport>::Err> {
        Ok(Peer {
            id: self.peer_id()?.clone(),
            endpoint: self.inbound_endpoint()?.into_owned(),
            is_up: true,
            is_responding: true,
        })
    }

    /// Send one [`Message`] to a destination [`Peer`]
    fn send_one<'a>(
        &'a mut self,
        peer: Peer,
        message: &dyn Message,
        context: SendContext,
    ) -> BoxFuture<'a, Result<uuid::Uuid, Self::Err>> {
        match self.create_message(message) {
            Ok((id, msg)) => Box::pin(async move {
                self.send(std::iter::once(peer), msg, context)?.await?;
                Ok(id)
            }),
            Err(e) => futures_util::future::ready(Err(e)).boxed(),
        }
    }

    /// Create a [`TransportMessage`] originating from this transport's peer
    fn create_message(
        &mut self,
        message: &dyn Message,
    ) -> Result<(uuid::Uuid, TransportMessage), <Self as Transport>::Err> {
        let self_peer = self.peer()?;
        let environment = self.environment()?.into_owned();

        Ok(TransportMessage::create(&self_peer, environment, message))
    }
}

impl<T> TransportExt for T where T: Transport {}
