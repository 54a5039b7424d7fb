use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{
    core::MessagePayload,
    directory::{PeerEvent, RegistrationError},
    dispatch,
    transport::MessageExecutionCompleted,
    Command, Event, Peer, PeerId,
};

/// Type-erased error type
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised when sending a message through the bus
#[derive(Debug, Error)]
pub enum SendError {
    /// No peer is currently handling the command
    #[error("unable to find peer for command")]
    NoPeer,

    /// A command can only be sent to a single peer
    #[error("found multiple peers for command: {0:?}")]
    MultiplePeers(Vec<Peer>),

    /// Attempted to send a transient command to a peer that is not responding
    #[error("can not send a transient message to non responding peer {0}")]
    PeerNotResponding(Peer),

    /// The underlying channel of the bus has been closed
    #[error("the bus channel has been closed")]
    Closed,
}

/// Errors raised by the bus
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error
    #[error("transport error {0}")]
    Transport(BoxError),

    /// An error occured during a dispatch operation
    #[error("dispatch error {0}")]
    Dispatch(#[from] dispatch::Error),

    /// An error occured while sending a message
    #[error("error sending message {0}")]
    Send(SendError),

    /// An error occured while registering to the directory
    #[error("registration error {0}")]
    Registration(RegistrationError),

    /// A background task failed to join
    #[error("failed to join task {0}")]
    Join(#[from] tokio::task::JoinError),

    /// An error occured while loading the configuration
    #[error("configuration error {0}")]
    Configuration(BoxError),

    /// An operation was attempted while the bus was not in a valid state
    #[error("an operation was attempted while the bus was not in a valid state")]
    InvalidOperation,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Result of a [`Command`] execution, as reported by the handling peer
#[derive(Debug, Clone)]
pub struct CommandResult {
    error_code: i32,
    response_message: Option<String>,
    payload: Option<(String, Vec<u8>)>,
}

impl CommandResult {
    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }

    pub fn response_message(&self) -> Option<&str> {
        self.response_message.as_deref()
    }
}

impl MessagePayload for CommandResult {
    fn message_type(&self) -> Option<&str> {
        self.payload.as_ref().map(|p| p.0.as_str())
    }

    fn content(&self) -> Option<&[u8]> {
        self.payload.as_ref().map(|p| &p.1[..])
    }
}

impl From<MessageExecutionCompleted> for CommandResult {
    fn from(completed: MessageExecutionCompleted) -> Self {
        let payload = match (completed.payload_type_id, completed.payload) {
            (Some(type_id), Some(payload)) => Some((type_id.full_name, payload)),
            _ => None,
        };

        Self {
            error_code: completed.error_code,
            response_message: completed.response_message,
            payload,
        }
    }
}

/// A [`Future`] that resolves when the handling peer reports the result of a [`Command`]
pub struct CommandFuture(pub(crate) oneshot::Receiver<CommandResult>);

impl Future for CommandFuture {
    type Output = Result<CommandResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|r| r.map_err(|_| Error::Send(SendError::Closed)))
    }
}

/// Lifecycle and peer events raised by the bus
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// The bus is starting
    Starting,

    /// The bus is registering to a directory
    Registering,

    /// The bus successfully registered to a directory
    Registered,

    /// The bus started
    Started,

    /// The bus is stopping
    Stopping,

    /// The bus stopped
    Stopped,

    /// A peer state change was observed through the directory
    Peer(PeerEvent),
}

/// A bus
///
/// Peers send [`Command`] commands to the unique peer handling them and publish [`Event`]
/// events to every subscribed peer. Target peers are resolved through the peer directory
#[async_trait]
pub trait Bus: Send + Sync + 'static {
    /// Configure the bus with the provided [`PeerId`] and environment
    fn configure(&self, peer_id: PeerId, environment: String) -> Result<()>;

    /// Start the bus
    async fn start(&self) -> Result<()>;

    /// Stop the bus
    async fn stop(&self) -> Result<()>;

    /// Send a [`Command`] to the peer handling it
    async fn send(&self, command: &dyn Command) -> Result<CommandFuture>;

    /// Send a [`Command`] to a specific [`Peer`]
    async fn send_to(&self, command: &dyn Command, peer: Peer) -> Result<CommandFuture>;

    /// Publish an [`Event`] to every peer subscribed to it
    async fn publish(&self, event: &dyn Event) -> Result<()>;
}
