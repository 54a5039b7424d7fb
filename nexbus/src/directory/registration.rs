use std::fmt;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::{error, info};

use super::commands::{RegisterPeerCommand, RegisterPeerResponse, UnregisterPeerCommand};
use super::PeerDescriptor;
use crate::{
    core::MessagePayload,
    proto::IntoProtobuf,
    transport::{MessageExecutionCompleted, SendContext, Transport, TransportMessage},
    BusConfiguration, Peer, Subscription,
};

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Transport error
    #[error("an error occured during a transport operation {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),

    /// Failed to deserialize a [`TransportMessage`]
    #[error("error decoding transport message {0:?} {1}")]
    Decode(TransportMessage, prost::DecodeError),

    /// Failed to deserialize a [`MessageExecutionCompleted`]
    #[error("invalid response from directory {0:?} {1}")]
    InvalidResponse(MessageExecutionCompleted, prost::DecodeError),

    /// The directory rejected the registration
    #[error("directory rejected the registration with error code {0}")]
    Rejected(i32),

    /// No response was received within the allocated time
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The stream of transport messages has been closed
    #[error("the stream of transport messages has been closed")]
    Closed,

    /// Every configured directory failed
    #[error("{0}")]
    All(AllRegistrationsFailed),
}

/// Accumulated failures over every configured directory endpoint
#[derive(Debug, Default)]
pub struct AllRegistrationsFailed(Vec<(Peer, RegistrationError)>);

impl AllRegistrationsFailed {
    pub(crate) fn add(&mut self, directory: Peer, error: RegistrationError) {
        self.0.push((directory, error));
    }

    pub(crate) fn into_error(self) -> RegistrationError {
        RegistrationError::All(self)
    }
}

impl fmt::Display for AllRegistrationsFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to register to every directory: ")?;
        for (idx, (directory, error)) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{directory}: {error}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct Registration {
    /// Messages received while waiting for the registration response.
    /// They are replayed to the dispatcher once the bus is started
    pub(crate) pending_messages: Vec<TransportMessage>,

    /// The directory response carrying every registered peer
    pub(crate) response: RegisterPeerResponse,
}

/// Initiate a new registration to a peer directory
async fn try_register<T: Transport>(
    transport: &mut T,
    self_peer: Peer,
    subscriptions: Vec<Subscription>,
    environment: String,
    directory_endpoint: Peer,
    is_persistent: bool,
) -> Result<Registration, RegistrationError> {
    // Create the `RegisterPeerCommand`
    let utc_now = Utc::now();

    let descriptor = PeerDescriptor {
        peer: self_peer.clone(),
        subscriptions,
        is_persistent,
        timestamp_utc: Some(utc_now),
        has_debugger_attached: false,
    };
    let register_command = RegisterPeerCommand {
        peer: descriptor.into_protobuf(),
    };
    let (message_id, message) =
        TransportMessage::create(&self_peer, environment, &register_command);

    // Subscribe to the transport messages stream
    let mut rcv_rx = transport
        .subscribe()
        .map_err(|e| RegistrationError::Transport(e.into()))?;

    // Send the `RegisterPeerCommand`
    transport
        .send(
            std::iter::once(directory_endpoint),
            message,
            SendContext::default(),
        )
        .map_err(|e| RegistrationError::Transport(e.into()))?
        .await
        .map_err(|e| RegistrationError::Transport(e.into()))?;

    let mut pending_messages = Vec::new();

    while let Some(message) = rcv_rx.next().await {
        let Some(completed) = message.decode_as::<MessageExecutionCompleted>() else {
            // Save the message and keep waiting for the response
            pending_messages.push(message);
            continue;
        };

        let completed = match completed {
            Ok(completed) => completed,
            Err(e) => return Err(RegistrationError::Decode(message, e)),
        };

        // A completion for another command is not ours to handle yet
        if uuid::Uuid::from(completed.command_id.value) != message_id {
            pending_messages.push(message);
            continue;
        }

        if completed.error_code != 0 {
            return Err(RegistrationError::Rejected(completed.error_code));
        }

        return match completed.decode_as::<RegisterPeerResponse>() {
            Some(Ok(response)) => Ok(Registration {
                pending_messages,
                response,
            }),
            Some(Err(e)) => Err(RegistrationError::InvalidResponse(completed, e)),
            None => Ok(Registration {
                pending_messages,
                response: RegisterPeerResponse::default(),
            }),
        };
    }

    // The transport message reception stream has been closed unexpectedly
    Err(RegistrationError::Closed)
}

/// Initiate a new registration to a peer directory with a timeout
async fn register_with_timeout<T: Transport>(
    transport: &mut T,
    self_peer: Peer,
    subscriptions: Vec<Subscription>,
    environment: String,
    directory_endpoint: Peer,
    is_persistent: bool,
    timeout: Duration,
) -> Result<Registration, RegistrationError> {
    let future = try_register(
        transport,
        self_peer,
        subscriptions,
        environment,
        directory_endpoint,
        is_persistent,
    );
    match tokio::time::timeout(timeout, future).await {
        Ok(registration) => registration,
        Err(_) => Err(RegistrationError::Timeout(timeout)),
    }
}

/// Register to the first responding directory of the configured endpoints
pub(crate) async fn register<T: Transport>(
    transport: &mut T,
    self_peer: &Peer,
    subscriptions: Vec<Subscription>,
    environment: &str,
    configuration: &BusConfiguration,
) -> Result<Registration, RegistrationError> {
    let timeout = configuration.registration_timeout;
    let mut errors = AllRegistrationsFailed::default();

    for directory_peer in configuration.directory_peers() {
        info!("registering on directory {directory_peer}");

        match register_with_timeout(
            transport,
            self_peer.clone(),
            subscriptions.clone(),
            environment.to_string(),
            directory_peer.clone(),
            configuration.is_persistent,
            timeout,
        )
        .await
        {
            Ok(registration) => return Ok(registration),
            Err(e) => {
                error!("failed to register on directory {directory_peer}: {e}");
                errors.add(directory_peer, e);
            }
        }
    }

    Err(errors.into_error())
}

/// Notify the directory that the self peer is stopping
pub(crate) async fn unregister<T: Transport>(
    transport: &mut T,
    self_peer: &Peer,
    environment: &str,
    configuration: &BusConfiguration,
) -> Result<(), RegistrationError> {
    let command = UnregisterPeerCommand {
        peer_id: self_peer.id.clone(),
        peer_endpoint: Some(self_peer.endpoint.clone()),
        timestamp_utc: Some(Utc::now().into_protobuf()),
    };

    let mut errors = AllRegistrationsFailed::default();

    for directory_peer in configuration.directory_peers() {
        info!("unregistering from directory {directory_peer}");

        let (_, message) =
            TransportMessage::create(self_peer, environment.to_string(), &command);

        let send = transport
            .send(
                std::iter::once(directory_peer.clone()),
                message,
                SendContext::default(),
            )
            .map_err(|e| RegistrationError::Transport(e.into()));

        match send {
            Ok(future) => match future.await {
                Ok(()) => return Ok(()),
                Err(e) => errors.add(directory_peer, RegistrationError::Transport(e.into())),
            },
            Err(e) => errors.add(directory_peer, e),
        }
    }

    Err(errors.into_error())
}
