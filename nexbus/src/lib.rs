//! nexbus is a peer-to-peer service bus.
//!
//! Peers exchange typed commands and events over a message-oriented transport, locate each
//! other through a replicated peer directory and dispatch inbound messages to registered
//! handlers on named single-consumer queues.
//!
//! Messages are declared with the [`impl_command!`] and [`impl_event!`] macros, which name
//! the routing members a subscription [`BindingKey`] can match on with literal, `*` and `#`
//! tokens.
mod bcl;
mod bus;
mod configuration;
mod core;
mod directory;
mod dispatch;
mod message_id;
mod message_type_descriptor;
mod message_type_id;
pub mod ops;
mod peer;
mod peer_id;
pub(crate) mod proto;
mod routing;
mod subscription;
mod sync;
pub mod transport;

pub use bus::{BoxError, Bus, BusEvent, CommandFuture, CommandResult, Error, SendError};
pub use configuration::{
    BusConfiguration, ConfigurationProvider, DefaultConfigurationProvider,
    TransportConfiguration, DEFAULT_MAX_BATCH_SIZE, DEFAULT_REGISTRATION_TIMEOUT,
};
pub use directory::{
    DirectoryReader, MemoryPeerRepository, PeerDescriptor, PeerDirectory, PeerEvent,
    PeerRepository, PingPeerCommand,
};
pub use dispatch::{InvocationError, InvocationOutcome, MessageContext, Pipe, PipeState, Registry};
pub use message_id::MessageId;
pub use message_type_descriptor::MessageTypeDescriptor;
pub use message_type_id::MessageTypeId;
pub use peer::Peer;
pub use peer_id::PeerId;
pub use routing::MessageBinding;
pub use subscription::{Subscription, SubscriptionsForType};
pub use sync::stream::{BroadcastStream, EventStream};

pub use crate::core::{
    AsyncHandler, BatchedHandler, BusBuilder, ContextAwareHandler, Handler, HandlerError,
    IntoResponse, MessagePayload, Response, ResponseMessage,
};
pub use crate::core::response::Error as ResponseError;

pub use nexbus_core::{
    binding_key, fragment, impl_command, impl_event, impl_message, BindingKey,
    BindingKeyFragment, Command, DispatchHandler, Event, Message, MessageDescriptor,
    MessageKind, RoutingContent, RoutingMember, SubscriptionMode, Upcast, UpcastFrom,
    DEFAULT_DISPATCH_QUEUE,
};

pub use dispatch::registry::for_handler;
