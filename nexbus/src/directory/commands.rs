use nexbus_core::{impl_command, impl_event};

use crate::proto;

/// [`Command`](crate::Command) sent to a directory to register a peer
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub(crate) struct RegisterPeerCommand {
    /// Description of the peer to register
    #[prost(message, required, tag = "1")]
    pub peer: proto::PeerDescriptor,
}

impl_command!(
    RegisterPeerCommand,
    "Nexbus.Directory.RegisterPeerCommand",
    transient = true,
    infrastructure = true
);

/// Response of the [`RegisterPeerCommand`] command
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub(crate) struct RegisterPeerResponse {
    /// List of peers currently registered to the directory
    #[prost(message, repeated, tag = "1")]
    pub peers: Vec<proto::PeerDescriptor>,
}

impl_event!(
    RegisterPeerResponse,
    "Nexbus.Directory.RegisterPeerResponse",
    transient = true,
    infrastructure = true
);

/// [`Command`](crate::Command) sent to a directory to unregister a peer
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub(crate) struct UnregisterPeerCommand {
    /// Id of the peer to unregister
    #[prost(message, required, tag = "1")]
    pub peer_id: crate::PeerId,

    /// Endpoint of the peer to unregister
    #[prost(string, optional, tag = "2")]
    pub peer_endpoint: Option<String>,

    /// UTC timestamp of the unregistration
    #[prost(message, optional, tag = "3")]
    pub timestamp_utc: Option<proto::bcl::DateTime>,
}

impl_command!(
    UnregisterPeerCommand,
    "Nexbus.Directory.UnregisterPeerCommand",
    transient = true,
    infrastructure = true
);

/// [`Command`](crate::Command) sent by a directory to check the liveness of a peer
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub struct PingPeerCommand {}

impl_command!(
    PingPeerCommand,
    "Nexbus.Directory.PingPeerCommand",
    transient = true,
    infrastructure = true
);
