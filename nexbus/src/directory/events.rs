use nexbus_core::impl_event;

use crate::{proto, PeerId};

/// [`Event`](crate::Event) raised when a new peer has been started
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub struct PeerStarted {
    /// Descriptor of the peer that started
    #[prost(message, required, tag = 1)]
    pub descriptor: proto::PeerDescriptor,
}

impl_event!(
    PeerStarted,
    "Nexbus.Directory.PeerStarted",
    transient = true,
    infrastructure = true
);

/// [`Event`](crate::Event) raised when a peer has been stopped
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub struct PeerStopped {
    /// Id of the stopped peer
    #[prost(message, required, tag = 1)]
    pub id: PeerId,

    /// Endpoint of the stopped peer
    #[prost(string, optional, tag = 2)]
    pub endpoint: Option<String>,

    /// UTC timestamp when the peer was stopped
    #[prost(message, optional, tag = 3)]
    pub timestamp_utc: Option<proto::bcl::DateTime>,
}

impl_event!(
    PeerStopped,
    "Nexbus.Directory.PeerStopped",
    transient = true,
    infrastructure = true
);

/// [`Event`](crate::Event) raised when a peer has been decommissioned
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub struct PeerDecommissioned {
    /// Id of the decommissioned peer
    #[prost(message, required, tag = 1)]
    pub id: PeerId,
}

impl_event!(
    PeerDecommissioned,
    "Nexbus.Directory.PeerDecommissioned",
    transient = true,
    infrastructure = true
);

/// [`Event`](crate::Event) raised when the full subscription set of a peer changed
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub struct PeerSubscriptionsUpdated {
    /// Descriptor of the peer, carrying its updated subscriptions
    #[prost(message, required, tag = 1)]
    pub descriptor: proto::PeerDescriptor,
}

impl_event!(
    PeerSubscriptionsUpdated,
    "Nexbus.Directory.PeerSubscriptionsUpdated",
    transient = true,
    infrastructure = true
);

/// [`Event`](crate::Event) raised when the dynamic subscriptions of a peer changed for a set
/// of message types.
///
/// Entries with a non-empty binding key set are additions, entries with an empty set are
/// removals. Receivers must re-derive that partition and apply both sides with the carried
/// timestamp
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub struct PeerSubscriptionsForTypesUpdated {
    /// Id of the peer whose dynamic subscriptions changed
    #[prost(message, required, tag = 1)]
    pub peer_id: PeerId,

    /// Dynamic subscription state per message type
    #[prost(message, repeated, tag = 2)]
    pub subscriptions: Vec<proto::SubscriptionsForType>,

    /// UTC timestamp of the update
    #[prost(message, required, tag = 3)]
    pub timestamp_utc: proto::bcl::DateTime,
}

impl_event!(
    PeerSubscriptionsForTypesUpdated,
    "Nexbus.Directory.PeerSubscriptionsForTypesUpdated",
    transient = true,
    infrastructure = true
);

/// [`Event`](crate::Event) raised when a peer is responding again
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub struct PeerResponding {
    /// Id of the peer that is responding
    #[prost(message, required, tag = 1)]
    pub id: PeerId,
}

impl_event!(
    PeerResponding,
    "Nexbus.Directory.PeerResponding",
    transient = true,
    infrastructure = true
);

/// [`Event`](crate::Event) raised when a peer stopped responding
#[derive(Clone, Eq, PartialEq, prost::Message)]
pub struct PeerNotResponding {
    /// Id of the peer that is not responding
    #[prost(message, required, tag = 1)]
    pub id: PeerId,
}

impl_event!(
    PeerNotResponding,
    "Nexbus.Directory.PeerNotResponding",
    transient = true,
    infrastructure = true
);
