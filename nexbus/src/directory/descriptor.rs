use chrono::Utc;

use crate::proto::{FromProtobuf, IntoProtobuf};
use crate::{Peer, Subscription};

pub(crate) mod proto {
    /// Wire description of a [`Peer`](crate::Peer)
    #[derive(Clone, Eq, PartialEq, prost::Message)]
    pub struct PeerDescriptor {
        #[prost(message, required, tag = 1)]
        pub peer: crate::Peer,

        #[prost(message, repeated, tag = 2)]
        pub subscriptions: Vec<crate::proto::Subscription>,

        #[prost(bool, required, tag = 3)]
        pub is_persistent: bool,

        #[prost(message, optional, tag = 4)]
        pub timestamp_utc: Option<crate::proto::bcl::DateTime>,

        #[prost(bool, optional, tag = 5)]
        pub has_debugger_attached: Option<bool>,
    }
}

/// Description of a peer: its identity, subscriptions and registration state
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerDescriptor {
    pub peer: Peer,

    pub subscriptions: Vec<Subscription>,

    pub is_persistent: bool,

    pub timestamp_utc: Option<chrono::DateTime<Utc>>,

    pub has_debugger_attached: bool,
}

impl PeerDescriptor {
    pub fn peer_id(&self) -> &crate::PeerId {
        &self.peer.id
    }
}

impl IntoProtobuf for PeerDescriptor {
    type Output = proto::PeerDescriptor;

    fn into_protobuf(self) -> Self::Output {
        proto::PeerDescriptor {
            peer: self.peer,
            subscriptions: self.subscriptions.into_protobuf(),
            is_persistent: self.is_persistent,
            timestamp_utc: self.timestamp_utc.into_protobuf(),
            has_debugger_attached: Some(self.has_debugger_attached),
        }
    }
}

impl FromProtobuf for PeerDescriptor {
    type Input = proto::PeerDescriptor;

    fn from_protobuf(input: Self::Input) -> Self {
        // Timestamps on the wire are UTC. A timestamp of an unexpected kind is dropped rather
        // than misread
        let timestamp_utc = input.timestamp_utc.and_then(|t| t.try_into().ok());

        Self {
            peer: input.peer,
            subscriptions: Vec::from_protobuf(input.subscriptions),
            is_persistent: input.is_persistent,
            timestamp_utc,
            has_debugger_attached: input.has_debugger_attached.unwrap_or(false),
        }
    }
}
