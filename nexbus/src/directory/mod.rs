//! The replicated peer directory: registration, subscriptions and peer liveness
mod client;
pub(crate) mod commands;
pub(crate) mod descriptor;
mod event;
mod events;
pub(crate) mod registration;
mod repository;

pub use client::{DirectoryHandler, PeerDirectory};
pub use commands::PingPeerCommand;
pub use descriptor::PeerDescriptor;
pub use event::PeerEvent;
pub use events::{
    PeerDecommissioned, PeerNotResponding, PeerResponding, PeerStarted, PeerStopped,
    PeerSubscriptionsForTypesUpdated, PeerSubscriptionsUpdated,
};
pub use registration::RegistrationError;
pub use repository::{MemoryPeerRepository, PeerRepository};

use crate::{routing::MessageBinding, Peer, PeerId};

/// Read access to the directory state
pub trait DirectoryReader: Send + Sync {
    /// Get the merged descriptor of a peer
    fn get(&self, peer_id: &PeerId) -> Option<PeerDescriptor>;

    /// Get the unique peers whose subscriptions match the message binding
    fn get_peers_handling(&self, binding: &MessageBinding) -> Vec<Peer>;
}
