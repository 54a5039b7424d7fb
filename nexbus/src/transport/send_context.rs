use crate::{Peer, PeerId};

/// Context associated with message sending.
///
/// Encapsulates what the [`Transport`](crate::transport::Transport) layer needs to know when
/// sending a message to a list of recipient peers
#[derive(Debug, Default)]
pub enum SendContext {
    /// The message is persistent and must also reach the persistence service peer
    Persistent {
        /// List of target peers that are persistent
        persistent_peer_ids: Vec<PeerId>,

        /// [`Peer`] of the persistence service
        persistence_peer: Peer,
    },

    /// No context
    #[default]
    Empty,
}

impl SendContext {
    /// Returns `true` if `peer_id` is a persistent recipient of the message
    pub fn was_persisted(&self, peer_id: &PeerId) -> bool {
        match self {
            Self::Persistent {
                persistent_peer_ids,
                ..
            } => persistent_peer_ids.contains(peer_id),
            Self::Empty => false,
        }
    }
}
