use crate::PeerId;

/// A local notification that the directory state of a peer changed
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerEvent {
    /// The self peer registered to the directory
    Registered(PeerId),

    /// A new peer has been started
    Started(PeerId),

    /// A peer has been stopped
    Stopped(PeerId),

    /// A peer has been updated
    Updated(PeerId),

    /// A peer has been decommissioned
    Decommissioned(PeerId),
}

impl PeerEvent {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            PeerEvent::Registered(peer_id)
            | PeerEvent::Started(peer_id)
            | PeerEvent::Stopped(peer_id)
            | PeerEvent::Updated(peer_id)
            | PeerEvent::Decommissioned(peer_id) => peer_id,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PeerEvent::Registered(_) => "Registered",
            PeerEvent::Started(_) => "Started",
            PeerEvent::Stopped(_) => "Stopped",
            PeerEvent::Updated(_) => "Updated",
            PeerEvent::Decommissioned(_) => "Decommissioned",
        }
    }
}
