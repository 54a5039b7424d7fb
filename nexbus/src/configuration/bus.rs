use std::time::Duration;

use rand::{seq::SliceRandom, thread_rng};
use serde::Deserialize;

use crate::{Peer, PeerId};

/// Default time to wait for when registering to a directory
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum batch size for the dispatch queues
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

fn default_registration_timeout() -> Duration {
    DEFAULT_REGISTRATION_TIMEOUT
}

fn default_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

/// Configuration parameters for a [`Bus`](crate::Bus)
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfiguration {
    /// The list of directories the bus can register to.
    /// The syntax is `tcp://hostname:port`
    #[serde(default)]
    pub directory_endpoints: Vec<String>,

    /// The time to wait for when registering to a directory. Once this time is over,
    /// the next directory in the list will be tried
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout: Duration,

    /// A peer marked as persistent benefits from the persistence mechanism: messages sent
    /// while it is offline are replayed when it starts again
    #[serde(default)]
    pub is_persistent: bool,

    /// Mainly a debugging setting. Setting it to false will prevent the bus from connecting
    /// to a random directory of the list
    #[serde(default)]
    pub pick_random_directory: bool,

    /// Indicates whether [`MessageProcessingFailed`](crate::ops::MessageProcessingFailed)
    /// should be published on handler errors
    #[serde(default)]
    pub enable_error_publication: bool,

    /// Maximum number of entries a dispatch queue pulls per batch
    #[serde(default = "default_batch_size")]
    pub message_batch_size: usize,

    /// When set, the directory only consults static subscriptions to compute the target
    /// peers of outgoing messages
    #[serde(default)]
    pub disable_dynamic_subscriptions_for_directory_outgoing_messages: bool,
}

impl BusConfiguration {
    /// Update the configuration with the given directory `endpoints`
    pub fn with_directory_endpoints<T: Into<String>>(
        mut self,
        endpoints: impl IntoIterator<Item = T>,
    ) -> Self {
        self.directory_endpoints
            .extend(endpoints.into_iter().map(Into::into));
        self
    }

    /// Update the configuration with the given registration `timeout`
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    /// Update the configuration to toggle random directory selection on registration
    pub fn with_random_directory(mut self, value: bool) -> Self {
        self.pick_random_directory = value;
        self
    }

    /// Update the configuration to toggle persistence.
    /// Enabling persistence makes the peer benefit from offline message replay
    pub fn with_persistence(mut self, value: bool) -> Self {
        self.is_persistent = value;
        self
    }

    /// Update the configuration to toggle
    /// [`MessageProcessingFailed`](crate::ops::MessageProcessingFailed) publishing on
    /// handler errors
    pub fn with_error_publication(mut self, value: bool) -> Self {
        self.enable_error_publication = value;
        self
    }

    /// Update the configuration with the maximum dispatch batch size
    pub fn with_batch_size(mut self, value: usize) -> Self {
        self.message_batch_size = value.max(1);
        self
    }

    /// Update the configuration to toggle dynamic subscriptions for outgoing directory
    /// lookups
    pub fn with_static_directory_lookups(mut self, value: bool) -> Self {
        self.disable_dynamic_subscriptions_for_directory_outgoing_messages = value;
        self
    }

    /// Return the list of [`Peer`] peers over the configured directory endpoints.
    /// Shuffles the peers if [`Self::pick_random_directory`] is true
    pub(crate) fn directory_peers(&self) -> Vec<Peer> {
        let mut peers = self
            .directory_endpoints
            .iter()
            .enumerate()
            .map(|(idx, endpoint)| {
                let peer_id = PeerId::directory(idx);

                Peer {
                    id: peer_id,
                    endpoint: endpoint.to_string(),
                    is_up: true,
                    is_responding: true,
                }
            })
            .collect::<Vec<_>>();

        if self.pick_random_directory {
            peers.shuffle(&mut thread_rng());
        }

        peers
    }
}

impl Default for BusConfiguration {
    fn default() -> Self {
        Self {
            directory_endpoints: Vec::new(),
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            is_persistent: false,
            pick_random_directory: true,
            enable_error_publication: false,
            message_batch_size: DEFAULT_MAX_BATCH_SIZE,
            disable_dynamic_subscriptions_for_directory_outgoing_messages: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_peers_are_numbered_in_endpoint_order() {
        let configuration = BusConfiguration::default()
            .with_directory_endpoints(["tcp://directory-1:129", "tcp://directory-2:129"])
            .with_random_directory(false);

        let peers = configuration.directory_peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].id, PeerId::directory(0));
        assert_eq!(peers[0].endpoint, "tcp://directory-1:129");
        assert_eq!(peers[1].id, PeerId::directory(1));
    }

    #[test]
    fn batch_size_has_a_floor_of_one() {
        let configuration = BusConfiguration::default().with_batch_size(0);
        assert_eq!(configuration.message_batch_size, 1);
    }
}
