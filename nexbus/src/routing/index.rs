//! Two-level subscription index: message type first, then a [`PeerSubscriptionTree`] per type
use std::collections::HashMap;

use crate::{BindingKey, PeerId, RoutingContent};

use super::tree::PeerSubscriptionTree;

/// An indexed subscription of a peer
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct IndexedSubscription {
    pub(crate) message_type: String,
    pub(crate) binding_key: BindingKey,
    pub(crate) is_dynamic: bool,
}

/// The per-type pair of trees.
///
/// Static and dynamic subscriptions live in separate sub-trees so that static-only lookups
/// skip the dynamic tree without walking it.
#[derive(Debug, Default)]
struct TypeSubscriptions {
    statics: PeerSubscriptionTree,
    dynamics: PeerSubscriptionTree,
}

impl TypeSubscriptions {
    fn tree_mut(&mut self, is_dynamic: bool) -> &mut PeerSubscriptionTree {
        if is_dynamic {
            &mut self.dynamics
        } else {
            &mut self.statics
        }
    }

    fn is_empty(&self) -> bool {
        self.statics.is_empty() && self.dynamics.is_empty()
    }
}

/// Index answering "which peers subscribe to this routing content" for every message type
#[derive(Debug, Default)]
pub(crate) struct SubscriptionMatcher {
    types: HashMap<String, TypeSubscriptions>,

    /// Reverse index used to re-index a peer when its subscription set changes
    by_peer: HashMap<PeerId, Vec<IndexedSubscription>>,
}

impl SubscriptionMatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a single subscription for a peer
    pub(crate) fn add(&mut self, peer_id: PeerId, subscription: IndexedSubscription) {
        let entry = self
            .types
            .entry(subscription.message_type.clone())
            .or_default();
        entry
            .tree_mut(subscription.is_dynamic)
            .add(peer_id.clone(), &subscription.binding_key);

        let peer_entries = self.by_peer.entry(peer_id).or_default();
        if !peer_entries.contains(&subscription) {
            peer_entries.push(subscription);
        }
    }

    /// Remove a single subscription of a peer, pruning emptied trees
    pub(crate) fn remove(&mut self, peer_id: &PeerId, subscription: &IndexedSubscription) {
        if let Some(entry) = self.types.get_mut(&subscription.message_type) {
            entry
                .tree_mut(subscription.is_dynamic)
                .remove(peer_id, &subscription.binding_key);

            if entry.is_empty() {
                self.types.remove(&subscription.message_type);
            }
        }

        if let Some(peer_entries) = self.by_peer.get_mut(peer_id) {
            peer_entries.retain(|s| s != subscription);
            if peer_entries.is_empty() {
                self.by_peer.remove(peer_id);
            }
        }
    }

    /// Replace the static subscriptions of a peer, leaving its dynamic entries untouched
    pub(crate) fn set_static(
        &mut self,
        peer_id: &PeerId,
        subscriptions: impl IntoIterator<Item = (String, BindingKey)>,
    ) {
        let old = self
            .by_peer
            .get(peer_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|s| !s.is_dynamic)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for subscription in old {
            self.remove(peer_id, &subscription);
        }

        for (message_type, binding_key) in subscriptions {
            self.add(
                peer_id.clone(),
                IndexedSubscription {
                    message_type,
                    binding_key,
                    is_dynamic: false,
                },
            );
        }
    }

    /// Replace the dynamic subscriptions of a peer for one message type.
    /// An empty `binding_keys` removes the type from the peer's dynamic entries
    pub(crate) fn set_dynamic_for_type(
        &mut self,
        peer_id: &PeerId,
        message_type: &str,
        binding_keys: Vec<BindingKey>,
    ) {
        let old = self
            .by_peer
            .get(peer_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|s| s.is_dynamic && s.message_type == message_type)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for subscription in old {
            self.remove(peer_id, &subscription);
        }

        for binding_key in binding_keys {
            self.add(
                peer_id.clone(),
                IndexedSubscription {
                    message_type: message_type.to_string(),
                    binding_key,
                    is_dynamic: true,
                },
            );
        }
    }

    /// Remove every indexed subscription of a peer
    pub(crate) fn remove_peer(&mut self, peer_id: &PeerId) {
        let Some(entries) = self.by_peer.remove(peer_id) else {
            return;
        };

        for subscription in entries {
            if let Some(entry) = self.types.get_mut(&subscription.message_type) {
                entry
                    .tree_mut(subscription.is_dynamic)
                    .remove(peer_id, &subscription.binding_key);

                if entry.is_empty() {
                    self.types.remove(&subscription.message_type);
                }
            }
        }
    }

    /// Get the de-duplicated set of peers whose subscriptions match `(message_type, content)`
    pub(crate) fn peers_handling(
        &self,
        message_type: &str,
        content: &RoutingContent,
        include_dynamic: bool,
    ) -> Vec<PeerId> {
        let Some(entry) = self.types.get(message_type) else {
            return vec![];
        };

        let mut peers = entry.statics.matching_peers(content);
        if include_dynamic {
            peers.extend(entry.dynamics.matching_peers(content));
            peers.sort();
            peers.dedup();
        }

        peers
    }
}
