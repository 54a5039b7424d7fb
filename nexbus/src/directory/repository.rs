//! Storage of peer descriptors and their dynamic subscriptions
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::{bcl, BindingKey, MessageTypeId, PeerId, Subscription, SubscriptionsForType};

use super::PeerDescriptor;

/// Mapping from [`PeerId`] to [`PeerDescriptor`], including the dynamic subscriptions
/// attached to each peer at runtime.
///
/// Dynamic subscription updates are guarded by a per `(peer, message type)` timestamp:
/// an update with a timestamp that is not strictly greater than the last applied one is
/// discarded. Timestamps are truncated to millisecond granularity at this boundary.
///
/// Implementations must be safe under concurrent readers and serialized writers
pub trait PeerRepository: Send + Sync + 'static {
    /// Insert or update the descriptor of a peer.
    ///
    /// Previously recorded dynamic subscriptions of the peer are never cleared by an upsert
    fn add_or_update_peer(&self, descriptor: PeerDescriptor);

    /// Get the descriptor of a peer, with static and dynamic subscriptions merged
    fn get(&self, peer_id: &PeerId) -> Option<PeerDescriptor>;

    /// Get every known descriptor, merging dynamic subscriptions when `load_dynamic` is set
    fn get_peers(&self, load_dynamic: bool) -> Vec<PeerDescriptor>;

    /// Remove the descriptor of a peer along with all its dynamic subscriptions
    fn remove_peer(&self, peer_id: &PeerId);

    /// Mark a peer as down
    fn set_peer_down(&self, peer_id: &PeerId, timestamp_utc: Option<DateTime<Utc>>);

    /// Update the responding state of a peer
    fn set_peer_responding(&self, peer_id: &PeerId, is_responding: bool);

    /// Set the dynamic subscriptions of a peer for every non-empty entry of `subscriptions`.
    /// Returns the entries that passed the timestamp guard and were applied
    fn add_dynamic_subscriptions_for_types(
        &self,
        peer_id: &PeerId,
        timestamp_utc: DateTime<Utc>,
        subscriptions: &[SubscriptionsForType],
    ) -> Vec<SubscriptionsForType>;

    /// Remove the dynamic subscriptions of a peer for the given message types.
    /// Returns the types that passed the timestamp guard and were removed
    fn remove_dynamic_subscriptions_for_types(
        &self,
        peer_id: &PeerId,
        timestamp_utc: DateTime<Utc>,
        message_types: &[MessageTypeId],
    ) -> Vec<MessageTypeId>;

    /// Remove every dynamic subscription of a peer, under the same timestamp guard.
    /// Returns the types that were removed
    fn remove_all_dynamic_subscriptions_for_peer(
        &self,
        peer_id: &PeerId,
        timestamp_utc: DateTime<Utc>,
    ) -> Vec<MessageTypeId>;
}

/// Dynamic subscription state of one message type for a peer.
///
/// The binding key set may be empty after a removal. The entry is kept so that the last
/// applied timestamp keeps guarding against outdated updates
#[derive(Debug)]
struct DynamicSubscriptions {
    message_type_id: MessageTypeId,
    binding_keys: HashSet<BindingKey>,
    last_applied_utc: DateTime<Utc>,
}

#[derive(Debug)]
struct PeerEntry {
    /// Descriptor as registered, carrying the static subscriptions
    descriptor: PeerDescriptor,

    /// Dynamic subscriptions keyed by message type full name
    dynamics: HashMap<String, DynamicSubscriptions>,
}

impl PeerEntry {
    fn new(descriptor: PeerDescriptor) -> Self {
        Self {
            descriptor,
            dynamics: HashMap::new(),
        }
    }

    /// Merge the static and dynamic subscriptions into a deduplicated descriptor
    fn merged(&self, load_dynamic: bool) -> PeerDescriptor {
        let mut descriptor = self.descriptor.clone();

        if load_dynamic {
            let dynamic_subscriptions = self.dynamics.values().flat_map(|entry| {
                entry
                    .binding_keys
                    .iter()
                    .map(|key| Subscription::new(entry.message_type_id.clone(), key.clone()))
            });

            descriptor.subscriptions = descriptor
                .subscriptions
                .into_iter()
                .chain(dynamic_subscriptions)
                .unique()
                .collect();
        }

        descriptor
    }

    /// Apply `update` to the dynamic entry of `message_type_id` iff `timestamp_utc` is
    /// strictly greater than the last applied timestamp for that type.
    /// Returns `true` if the update was applied
    fn apply_dynamic(
        &mut self,
        message_type_id: &MessageTypeId,
        timestamp_utc: DateTime<Utc>,
        update: impl FnOnce(&mut HashSet<BindingKey>),
    ) -> bool {
        match self.dynamics.get_mut(message_type_id.full_name()) {
            Some(entry) => {
                if timestamp_utc > entry.last_applied_utc {
                    update(&mut entry.binding_keys);
                    entry.last_applied_utc = timestamp_utc;
                    true
                } else {
                    false
                }
            }
            None => {
                let mut binding_keys = HashSet::new();
                update(&mut binding_keys);

                self.dynamics.insert(
                    message_type_id.full_name().to_string(),
                    DynamicSubscriptions {
                        message_type_id: message_type_id.clone(),
                        binding_keys,
                        last_applied_utc: timestamp_utc,
                    },
                );
                true
            }
        }
    }
}

/// In-memory [`PeerRepository`] with concurrent readers and serialized writers
#[derive(Default)]
pub struct MemoryPeerRepository {
    entries: RwLock<HashMap<PeerId, PeerEntry>>,
}

impl MemoryPeerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerRepository for MemoryPeerRepository {
    fn add_or_update_peer(&self, descriptor: PeerDescriptor) {
        let mut descriptor = descriptor;
        descriptor.timestamp_utc = descriptor.timestamp_utc.map(bcl::truncate_to_milliseconds);

        let mut entries = self.entries.write().expect("peer repository poisoned");
        entries
            .entry(descriptor.peer.id.clone())
            .and_modify(|entry| entry.descriptor = descriptor.clone())
            .or_insert_with(|| PeerEntry::new(descriptor));
    }

    fn get(&self, peer_id: &PeerId) -> Option<PeerDescriptor> {
        let entries = self.entries.read().expect("peer repository poisoned");
        entries.get(peer_id).map(|entry| entry.merged(true))
    }

    fn get_peers(&self, load_dynamic: bool) -> Vec<PeerDescriptor> {
        let entries = self.entries.read().expect("peer repository poisoned");
        entries
            .values()
            .map(|entry| entry.merged(load_dynamic))
            .collect()
    }

    fn remove_peer(&self, peer_id: &PeerId) {
        let mut entries = self.entries.write().expect("peer repository poisoned");
        entries.remove(peer_id);
    }

    fn set_peer_down(&self, peer_id: &PeerId, timestamp_utc: Option<DateTime<Utc>>) {
        let mut entries = self.entries.write().expect("peer repository poisoned");
        if let Some(entry) = entries.get_mut(peer_id) {
            entry.descriptor.peer.is_up = false;
            entry.descriptor.peer.is_responding = false;
            if let Some(timestamp_utc) = timestamp_utc {
                entry.descriptor.timestamp_utc = Some(bcl::truncate_to_milliseconds(timestamp_utc));
            }
        }
    }

    fn set_peer_responding(&self, peer_id: &PeerId, is_responding: bool) {
        let mut entries = self.entries.write().expect("peer repository poisoned");
        if let Some(entry) = entries.get_mut(peer_id) {
            entry.descriptor.peer.is_responding = is_responding;
        }
    }

    fn add_dynamic_subscriptions_for_types(
        &self,
        peer_id: &PeerId,
        timestamp_utc: DateTime<Utc>,
        subscriptions: &[SubscriptionsForType],
    ) -> Vec<SubscriptionsForType> {
        let timestamp_utc = bcl::truncate_to_milliseconds(timestamp_utc);

        let mut entries = self.entries.write().expect("peer repository poisoned");
        let Some(entry) = entries.get_mut(peer_id) else {
            return vec![];
        };

        let mut applied = Vec::new();
        for subscription in subscriptions {
            if subscription.binding_keys.is_empty() {
                continue;
            }

            let binding_keys = subscription.binding_keys.iter().cloned().collect();
            if entry.apply_dynamic(&subscription.message_type_id, timestamp_utc, |keys| {
                *keys = binding_keys;
            }) {
                applied.push(subscription.clone());
            }
        }

        applied
    }

    fn remove_dynamic_subscriptions_for_types(
        &self,
        peer_id: &PeerId,
        timestamp_utc: DateTime<Utc>,
        message_types: &[MessageTypeId],
    ) -> Vec<MessageTypeId> {
        let timestamp_utc = bcl::truncate_to_milliseconds(timestamp_utc);

        let mut entries = self.entries.write().expect("peer repository poisoned");
        let Some(entry) = entries.get_mut(peer_id) else {
            return vec![];
        };

        let mut applied = Vec::new();
        for message_type in message_types {
            if entry.apply_dynamic(message_type, timestamp_utc, |keys| keys.clear()) {
                applied.push(message_type.clone());
            }
        }

        applied
    }

    fn remove_all_dynamic_subscriptions_for_peer(
        &self,
        peer_id: &PeerId,
        timestamp_utc: DateTime<Utc>,
    ) -> Vec<MessageTypeId> {
        let timestamp_utc = bcl::truncate_to_milliseconds(timestamp_utc);

        let mut entries = self.entries.write().expect("peer repository poisoned");
        let Some(entry) = entries.get_mut(peer_id) else {
            return vec![];
        };

        let mut applied = Vec::new();
        for dynamic in entry.dynamics.values_mut() {
            if timestamp_utc > dynamic.last_applied_utc {
                dynamic.binding_keys.clear();
                dynamic.last_applied_utc = timestamp_utc;
                applied.push(dynamic.message_type_id.clone());
            }
        }

        applied
    }
}
