use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::info;

use crate::bus::{self, Bus, Error};
use crate::core::Handler;
use crate::dispatch::{registry, MessageContext, Registry};
use crate::proto::{FromProtobuf, IntoProtobuf};
use crate::routing::index::SubscriptionMatcher;
use crate::routing::MessageBinding;
use crate::sync::stream::{BroadcastStream, EventStream};
use crate::{
    bcl, BusConfiguration, DispatchHandler, Peer, PeerId, Subscription, SubscriptionsForType,
};

use super::commands::{PingPeerCommand, RegisterPeerResponse};
use super::event::PeerEvent;
use super::events::{
    PeerDecommissioned, PeerNotResponding, PeerResponding, PeerStarted, PeerStopped,
    PeerSubscriptionsForTypesUpdated, PeerSubscriptionsUpdated,
};
use super::repository::{MemoryPeerRepository, PeerRepository};
use super::{DirectoryReader, PeerDescriptor};

/// Name of the dispatch queue running the directory event handlers
pub(crate) const DIRECTORY_DISPATCH_QUEUE: &str = "DirectoryQueue";

/// Liveness state of the self peer towards the directory
struct SelfState {
    /// The registered self peer, `None` before registration and after unregistration
    self_peer: Option<Peer>,

    /// Instant of the last received ping, `None` when unregistered
    last_ping: Option<Instant>,
}

struct Inner {
    configuration: BusConfiguration,
    repository: Arc<dyn PeerRepository>,
    matcher: RwLock<SubscriptionMatcher>,
    events: EventStream<PeerEvent>,
    state: Mutex<SelfState>,
}

impl Inner {
    /// Upsert a descriptor and re-index its static subscriptions
    fn apply_descriptor(&self, descriptor: &PeerDescriptor) {
        self.repository.add_or_update_peer(descriptor.clone());

        let mut matcher = self.matcher.write().expect("subscription matcher poisoned");
        matcher.set_static(
            &descriptor.peer.id,
            descriptor
                .subscriptions
                .iter()
                .map(|s| (s.full_name().to_string(), s.binding().clone())),
        );
    }

    /// Partition the entries on empty versus non-empty binding sets and apply both sides
    /// with the same timestamp. Only the updates that passed the repository's timestamp
    /// guard reach the matcher
    fn apply_subscriptions_for_types(
        &self,
        peer_id: &PeerId,
        timestamp_utc: chrono::DateTime<Utc>,
        entries: &[SubscriptionsForType],
    ) {
        let (removals, additions): (Vec<_>, Vec<_>) =
            entries.iter().cloned().partition(|e| e.is_removal());

        let applied_additions =
            self.repository
                .add_dynamic_subscriptions_for_types(peer_id, timestamp_utc, &additions);

        let removed_types = removals
            .iter()
            .map(|e| e.message_type_id.clone())
            .collect::<Vec<_>>();
        let applied_removals = self.repository.remove_dynamic_subscriptions_for_types(
            peer_id,
            timestamp_utc,
            &removed_types,
        );

        let mut matcher = self.matcher.write().expect("subscription matcher poisoned");
        for entry in applied_additions {
            matcher.set_dynamic_for_type(
                peer_id,
                entry.message_type_id.full_name(),
                entry.binding_keys,
            );
        }
        for message_type in applied_removals {
            matcher.set_dynamic_for_type(peer_id, message_type.full_name(), vec![]);
        }
    }

    fn raise(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn reset_ping(&self) {
        let mut state = self.state.lock().expect("directory state poisoned");
        if state.self_peer.is_some() {
            state.last_ping = Some(Instant::now());
        }
    }
}

/// The replicated peer directory.
///
/// The directory keeps a repository of peer descriptors and a subscription matcher in sync
/// with the directory events flowing on the bus, registers and unregisters the self peer,
/// and answers "which peers handle this message" for outgoing traffic
pub struct PeerDirectory {
    inner: Arc<Inner>,
}

impl PeerDirectory {
    pub fn new(configuration: BusConfiguration) -> Self {
        Self::with_repository(configuration, Arc::new(MemoryPeerRepository::new()))
    }

    pub fn with_repository(
        configuration: BusConfiguration,
        repository: Arc<dyn PeerRepository>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                configuration,
                repository,
                matcher: RwLock::new(SubscriptionMatcher::new()),
                events: EventStream::new(128),
                state: Mutex::new(SelfState {
                    self_peer: None,
                    last_ping: None,
                }),
            }),
        }
    }

    /// Subscribe to the stream of [`PeerEvent`] raised by this directory
    pub fn subscribe(&self) -> BroadcastStream<PeerEvent> {
        self.inner.events.stream()
    }

    /// Register the self peer.
    ///
    /// Persists the descriptor, publishes [`PeerStarted`] on the bus, raises a local
    /// [`PeerEvent::Registered`] and resets the ping clock to zero
    pub async fn register(
        &self,
        bus: &dyn Bus,
        self_peer: Peer,
        subscriptions: Vec<Subscription>,
    ) -> bus::Result<()> {
        let descriptor = PeerDescriptor {
            peer: self_peer.clone(),
            subscriptions,
            is_persistent: self.inner.configuration.is_persistent,
            timestamp_utc: Some(Utc::now()),
            has_debugger_attached: false,
        };

        info!("registering {self_peer}");
        self.inner.apply_descriptor(&descriptor);

        {
            let mut state = self.inner.state.lock().expect("directory state poisoned");
            state.self_peer = Some(self_peer.clone());
            state.last_ping = Some(Instant::now());
        }

        bus.publish(&PeerStarted {
            descriptor: descriptor.into_protobuf(),
        })
        .await?;

        self.inner.raise(PeerEvent::Registered(self_peer.id));
        Ok(())
    }

    /// Unregister the self peer.
    ///
    /// Publishes [`PeerStopped`], marks the descriptor as down and resets the ping clock to
    /// infinity
    pub async fn unregister(&self, bus: &dyn Bus) -> bus::Result<()> {
        let self_peer = {
            let mut state = self.inner.state.lock().expect("directory state poisoned");
            state.last_ping = None;
            state.self_peer.take()
        };
        let Some(self_peer) = self_peer else {
            return Err(Error::InvalidOperation);
        };

        info!("unregistering {self_peer}");
        let now_utc = Utc::now();
        self.inner.repository.set_peer_down(&self_peer.id, Some(now_utc));

        bus.publish(&PeerStopped {
            id: self_peer.id,
            endpoint: Some(self_peer.endpoint),
            timestamp_utc: Some(now_utc.into_protobuf()),
        })
        .await?;

        Ok(())
    }

    /// Update the dynamic subscriptions of the self peer.
    ///
    /// Entries with a non-empty binding set are additions, entries with an empty set are
    /// removals. Both sides share a single timestamp, and one
    /// [`PeerSubscriptionsForTypesUpdated`] carrying the input as-is is published so that
    /// replicas apply the same partition with the same timestamp
    pub async fn update_subscriptions(
        &self,
        bus: &dyn Bus,
        subscriptions: Vec<SubscriptionsForType>,
    ) -> bus::Result<()> {
        let self_peer = {
            let state = self.inner.state.lock().expect("directory state poisoned");
            state.self_peer.clone().ok_or(Error::InvalidOperation)?
        };

        let now_utc = bcl::truncate_to_milliseconds(Utc::now());
        self.inner
            .apply_subscriptions_for_types(&self_peer.id, now_utc, &subscriptions);

        bus.publish(&PeerSubscriptionsForTypesUpdated {
            peer_id: self_peer.id,
            subscriptions: subscriptions.into_protobuf(),
            timestamp_utc: now_utc.into_protobuf(),
        })
        .await?;

        Ok(())
    }

    /// Get the unique peers whose subscriptions match the message binding.
    ///
    /// Dynamic subscriptions are skipped when
    /// `disable_dynamic_subscriptions_for_directory_outgoing_messages` is set
    pub fn get_peers_handling_message(&self, binding: &MessageBinding) -> Vec<Peer> {
        let include_dynamic = !self
            .inner
            .configuration
            .disable_dynamic_subscriptions_for_directory_outgoing_messages;

        let peer_ids = {
            let matcher = self.inner.matcher.read().expect("subscription matcher poisoned");
            matcher.peers_handling(
                binding.descriptor().full_name,
                binding.content(),
                include_dynamic,
            )
        };

        peer_ids
            .into_iter()
            .filter_map(|peer_id| self.inner.repository.get(&peer_id))
            .map(|descriptor| descriptor.peer)
            .collect()
    }

    /// Time elapsed since the last [`PingPeerCommand`].
    ///
    /// Returns [`Duration::MAX`] before registration and after unregistration
    pub fn time_since_last_ping(&self) -> Duration {
        let state = self.inner.state.lock().expect("directory state poisoned");
        state
            .last_ping
            .map(|instant| instant.elapsed())
            .unwrap_or(Duration::MAX)
    }

    /// Seed the local state from a directory registration response
    pub(crate) fn handle_registration(&self, response: RegisterPeerResponse) {
        for descriptor in response.peers {
            let descriptor = PeerDescriptor::from_protobuf(descriptor);
            self.inner.apply_descriptor(&descriptor);
        }
    }

    /// The handler applying directory events to this directory
    pub(crate) fn handler(&self) -> DirectoryHandler {
        DirectoryHandler {
            inner: Arc::clone(&self.inner),
        }
    }

    /// The registry of the directory event handlers, to be added to the dispatcher
    pub(crate) fn registry(&self) -> Registry<DirectoryHandler> {
        registry::for_handler(self.handler())
            .handles::<PeerStarted>()
            .handles::<PeerStopped>()
            .handles::<PeerDecommissioned>()
            .handles::<PeerSubscriptionsUpdated>()
            .handles::<PeerSubscriptionsForTypesUpdated>()
            .handles::<PeerResponding>()
            .handles::<PeerNotResponding>()
            .handles::<PingPeerCommand>()
    }
}

impl DirectoryReader for PeerDirectory {
    fn get(&self, peer_id: &PeerId) -> Option<PeerDescriptor> {
        self.inner.repository.get(peer_id)
    }

    fn get_peers_handling(&self, binding: &MessageBinding) -> Vec<Peer> {
        self.get_peers_handling_message(binding)
    }
}

/// Applies directory events received from other peers to the local directory state
pub struct DirectoryHandler {
    inner: Arc<Inner>,
}

impl DispatchHandler for DirectoryHandler {
    const DISPATCH_QUEUE: &'static str = DIRECTORY_DISPATCH_QUEUE;
}

impl Handler<PeerStarted> for DirectoryHandler {
    type Response = ();

    fn handle(&mut self, message: PeerStarted, _context: &MessageContext) {
        let descriptor = PeerDescriptor::from_protobuf(message.descriptor);
        let peer_id = descriptor.peer.id.clone();

        self.inner.apply_descriptor(&descriptor);
        self.inner.raise(PeerEvent::Started(peer_id));
    }
}

impl Handler<PeerStopped> for DirectoryHandler {
    type Response = ();

    fn handle(&mut self, message: PeerStopped, _context: &MessageContext) {
        let timestamp_utc: Option<chrono::DateTime<Utc>> =
            message.timestamp_utc.and_then(|t| t.try_into().ok());
        self.inner.repository.set_peer_down(&message.id, timestamp_utc);
        self.inner.raise(PeerEvent::Stopped(message.id));
    }
}

impl Handler<PeerDecommissioned> for DirectoryHandler {
    type Response = ();

    fn handle(&mut self, message: PeerDecommissioned, _context: &MessageContext) {
        self.inner.repository.remove_peer(&message.id);

        let mut matcher = self
            .inner
            .matcher
            .write()
            .expect("subscription matcher poisoned");
        matcher.remove_peer(&message.id);
        drop(matcher);

        self.inner.raise(PeerEvent::Decommissioned(message.id));
    }
}

impl Handler<PeerSubscriptionsUpdated> for DirectoryHandler {
    type Response = ();

    fn handle(&mut self, message: PeerSubscriptionsUpdated, _context: &MessageContext) {
        let descriptor = PeerDescriptor::from_protobuf(message.descriptor);
        let peer_id = descriptor.peer.id.clone();

        self.inner.apply_descriptor(&descriptor);
        self.inner.raise(PeerEvent::Updated(peer_id));
    }
}

impl Handler<PeerSubscriptionsForTypesUpdated> for DirectoryHandler {
    type Response = ();

    fn handle(&mut self, message: PeerSubscriptionsForTypesUpdated, _context: &MessageContext) {
        // Consumers apply the update with the same timestamp the publisher persisted
        let Ok(timestamp_utc) = chrono::DateTime::<Utc>::try_from(message.timestamp_utc) else {
            return;
        };

        let entries = Vec::from_protobuf(message.subscriptions);
        self.inner
            .apply_subscriptions_for_types(&message.peer_id, timestamp_utc, &entries);
        self.inner.raise(PeerEvent::Updated(message.peer_id));
    }
}

impl Handler<PeerResponding> for DirectoryHandler {
    type Response = ();

    fn handle(&mut self, message: PeerResponding, _context: &MessageContext) {
        self.inner.repository.set_peer_responding(&message.id, true);
        self.inner.raise(PeerEvent::Updated(message.id));
    }
}

impl Handler<PeerNotResponding> for DirectoryHandler {
    type Response = ();

    fn handle(&mut self, message: PeerNotResponding, _context: &MessageContext) {
        self.inner.repository.set_peer_responding(&message.id, false);
        self.inner.raise(PeerEvent::Updated(message.id));
    }
}

impl Handler<PingPeerCommand> for DirectoryHandler {
    type Response = ();

    fn handle(&mut self, _message: PingPeerCommand, _context: &MessageContext) {
        self.inner.reset_ping();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use nexbus_core::binding_key;

    use super::*;
    use crate::bus::CommandFuture;
    use crate::transport::OriginatorInfo;
    use crate::{BindingKey, Command, Event, Message, MessageTypeId, RoutingContent};

    #[derive(Clone, prost::Message)]
    struct FakeCommand {}

    nexbus_core::impl_command!(FakeCommand, "Test.Directory.FakeCommand");

    #[derive(Clone, prost::Message)]
    struct IntCommand {}

    nexbus_core::impl_command!(IntCommand, "Test.Directory.IntCommand");

    #[derive(Clone, prost::Message)]
    struct DoubleCommand {}

    nexbus_core::impl_command!(DoubleCommand, "Test.Directory.DoubleCommand");

    #[derive(Clone, prost::Message)]
    struct FakeRoutableCommand {
        #[prost(uint32, tag = "1")]
        id: u32,

        #[prost(string, tag = "2")]
        name: String,
    }

    nexbus_core::impl_command!(
        FakeRoutableCommand,
        "Test.Directory.FakeRoutableCommand",
        routing = [id, name]
    );

    /// A bus double recording published events
    #[derive(Default)]
    struct FakeBus {
        published: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    impl FakeBus {
        fn published<M: crate::MessageDescriptor + prost::Message + Default>(&self) -> Vec<M> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(name, payload)| {
                    (name == M::name()).then(|| M::decode(&payload[..]).unwrap())
                })
                .collect()
        }
    }

    #[async_trait]
    impl Bus for FakeBus {
        fn configure(&self, _peer_id: PeerId, _environment: String) -> bus::Result<()> {
            Ok(())
        }

        async fn start(&self) -> bus::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> bus::Result<()> {
            Ok(())
        }

        async fn send(&self, _command: &dyn Command) -> bus::Result<CommandFuture> {
            Err(Error::InvalidOperation)
        }

        async fn send_to(
            &self,
            _command: &dyn Command,
            _peer: Peer,
        ) -> bus::Result<CommandFuture> {
            Err(Error::InvalidOperation)
        }

        async fn publish(&self, event: &dyn Event) -> bus::Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((event.name().to_string(), event.encoded()));
            Ok(())
        }
    }

    fn test_context() -> MessageContext {
        MessageContext::new(
            None,
            OriginatorInfo {
                sender_id: PeerId::test(),
                sender_endpoint: "tcp://localhost:7465".to_string(),
                sender_machine_name: None,
                initiator_user_name: None,
            },
            Some("Test".to_string()),
        )
    }

    fn directory() -> PeerDirectory {
        PeerDirectory::new(BusConfiguration::default())
    }

    async fn register(
        directory: &PeerDirectory,
        bus: &FakeBus,
        subscriptions: Vec<Subscription>,
    ) -> Peer {
        let peer = Peer::new("Abc.Service.0", "tcp://abc:42");
        directory
            .register(bus, peer.clone(), subscriptions)
            .await
            .unwrap();
        peer
    }

    #[tokio::test]
    async fn register_publishes_peer_started_and_raises_registered() {
        let directory = directory();
        let bus = FakeBus::default();
        let mut events = directory.subscribe();

        let peer = register(&directory, &bus, vec![Subscription::any::<FakeCommand>()]).await;

        let started = bus.published::<PeerStarted>();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].descriptor.peer, peer);

        use tokio_stream::StreamExt;
        assert_eq!(events.next().await, Some(PeerEvent::Registered(peer.id)));
    }

    #[tokio::test]
    async fn dynamic_subscriptions_merge_with_static_ones() {
        let directory = directory();
        let bus = FakeBus::default();
        let peer = register(&directory, &bus, vec![Subscription::any::<FakeCommand>()]).await;

        // Another replica reports a dynamic subscription update for the peer
        let mut handler = directory.handler();
        handler.handle(
            PeerSubscriptionsForTypesUpdated {
                peer_id: peer.id.clone(),
                subscriptions: vec![SubscriptionsForType::new(
                    MessageTypeId::of::<IntCommand>(),
                    vec![BindingKey::empty()],
                )]
                .into_protobuf(),
                timestamp_utc: Utc::now().into_protobuf(),
            },
            &test_context(),
        );

        let descriptor = directory.get(&peer.id).unwrap();
        assert_eq!(descriptor.subscriptions.len(), 2);
        assert!(descriptor
            .subscriptions
            .contains(&Subscription::any::<FakeCommand>()));
        assert!(descriptor
            .subscriptions
            .contains(&Subscription::any::<IntCommand>()));
    }

    #[tokio::test]
    async fn update_subscriptions_publishes_one_event_with_both_sides() {
        let directory = directory();
        let bus = FakeBus::default();
        let peer = register(&directory, &bus, vec![]).await;

        // Seed a dynamic subscription that the update will remove
        directory
            .update_subscriptions(
                &bus,
                vec![SubscriptionsForType::new(
                    MessageTypeId::of::<IntCommand>(),
                    vec![BindingKey::empty()],
                )],
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        directory
            .update_subscriptions(
                &bus,
                vec![
                    SubscriptionsForType::new(MessageTypeId::of::<IntCommand>(), vec![]),
                    SubscriptionsForType::new(
                        MessageTypeId::of::<DoubleCommand>(),
                        vec![BindingKey::empty()],
                    ),
                ],
            )
            .await
            .unwrap();

        // The repository applied the removal of int and the addition of double
        let descriptor = directory.get(&peer.id).unwrap();
        assert_eq!(
            descriptor.subscriptions,
            vec![Subscription::any::<DoubleCommand>()]
        );

        // One event carries both entries with a single timestamp
        let events = bus.published::<PeerSubscriptionsForTypesUpdated>();
        assert_eq!(events.len(), 2);
        let update = &events[1];
        assert_eq!(update.subscriptions.len(), 2);
        assert_eq!(update.peer_id, peer.id);
    }

    #[tokio::test]
    async fn replicas_apply_the_published_partition() {
        let origin = directory();
        let replica = directory();
        let bus = FakeBus::default();
        let peer = register(&origin, &bus, vec![]).await;

        let mut replica_handler = replica.handler();
        replica_handler.handle(
            PeerStarted {
                descriptor: origin.get(&peer.id).unwrap().into_protobuf(),
            },
            &test_context(),
        );

        origin
            .update_subscriptions(
                &bus,
                vec![SubscriptionsForType::new(
                    MessageTypeId::of::<DoubleCommand>(),
                    vec![BindingKey::empty()],
                )],
            )
            .await
            .unwrap();

        // Replay the published event on the replica
        let update = bus
            .published::<PeerSubscriptionsForTypesUpdated>()
            .pop()
            .unwrap();
        replica_handler.handle(update, &test_context());

        assert_eq!(
            replica.get(&peer.id).unwrap().subscriptions,
            origin.get(&peer.id).unwrap().subscriptions
        );
    }

    #[tokio::test]
    async fn outdated_subscription_events_are_discarded() {
        let directory = directory();
        let bus = FakeBus::default();
        let peer = register(&directory, &bus, vec![]).await;

        let t0 = Utc::now();
        let mut handler = directory.handler();

        handler.handle(
            PeerSubscriptionsForTypesUpdated {
                peer_id: peer.id.clone(),
                subscriptions: vec![SubscriptionsForType::new(
                    MessageTypeId::of::<IntCommand>(),
                    vec![BindingKey::empty()],
                )]
                .into_protobuf(),
                timestamp_utc: t0.into_protobuf(),
            },
            &test_context(),
        );

        // An older add for the same type is a no-op
        handler.handle(
            PeerSubscriptionsForTypesUpdated {
                peer_id: peer.id.clone(),
                subscriptions: vec![SubscriptionsForType::new(
                    MessageTypeId::of::<IntCommand>(),
                    vec![binding_key!["other"]],
                )]
                .into_protobuf(),
                timestamp_utc: (t0 - ChronoDuration::minutes(1)).into_protobuf(),
            },
            &test_context(),
        );

        // An older removal is a no-op as well
        handler.handle(
            PeerSubscriptionsForTypesUpdated {
                peer_id: peer.id.clone(),
                subscriptions: vec![SubscriptionsForType::new(
                    MessageTypeId::of::<IntCommand>(),
                    vec![],
                )]
                .into_protobuf(),
                timestamp_utc: (t0 - ChronoDuration::minutes(1)).into_protobuf(),
            },
            &test_context(),
        );

        assert_eq!(
            directory.get(&peer.id).unwrap().subscriptions,
            vec![Subscription::any::<IntCommand>()]
        );
    }

    #[tokio::test]
    async fn applying_the_same_update_twice_is_idempotent() {
        let directory = directory();
        let bus = FakeBus::default();
        let peer = register(&directory, &bus, vec![]).await;

        let update = PeerSubscriptionsForTypesUpdated {
            peer_id: peer.id.clone(),
            subscriptions: vec![SubscriptionsForType::new(
                MessageTypeId::of::<IntCommand>(),
                vec![BindingKey::empty()],
            )]
            .into_protobuf(),
            timestamp_utc: Utc::now().into_protobuf(),
        };

        let mut handler = directory.handler();
        handler.handle(update.clone(), &test_context());
        let after_first = directory.get(&peer.id).unwrap().subscriptions;

        handler.handle(update, &test_context());
        assert_eq!(directory.get(&peer.id).unwrap().subscriptions, after_first);
    }

    #[tokio::test]
    async fn ping_clock_follows_registration_lifecycle() {
        let directory = directory();
        let bus = FakeBus::default();

        assert_eq!(directory.time_since_last_ping(), Duration::MAX);

        register(&directory, &bus, vec![]).await;
        assert!(directory.time_since_last_ping() < Duration::MAX);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let before_ping = directory.time_since_last_ping();

        let mut handler = directory.handler();
        handler.handle(PingPeerCommand {}, &test_context());
        assert!(directory.time_since_last_ping() < before_ping);

        directory.unregister(&bus).await.unwrap();
        assert_eq!(directory.time_since_last_ping(), Duration::MAX);
    }

    #[tokio::test]
    async fn unregister_publishes_peer_stopped_and_marks_the_peer_down() {
        let directory = directory();
        let bus = FakeBus::default();
        let peer = register(&directory, &bus, vec![]).await;

        directory.unregister(&bus).await.unwrap();

        let stopped = bus.published::<PeerStopped>();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].id, peer.id);

        let descriptor = directory.get(&peer.id).unwrap();
        assert!(!descriptor.peer.is_up);
        assert!(!descriptor.peer.is_responding);
    }

    #[tokio::test]
    async fn decommissioned_peer_is_fully_forgotten() {
        let directory = directory();
        let bus = FakeBus::default();
        let peer = register(&directory, &bus, vec![Subscription::any::<FakeCommand>()]).await;

        let mut handler = directory.handler();
        handler.handle(
            PeerSubscriptionsForTypesUpdated {
                peer_id: peer.id.clone(),
                subscriptions: vec![SubscriptionsForType::new(
                    MessageTypeId::of::<IntCommand>(),
                    vec![BindingKey::empty()],
                )]
                .into_protobuf(),
                timestamp_utc: Utc::now().into_protobuf(),
            },
            &test_context(),
        );

        handler.handle(
            PeerDecommissioned {
                id: peer.id.clone(),
            },
            &test_context(),
        );

        assert!(directory.get(&peer.id).is_none());
        assert!(directory
            .get_peers_handling_message(&MessageBinding::of(&FakeCommand {}))
            .is_empty());
        assert!(directory
            .get_peers_handling_message(&MessageBinding::of(&IntCommand {}))
            .is_empty());
    }

    #[tokio::test]
    async fn responding_state_updates_the_peer() {
        let directory = directory();
        let bus = FakeBus::default();
        let peer = register(&directory, &bus, vec![]).await;

        let mut handler = directory.handler();
        handler.handle(
            PeerNotResponding {
                id: peer.id.clone(),
            },
            &test_context(),
        );
        assert!(!directory.get(&peer.id).unwrap().peer.is_responding);

        handler.handle(
            PeerResponding {
                id: peer.id.clone(),
            },
            &test_context(),
        );
        assert!(directory.get(&peer.id).unwrap().peer.is_responding);
    }

    #[tokio::test]
    async fn peers_handling_message_matches_routing_content() {
        let directory = directory();
        let bus = FakeBus::default();
        let peer = register(
            &directory,
            &bus,
            vec![Subscription::with_binding::<FakeRoutableCommand>(
                binding_key!["10", #],
            )],
        )
        .await;

        let matching = FakeRoutableCommand {
            id: 10,
            name: "u.name".to_string(),
        };
        let peers = directory.get_peers_handling_message(&MessageBinding::of(&matching));
        assert_eq!(peers, vec![peer]);

        let other = FakeRoutableCommand {
            id: 12,
            name: "u.name".to_string(),
        };
        assert!(directory
            .get_peers_handling_message(&MessageBinding::of(&other))
            .is_empty());
    }

    #[tokio::test]
    async fn matcher_lookup_agrees_with_subscription_matches() {
        let directory = directory();
        let bus = FakeBus::default();

        // A population of peers with varied subscriptions
        let subscriptions = [
            vec![Subscription::with_binding::<FakeRoutableCommand>(binding_key!["10", #])],
            vec![Subscription::with_binding::<FakeRoutableCommand>(binding_key![*, "u.name"])],
            vec![Subscription::any::<FakeRoutableCommand>()],
            vec![Subscription::with_binding::<FakeRoutableCommand>(binding_key!["12", "other"])],
        ];

        let mut handler = directory.handler();
        let mut peers = vec![];
        for (idx, subs) in subscriptions.iter().enumerate() {
            let peer = Peer::new(format!("Abc.Peer.{idx}").as_str(), "tcp://abc:42");
            peers.push(peer.clone());
            handler.handle(
                PeerStarted {
                    descriptor: PeerDescriptor {
                        peer,
                        subscriptions: subs.clone(),
                        is_persistent: false,
                        timestamp_utc: Some(Utc::now()),
                        has_debugger_attached: false,
                    }
                    .into_protobuf(),
                },
                &test_context(),
            );
        }
        drop(bus);

        let message = FakeRoutableCommand {
            id: 10,
            name: "u.name".to_string(),
        };
        let binding = MessageBinding::of(&message);

        let mut from_matcher = directory
            .get_peers_handling_message(&binding)
            .into_iter()
            .map(|p| p.id)
            .collect::<Vec<_>>();
        from_matcher.sort();

        // Brute force evaluation over every stored descriptor
        let type_id = MessageTypeId::of::<FakeRoutableCommand>();
        let content = RoutingContent::from_parts(vec!["10".to_string(), "u.name".to_string()]);
        let mut brute_force = peers
            .iter()
            .filter(|peer| {
                directory
                    .get(&peer.id)
                    .map(|d| d.subscriptions.iter().any(|s| s.matches(&type_id, &content)))
                    .unwrap_or(false)
            })
            .map(|p| p.id.clone())
            .collect::<Vec<_>>();
        brute_force.sort();

        assert_eq!(from_matcher, brute_force);
        assert_eq!(from_matcher.len(), 3);
    }

    #[tokio::test]
    async fn registering_twice_is_idempotent() {
        let directory = directory();
        let bus = FakeBus::default();

        let first = register(&directory, &bus, vec![Subscription::any::<FakeCommand>()]).await;
        let second = register(&directory, &bus, vec![Subscription::any::<FakeCommand>()]).await;
        assert_eq!(first, second);

        let descriptor = directory.get(&first.id).unwrap();
        assert_eq!(descriptor.subscriptions, vec![Subscription::any::<FakeCommand>()]);
        assert_eq!(
            directory
                .get_peers_handling_message(&MessageBinding::of(&FakeCommand {}))
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn static_only_lookups_skip_dynamic_subscriptions() {
        let configuration = BusConfiguration::default().with_static_directory_lookups(true);
        let directory = PeerDirectory::new(configuration);
        let bus = FakeBus::default();
        let peer = register(&directory, &bus, vec![]).await;

        directory
            .update_subscriptions(
                &bus,
                vec![SubscriptionsForType::new(
                    MessageTypeId::of::<IntCommand>(),
                    vec![BindingKey::empty()],
                )],
            )
            .await
            .unwrap();

        assert!(directory
            .get_peers_handling_message(&MessageBinding::of(&IntCommand {}))
            .is_empty());
        drop(peer);
    }
}
