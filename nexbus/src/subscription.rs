use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::proto::{FromProtobuf, IntoProtobuf};
use crate::{BindingKey, BindingKeyFragment, MessageDescriptor, MessageTypeId, RoutingContent};

pub(crate) mod proto {
    #[derive(Clone, Eq, PartialEq, prost::Message)]
    pub struct Subscription {
        #[prost(message, required, tag = "1")]
        pub message_type_id: crate::proto::MessageTypeId,

        #[prost(message, required, tag = "2")]
        pub binding_key: crate::proto::BindingKey,
    }

    /// The full set of binding keys a peer holds for one message type.
    ///
    /// An empty `binding_keys` list is a removal signal for the type.
    #[derive(Clone, Eq, PartialEq, prost::Message)]
    pub struct SubscriptionsForType {
        #[prost(message, required, tag = "1")]
        pub message_type_id: crate::proto::MessageTypeId,

        #[prost(message, repeated, tag = "2")]
        pub binding_keys: Vec<crate::proto::BindingKey>,
    }
}

/// Declares interest in a subset of a message type's traffic
#[derive(Debug, Clone, Eq)]
pub struct Subscription {
    message_type_id: MessageTypeId,
    binding_key: BindingKey,

    /// Memoized hash of `(message_type_id, binding_key)`
    hash: u64,
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.message_type_id.full_name() == other.message_type_id.full_name()
            && self.binding_key == other.binding_key
    }
}

impl Hash for Subscription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl Subscription {
    /// Create a subscription for `message_type_id` with the given `binding_key`
    pub fn new(message_type_id: MessageTypeId, binding_key: BindingKey) -> Self {
        let mut hasher = DefaultHasher::new();
        message_type_id.full_name().hash(&mut hasher);
        binding_key.hash(&mut hasher);
        let hash = hasher.finish();

        Self {
            message_type_id,
            binding_key,
            hash,
        }
    }

    /// Create a subscription matching every message of type `M`
    pub fn any<M: MessageDescriptor + 'static>() -> Self {
        Self::with_binding::<M>(BindingKey::empty())
    }

    /// Create a subscription for messages of type `M` matching `binding_key`
    pub fn with_binding<M: MessageDescriptor + 'static>(binding_key: impl Into<BindingKey>) -> Self {
        Self::new(MessageTypeId::of::<M>(), binding_key.into())
    }

    pub fn message_type_id(&self) -> &MessageTypeId {
        &self.message_type_id
    }

    pub fn binding(&self) -> &BindingKey {
        &self.binding_key
    }

    pub fn full_name(&self) -> &str {
        self.message_type_id.full_name()
    }

    /// Returns `true` if this subscription matches a message of type `message_type_id` whose
    /// routing members evaluate to `content`.
    ///
    /// A `*` fragment matches any single token and requires a token at its position. A final
    /// `#` fragment matches any remaining suffix, including the empty one. The empty binding
    /// key matches everything of its type. Otherwise the fragment count must equal the
    /// content part count.
    pub fn matches(&self, message_type_id: &MessageTypeId, content: &RoutingContent) -> bool {
        if message_type_id.full_name() != self.message_type_id.full_name() {
            return false;
        }

        if self.binding_key.is_empty() {
            return true;
        }

        for i in 0..content.part_count() {
            let Some(fragment) = self.binding_key.fragment(i) else {
                return false;
            };

            match fragment {
                BindingKeyFragment::Sharp => return true,
                BindingKeyFragment::Star => continue,
                BindingKeyFragment::Value(value) => {
                    if Some(value.as_str()) != content.part(i) {
                        return false;
                    }
                }
            }
        }

        // All content parts matched. A trailing `#` accepts the empty suffix
        content.part_count() == self.binding_key.len()
            || (self.binding_key.len() == content.part_count() + 1
                && self.binding_key.ends_with_sharp())
    }
}

/// The dynamic subscription state of one message type for a peer.
///
/// An empty binding key set means "no dynamic subscriptions for this type" and is treated as
/// a removal signal by the directory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubscriptionsForType {
    pub message_type_id: MessageTypeId,
    pub binding_keys: Vec<BindingKey>,
}

impl SubscriptionsForType {
    pub fn new(message_type_id: MessageTypeId, binding_keys: Vec<BindingKey>) -> Self {
        Self {
            message_type_id,
            binding_keys,
        }
    }

    /// Subscribe to every message of type `M`
    pub fn any<M: MessageDescriptor + 'static>() -> Self {
        Self::new(MessageTypeId::of::<M>(), vec![BindingKey::empty()])
    }

    /// Unsubscribe from the message type `M`
    pub fn none<M: MessageDescriptor + 'static>() -> Self {
        Self::new(MessageTypeId::of::<M>(), vec![])
    }

    /// Returns `true` if this entry removes the dynamic subscriptions of its type
    pub fn is_removal(&self) -> bool {
        self.binding_keys.is_empty()
    }
}

impl IntoProtobuf for Subscription {
    type Output = proto::Subscription;

    fn into_protobuf(self) -> Self::Output {
        proto::Subscription {
            message_type_id: self.message_type_id.into_protobuf(),
            binding_key: self.binding_key.into_protobuf(),
        }
    }
}

impl FromProtobuf for Subscription {
    type Input = proto::Subscription;

    fn from_protobuf(input: Self::Input) -> Self {
        Self::new(
            MessageTypeId::from_protobuf(input.message_type_id),
            BindingKey::from_protobuf(input.binding_key),
        )
    }
}

impl IntoProtobuf for SubscriptionsForType {
    type Output = proto::SubscriptionsForType;

    fn into_protobuf(self) -> Self::Output {
        proto::SubscriptionsForType {
            message_type_id: self.message_type_id.into_protobuf(),
            binding_keys: self.binding_keys.into_protobuf(),
        }
    }
}

impl FromProtobuf for SubscriptionsForType {
    type Input = proto::SubscriptionsForType;

    fn from_protobuf(input: Self::Input) -> Self {
        Self {
            message_type_id: MessageTypeId::from_protobuf(input.message_type_id),
            binding_keys: Vec::from_protobuf(input.binding_keys),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexbus_core::binding_key;

    #[derive(Clone, prost::Message)]
    struct FakeRoutableCommand {
        #[prost(uint32, tag = "1")]
        id: u32,

        #[prost(string, tag = "2")]
        name: String,
    }

    nexbus_core::impl_command!(
        FakeRoutableCommand,
        "Test.Subscription.FakeRoutableCommand",
        routing = [id, name]
    );

    fn routing(parts: &[&str]) -> RoutingContent {
        RoutingContent::from_parts(parts.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn matches_routing_content_behind_sharp() {
        use crate::Message;

        let cmd = FakeRoutableCommand {
            id: 10,
            name: "u.name".into(),
        };
        let type_id = MessageTypeId::of::<FakeRoutableCommand>();

        let subscription = Subscription::with_binding::<FakeRoutableCommand>(binding_key!["10", #]);
        assert!(subscription.matches(&type_id, &cmd.routing_content()));

        let other = Subscription::with_binding::<FakeRoutableCommand>(binding_key!["12", #]);
        assert!(!other.matches(&type_id, &cmd.routing_content()));
    }

    #[test]
    fn different_message_type_never_matches() {
        let subscription = Subscription::with_binding::<FakeRoutableCommand>(BindingKey::empty());
        let other_type = MessageTypeId::from(crate::MessageTypeDescriptor {
            full_name: "Test.Subscription.Other",
            r#type: std::any::TypeId::of::<String>(),
            kind: crate::MessageKind::Command,
            is_persistent: true,
            is_infrastructure: false,
            routing_members: &[],
        });

        assert!(!subscription.matches(&other_type, &routing(&[])));
    }

    #[test]
    fn empty_binding_key_matches_every_content() {
        let subscription = Subscription::any::<FakeRoutableCommand>();
        let type_id = MessageTypeId::of::<FakeRoutableCommand>();

        for parts in [&[][..], &["10"][..], &["10", "u.name"][..]] {
            assert!(subscription.matches(&type_id, &routing(parts)));
        }
    }

    #[test]
    fn star_requires_a_token_at_its_position() {
        let subscription = Subscription::with_binding::<FakeRoutableCommand>(binding_key!["10", *]);
        let type_id = MessageTypeId::of::<FakeRoutableCommand>();

        assert!(subscription.matches(&type_id, &routing(&["10", "anything"])));
        assert!(!subscription.matches(&type_id, &routing(&["10"])));
        assert!(!subscription.matches(&type_id, &routing(&["10", "x", "y"])));
    }

    #[test]
    fn trailing_sharp_matches_the_empty_suffix() {
        let subscription = Subscription::with_binding::<FakeRoutableCommand>(binding_key!["10", #]);
        let type_id = MessageTypeId::of::<FakeRoutableCommand>();

        assert!(subscription.matches(&type_id, &routing(&["10"])));
        assert!(subscription.matches(&type_id, &routing(&["10", "a", "b", "c"])));
    }

    #[test]
    fn part_count_must_match_without_wildcards() {
        let subscription =
            Subscription::with_binding::<FakeRoutableCommand>(binding_key!["10", "u.name"]);
        let type_id = MessageTypeId::of::<FakeRoutableCommand>();

        assert!(subscription.matches(&type_id, &routing(&["10", "u.name"])));
        assert!(!subscription.matches(&type_id, &routing(&["10"])));
        assert!(!subscription.matches(&type_id, &routing(&["10", "u.name", "extra"])));
    }

    #[test]
    fn equal_subscriptions_share_their_memoized_hash(){
        use std::collections::HashSet;

        let a = Subscription::with_binding::<FakeRoutableCommand>(binding_key!["10", *]);
        let b = Subscription::with_binding::<FakeRoutableCommand>(binding_key!["10", *]);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn empty_bindings_entry_is_a_removal_signal() {
        assert!(SubscriptionsForType::none::<FakeRoutableCommand>().is_removal());
        assert!(!SubscriptionsForType::any::<FakeRoutableCommand>().is_removal());
    }

    #[test]
    fn subscriptions_round_trip_through_protobuf() {
        use prost::Message;

        let subscription = Subscription::with_binding::<FakeRoutableCommand>(binding_key!["10", #]);
        let encoded = subscription.clone().into_protobuf().encode_to_vec();
        let decoded =
            Subscription::from_protobuf(proto::Subscription::decode(&encoded[..]).unwrap());

        assert_eq!(decoded, subscription);
    }
}
