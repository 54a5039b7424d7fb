use std::{
    any::TypeId,
    collections::HashMap,
    sync::RwLock,
};

use once_cell::sync::Lazy;

use crate::{Message, MessageDescriptor, MessageKind};

/// Process-wide registry of [`MessageTypeDescriptor`] descriptors, keyed by full name.
///
/// Descriptors are registered the first time a message type goes through
/// [`MessageTypeDescriptor::of`] and are immutable afterwards. The registry lets the wire
/// layer resolve a full name received from a remote peer back to a complete descriptor.
static REGISTRY: Lazy<RwLock<HashMap<&'static str, MessageTypeDescriptor>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Complete description of a message type
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageTypeDescriptor {
    /// Fully qualified name of the message type, without assembly or version qualifier
    pub full_name: &'static str,

    /// Rust type of the message
    pub r#type: TypeId,

    /// Kind of the message
    pub kind: MessageKind,

    /// `true` if messages of this type go through the persistence
    pub is_persistent: bool,

    /// `true` if this is an infrastructure message
    pub is_infrastructure: bool,

    /// Names of the routing members, in declaration order
    pub routing_members: &'static [&'static str],
}

impl MessageTypeDescriptor {
    /// Get the descriptor for the message type `M`, registering it on first use
    pub fn of<M: MessageDescriptor + 'static>() -> Self {
        let descriptor = Self {
            full_name: M::name(),
            r#type: TypeId::of::<M>(),
            kind: M::KIND,
            is_persistent: !M::TRANSIENT,
            is_infrastructure: M::INFRASTRUCTURE,
            routing_members: M::routing_members(),
        };

        register(descriptor.clone());
        descriptor
    }

    /// Get the descriptor for a message instance
    ///
    /// Falls back to a minimal descriptor when the type was never registered in this process
    pub fn of_val(message: &dyn Message) -> Self {
        if let Some(descriptor) = find(message.name()) {
            return descriptor;
        }

        Self {
            full_name: message.name(),
            r#type: message.as_any().type_id(),
            kind: message.kind(),
            is_persistent: !message.is_transient(),
            is_infrastructure: message.is_infrastructure(),
            routing_members: &[],
        }
    }

    /// Returns `true` if this descriptor describes the message type `M`
    pub fn is<M: MessageDescriptor + 'static>(&self) -> bool {
        self.r#type == TypeId::of::<M>()
    }
}

impl crate::proto::IntoProtobuf for MessageTypeDescriptor {
    type Output = crate::message_type_id::proto::MessageTypeId;

    fn into_protobuf(self) -> Self::Output {
        crate::message_type_id::proto::MessageTypeId {
            full_name: self.full_name.to_string(),
        }
    }
}

fn register(descriptor: MessageTypeDescriptor) {
    let mut registry = REGISTRY.write().expect("message type registry poisoned");
    registry.entry(descriptor.full_name).or_insert(descriptor);
}

/// Look up a previously registered descriptor by full name
pub(crate) fn find(full_name: &str) -> Option<MessageTypeDescriptor> {
    let registry = REGISTRY.read().expect("message type registry poisoned");
    registry.get(full_name).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, prost::Message)]
    struct RegisteredEvent {}

    nexbus_core::impl_event!(RegisteredEvent, "Test.Descriptor.RegisteredEvent");

    #[test]
    fn of_registers_in_the_process_registry() {
        let descriptor = MessageTypeDescriptor::of::<RegisteredEvent>();

        let found = find("Test.Descriptor.RegisteredEvent").expect("descriptor not registered");
        assert_eq!(found, descriptor);
        assert!(found.is::<RegisteredEvent>());
        assert_eq!(found.kind, MessageKind::Event);
    }

    #[test]
    fn of_val_resolves_registered_types() {
        MessageTypeDescriptor::of::<RegisteredEvent>();

        let event = RegisteredEvent {};
        let descriptor = MessageTypeDescriptor::of_val(&event);
        assert_eq!(descriptor.r#type, TypeId::of::<RegisteredEvent>());
    }
}
