use std::{
    any::TypeId,
    hash::{Hash, Hasher},
};

use crate::{
    message_type_descriptor,
    proto::{FromProtobuf, IntoProtobuf},
    Message, MessageDescriptor, MessageTypeDescriptor,
};

pub(crate) mod proto {
    use crate::MessageDescriptor;

    #[derive(Clone, Eq, PartialEq, Hash, prost::Message)]
    pub struct MessageTypeId {
        #[prost(string, tag = "1")]
        pub full_name: String,
    }

    impl MessageTypeId {
        pub fn of<M: MessageDescriptor>() -> Self {
            Self {
                full_name: M::name().to_string(),
            }
        }

        pub fn is<M: MessageDescriptor>(&self) -> bool {
            self.full_name == M::name()
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Repr {
    /// A message type with its complete [`MessageTypeDescriptor`]
    Descriptor(MessageTypeDescriptor),

    /// Name of the message, as received from the wire
    Name(String),
}

/// The type identity of a message, textually represented by its fully qualified name
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageTypeId {
    repr: Repr,
}

impl Hash for MessageTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_name().hash(state);
    }
}

impl From<MessageTypeDescriptor> for MessageTypeId {
    fn from(value: MessageTypeDescriptor) -> Self {
        Self {
            repr: Repr::Descriptor(value),
        }
    }
}

impl AsRef<str> for MessageTypeId {
    fn as_ref(&self) -> &str {
        self.full_name()
    }
}

impl MessageTypeId {
    pub fn of<M: MessageDescriptor + 'static>() -> Self {
        Self::from(MessageTypeDescriptor::of::<M>())
    }

    /// Create a [`MessageTypeId`] from a bare full name, without descriptor resolution
    pub(crate) fn named(full_name: impl Into<String>) -> Self {
        Self {
            repr: Repr::Name(full_name.into()),
        }
    }

    pub fn of_val(message: &dyn Message) -> Self {
        Self::from(MessageTypeDescriptor::of_val(message))
    }

    pub fn is<M: MessageDescriptor>(&self) -> bool {
        self.full_name() == M::name()
    }

    /// Returns the fully qualified name of this message type
    pub fn full_name(&self) -> &str {
        match &self.repr {
            Repr::Descriptor(desc) => desc.full_name,
            Repr::Name(name) => name.as_str(),
        }
    }

    /// Returns the Rust [`TypeId`] type representation of this message type
    pub fn type_id(&self) -> Option<TypeId> {
        self.descriptor().map(|d| d.r#type)
    }

    /// Returns the kind of this message type
    pub fn kind(&self) -> Option<crate::MessageKind> {
        self.descriptor().map(|d| d.kind)
    }

    /// Returns `true` if this message type is an infrastructure message
    pub fn is_infrastructure(&self) -> Option<bool> {
        self.descriptor().map(|d| d.is_infrastructure)
    }

    /// Returns `true` if this message type is persistent
    pub fn is_persistent(&self) -> Option<bool> {
        self.descriptor().map(|d| d.is_persistent)
    }

    fn descriptor(&self) -> Option<&MessageTypeDescriptor> {
        match &self.repr {
            Repr::Descriptor(descriptor) => Some(descriptor),
            Repr::Name(_) => None,
        }
    }

    pub(crate) fn into_name(self) -> String {
        match self.repr {
            Repr::Descriptor(desc) => desc.full_name.to_string(),
            Repr::Name(n) => n,
        }
    }
}

impl IntoProtobuf for MessageTypeId {
    type Output = proto::MessageTypeId;

    fn into_protobuf(self) -> Self::Output {
        let full_name = self.full_name().to_string();
        proto::MessageTypeId { full_name }
    }
}

impl FromProtobuf for MessageTypeId {
    type Input = proto::MessageTypeId;

    fn from_protobuf(input: Self::Input) -> Self {
        // Resolve the wire name through the process registry when the type is known locally
        match message_type_descriptor::find(&input.full_name) {
            Some(descriptor) => Self {
                repr: Repr::Descriptor(descriptor),
            },
            None => Self {
                repr: Repr::Name(input.full_name),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;

    #[derive(Clone, prost::Message)]
    struct TestEvent {}

    nexbus_core::impl_event!(TestEvent, "Test.TypeId.TestEvent");

    fn calculate_hash<T: Hash>(t: &T) -> u64 {
        let mut s = DefaultHasher::new();
        t.hash(&mut s);
        s.finish()
    }

    #[test]
    fn hash_is_equal_for_descriptor_and_name_representations() {
        let type_id_descriptor = MessageTypeId::of::<TestEvent>();
        let type_id_name = MessageTypeId {
            repr: Repr::Name(type_id_descriptor.full_name().to_string()),
        };

        assert_eq!(
            calculate_hash(&type_id_descriptor),
            calculate_hash(&type_id_name)
        );
    }

    #[test]
    fn from_protobuf_resolves_registered_descriptor() {
        // Register the descriptor first
        let _ = MessageTypeId::of::<TestEvent>();

        let type_id = MessageTypeId::from_protobuf(proto::MessageTypeId {
            full_name: "Test.TypeId.TestEvent".to_string(),
        });

        assert!(type_id.type_id().is_some());
        assert_eq!(type_id.is_persistent(), Some(true));
    }
}
