use crate::{Message, MessageDescriptor, MessageTypeDescriptor, RoutingContent};

/// The routing identity of a concrete message: its type descriptor and the routing member
/// values extracted from the instance
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MessageBinding {
    /// Descriptor of the message type
    pub(crate) descriptor: MessageTypeDescriptor,

    /// Routing member values, in declaration order
    pub(crate) content: RoutingContent,
}

impl MessageBinding {
    /// Create a [`MessageBinding`] for an instance of a message
    pub fn of<M: Message + MessageDescriptor>(msg: &M) -> Self {
        Self {
            descriptor: MessageTypeDescriptor::of::<M>(),
            content: msg.routing_content(),
        }
    }

    /// Create a [`MessageBinding`] for a type-erased message instance
    pub fn of_val(msg: &dyn Message) -> Self {
        Self {
            descriptor: MessageTypeDescriptor::of_val(msg),
            content: msg.routing_content(),
        }
    }

    /// Return a reference to the [`MessageTypeDescriptor`] for the current binding
    pub fn descriptor(&self) -> &MessageTypeDescriptor {
        &self.descriptor
    }

    /// Return a reference to the extracted [`RoutingContent`]
    pub fn content(&self) -> &RoutingContent {
        &self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, prost::Message)]
    struct RoutableCommand {
        #[prost(string, tag = "1")]
        name: String,

        #[prost(fixed32, tag = "2")]
        id: u32,

        #[prost(fixed32, tag = "3")]
        priority: u32,
    }

    nexbus_core::impl_command!(
        RoutableCommand,
        "Test.Routing.RoutableCommand",
        routing = [name, id]
    );

    #[test]
    fn binding_extracts_routing_members_from_instance() {
        let cmd = RoutableCommand {
            name: "BrewCommand".into(),
            id: 0xC0FFEE,
            priority: 100,
        };

        let binding = MessageBinding::of(&cmd);

        assert!(binding.descriptor.is::<RoutableCommand>());
        assert_eq!(
            binding.content.parts(),
            &["BrewCommand".to_string(), 0xC0FFEE.to_string()]
        );
    }

    #[test]
    fn non_routing_members_are_not_extracted() {
        let cmd = RoutableCommand {
            name: "n".into(),
            id: 1,
            priority: 42,
        };

        assert_eq!(MessageBinding::of(&cmd).content.part_count(), 2);
    }
}
