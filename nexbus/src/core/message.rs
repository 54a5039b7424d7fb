use crate::{Message, MessageTypeId};

/// Trait for types that expose raw content of protobuf-encoded messages
pub trait MessagePayload {
    /// Get the string representation of the message type
    fn message_type(&self) -> Option<&str>;

    /// Get the raw bytes of the protobuf-encoded message
    fn content(&self) -> Option<&[u8]>;

    /// Returns `true` if the protobuf-encoded message is of type `M`
    fn is<M: crate::MessageDescriptor>(&self) -> bool {
        self.message_type().map(|s| s == M::name()).unwrap_or(false)
    }

    /// Attempt to decode the protobuf-encoded message as a message of type `M`
    fn decode_as<M: crate::MessageDescriptor + prost::Message + Default>(
        &self,
    ) -> Option<Result<M, prost::DecodeError>> {
        if self.is::<M>() {
            self.content().map(|bytes| M::decode(bytes))
        } else {
            None
        }
    }
}

/// A raw protobuf-encoded message along with its associated message type
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RawMessage<MessageType>(MessageType, Vec<u8>);

impl<MessageType> From<RawMessage<MessageType>> for (MessageType, Vec<u8>) {
    fn from(raw: RawMessage<MessageType>) -> Self {
        (raw.0, raw.1)
    }
}

impl<MessageType> RawMessage<MessageType> {
    pub(crate) fn new(message_type: impl Into<MessageType>, payload: impl Into<Vec<u8>>) -> Self {
        Self(message_type.into(), payload.into())
    }
}

impl RawMessage<MessageTypeId> {
    /// Encode a type-erased [`Message`] to its raw payload form
    pub(crate) fn encode(message: &dyn Message) -> Self {
        Self(MessageTypeId::of_val(message), message.encoded())
    }

    pub(crate) fn message_type(&self) -> &MessageTypeId {
        &self.0
    }
}

impl<MessageType: AsRef<str>> MessagePayload for RawMessage<MessageType> {
    fn message_type(&self) -> Option<&str> {
        Some(self.0.as_ref())
    }

    fn content(&self) -> Option<&[u8]> {
        Some(&self.1[..])
    }
}
