use prost::bytes::BufMut;

use crate::core::{MessagePayload, RawMessage};
use crate::proto::{FromProtobuf, IntoProtobuf};
use crate::{Message, MessageId, MessageTypeId, Peer, PeerId};

use super::OriginatorInfo;

pub(crate) mod proto {
    use crate::{core::MessagePayload, proto, transport::OriginatorInfo, PeerId};

    /// Protobuf definition for a message sent through the bus
    #[derive(Clone, prost::Message)]
    pub struct TransportMessage {
        /// Id of the message
        #[prost(message, required, tag = 1)]
        pub id: proto::MessageId,

        /// Type of the message
        #[prost(message, required, tag = 2)]
        pub message_type_id: proto::MessageTypeId,

        /// Content bytes of the message
        #[prost(bytes, required, tag = 3)]
        pub content: Vec<u8>,

        /// Originator of the message
        #[prost(message, required, tag = 4)]
        pub originator: OriginatorInfo,

        /// Optional bus environment from which the message was sent
        #[prost(string, optional, tag = 5)]
        pub environment: Option<String>,

        /// Flag that indicates whether the message was sent to the persistence.
        /// Used to instruct a receiver that the message was sent to the persistence
        /// and needs acknowledgment
        #[prost(bool, optional, tag = 6)]
        pub was_persisted: Option<bool>,

        /// List of recipient peers for this message that are persistent.
        /// Appended out-of-band by the sending transport
        #[prost(message, repeated, tag = 7)]
        pub persistent_peer_ids: Vec<PeerId>,
    }

    impl MessagePayload for TransportMessage {
        fn message_type(&self) -> Option<&str> {
            Some(self.message_type_id.full_name.as_str())
        }

        fn content(&self) -> Option<&[u8]> {
            Some(&self.content)
        }
    }
}

/// A message that can be sent through the bus
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Id of the message
    pub id: MessageId,

    /// Raw content bytes of the message
    pub content: RawMessage<MessageTypeId>,

    /// Information about the originator of the message
    pub originator: OriginatorInfo,

    /// Environment from which the message was sent
    pub environment: Option<String>,

    /// Flag that indicates whether the message was sent to the persistence.
    /// Used to instruct a receiver that the message was sent to the persistence
    /// and needs acknowledgment
    pub was_persisted: bool,

    /// List of recipient peers for this message that are persistent
    pub persistent_peer_ids: Vec<PeerId>,
}

impl Default for TransportMessage {
    fn default() -> Self {
        Self {
            id: MessageId::from(uuid::Uuid::nil()),
            content: RawMessage::new(MessageTypeId::named(String::new()), Vec::new()),
            originator: OriginatorInfo::default(),
            environment: None,
            was_persisted: false,
            persistent_peer_ids: Vec::new(),
        }
    }
}

impl TransportMessage {
    pub(crate) fn create(
        sender: &Peer,
        environment: String,
        message: &dyn Message,
    ) -> (uuid::Uuid, Self) {
        let uuid = uuid::Uuid::new_v4();
        let id = MessageId::from(uuid);

        let content = RawMessage::encode(message);

        let originator = OriginatorInfo {
            sender_id: sender.id.clone(),
            sender_endpoint: sender.endpoint.clone(),
            sender_machine_name: None,
            initiator_user_name: None,
        };

        (
            uuid,
            Self {
                id,
                content,
                originator,
                environment: Some(environment),
                was_persisted: false,
                persistent_peer_ids: vec![],
            },
        )
    }

    pub(crate) fn is_persistent(&self) -> bool {
        self.content
            .message_type()
            .is_persistent()
            .unwrap_or(false)
    }

    pub(crate) fn encode_to_vec(self) -> Vec<u8> {
        use prost::Message;
        self.into_protobuf().encode_to_vec()
    }

    pub(crate) fn encode<B>(self, buf: &mut B) -> Result<(), prost::EncodeError>
    where
        B: BufMut,
    {
        use prost::Message;
        self.into_protobuf().encode(buf)
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<TransportMessage, prost::DecodeError> {
        use prost::Message;
        proto::TransportMessage::decode(buf).map(TransportMessage::from_protobuf)
    }

    /// Read one frame from `buf`.
    ///
    /// A malformed frame yields a default-constructed message and `false` instead of an
    /// error; the caller decides whether to drop or log the frame
    pub fn read_frame(buf: &[u8]) -> (TransportMessage, bool) {
        match Self::decode(buf) {
            Ok(message) => (message, true),
            Err(_) => (TransportMessage::default(), false),
        }
    }
}

impl MessagePayload for TransportMessage {
    fn message_type(&self) -> Option<&str> {
        Some(self.content.message_type().full_name())
    }

    fn content(&self) -> Option<&[u8]> {
        MessagePayload::content(&self.content)
    }
}

impl IntoProtobuf for TransportMessage {
    type Output = proto::TransportMessage;

    fn into_protobuf(self) -> Self::Output {
        let (message_type, content) = self.content.into();

        proto::TransportMessage {
            id: self.id.into_protobuf(),
            message_type_id: message_type.into_protobuf(),
            content,
            originator: self.originator,
            environment: self.environment,
            was_persisted: Some(self.was_persisted),
            persistent_peer_ids: self.persistent_peer_ids,
        }
    }
}

impl FromProtobuf for TransportMessage {
    type Input = proto::TransportMessage;

    fn from_protobuf(input: Self::Input) -> Self {
        let message_type = MessageTypeId::from_protobuf(input.message_type_id);

        TransportMessage {
            id: MessageId::from_protobuf(input.id),
            content: RawMessage::new(message_type, input.content),
            originator: input.originator,
            environment: input.environment,
            was_persisted: input.was_persisted.unwrap_or(false),
            persistent_peer_ids: input.persistent_peer_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, prost::Message)]
    struct WeatherReport {
        #[prost(string, tag = "1")]
        town: String,

        #[prost(sint32, tag = "2")]
        temperature: i32,
    }

    nexbus_core::impl_event!(
        WeatherReport,
        "Test.Transport.WeatherReport",
        routing = [town]
    );

    fn create() -> TransportMessage {
        let peer = Peer::test();
        let report = WeatherReport {
            town: "Paris".to_string(),
            temperature: 21,
        };
        let (_, mut message) = TransportMessage::create(&peer, "Test".to_string(), &report);
        message.was_persisted = true;
        message.persistent_peer_ids = vec![PeerId::new("Abc.Peer.0"), PeerId::new("Abc.Peer.1")];
        message
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let message = create();
        let bytes = message.clone().encode_to_vec();

        let (decoded, ok) = TransportMessage::read_frame(&bytes);
        assert!(ok);

        assert_eq!(decoded.id, message.id);
        assert_eq!(
            decoded.content.message_type().full_name(),
            message.content.message_type().full_name()
        );
        assert_eq!(
            MessagePayload::content(&decoded),
            MessagePayload::content(&message)
        );
        assert_eq!(decoded.originator, message.originator);
        assert_eq!(decoded.environment, message.environment);
        assert_eq!(decoded.was_persisted, message.was_persisted);
        assert_eq!(decoded.persistent_peer_ids, message.persistent_peer_ids);

        // The re-encoded frame is identical bit-for-bit
        assert_eq!(decoded.encode_to_vec(), bytes);
    }

    #[test]
    fn payload_decodes_back_to_the_message() {
        let message = create();
        let report = message.decode_as::<WeatherReport>().unwrap().unwrap();
        assert_eq!(report.town, "Paris");
        assert_eq!(report.temperature, 21);
    }

    #[test]
    fn malformed_frame_yields_default_message_and_false() {
        let (message, ok) = TransportMessage::read_frame(&[0xFF, 0x01, 0x02]);
        assert!(!ok);
        assert_eq!(message.content.message_type().full_name(), "");
        assert!(message.persistent_peer_ids.is_empty());
    }
}
