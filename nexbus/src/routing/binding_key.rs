//! Wire representation of [`BindingKey`]
use crate::proto::{FromProtobuf, IntoProtobuf};
use crate::{BindingKey, BindingKeyFragment};

pub(crate) mod proto {
    /// Protobuf representation of a binding key.
    ///
    /// Fragments are serialized in order; `*` and `#` keep their textual spelling.
    #[derive(Clone, Eq, PartialEq, Hash, prost::Message)]
    pub struct BindingKey {
        #[prost(string, repeated, tag = "1")]
        pub parts: Vec<String>,
    }
}

impl IntoProtobuf for BindingKey {
    type Output = proto::BindingKey;

    fn into_protobuf(self) -> Self::Output {
        let parts = self
            .fragments()
            .iter()
            .map(|fragment| match fragment {
                BindingKeyFragment::Value(s) => s.clone(),
                BindingKeyFragment::Star => "*".to_string(),
                BindingKeyFragment::Sharp => "#".to_string(),
            })
            .collect();

        proto::BindingKey { parts }
    }
}

impl FromProtobuf for BindingKey {
    type Input = proto::BindingKey;

    fn from_protobuf(input: Self::Input) -> Self {
        BindingKey::from(input.parts)
    }
}
