//! Operational messages published by the bus itself
use nexbus_core::impl_event;

use crate::{proto, transport::transport_message};

/// [`Event`](crate::Event) published when one or more handlers failed to process a message.
///
/// Publication is toggled by
/// [`enable_error_publication`](crate::BusConfiguration::enable_error_publication)
#[derive(Clone, prost::Message)]
pub struct MessageProcessingFailed {
    /// The message whose processing failed
    #[prost(message, required, tag = 1)]
    pub transport_message: transport_message::proto::TransportMessage,

    /// Human readable description of the failure
    #[prost(string, required, tag = 2)]
    pub exception_message: String,

    /// UTC timestamp of the failure
    #[prost(message, required, tag = 3)]
    pub exception_timestamp_utc: proto::bcl::DateTime,

    /// Types of the handlers that failed
    #[prost(string, repeated, tag = 4)]
    pub failing_handlers: Vec<String>,
}

impl_event!(
    MessageProcessingFailed,
    "Nexbus.Core.MessageProcessingFailed",
    transient = true,
    infrastructure = true
);
