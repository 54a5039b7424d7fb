//! Routing primitives: binding keys on the wire, message bindings and the subscription matcher
pub(crate) mod binding_key;
pub(crate) mod index;
mod message_binding;
pub(crate) mod tree;

pub use message_binding::MessageBinding;
