use std::{any::Any, fmt};

mod upcast;

pub use upcast::{Upcast, UpcastFrom};

/// Re-exports used by the declaration macros
pub mod export {
    pub use prost;
}

/// A fragment of a [`BindingKey`] that will represent either a string literal, a star `*` or a
/// sharp `#`
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum BindingKeyFragment {
    Value(String),
    Star,
    Sharp,
}

impl BindingKeyFragment {
    pub fn is_star(&self) -> bool {
        matches!(self, BindingKeyFragment::Star)
    }

    pub fn is_sharp(&self) -> bool {
        matches!(self, BindingKeyFragment::Sharp)
    }
}

impl fmt::Display for BindingKeyFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKeyFragment::Value(s) => write!(f, "{s}"),
            BindingKeyFragment::Star => write!(f, "*"),
            BindingKeyFragment::Sharp => write!(f, "#"),
        }
    }
}

/// An ordered sequence of [`BindingKeyFragment`] fragments describing the subset of a message
/// type's traffic a subscription is interested in.
///
/// The empty binding key matches every routing content of its type. A `#` fragment is only
/// meaningful as the last fragment and matches any remainder, including the empty one.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct BindingKey {
    fragments: Vec<BindingKeyFragment>,
}

impl BindingKey {
    /// The empty binding key
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_fragments(fragments: Vec<BindingKeyFragment>) -> Self {
        Self { fragments }
    }

    pub fn fragments(&self) -> &[BindingKeyFragment] {
        &self.fragments
    }

    pub fn fragment(&self, index: usize) -> Option<&BindingKeyFragment> {
        self.fragments.get(index)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Returns `true` if the last fragment is `#`
    pub fn ends_with_sharp(&self) -> bool {
        self.fragments.last().map(|f| f.is_sharp()).unwrap_or(false)
    }
}

impl From<Vec<String>> for BindingKey {
    fn from(value: Vec<String>) -> Self {
        let fragments = value
            .into_iter()
            .map(|s| match s.as_str() {
                "*" => BindingKeyFragment::Star,
                "#" => BindingKeyFragment::Sharp,
                _ => BindingKeyFragment::Value(s),
            })
            .collect();
        Self { fragments }
    }
}

impl From<Vec<&str>> for BindingKey {
    fn from(parts: Vec<&str>) -> Self {
        let parts = parts.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        Self::from(parts)
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, fragment) in self.fragments.iter().enumerate() {
            if idx > 0 {
                write!(f, ".")?;
            }
            write!(f, "{fragment}")?;
        }
        Ok(())
    }
}

/// The ordered routing member values extracted from a concrete message, in declaration order
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RoutingContent {
    parts: Vec<String>,
}

impl RoutingContent {
    pub fn from_parts(parts: Vec<String>) -> Self {
        Self { parts }
    }

    pub fn part(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(String::as_str)
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl From<Vec<String>> for RoutingContent {
    fn from(parts: Vec<String>) -> Self {
        Self { parts }
    }
}

/// A value that can contribute a part to a [`RoutingContent`]
///
/// Booleans contribute the canonical `"True"` / `"False"` spelling and enums contribute their
/// variant name. Optional members contribute the empty string when absent.
pub trait RoutingMember {
    fn routing_part(&self) -> String;
}

impl RoutingMember for String {
    fn routing_part(&self) -> String {
        self.clone()
    }
}

impl RoutingMember for &str {
    fn routing_part(&self) -> String {
        (*self).to_string()
    }
}

impl RoutingMember for bool {
    fn routing_part(&self) -> String {
        if *self { "True" } else { "False" }.to_string()
    }
}

impl<T: RoutingMember> RoutingMember for Option<T> {
    fn routing_part(&self) -> String {
        match self {
            Some(value) => value.routing_part(),
            None => String::new(),
        }
    }
}

macro_rules! impl_routing_member {
    ($($ty:ty),*) => {
        $(
            impl RoutingMember for $ty {
                fn routing_part(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_routing_member!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, char);

/// Kind of a bus message
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageKind {
    /// A message sent to a unique peer, asking for an action to be performed
    Command,

    /// A message published to multiple peers, notifying that an action has been performed
    Event,
}

/// A message that can be sent on the bus.
///
/// Messages are either a [`Command`] or an [`Event`] and are declared with the
/// [`impl_command!`](crate::impl_command) and [`impl_event!`](crate::impl_event) macros, which
/// name the routing members explicitly.
pub trait Message: dyn_clone::DynClone + Send + Sync + 'static {
    /// Fully qualified name of the message type, without assembly or version qualifier
    fn name(&self) -> &'static str;

    /// Kind of the message
    fn kind(&self) -> MessageKind;

    /// Marker for messages that never go through the persistence
    fn is_transient(&self) -> bool;

    /// Marker for infrastructure messages
    fn is_infrastructure(&self) -> bool;

    /// Routing member values of this message instance, in declaration order
    fn routing_content(&self) -> RoutingContent;

    /// Protobuf-encode the payload of this message
    fn encoded(&self) -> Vec<u8>;

    /// Type-erased view of this message, used to downcast locally dispatched messages
    fn as_any(&self) -> &dyn Any;
}

dyn_clone::clone_trait_object!(Message);

impl<'a, T: Message + 'a> UpcastFrom<T> for dyn Message + 'a {
    fn up_from(value: &T) -> &(dyn Message + 'a) {
        value
    }

    fn up_from_mut(value: &mut T) -> &mut (dyn Message + 'a) {
        value
    }
}

/// Compile-time description of a message type
pub trait MessageDescriptor {
    const KIND: MessageKind;

    /// Marker flag for non-persistent messages
    const TRANSIENT: bool;

    /// Marker flag for infrastructure messages
    const INFRASTRUCTURE: bool;

    /// Fully qualified name of the message type
    fn name() -> &'static str;

    /// Names of the routing members, in declaration order
    fn routing_members() -> &'static [&'static str];
}

/// A message that can be sent to a peer, asking for an action to be performed
pub trait Command: Message + Upcast<dyn Message> {}

/// A message that can be published to multiple peers, notifying that an action has been performed
pub trait Event: Message + Upcast<dyn Message> {}

/// Subscription behavior of a handler at bus startup
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SubscriptionMode {
    /// Subscriptions for the handled message are sent when registering to the directory
    #[default]
    Auto,

    /// Subscriptions are managed explicitly through dynamic subscription updates
    Manual,
}

/// Name of the default dispatch queue
pub const DEFAULT_DISPATCH_QUEUE: &str = "DefaultQueue";

/// Represents a handler that runs in the context of a named dispatch queue
pub trait DispatchHandler {
    const DISPATCH_QUEUE: &'static str;
}

#[macro_export]
macro_rules! fragment {
    (*) => {
        $crate::BindingKeyFragment::Star
    };

    (#) => {
        $crate::BindingKeyFragment::Sharp
    };

    ($lit:literal) => {
        $crate::BindingKeyFragment::Value($lit.to_string())
    };
}

#[macro_export]
macro_rules! binding_key {
    () => {
        $crate::BindingKey::default()
    };

    ($($x:tt),* $(,)?) => {
        $crate::BindingKey::from_fragments(vec![$($crate::fragment![$x]),+])
    };
}

/// Implements [`Message`] and [`MessageDescriptor`] for a message type.
///
/// Routing members are named explicitly and contribute to the message's [`RoutingContent`] in
/// the declared order. Use [`impl_command!`](crate::impl_command) or
/// [`impl_event!`](crate::impl_event) instead of invoking this macro directly.
#[macro_export]
macro_rules! impl_message {
    ($ty:ident, $name:literal, $kind:ident
        $(, routing = [$($member:ident),* $(,)?])?
        $(, transient = $transient:literal)?
        $(, infrastructure = $infrastructure:literal)?
        $(,)?
    ) => {
        impl $crate::MessageDescriptor for $ty {
            const KIND: $crate::MessageKind = $crate::MessageKind::$kind;
            const TRANSIENT: bool = false $(|| $transient)?;
            const INFRASTRUCTURE: bool = false $(|| $infrastructure)?;

            fn name() -> &'static str {
                $name
            }

            fn routing_members() -> &'static [&'static str] {
                &[$($(stringify!($member)),*)?]
            }
        }

        impl $crate::Message for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn kind(&self) -> $crate::MessageKind {
                $crate::MessageKind::$kind
            }

            fn is_transient(&self) -> bool {
                <$ty as $crate::MessageDescriptor>::TRANSIENT
            }

            fn is_infrastructure(&self) -> bool {
                <$ty as $crate::MessageDescriptor>::INFRASTRUCTURE
            }

            fn routing_content(&self) -> $crate::RoutingContent {
                $crate::RoutingContent::from_parts(vec![
                    $($($crate::RoutingMember::routing_part(&self.$member)),*)?
                ])
            }

            fn encoded(&self) -> Vec<u8> {
                $crate::export::prost::Message::encode_to_vec(self)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }
    };
}

/// Declares a [`Command`] message
#[macro_export]
macro_rules! impl_command {
    ($ty:ident, $name:literal $($rest:tt)*) => {
        $crate::impl_message!($ty, $name, Command $($rest)*);

        impl $crate::Command for $ty {}
    };
}

/// Declares an [`Event`] message
#[macro_export]
macro_rules! impl_event {
    ($ty:ident, $name:literal $($rest:tt)*) => {
        $crate::impl_message!($ty, $name, Event $($rest)*);

        impl $crate::Event for $ty {}
    };
}
