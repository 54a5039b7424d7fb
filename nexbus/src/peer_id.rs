use std::fmt;

/// Identifies a named peer throughout bus communication between peers.
///
/// Peer ids are dot-separated tokens, e.g. `Org.Service.0`. Equality and hashing are
/// case-sensitive on the textual value.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord, prost::Message)]
pub struct PeerId {
    #[prost(string, tag = "1")]
    value: String,
}

impl PeerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Id of the `instance_id`-th configured directory peer
    pub(crate) fn directory(instance_id: usize) -> Self {
        let value = format!("Nexbus.Directory.{instance_id}");
        Self { value }
    }

    /// Returns `true` if this peer is an instance of the persistence service
    pub(crate) fn is_persistence(&self) -> bool {
        self.value.starts_with("Nexbus.Persistence")
    }

    #[cfg(test)]
    pub(crate) fn test() -> Self {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static INSTANCE_ID: AtomicUsize = AtomicUsize::new(0);
        let instance_id = INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            value: format!("Nexbus.Testing.{instance_id}"),
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_case_sensitive() {
        assert_ne!(PeerId::new("Abc.Service.0"), PeerId::new("abc.service.0"));
        assert_eq!(PeerId::new("Abc.Service.0"), PeerId::new("Abc.Service.0"));
    }

    #[test]
    fn directory_ids_are_numbered() {
        assert_eq!(PeerId::directory(2).value(), "Nexbus.Directory.2");
    }
}
