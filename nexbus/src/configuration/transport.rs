use std::time::Duration;

use serde::Deserialize;

/// Default time a transport receive waits for an inbound frame before yielding nothing
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Default high water mark for the inbound socket
pub const DEFAULT_RECEIVE_HIGH_WATER_MARK: usize = 40_000;

fn default_receive_timeout() -> Duration {
    DEFAULT_RECEIVE_TIMEOUT
}

fn default_receive_high_water_mark() -> usize {
    DEFAULT_RECEIVE_HIGH_WATER_MARK
}

/// Configuration of the transport layer behind the [`Transport`](crate::transport::Transport)
/// seam
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfiguration {
    /// Time a receive waits for an inbound frame. Expiry yields nothing rather than an error
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout: Duration,

    /// Maximum number of inbound frames buffered by the socket
    #[serde(default = "default_receive_high_water_mark")]
    pub receive_high_water_mark: usize,
}

impl Default for TransportConfiguration {
    fn default() -> Self {
        Self {
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            receive_high_water_mark: DEFAULT_RECEIVE_HIGH_WATER_MARK,
        }
    }
}
