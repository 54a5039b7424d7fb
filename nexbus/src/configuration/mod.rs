pub mod bus;
pub mod provider;
pub mod transport;

pub use bus::{
    BusConfiguration, DEFAULT_MAX_BATCH_SIZE, DEFAULT_REGISTRATION_TIMEOUT,
};
pub use provider::{ConfigurationProvider, DefaultConfigurationProvider};
pub use transport::TransportConfiguration;
