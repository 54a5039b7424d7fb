use std::sync::Arc;

use crate::{
    bus,
    directory::PeerDirectory,
    dispatch::{MessageDispatcher, Pipe, Registry},
    transport::Transport,
    Bus, BusConfiguration, ConfigurationProvider, DispatchHandler, PeerId,
};

use super::bus::BusCore;

pub struct Init;

pub struct Configured {
    configuration: BusConfiguration,
    peer_id: PeerId,
    environment: String,
    dispatcher: MessageDispatcher,
}

pub struct TransportAttached<T: Transport> {
    configuration: BusConfiguration,
    peer_id: PeerId,
    environment: String,
    dispatcher: MessageDispatcher,
    transport: T,
}

/// Step by step construction of a [`Bus`].
///
/// The builder is configured with a peer id, an environment and a [`BusConfiguration`],
/// registers handlers and pipes, gets a [`Transport`] attached and finally creates the bus
pub struct BusBuilder<Step = Init> {
    step: Step,
}

impl Default for BusBuilder<Init> {
    fn default() -> Self {
        Self::new()
    }
}

impl BusBuilder<Init> {
    pub fn new() -> Self {
        Self { step: Init }
    }

    /// Configure with defaults and the given directory endpoints
    pub fn configure_default<P, DirectoryEndpoint, Endpoint, Env>(
        self,
        peer_id: P,
        environment: Env,
        directory_endpoints: DirectoryEndpoint,
    ) -> BusBuilder<Configured>
    where
        P: Into<PeerId>,
        DirectoryEndpoint: IntoIterator<Item = Endpoint>,
        Endpoint: AsRef<str>,
        Env: Into<String>,
    {
        let configuration = BusConfiguration::default()
            .with_directory_endpoints(
                directory_endpoints
                    .into_iter()
                    .map(|e| e.as_ref().to_string()),
            )
            .with_random_directory(false);

        self.configure(peer_id, environment, configuration)
    }

    /// Configure from a [`ConfigurationProvider`]
    pub fn configure_with<P, Provider, Env>(
        self,
        peer_id: P,
        environment: Env,
        provider: &mut Provider,
    ) -> bus::Result<BusBuilder<Configured>>
    where
        P: Into<PeerId>,
        Provider: ConfigurationProvider<Configuration = BusConfiguration>,
        Env: Into<String>,
    {
        let configuration = provider
            .configure()
            .map_err(|e| bus::Error::Configuration(Box::new(e)))?;
        Ok(self.configure(peer_id, environment, configuration))
    }

    pub fn configure<P, Env>(
        self,
        peer_id: P,
        environment: Env,
        configuration: BusConfiguration,
    ) -> BusBuilder<Configured>
    where
        P: Into<PeerId>,
        Env: Into<String>,
    {
        let dispatcher = MessageDispatcher::new(configuration.message_batch_size);

        BusBuilder::<Configured> {
            step: Configured {
                configuration,
                peer_id: peer_id.into(),
                environment: environment.into(),
                dispatcher,
            },
        }
    }
}

impl BusBuilder<Configured> {
    /// Register the handlers of a [`Registry`]
    pub fn handles<H>(mut self, registry: Registry<H>) -> bus::Result<Self>
    where
        H: DispatchHandler + Send + 'static,
    {
        self.step.dispatcher.add(registry.into_invokers())?;
        Ok(self)
    }

    /// Install a pipe around every handler invocation
    pub fn with_pipe(mut self, pipe: Arc<dyn Pipe>) -> bus::Result<Self> {
        self.step.dispatcher.add_pipe(pipe)?;
        Ok(self)
    }

    /// Restrict dispatch to the handlers whose type name is accepted by `filter`
    pub fn with_handler_filter(
        mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> bus::Result<Self> {
        self.step.dispatcher.set_handler_filter(Arc::new(filter))?;
        Ok(self)
    }

    /// Attach the transport layer
    pub fn with_transport<T>(self, transport: T) -> BusBuilder<TransportAttached<T>>
    where
        T: Transport,
    {
        let step = self.step;
        BusBuilder::<TransportAttached<T>> {
            step: TransportAttached {
                configuration: step.configuration,
                peer_id: step.peer_id,
                environment: step.environment,
                dispatcher: step.dispatcher,
                transport,
            },
        }
    }
}

impl<T> BusBuilder<TransportAttached<T>>
where
    T: Transport,
{
    /// Create and configure the bus
    pub fn create(self) -> bus::Result<impl Bus> {
        let TransportAttached {
            configuration,
            peer_id,
            environment,
            dispatcher,
            transport,
        } = self.step;

        // Create the peer directory
        let directory = Arc::new(PeerDirectory::new(configuration.clone()));

        // Create and configure the bus
        let bus = BusCore::new(configuration, transport, directory, dispatcher);
        crate::Bus::configure(&bus, peer_id, environment)?;
        Ok(bus)
    }
}
