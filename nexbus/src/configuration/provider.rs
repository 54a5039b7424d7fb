use std::{
    marker::PhantomData,
    path::{Path, PathBuf},
};

use config::{Config, ConfigError, Environment, File};

/// Source of configuration for a bus component
pub trait ConfigurationProvider {
    type Configuration;
    type Error: std::error::Error + Send + Sync + 'static;

    fn configure(&mut self) -> Result<Self::Configuration, Self::Error>;
}

/// [`ConfigurationProvider`] loading configuration from an optional file and from
/// `NEXBUS`-prefixed environment variables
#[derive(Default)]
pub struct DefaultConfigurationProvider<T> {
    file: Option<PathBuf>,
    _phantom: PhantomData<T>,
}

impl<T> DefaultConfigurationProvider<T> {
    pub fn with_file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = Some(file.as_ref().into());
        self
    }
}

impl<T> ConfigurationProvider for DefaultConfigurationProvider<T>
where
    T: serde::de::DeserializeOwned,
{
    type Configuration = T;
    type Error = ConfigError;

    fn configure(&mut self) -> Result<Self::Configuration, Self::Error> {
        let file = self
            .file
            .clone()
            .and_then(|file| file.into_os_string().into_string().ok());

        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::with_name(&file))
        }
        let config = builder
            .add_source(
                Environment::with_prefix("NEXBUS")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()?;

        config.try_deserialize()
    }
}
