use super::types::PipelineConfig;
use crate::error::Result;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default environment prefix (`OBSERVATORY_PRODUCTION__SENSITIVITY=3.0`)
pub const DEFAULT_ENV_PREFIX: &str = "OBSERVATORY";

/// Configuration loader with builder pattern
///
/// Sources are layered: built-in defaults, then the config file, then
/// environment variables. The merged result is validated before it is returned.
pub struct ConfigLoader {
    config_file: Option<PathBuf>,
    load_env: bool,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Load configuration from an explicit file (format inferred from extension)
    pub fn load_from_file<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        self.config_file = path.map(|p| p.as_ref().to_path_buf());
        self
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Override the environment variable prefix
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Result<PipelineConfig> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&PipelineConfig::default())?);

        if let Some(config_path) = &self.config_file {
            debug!("Loading configuration from {}", config_path.display());
            builder = builder.add_source(File::from(config_path.as_path()).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("observatory").required(false))
                .add_source(File::with_name("config/observatory").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
