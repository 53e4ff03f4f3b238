use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ConductorConfig {
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

/// How long the conductor waits on a component during each phase.
///
/// Every limit is optional; an unset limit means the conductor waits
/// forever, and a stuck component stalls its batch. Setting a limit turns
/// that stall into a logged error after which the run moves on.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TimeoutConfig {
    /// Seconds to wait for a single component to finish preparing
    #[serde(default)]
    pub prepare_secs: Option<u64>,

    /// Seconds to wait for a single component to finish cleanup
    #[serde(default)]
    pub cleanup_secs: Option<u64>,

    /// Seconds to wait for leftover supervising tasks after cleanup;
    /// stragglers are aborted once it elapses
    #[serde(default)]
    pub finale_secs: Option<u64>,
}

impl TimeoutConfig {
    pub fn prepare(&self) -> Option<Duration> {
        self.prepare_secs.map(Duration::from_secs)
    }

    pub fn cleanup(&self) -> Option<Duration> {
        self.cleanup_secs.map(Duration::from_secs)
    }

    pub fn finale(&self) -> Option<Duration> {
        self.finale_secs.map(Duration::from_secs)
    }
}

impl ConductorConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("conductor.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables with CONDUCTOR_ prefix, e.g.
            // CONDUCTOR_TIMEOUT__PREPARE_SECS=30
            .add_source(Environment::with_prefix("CONDUCTOR").separator("__"))
            .build()?;

        let config: ConductorConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.prepare_secs == Some(0) {
            return Err(ConfigError::Message(
                "timeout.prepare_secs must be greater than 0 when set".to_string(),
            ));
        }

        if self.timeout.cleanup_secs == Some(0) {
            return Err(ConfigError::Message(
                "timeout.cleanup_secs must be greater than 0 when set".to_string(),
            ));
        }

        if self.timeout.finale_secs == Some(0) {
            return Err(ConfigError::Message(
                "timeout.finale_secs must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the configuration as TOML, e.g. for printing a default file
    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
