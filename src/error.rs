use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("component '{id}' is already registered")]
    DuplicateComponent { id: String },

    #[error("component '{id}' does not exist")]
    ComponentNotFound { id: String },

    #[error("cyclic dependency involving component '{id}'")]
    CyclicDependency { id: String },

    #[error("component '{id}' cannot be removed: {reason}")]
    InvalidRemoval { id: String, reason: String },

    #[error("conductor is already running")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),
}

impl ConductorError {
    pub fn duplicate<S: Into<String>>(id: S) -> Self {
        Self::DuplicateComponent { id: id.into() }
    }

    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::ComponentNotFound { id: id.into() }
    }

    pub fn invalid_removal<S: Into<String>>(id: S, reason: S) -> Self {
        Self::InvalidRemoval {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;

/// Sentinel error resolved by the context phase waits when the component's
/// cancellation token fires first. A component task ending with it is an
/// expected outcome of shutdown, not a failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("component was cancelled during shutdown")]
pub struct Cancelled;
