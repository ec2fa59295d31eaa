//! Errors raised while loading or validating harness configuration

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("malformed JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A `STRAIN_*` style variable held a value that does not parse
    #[error("bad override {variable}={value}: {reason}")]
    Override {
        variable: String,
        value: String,
        reason: String,
    },

    /// A section parsed but holds values the harness cannot run with
    #[error("invalid {section} settings: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },
}

impl ConfigError {
    /// Section name for [`ConfigError::Invalid`], if that is what this is
    pub fn section(&self) -> Option<&'static str> {
        match self {
            ConfigError::Invalid { section, .. } => Some(section),
            _ => None,
        }
    }
}
