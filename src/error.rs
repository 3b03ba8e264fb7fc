use crate::gateway::GatewayError;
use thiserror::Error;

/// VantageEdge application error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },

    #[error("Server error: {0}")]
    Server(String),
}

impl Error {
    pub fn invalid_setting(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
