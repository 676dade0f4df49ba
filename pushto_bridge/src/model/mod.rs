use crate::config::ConfigError;
use pushto_core::PushToError;
use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("ConfigError: {0}")]
    ConfigError(String),
    #[error("ConnectionError: {0}")]
    ConnectionError(String),
    #[error("CommandError: {0}")]
    CommandError(String),
}

impl From<ConfigError> for BridgeError {
    fn from(e: ConfigError) -> Self {
        BridgeError::ConfigError(e.to_string())
    }
}

impl From<PushToError> for BridgeError {
    fn from(e: PushToError) -> Self {
        BridgeError::ConnectionError(e.to_string())
    }
}
