//! Error types shared across the classification and counter pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefineryError {
    #[error("service configuration error: {0}")]
    ServiceConfig(String),

    #[error("duplicate service id {0}")]
    DuplicateServiceId(u16),

    #[error("duplicate service name {0}")]
    DuplicateServiceName(String),

    #[error("unknown service name {0}")]
    UnknownService(String),

    #[error("invalid CIDR prefix {0}: {1}")]
    InvalidPrefix(String, #[source] ipnetwork::IpNetworkError),

    #[error("invalid domain regex {0}: {1}")]
    InvalidRegex(String, #[source] regex::Error),

    #[error("counter {0} is not registered")]
    UnknownCounter(String),

    #[error("invalid Crypto-PAn key: expected 32 bytes, got {0}")]
    InvalidAnonymizeKey(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RefineryError>;
