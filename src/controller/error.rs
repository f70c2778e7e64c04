//! Errors surfaced by the controller client

use thiserror::Error;

use crate::event::KeyCode;
use crate::transport::ChannelError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControllerError {
    /// Discovery found no provider for the service interface
    #[error("No provider found for {0}")]
    NoProviderFound(String),

    /// Discovery found more than one provider; the client binds to exactly one
    #[error("{count} providers found for {descriptor}, expected exactly one")]
    AmbiguousProvider { descriptor: String, count: usize },

    /// The platform refused to start or bind the provider
    #[error("Bind failed: {0}")]
    BindFailed(String),

    /// The operation needs a bound service
    #[error("Controller service is not bound")]
    NotBound,

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Both the revised and the legacy key query failed
    #[error("Key lookup for {key} failed on every service version: {source}")]
    VersionFallbackExhausted {
        key: KeyCode,
        #[source]
        source: ChannelError,
    },
}
