//! Provider discovery and binding
//!
//! Finding and starting the provider process belongs to the platform. The
//! client only needs the three calls of [`ServiceRegistry`]; the outcome of a
//! bind request arrives later as a [`ConnectionEvent`] through the
//! [`ConnectionSink`] handed to [`ServiceRegistry::bind`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::error::ControllerError;
use crate::transport::Binder;

/// A provider implementing the controller service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderInfo {
    pub package: String,
    pub service: String,
}

impl ProviderInfo {
    pub fn new(package: &str, service: &str) -> Self {
        Self {
            package: package.to_string(),
            service: service.to_string(),
        }
    }
}

impl fmt::Display for ProviderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.service)
    }
}

pub enum ConnectionEvent {
    Connected(Arc<dyn Binder>),
    Disconnected,
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connected(binder) => {
                f.debug_tuple("Connected").field(&binder.descriptor()).finish()
            }
            ConnectionEvent::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Where the platform reports connection changes for one bind request
#[derive(Clone, Debug)]
pub struct ConnectionSink {
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the client has released this binding
    pub fn connected(&self, binder: Arc<dyn Binder>) -> bool {
        self.tx.send(ConnectionEvent::Connected(binder)).is_ok()
    }

    pub fn disconnected(&self) -> bool {
        self.tx.send(ConnectionEvent::Disconnected).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub trait ServiceRegistry {
    /// Providers offering `descriptor`
    fn query_providers(&self, descriptor: &str) -> Vec<ProviderInfo>;

    /// Starts and binds `provider`. Success only means the request was
    /// accepted; the connection itself is reported through `sink`.
    fn bind(&self, provider: &ProviderInfo, sink: ConnectionSink) -> Result<(), ControllerError>;

    fn unbind(&self, provider: &ProviderInfo);
}
