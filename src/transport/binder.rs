//! Remote object handles
//!
//! A [`Binder`] is either an object living in this process or a handle to one
//! living in the provider process. Callers never need to know which: they
//! ask [`Binder::local_interface`] and only fall back to marshaling through
//! [`Binder::transact`] when no local implementation is available.

use std::sync::Arc;
use std::time::Duration;

use super::callbacks::{RemoteListener, RemoteMonitor};
use super::parcel::{Parcel, ParcelError};
use super::service::ControllerService;

pub const SERVICE_DESCRIPTOR: &str = "com.bda.controller.IControllerService";
pub const LISTENER_DESCRIPTOR: &str = "com.bda.controller.IControllerListener";
pub const MONITOR_DESCRIPTOR: &str = "com.bda.controller.IControllerMonitor";

/// Exception code written into a reply when the implementation fails
pub const EX_ILLEGAL_STATE: i32 = -5;

/// Failures of a single call over the channel
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("remote process is gone")]
    RemoteDied,

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("interface mismatch: expected {expected}, found {found}")]
    InterfaceMismatch { expected: String, found: String },

    #[error("unknown transaction code {0}")]
    UnknownTransaction(u32),

    #[error("remote exception {code}: {message}")]
    RemoteException { code: i32, message: String },

    #[error("malformed message: {0}")]
    Malformed(#[from] ParcelError),
}

/// An implementation reachable without marshaling
#[derive(Clone)]
pub enum LocalInterface {
    Service(Arc<dyn ControllerService>),
    Listener(Arc<dyn RemoteListener>),
    Monitor(Arc<dyn RemoteMonitor>),
}

pub trait Binder: Send + Sync {
    /// Interface descriptor this object answers to
    fn descriptor(&self) -> &str;

    /// Delivers one call. `data` starts with the interface token; on success
    /// `reply` holds the exception header followed by the return values.
    fn transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
    ) -> Result<(), ChannelError>;

    /// The in-process implementation, if this handle is not remote
    fn local_interface(&self) -> Option<LocalInterface> {
        None
    }

    fn is_alive(&self) -> bool {
        true
    }

    /// Identity of the underlying object, stable across re-wrapping
    fn object_id(&self) -> usize;
}

/// Checks the interface token at the front of an incoming call
pub fn enforce_interface(data: &mut Parcel, expected: &str) -> Result<(), ChannelError> {
    let found = data.read_interface_token()?;
    if found != expected {
        return Err(ChannelError::InterfaceMismatch {
            expected: expected.to_string(),
            found,
        });
    }
    Ok(())
}

/// Reads the reply header, turning a remote exception into an error
pub fn read_reply_header(reply: &mut Parcel) -> Result<(), ChannelError> {
    match reply.read_exception()? {
        None => Ok(()),
        Some((code, message)) => Err(ChannelError::RemoteException { code, message }),
    }
}

/// Declares a local binder wrapping one interface implementation. The
/// generated type answers `local_interface` directly and decodes marshaled
/// calls with the given dispatch function.
macro_rules! local_binder {
    ($name:ident, $iface:ident, $variant:ident, $descriptor:expr, $dispatch:path) => {
        #[derive(Clone)]
        pub struct $name {
            inner: std::sync::Arc<dyn $iface>,
        }

        impl $name {
            pub fn new(inner: std::sync::Arc<dyn $iface>) -> Self {
                Self { inner }
            }

            pub fn into_binder(self) -> std::sync::Arc<dyn $crate::transport::Binder> {
                std::sync::Arc::new(self)
            }
        }

        impl $crate::transport::Binder for $name {
            fn descriptor(&self) -> &str {
                $descriptor
            }

            fn transact(
                &self,
                code: u32,
                data: &mut $crate::transport::Parcel,
                reply: &mut $crate::transport::Parcel,
            ) -> Result<(), $crate::transport::ChannelError> {
                $dispatch(self.inner.as_ref(), code, data, reply)
            }

            fn local_interface(&self) -> Option<$crate::transport::LocalInterface> {
                Some($crate::transport::LocalInterface::$variant(self.inner.clone()))
            }

            fn object_id(&self) -> usize {
                std::sync::Arc::as_ptr(&self.inner) as *const () as usize
            }
        }
    };
}

pub(crate) use local_binder;
