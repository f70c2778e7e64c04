//! Channel plumbing between the client and the controller provider
//!
//! ```text
//! Controller ──► ServiceProxy ──[Parcel]──► dispatch_service ──► provider
//!     ▲                                                             │
//!     └── dispatch_listener ◄──[Parcel]── ListenerProxy ◄───────────┘
//! ```
//!
//! - [`parcel`] - flat message buffer and the [`Parcelable`] codec trait
//! - [`binder`] - handles, descriptors and channel errors
//! - [`service`] - `IControllerService` call table, proxy and stub
//! - [`callbacks`] - `IControllerListener` / `IControllerMonitor`
//! - [`host`] - in-process provider host with bounded call times
//! - [`bounded`] - client-side call time limits

pub mod binder;
pub mod bounded;
pub mod callbacks;
pub mod host;
pub mod parcel;
pub mod service;

pub use binder::{
    Binder, ChannelError, LocalInterface, LISTENER_DESCRIPTOR, MONITOR_DESCRIPTOR,
    SERVICE_DESCRIPTOR,
};
pub use bounded::{BoundedService, CallRunner};
pub use callbacks::{
    as_listener, as_monitor, ListenerBinder, ListenerProxy, MonitorBinder, MonitorCall,
    MonitorProxy, RemoteListener, RemoteMonitor,
};
pub use host::{HostedBinder, ProcessHost};
pub use parcel::{Parcel, ParcelError, Parcelable};
pub use service::{
    as_service, dispatch_service, ControllerService, ServiceBinder, ServiceCall, ServiceOp,
    ServiceProxy, ServiceReply,
};
