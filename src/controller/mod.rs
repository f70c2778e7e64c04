//! Client side of the controller service
//!
//! 1. [`service_registry`] - provider discovery and bind requests
//! 2. [`controller_client`] - connection state machine and the public API
//! 3. [`event_dispatch`] - delivery of provider callbacks to the application
//!
//! # Architecture
//!
//! ```text
//! Application ──► Controller ──► ServiceRegistry ──► provider
//!      ▲                                               │
//!      └── Dispatcher ◄── ListenerStub ◄───────────────┘
//!          (inline / queue)  (controller id filter)
//! ```
//!
//! The client owns one listener object for its whole lifetime. It is
//! registered again on every bind and after every pause/resume, and the
//! application's listener can be swapped behind it without the provider
//! noticing.

pub mod controller_client;
pub mod error;
pub mod event_dispatch;
pub mod service_registry;

pub use controller_client::{legacy_key_code, ConnectionState, Controller, ServiceVersion};
pub use error::ControllerError;
pub use event_dispatch::{ControllerListener, ControllerMonitor, DispatchQueue, Dispatcher, Task};
pub use service_registry::{ConnectionEvent, ConnectionSink, ProviderInfo, ServiceRegistry};
