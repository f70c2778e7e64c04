//! Client for the MOGA controller service
//!
//! - [`event`] - controller events and their wire codec
//! - [`transport`] - binder-style channel to the provider
//! - [`controller`] - the [`Controller`] client
//! - [`loopback`] - in-process provider and registry
//! - [`config`] - client configuration

pub mod config;
pub mod controller;
pub mod event;
pub mod loopback;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use controller::{
    ConnectionState, Controller, ControllerError, ControllerListener, ControllerMonitor,
    DispatchQueue, Dispatcher, ServiceVersion,
};
pub use event::{
    ActivityEvent, Axis, ControllerEvent, InfoKind, KeyAction, KeyCode, KeyEvent, MotionEvent,
    StateEvent, StateKind,
};
