//! Controller client - binds to the provider and keeps it in sync with the
//! application
//!
//! ```text
//!            init()            Connected
//! Unbound ───────────► Binding ───────────► Bound
//!    ▲                    │                   │
//!    └────────────────────┴───────────────────┘
//!         exit() / Disconnected / RemoteDied
//! ```
//!
//! # Threading
//!
//! `Controller` is driven from a single application thread: every method
//! takes `&mut self`, and connection changes reported by the platform are
//! only applied when that thread calls [`Controller::process_connection_events`]
//! (every public method does so first). Listener callbacks are the exception;
//! they arrive on channel threads and are routed through the listener's
//! [`Dispatcher`].
//!
//! Every call into the provider is bounded by `call_timeout_ms` and fails
//! with [`ChannelError::Timeout`] past it. The client blocks while it waits,
//! so it must not be driven from inside an async context.
//!
//! # Failures
//!
//! Lifecycle calls (`set_listener`, `set_monitor`, `on_pause`, `on_resume`,
//! `exit`) never fail. A channel error during one of them is logged and passed
//! to the error handler, if one is installed, and the application keeps
//! running without controller input. Queries return a `Result` instead so the
//! caller picks its own default.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::error::ControllerError;
use super::event_dispatch::{
    lock_slot, ControllerListener, ControllerMonitor, Dispatcher, ListenerSlot, ListenerStub,
    ListenerTarget, MonitorStub,
};
use super::service_registry::{ConnectionEvent, ConnectionSink, ProviderInfo, ServiceRegistry};
use crate::config::ClientConfig;
use crate::event::{ActivityEvent, Axis, InfoKind, KeyCode, MessageKind, StateKind};
use crate::transport::{
    as_service, Binder, BoundedService, CallRunner, ChannelError, ControllerService,
    ListenerBinder, MonitorBinder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unbound,
    Binding,
    Bound,
}

/// Call set the bound provider understands, decided once per bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceVersion {
    /// Only the original calls
    Legacy,
    /// `registerListener2`, `unregisterListener2` and `getKeyCode2`
    Revised,
}

/// Key code understood by legacy providers for `key`
pub fn legacy_key_code(key: KeyCode) -> KeyCode {
    match key {
        KeyCode::BUTTON_X => KeyCode(98),
        KeyCode::BUTTON_Y => KeyCode(99),
        other => other,
    }
}

type ErrorHandler = Box<dyn Fn(&ControllerError) + Send>;

pub struct Controller {
    config: ClientConfig,
    registry: Box<dyn ServiceRegistry>,

    state: ConnectionState,
    provider: Option<ProviderInfo>,
    service: Option<Arc<dyn ControllerService>>,
    version: ServiceVersion,

    connection_sink: ConnectionSink,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,

    listener_slot: ListenerSlot,
    listener_binder: Arc<dyn Binder>,
    monitor_binder: Option<Arc<dyn Binder>>,

    activity_event: ActivityEvent,
    error_handler: Option<ErrorHandler>,
    call_runner: Option<Arc<CallRunner>>,
}

impl Controller {
    pub fn new<R>(config: ClientConfig, registry: R) -> Self
    where
        R: ServiceRegistry + 'static,
    {
        let listener_slot: ListenerSlot = Arc::new(Mutex::new(None));
        let stub = ListenerStub::new(listener_slot.clone(), config.controller_id);
        let listener_binder = ListenerBinder::new(Arc::new(stub)).into_binder();
        let (connection_sink, connection_events) = ConnectionSink::channel();

        debug!("Created controller client with {:?}", config);
        Self {
            config,
            registry: Box::new(registry),
            state: ConnectionState::Unbound,
            provider: None,
            service: None,
            version: ServiceVersion::Legacy,
            connection_sink,
            connection_events,
            listener_slot,
            listener_binder,
            monitor_binder: None,
            activity_event: ActivityEvent::default(),
            error_handler: None,
            call_runner: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_bound(&self) -> bool {
        self.state == ConnectionState::Bound
    }

    /// Negotiated call set, while bound
    pub fn service_version(&self) -> Option<ServiceVersion> {
        self.is_bound().then_some(self.version)
    }

    pub fn activity_event(&self) -> ActivityEvent {
        self.activity_event
    }

    pub fn provider(&self) -> Option<&ProviderInfo> {
        self.provider.as_ref()
    }

    /// Receives every error a lifecycle call swallows
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ControllerError) + Send + 'static,
    {
        self.error_handler = Some(Box::new(handler));
    }

    /// Locates the provider and asks the platform to bind it. Returns whether
    /// the service is bound when the call returns; a bind that completes later
    /// is picked up by the next call on this client.
    pub fn init(&mut self) -> Result<bool, ControllerError> {
        self.process_connection_events();
        if self.state != ConnectionState::Unbound {
            debug!("init() while {:?}, nothing to do", self.state);
            return Ok(self.is_bound());
        }

        let descriptor = self.config.service_descriptor.clone();
        let providers = self.registry.query_providers(&descriptor);
        if providers.len() > 1 {
            error!("{} providers offer {}", providers.len(), descriptor);
            return Err(ControllerError::AmbiguousProvider {
                descriptor,
                count: providers.len(),
            });
        }
        let Some(provider) = providers.into_iter().next() else {
            warn!("No provider offers {}", descriptor);
            return Err(ControllerError::NoProviderFound(descriptor));
        };

        if self.call_runner.is_none() {
            let runner = CallRunner::new()
                .map_err(|e| ControllerError::BindFailed(format!("call runner: {}", e)))?;
            self.call_runner = Some(Arc::new(runner));
        }

        info!("Binding controller service from {}", provider);
        self.registry.bind(&provider, self.connection_sink.clone())?;
        self.provider = Some(provider);
        self.state = ConnectionState::Binding;

        self.process_connection_events();
        Ok(self.is_bound())
    }

    /// Applies connection changes the platform reported since the last call
    pub fn process_connection_events(&mut self) {
        while let Ok(event) = self.connection_events.try_recv() {
            debug!("Connection event {:?}", event);
            match event {
                ConnectionEvent::Connected(binder) => self.on_service_connected(binder),
                ConnectionEvent::Disconnected => self.on_service_disconnected(),
            }
        }
    }

    /// Stops listening, unregisters from the provider and releases the binding
    pub fn exit(&mut self) {
        self.process_connection_events();
        info!("Shutting down controller client ({:?})", self.state);

        if self.is_bound() {
            self.unregister_listener();
            self.unregister_monitor();
        }
        self.release_binding();

        *lock_slot(&self.listener_slot) = None;
        self.monitor_binder = None;
    }

    /// Replaces the listener. `dispatcher` decides where its callbacks run.
    pub fn set_listener(
        &mut self,
        listener: Option<Arc<dyn ControllerListener>>,
        dispatcher: Dispatcher,
    ) {
        self.process_connection_events();
        if self.has_listener() {
            self.unregister_listener();
        }

        *lock_slot(&self.listener_slot) = listener.map(|listener| ListenerTarget {
            listener,
            dispatcher,
        });
        self.register_listener();
    }

    pub fn set_monitor(&mut self, monitor: Option<Arc<dyn ControllerMonitor>>) {
        self.process_connection_events();
        if self.monitor_binder.is_some() {
            self.unregister_monitor();
        }

        self.monitor_binder = monitor.map(|monitor| {
            MonitorBinder::new(Arc::new(MonitorStub::new(monitor))).into_binder()
        });
        self.register_monitor();
    }

    pub fn on_pause(&mut self) {
        self.update_activity_event(ActivityEvent::Pause);
    }

    pub fn on_resume(&mut self) {
        self.update_activity_event(ActivityEvent::Resume);
    }

    pub fn get_info(&mut self, info: InfoKind) -> Result<i32, ControllerError> {
        self.process_connection_events();
        self.remote("getInfo", |s| s.get_info(info.0))
    }

    /// Current action of `key` on the configured controller
    ///
    /// Revised providers answer `getKeyCode2`. If that is unavailable the
    /// legacy call is used with the legacy numbering from
    /// [`legacy_key_code`].
    pub fn get_key_code(&mut self, key: KeyCode) -> Result<i32, ControllerError> {
        self.process_connection_events();
        let id = self.config.controller_id;

        let mut revised_failed = false;
        if self.is_bound() && self.version == ServiceVersion::Revised {
            match self.remote("getKeyCode2", |s| s.get_key_code2(id, key.0)) {
                Ok(action) => return Ok(action),
                Err(e) if !self.is_bound() => return Err(e),
                Err(e) => {
                    debug!("Revised key query for {} failed ({}), trying legacy", key, e);
                    revised_failed = true;
                }
            }
        }

        let legacy = legacy_key_code(key);
        self.remote("getKeyCode", |s| s.get_key_code(id, legacy.0))
            .map_err(|e| match e {
                ControllerError::Channel(source) if revised_failed => {
                    ControllerError::VersionFallbackExhausted { key, source }
                }
                other => other,
            })
    }

    pub fn get_axis_value(&mut self, axis: Axis) -> Result<f32, ControllerError> {
        self.process_connection_events();
        let id = self.config.controller_id;
        self.remote("getAxisValue", |s| s.get_axis_value(id, axis.0))
    }

    pub fn get_state(&mut self, state: StateKind) -> Result<i32, ControllerError> {
        self.process_connection_events();
        let id = self.config.controller_id;
        self.remote("getState", |s| s.get_state(id, state.0))
    }

    pub fn allow_new_connections(&mut self) -> Result<(), ControllerError> {
        self.process_connection_events();
        self.remote("allowNewConnections", |s| s.allow_new_connections())
    }

    pub fn disallow_new_connections(&mut self) -> Result<(), ControllerError> {
        self.process_connection_events();
        self.remote("disallowNewConnections", |s| s.disallow_new_connections())
    }

    pub fn is_allowing_new_connections(&mut self) -> Result<bool, ControllerError> {
        self.process_connection_events();
        self.remote("isAllowingNewConnections", |s| {
            s.is_allowing_new_connections()
        })
    }

    fn on_service_connected(&mut self, binder: Arc<dyn Binder>) {
        if self.state != ConnectionState::Binding {
            warn!("Ignoring service connection while {:?}", self.state);
            return;
        }

        if binder.descriptor() != self.config.service_descriptor {
            let e = ControllerError::Channel(ChannelError::InterfaceMismatch {
                expected: self.config.service_descriptor.clone(),
                found: binder.descriptor().to_string(),
            });
            error!("Provider handed out the wrong interface: {}", e);
            self.report(&e);
            self.release_binding();
            return;
        }

        let service: Arc<dyn ControllerService> = match &self.call_runner {
            Some(runner) => Arc::new(BoundedService::new(
                as_service(binder),
                runner.clone(),
                self.config.call_timeout(),
            )),
            None => as_service(binder),
        };
        self.version = self.negotiate_version(service.as_ref());
        self.service = Some(service);
        self.state = ConnectionState::Bound;
        info!("Controller service bound ({:?})", self.version);

        self.register_listener();
        self.register_monitor();

        // Catch the provider up on a resume it missed while connecting
        if self.activity_event == ActivityEvent::Resume {
            self.send_activity_event(ActivityEvent::Resume);
            self.send_activity_event(ActivityEvent::ServiceConnected);
        }
    }

    fn on_service_disconnected(&mut self) {
        if self.state == ConnectionState::Unbound {
            return;
        }
        warn!("Controller service disconnected");
        self.release_binding();
    }

    fn negotiate_version(&self, service: &dyn ControllerService) -> ServiceVersion {
        if !self.config.negotiate_version {
            return ServiceVersion::Revised;
        }
        match service.get_key_code2(self.config.controller_id, KeyCode::BUTTON_A.0) {
            Ok(_) => ServiceVersion::Revised,
            Err(e) => {
                info!("Provider lacks revised calls ({}), using legacy set", e);
                ServiceVersion::Legacy
            }
        }
    }

    fn release_binding(&mut self) {
        if let Some(provider) = self.provider.take() {
            debug!("Unbinding {}", provider);
            self.registry.unbind(&provider);
        }
        self.service = None;
        self.state = ConnectionState::Unbound;

        // Anything still queued belongs to the released binding
        let (sink, events) = ConnectionSink::channel();
        self.connection_sink = sink;
        self.connection_events = events;
    }

    fn has_listener(&self) -> bool {
        lock_slot(&self.listener_slot).is_some()
    }

    fn update_activity_event(&mut self, event: ActivityEvent) {
        self.process_connection_events();
        debug!("Activity event {:?}", event);
        self.activity_event = event;

        if self.is_bound() {
            self.send_activity_event(event);
            self.register_listener();
        }
    }

    fn send_activity_event(&mut self, event: ActivityEvent) {
        self.best_effort("sendMessage", |s| {
            s.send_message(MessageKind::ACTIVITY_EVENT.0, event.code())
        });
    }

    fn register_listener(&mut self) {
        if !self.is_bound() || !self.has_listener() {
            return;
        }
        let binder = self.listener_binder.clone();
        let flag = self.activity_event.code();
        match self.version {
            ServiceVersion::Revised => {
                self.best_effort("registerListener2", |s| s.register_listener2(binder, flag))
            }
            ServiceVersion::Legacy => {
                self.best_effort("registerListener", |s| s.register_listener(binder, flag))
            }
        }
    }

    fn unregister_listener(&mut self) {
        if !self.is_bound() || !self.has_listener() {
            return;
        }
        let binder = self.listener_binder.clone();
        let flag = self.activity_event.code();
        match self.version {
            ServiceVersion::Revised => self.best_effort("unregisterListener2", |s| {
                s.unregister_listener2(binder, flag)
            }),
            ServiceVersion::Legacy => {
                self.best_effort("unregisterListener", |s| s.unregister_listener(binder, flag))
            }
        }
    }

    fn register_monitor(&mut self) {
        let Some(binder) = self.monitor_binder.clone() else {
            return;
        };
        if !self.is_bound() {
            return;
        }
        let flag = self.activity_event.code();
        self.best_effort("registerMonitor", |s| s.register_monitor(binder, flag));
    }

    fn unregister_monitor(&mut self) {
        let Some(binder) = self.monitor_binder.clone() else {
            return;
        };
        if !self.is_bound() {
            return;
        }
        let flag = self.activity_event.code();
        self.best_effort("unregisterMonitor", |s| s.unregister_monitor(binder, flag));
    }

    /// Runs one call against the bound service. A dead provider drops the
    /// client back to `Unbound`.
    fn remote<T, F>(&mut self, op: &str, call: F) -> Result<T, ControllerError>
    where
        F: FnOnce(&dyn ControllerService) -> Result<T, ChannelError>,
    {
        let service = match (&self.service, self.state) {
            (Some(service), ConnectionState::Bound) => service.clone(),
            _ => return Err(ControllerError::NotBound),
        };

        call(service.as_ref()).map_err(|e| {
            debug!("{} failed: {}", op, e);
            if e == ChannelError::RemoteDied {
                warn!("Provider died during {}", op);
                self.release_binding();
            }
            ControllerError::Channel(e)
        })
    }

    fn best_effort<F>(&mut self, op: &str, call: F)
    where
        F: FnOnce(&dyn ControllerService) -> Result<(), ChannelError>,
    {
        match self.remote(op, call) {
            Ok(()) => debug!("{} done", op),
            Err(ControllerError::NotBound) => debug!("{} skipped, not bound", op),
            Err(e) => {
                warn!("{} failed: {}", op, e);
                self.report(&e);
            }
        }
    }

    fn report(&self, e: &ControllerError) {
        if let Some(handler) = &self.error_handler {
            handler(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_remap_only_touches_x_and_y() {
        assert_eq!(legacy_key_code(KeyCode::BUTTON_X), KeyCode(98));
        assert_eq!(legacy_key_code(KeyCode::BUTTON_Y), KeyCode(99));
        assert_eq!(legacy_key_code(KeyCode::BUTTON_A), KeyCode::BUTTON_A);
        assert_eq!(legacy_key_code(KeyCode::BUTTON_B), KeyCode::BUTTON_B);
        assert_eq!(legacy_key_code(KeyCode::BUTTON_START), KeyCode::BUTTON_START);
    }
}
