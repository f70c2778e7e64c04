//! In-process controller provider
//!
//! [`LoopbackProvider`] answers the full service interface from tables the
//! caller fills in, records every call it receives and can push events to its
//! registered listeners. [`LoopbackRegistry`] hands it out through the
//! [`ServiceRegistry`] seam, either directly or published on a
//! [`ProcessHost`] so that every call crosses the wire format.
//!
//! Used by `mogalink-probe` and the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::controller::{ConnectionSink, ControllerError, ProviderInfo, ServiceRegistry};
use crate::event::{Axis, ControllerEvent, KeyAction, KeyCode, StateKind};
use crate::transport::{
    as_listener, as_monitor, Binder, ChannelError, ControllerService, ProcessHost,
    RemoteListener, RemoteMonitor, ServiceBinder, ServiceOp,
};

pub const PIVOT_PACKAGE: &str = "com.bda.pivot.mogapgp";
pub const PIVOT_SERVICE: &str = "com.bda.pivot.mogapgp.ControllerService";

/// One call as the provider received it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub op: ServiceOp,
    pub args: Vec<i32>,
}

struct Registration<T: ?Sized> {
    id: usize,
    target: Arc<T>,
    activity_event: i32,
}

#[derive(Default)]
struct ProviderState {
    listeners: Vec<Registration<dyn RemoteListener>>,
    monitors: Vec<Registration<dyn RemoteMonitor>>,
    keys: HashMap<(i32, i32), i32>,
    axes: HashMap<(i32, i32), f32>,
    states: HashMap<(i32, i32), i32>,
    info: HashMap<i32, i32>,
    calls: Vec<RecordedCall>,
    delays: HashMap<ServiceOp, Duration>,
}

fn upsert<T: ?Sized>(list: &mut Vec<Registration<T>>, id: usize, target: Arc<T>, flag: i32) {
    match list.iter_mut().find(|r| r.id == id) {
        Some(existing) => existing.activity_event = flag,
        None => list.push(Registration {
            id,
            target,
            activity_event: flag,
        }),
    }
}

pub struct LoopbackProvider {
    legacy: bool,
    allowing: AtomicBool,
    state: Mutex<ProviderState>,
}

impl Default for LoopbackProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackProvider {
    pub fn new() -> Self {
        Self {
            legacy: false,
            allowing: AtomicBool::new(true),
            state: Mutex::new(ProviderState::default()),
        }
    }

    /// A provider that only implements the original call set
    pub fn legacy() -> Self {
        Self {
            legacy: true,
            ..Self::new()
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, op: ServiceOp, args: &[i32]) {
        debug!("Loopback provider received {:?} {:?}", op, args);
        let delay = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                op,
                args: args.to_vec(),
            });
            state.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }

    /// Makes every later `op` call stall for `delay` before answering
    pub fn delay_op(&self, op: ServiceOp, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    fn revised_only(&self, op: ServiceOp) -> Result<(), ChannelError> {
        if self.legacy {
            return Err(ChannelError::UnknownTransaction(op.code()));
        }
        Ok(())
    }

    pub fn set_key(&self, controller_id: i32, key: KeyCode, action: KeyAction) {
        self.lock().keys.insert((controller_id, key.0), action as i32);
    }

    pub fn set_axis(&self, controller_id: i32, axis: Axis, value: f32) {
        self.lock().axes.insert((controller_id, axis.0), value);
    }

    pub fn set_state(&self, controller_id: i32, state: StateKind, action: i32) {
        self.lock().states.insert((controller_id, state.0), action);
    }

    pub fn set_info(&self, info: i32, value: i32) {
        self.lock().info.insert(info, value);
    }

    /// Every call received so far, oldest first
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, op: ServiceOp) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn monitor_count(&self) -> usize {
        self.lock().monitors.len()
    }

    /// Activity flag each registered listener was last registered with
    pub fn listener_flags(&self) -> Vec<i32> {
        self.lock()
            .listeners
            .iter()
            .map(|r| r.activity_event)
            .collect()
    }

    /// Sends `event` to every registered listener and returns how many took
    /// it. Listeners whose process died are dropped.
    pub fn emit(&self, event: ControllerEvent) -> usize {
        let targets: Vec<_> = self
            .lock()
            .listeners
            .iter()
            .map(|r| (r.id, r.target.clone()))
            .collect();

        let mut delivered = 0;
        for (id, listener) in targets {
            let result = match &event {
                ControllerEvent::Key(e) => listener.on_key_event(*e),
                ControllerEvent::Motion(e) => listener.on_motion_event(e.clone()),
                ControllerEvent::State(e) => listener.on_state_event(*e),
            };
            match result {
                Ok(()) => delivered += 1,
                Err(ChannelError::RemoteDied) => {
                    warn!("Listener {:#x} died, dropping it", id);
                    self.lock().listeners.retain(|r| r.id != id);
                }
                Err(e) => warn!("Delivering {} failed: {}", event, e),
            }
        }
        delivered
    }

    pub fn emit_log(&self, controller_id: i32, priority: i32, message: &str) -> usize {
        let targets: Vec<_> = self
            .lock()
            .monitors
            .iter()
            .map(|r| r.target.clone())
            .collect();

        targets
            .into_iter()
            .filter(|monitor| {
                monitor
                    .on_log(controller_id, priority, message.to_string())
                    .map_err(|e| warn!("Delivering log line failed: {}", e))
                    .is_ok()
            })
            .count()
    }
}

impl ControllerService for LoopbackProvider {
    fn register_listener(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.record(ServiceOp::RegisterListener, &[activity_event]);
        let id = listener.object_id();
        upsert(&mut self.lock().listeners, id, as_listener(listener), activity_event);
        Ok(())
    }

    fn unregister_listener(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.record(ServiceOp::UnregisterListener, &[activity_event]);
        let id = listener.object_id();
        self.lock().listeners.retain(|r| r.id != id);
        Ok(())
    }

    fn register_listener2(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.revised_only(ServiceOp::RegisterListener2)?;
        self.record(ServiceOp::RegisterListener2, &[activity_event]);
        let id = listener.object_id();
        upsert(&mut self.lock().listeners, id, as_listener(listener), activity_event);
        Ok(())
    }

    fn unregister_listener2(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.revised_only(ServiceOp::UnregisterListener2)?;
        self.record(ServiceOp::UnregisterListener2, &[activity_event]);
        let id = listener.object_id();
        self.lock().listeners.retain(|r| r.id != id);
        Ok(())
    }

    fn register_monitor(
        &self,
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.record(ServiceOp::RegisterMonitor, &[activity_event]);
        let id = monitor.object_id();
        upsert(&mut self.lock().monitors, id, as_monitor(monitor), activity_event);
        Ok(())
    }

    fn unregister_monitor(
        &self,
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.record(ServiceOp::UnregisterMonitor, &[activity_event]);
        let id = monitor.object_id();
        self.lock().monitors.retain(|r| r.id != id);
        Ok(())
    }

    fn get_info(&self, info: i32) -> Result<i32, ChannelError> {
        self.record(ServiceOp::GetInfo, &[info]);
        Ok(self.lock().info.get(&info).copied().unwrap_or(0))
    }

    fn get_key_code(&self, controller_id: i32, key_code: i32) -> Result<i32, ChannelError> {
        self.record(ServiceOp::GetKeyCode, &[controller_id, key_code]);
        let state = self.lock();
        Ok(state
            .keys
            .get(&(controller_id, key_code))
            .copied()
            .unwrap_or(KeyAction::Up as i32))
    }

    fn get_key_code2(&self, controller_id: i32, key_code: i32) -> Result<i32, ChannelError> {
        self.revised_only(ServiceOp::GetKeyCode2)?;
        self.record(ServiceOp::GetKeyCode2, &[controller_id, key_code]);
        let state = self.lock();
        Ok(state
            .keys
            .get(&(controller_id, key_code))
            .copied()
            .unwrap_or(KeyAction::Up as i32))
    }

    fn get_axis_value(&self, controller_id: i32, axis: i32) -> Result<f32, ChannelError> {
        self.record(ServiceOp::GetAxisValue, &[controller_id, axis]);
        Ok(self
            .lock()
            .axes
            .get(&(controller_id, axis))
            .copied()
            .unwrap_or(0.0))
    }

    fn get_state(&self, controller_id: i32, state: i32) -> Result<i32, ChannelError> {
        self.record(ServiceOp::GetState, &[controller_id, state]);
        Ok(self
            .lock()
            .states
            .get(&(controller_id, state))
            .copied()
            .unwrap_or(0))
    }

    fn send_message(&self, message: i32, value: i32) -> Result<(), ChannelError> {
        self.record(ServiceOp::SendMessage, &[message, value]);
        Ok(())
    }

    fn allow_new_connections(&self) -> Result<(), ChannelError> {
        self.record(ServiceOp::AllowNewConnections, &[]);
        self.allowing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disallow_new_connections(&self) -> Result<(), ChannelError> {
        self.record(ServiceOp::DisallowNewConnections, &[]);
        self.allowing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_allowing_new_connections(&self) -> Result<bool, ChannelError> {
        self.record(ServiceOp::IsAllowingNewConnections, &[]);
        Ok(self.allowing.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
struct RegistryCounters {
    queries: AtomicUsize,
    binds: AtomicUsize,
    unbinds: AtomicUsize,
}

struct RegistryState {
    providers: Mutex<Vec<ProviderInfo>>,
    binder: Arc<dyn Binder>,
    auto_connect: AtomicBool,
    bind_error: Mutex<Option<String>>,
    sink: Mutex<Option<ConnectionSink>>,
    counters: RegistryCounters,
}

/// Registry offering a single loopback provider
#[derive(Clone)]
pub struct LoopbackRegistry {
    inner: Arc<RegistryState>,
}

impl LoopbackRegistry {
    /// Hands out `binder` for every bind, without a host in between
    pub fn with_binder(binder: Arc<dyn Binder>) -> Self {
        Self {
            inner: Arc::new(RegistryState {
                providers: Mutex::new(vec![ProviderInfo::new(PIVOT_PACKAGE, PIVOT_SERVICE)]),
                binder,
                auto_connect: AtomicBool::new(true),
                bind_error: Mutex::new(None),
                sink: Mutex::new(None),
                counters: RegistryCounters::default(),
            }),
        }
    }

    pub fn direct(provider: Arc<LoopbackProvider>) -> Self {
        Self::with_binder(ServiceBinder::new(provider).into_binder())
    }

    /// Publishes `provider` on `host`; calls are marshaled and time-bounded
    pub fn hosted(provider: Arc<LoopbackProvider>, host: &ProcessHost) -> Self {
        Self::with_binder(host.publish(ServiceBinder::new(provider).into_binder()))
    }

    pub fn set_providers(&self, providers: Vec<ProviderInfo>) {
        *lock(&self.inner.providers) = providers;
    }

    /// When off, binds stay pending until [`LoopbackRegistry::complete_bind`]
    pub fn set_auto_connect(&self, auto_connect: bool) {
        self.inner.auto_connect.store(auto_connect, Ordering::SeqCst);
    }

    /// Makes the next binds fail with `reason`
    pub fn fail_binds(&self, reason: Option<&str>) {
        *lock(&self.inner.bind_error) = reason.map(str::to_string);
    }

    /// Reports the pending bind as connected. Returns false if there is no
    /// bind or the client already released it.
    pub fn complete_bind(&self) -> bool {
        match lock(&self.inner.sink).as_ref() {
            Some(sink) => sink.connected(self.inner.binder.clone()),
            None => false,
        }
    }

    /// Reports the provider as gone, like a crashed provider process
    pub fn disconnect(&self) -> bool {
        match lock(&self.inner.sink).take() {
            Some(sink) => {
                info!("Loopback registry reports provider disconnected");
                sink.disconnected()
            }
            None => false,
        }
    }

    pub fn query_count(&self) -> usize {
        self.inner.counters.queries.load(Ordering::SeqCst)
    }

    pub fn bind_count(&self) -> usize {
        self.inner.counters.binds.load(Ordering::SeqCst)
    }

    pub fn unbind_count(&self) -> usize {
        self.inner.counters.unbinds.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ServiceRegistry for LoopbackRegistry {
    fn query_providers(&self, descriptor: &str) -> Vec<ProviderInfo> {
        self.inner.counters.queries.fetch_add(1, Ordering::SeqCst);
        debug!("Loopback registry queried for {}", descriptor);
        lock(&self.inner.providers).clone()
    }

    fn bind(&self, provider: &ProviderInfo, sink: ConnectionSink) -> Result<(), ControllerError> {
        if let Some(reason) = lock(&self.inner.bind_error).clone() {
            warn!("Refusing bind to {}: {}", provider, reason);
            return Err(ControllerError::BindFailed(reason));
        }

        self.inner.counters.binds.fetch_add(1, Ordering::SeqCst);
        info!("Loopback registry binding {}", provider);
        if self.inner.auto_connect.load(Ordering::SeqCst) {
            sink.connected(self.inner.binder.clone());
        }
        *lock(&self.inner.sink) = Some(sink);
        Ok(())
    }

    fn unbind(&self, provider: &ProviderInfo) {
        self.inner.counters.unbinds.fetch_add(1, Ordering::SeqCst);
        debug!("Loopback registry unbinding {}", provider);
        lock(&self.inner.sink).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{KeyEvent, MotionEvent};
    use crate::transport::ListenerBinder;

    #[derive(Default)]
    struct Count(Mutex<Vec<ControllerEvent>>);

    impl RemoteListener for Count {
        fn on_key_event(&self, event: KeyEvent) -> Result<(), ChannelError> {
            self.0.lock().unwrap().push(ControllerEvent::Key(event));
            Ok(())
        }
        fn on_motion_event(&self, event: MotionEvent) -> Result<(), ChannelError> {
            self.0.lock().unwrap().push(ControllerEvent::Motion(event));
            Ok(())
        }
        fn on_state_event(&self, event: crate::event::StateEvent) -> Result<(), ChannelError> {
            self.0.lock().unwrap().push(ControllerEvent::State(event));
            Ok(())
        }
    }

    #[test]
    fn legacy_provider_rejects_revised_calls() {
        let provider = LoopbackProvider::legacy();
        assert_eq!(
            provider.get_key_code2(1, 96),
            Err(ChannelError::UnknownTransaction(12))
        );
        assert_eq!(provider.get_key_code(1, 96), Ok(KeyAction::Up as i32));
        assert_eq!(provider.calls().len(), 1);
    }

    #[test]
    fn registration_is_keyed_by_object() {
        let provider = LoopbackProvider::new();
        let count = Arc::new(Count::default());
        let binder = ListenerBinder::new(count.clone()).into_binder();

        provider.register_listener2(binder.clone(), 1).unwrap();
        provider.register_listener2(binder.clone(), 5).unwrap();
        assert_eq!(provider.listener_flags(), vec![5]);

        let key = KeyEvent::new(3, 1, KeyCode::BUTTON_A, KeyAction::Down);
        assert_eq!(provider.emit(ControllerEvent::Key(key)), 1);
        assert_eq!(count.0.lock().unwrap().len(), 1);

        provider.unregister_listener2(binder, 6).unwrap();
        assert_eq!(provider.listener_count(), 0);
        assert_eq!(provider.emit(ControllerEvent::Motion(MotionEvent::new(4, 1))), 0);
    }

    #[test]
    fn tables_answer_queries() {
        let provider = LoopbackProvider::new();
        provider.set_axis(1, Axis::X, -0.5);
        provider.set_state(1, StateKind::CONNECTION, 1);
        provider.set_info(1, 2);

        assert_eq!(provider.get_axis_value(1, Axis::X.0), Ok(-0.5));
        assert_eq!(provider.get_axis_value(2, Axis::X.0), Ok(0.0));
        assert_eq!(provider.get_state(1, StateKind::CONNECTION.0), Ok(1));
        assert_eq!(provider.get_info(1), Ok(2));

        provider.disallow_new_connections().unwrap();
        assert_eq!(provider.is_allowing_new_connections(), Ok(false));
    }

    #[test]
    fn deferred_bind_completes_on_demand() {
        let registry = LoopbackRegistry::direct(Arc::new(LoopbackProvider::new()));
        registry.set_auto_connect(false);

        let (sink, mut rx) = ConnectionSink::channel();
        let provider = ProviderInfo::new(PIVOT_PACKAGE, PIVOT_SERVICE);
        registry.bind(&provider, sink).unwrap();
        assert!(rx.try_recv().is_err());

        assert!(registry.complete_bind());
        assert!(matches!(rx.try_recv(), Ok(crate::controller::ConnectionEvent::Connected(_))));

        registry.unbind(&provider);
        assert!(!registry.complete_bind());
        assert_eq!(registry.bind_count(), 1);
        assert_eq!(registry.unbind_count(), 1);
    }
}
