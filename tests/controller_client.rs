use std::sync::{Arc, Mutex};
use std::time::Duration;

use mogalink::controller::{
    ConnectionState, Controller, ControllerError, ControllerListener, ControllerMonitor,
    DispatchQueue, Dispatcher, ProviderInfo, ServiceVersion,
};
use mogalink::event::{
    ActivityEvent, Axis, ControllerEvent, InfoKind, KeyAction, KeyCode, KeyEvent, MotionEvent,
    StateEvent, StateKind,
};
use mogalink::loopback::{LoopbackProvider, LoopbackRegistry, RecordedCall};
use mogalink::transport::{
    Binder, ChannelError, ListenerBinder, ProcessHost, RemoteListener, ServiceOp,
    LISTENER_DESCRIPTOR, SERVICE_DESCRIPTOR,
};
use mogalink::ClientConfig;

#[derive(Default)]
struct Collect(Mutex<Vec<ControllerEvent>>);

impl Collect {
    fn events(&self) -> Vec<ControllerEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl ControllerListener for Collect {
    fn on_key_event(&self, event: KeyEvent) {
        self.0.lock().unwrap().push(ControllerEvent::Key(event));
    }
    fn on_motion_event(&self, event: MotionEvent) {
        self.0.lock().unwrap().push(ControllerEvent::Motion(event));
    }
    fn on_state_event(&self, event: StateEvent) {
        self.0.lock().unwrap().push(ControllerEvent::State(event));
    }
}

#[derive(Default)]
struct Logs(Mutex<Vec<(i32, i32, String)>>);

impl ControllerMonitor for Logs {
    fn on_log(&self, controller_id: i32, priority: i32, message: &str) {
        self.0
            .lock()
            .unwrap()
            .push((controller_id, priority, message.to_string()));
    }
}

fn call(op: ServiceOp, args: &[i32]) -> RecordedCall {
    RecordedCall {
        op,
        args: args.to_vec(),
    }
}

fn collect_errors(controller: &mut Controller) -> Arc<Mutex<Vec<ControllerError>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    controller.set_error_handler(move |e| sink.lock().unwrap().push(e.clone()));
    errors
}

fn direct(provider: &Arc<LoopbackProvider>) -> (Controller, LoopbackRegistry) {
    let registry = LoopbackRegistry::direct(provider.clone());
    let controller = Controller::new(ClientConfig::default(), registry.clone());
    (controller, registry)
}

#[test]
fn init_is_idempotent() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, registry) = direct(&provider);

    assert_eq!(controller.init(), Ok(true));
    assert_eq!(controller.init(), Ok(true));
    assert_eq!(registry.query_count(), 1);
    assert_eq!(registry.bind_count(), 1);
    assert_eq!(controller.service_version(), Some(ServiceVersion::Revised));
}

#[test]
fn exit_without_bind_touches_nothing() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, registry) = direct(&provider);
    controller.set_listener(Some(Arc::new(Collect::default())), Dispatcher::Inline);

    controller.exit();
    controller.exit();

    assert!(provider.calls().is_empty());
    assert_eq!(registry.unbind_count(), 0);
    assert_eq!(controller.state(), ConnectionState::Unbound);
}

#[test]
fn listener_is_registered_once_after_bind() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, _registry) = direct(&provider);

    controller.set_listener(Some(Arc::new(Collect::default())), Dispatcher::Inline);
    assert!(provider.calls().is_empty());

    controller.init().unwrap();
    assert_eq!(
        provider.calls_to(ServiceOp::RegisterListener2),
        vec![call(ServiceOp::RegisterListener2, &[ActivityEvent::Create.code()])]
    );
    assert!(provider.calls_to(ServiceOp::RegisterListener).is_empty());
    assert_eq!(provider.listener_count(), 1);
}

#[test]
fn resume_before_bind_is_replayed_on_connect() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, registry) = direct(&provider);
    registry.set_auto_connect(false);

    controller.set_listener(Some(Arc::new(Collect::default())), Dispatcher::Inline);
    controller.on_resume();
    assert_eq!(controller.init(), Ok(false));
    assert_eq!(controller.state(), ConnectionState::Binding);
    assert!(provider.calls().is_empty());

    assert!(registry.complete_bind());
    controller.process_connection_events();
    assert!(controller.is_bound());

    assert_eq!(
        provider.calls_to(ServiceOp::SendMessage),
        vec![
            call(ServiceOp::SendMessage, &[1, ActivityEvent::Resume.code()]),
            call(ServiceOp::SendMessage, &[1, ActivityEvent::ServiceConnected.code()]),
        ]
    );
    assert_eq!(provider.listener_flags(), vec![ActivityEvent::Resume.code()]);
}

#[test]
fn pause_and_resume_notify_then_reregister() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, _registry) = direct(&provider);
    controller.set_listener(Some(Arc::new(Collect::default())), Dispatcher::Inline);
    controller.init().unwrap();
    provider.clear_calls();

    controller.on_pause();
    controller.on_resume();

    let pause = ActivityEvent::Pause.code();
    let resume = ActivityEvent::Resume.code();
    assert_eq!(
        provider.calls(),
        vec![
            call(ServiceOp::SendMessage, &[1, pause]),
            call(ServiceOp::RegisterListener2, &[pause]),
            call(ServiceOp::SendMessage, &[1, resume]),
            call(ServiceOp::RegisterListener2, &[resume]),
        ]
    );
    assert_eq!(provider.listener_count(), 1);
    assert_eq!(controller.activity_event(), ActivityEvent::Resume);
}

#[test]
fn legacy_provider_gets_legacy_key_numbering() {
    let provider = Arc::new(LoopbackProvider::legacy());
    let (mut controller, _registry) = direct(&provider);
    controller.set_listener(Some(Arc::new(Collect::default())), Dispatcher::Inline);
    controller.init().unwrap();
    assert_eq!(controller.service_version(), Some(ServiceVersion::Legacy));
    assert_eq!(provider.calls_to(ServiceOp::RegisterListener).len(), 1);

    provider.set_key(1, KeyCode(98), KeyAction::Down);
    provider.clear_calls();

    assert_eq!(controller.get_key_code(KeyCode::BUTTON_X), Ok(KeyAction::Down as i32));
    assert_eq!(controller.get_key_code(KeyCode::BUTTON_Y), Ok(KeyAction::Up as i32));
    assert_eq!(controller.get_key_code(KeyCode::BUTTON_A), Ok(KeyAction::Up as i32));
    assert_eq!(
        provider.calls(),
        vec![
            call(ServiceOp::GetKeyCode, &[1, 98]),
            call(ServiceOp::GetKeyCode, &[1, 99]),
            call(ServiceOp::GetKeyCode, &[1, 96]),
        ]
    );
}

#[test]
fn unnegotiated_client_falls_back_per_call() {
    let provider = Arc::new(LoopbackProvider::legacy());
    let registry = LoopbackRegistry::direct(provider.clone());
    let config = ClientConfig {
        negotiate_version: false,
        ..ClientConfig::default()
    };
    let mut controller = Controller::new(config, registry);
    let errors = collect_errors(&mut controller);
    controller.set_listener(Some(Arc::new(Collect::default())), Dispatcher::Inline);

    controller.init().unwrap();
    assert_eq!(controller.service_version(), Some(ServiceVersion::Revised));

    // registerListener2 is unknown to this provider; the client keeps going
    assert_eq!(
        errors.lock().unwrap().as_slice(),
        &[ControllerError::Channel(ChannelError::UnknownTransaction(10))]
    );
    assert!(controller.is_bound());

    provider.clear_calls();
    assert_eq!(controller.get_key_code(KeyCode::BUTTON_Y), Ok(KeyAction::Up as i32));
    assert_eq!(provider.calls(), vec![call(ServiceOp::GetKeyCode, &[1, 99])]);
}

#[test]
fn events_for_other_controllers_are_dropped() {
    let provider = Arc::new(LoopbackProvider::new());
    let registry = LoopbackRegistry::direct(provider.clone());
    let config = ClientConfig {
        controller_id: 2,
        ..ClientConfig::default()
    };
    let mut controller = Controller::new(config, registry);
    let collect = Arc::new(Collect::default());
    controller.set_listener(Some(collect.clone()), Dispatcher::Inline);
    controller.init().unwrap();

    let key = KeyEvent::new(10, 1, KeyCode::BUTTON_A, KeyAction::Down);
    let state = StateEvent::new(11, 2, StateKind::CONNECTION, 1);
    provider.emit(ControllerEvent::Key(key));
    provider.emit(ControllerEvent::State(state));

    assert_eq!(collect.events(), vec![ControllerEvent::State(state)]);
}

#[test]
fn disconnect_drops_back_to_unbound() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, registry) = direct(&provider);
    controller.init().unwrap();

    assert!(registry.disconnect());
    assert_eq!(
        controller.get_info(InfoKind::KNOWN_DEVICE_COUNT),
        Err(ControllerError::NotBound)
    );
    assert_eq!(controller.state(), ConnectionState::Unbound);
    assert_eq!(controller.service_version(), None);

    assert_eq!(controller.init(), Ok(true));
    assert_eq!(registry.bind_count(), 2);
}

#[test]
fn queries_before_bind_are_not_bound() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, _registry) = direct(&provider);

    assert_eq!(controller.get_state(StateKind::CONNECTION), Err(ControllerError::NotBound));
    assert_eq!(controller.get_axis_value(Axis::X), Err(ControllerError::NotBound));
    assert_eq!(
        controller.is_allowing_new_connections(),
        Err(ControllerError::NotBound)
    );
    assert!(provider.calls().is_empty());
}

#[test]
fn discovery_must_find_exactly_one_provider() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, registry) = direct(&provider);

    registry.set_providers(Vec::new());
    assert_eq!(
        controller.init(),
        Err(ControllerError::NoProviderFound(SERVICE_DESCRIPTOR.to_string()))
    );

    registry.set_providers(vec![
        ProviderInfo::new("com.example.one", "Service"),
        ProviderInfo::new("com.example.two", "Service"),
    ]);
    assert_eq!(
        controller.init(),
        Err(ControllerError::AmbiguousProvider {
            descriptor: SERVICE_DESCRIPTOR.to_string(),
            count: 2,
        })
    );
    assert_eq!(registry.bind_count(), 0);
    assert_eq!(controller.state(), ConnectionState::Unbound);
}

#[test]
fn refused_bind_is_reported() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, registry) = direct(&provider);
    registry.fail_binds(Some("permission denied"));

    assert_eq!(
        controller.init(),
        Err(ControllerError::BindFailed("permission denied".to_string()))
    );
    assert_eq!(controller.state(), ConnectionState::Unbound);

    registry.fail_binds(None);
    assert_eq!(controller.init(), Ok(true));
}

#[test]
fn wrong_interface_is_released() {
    let listener = ListenerBinder::new(Arc::new(NullListener)).into_binder();
    assert_eq!(listener.descriptor(), LISTENER_DESCRIPTOR);

    let registry = LoopbackRegistry::with_binder(listener);
    let mut controller = Controller::new(ClientConfig::default(), registry.clone());
    let errors = collect_errors(&mut controller);

    assert_eq!(controller.init(), Ok(false));
    assert_eq!(controller.state(), ConnectionState::Unbound);
    assert_eq!(registry.unbind_count(), 1);
    assert!(matches!(
        errors.lock().unwrap().as_slice(),
        [ControllerError::Channel(ChannelError::InterfaceMismatch { .. })]
    ));
}

struct NullListener;

impl RemoteListener for NullListener {
    fn on_key_event(&self, _: KeyEvent) -> Result<(), ChannelError> {
        Ok(())
    }
    fn on_motion_event(&self, _: MotionEvent) -> Result<(), ChannelError> {
        Ok(())
    }
    fn on_state_event(&self, _: StateEvent) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[test]
fn exit_unregisters_and_unbinds() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, registry) = direct(&provider);
    controller.set_listener(Some(Arc::new(Collect::default())), Dispatcher::Inline);
    controller.set_monitor(Some(Arc::new(Logs::default())));
    controller.init().unwrap();
    assert_eq!(provider.monitor_count(), 1);

    controller.exit();

    assert_eq!(provider.calls_to(ServiceOp::UnregisterListener2).len(), 1);
    assert_eq!(provider.calls_to(ServiceOp::UnregisterMonitor).len(), 1);
    assert_eq!(provider.listener_count(), 0);
    assert_eq!(provider.monitor_count(), 0);
    assert_eq!(registry.unbind_count(), 1);
    assert_eq!(controller.state(), ConnectionState::Unbound);
}

#[test]
fn clearing_the_listener_unregisters_it() {
    let provider = Arc::new(LoopbackProvider::new());
    let (mut controller, _registry) = direct(&provider);
    controller.set_listener(Some(Arc::new(Collect::default())), Dispatcher::Inline);
    controller.init().unwrap();

    controller.set_listener(None, Dispatcher::Inline);
    assert_eq!(provider.listener_count(), 0);

    // Nothing to re-register on resume
    provider.clear_calls();
    controller.on_resume();
    assert_eq!(
        provider.calls(),
        vec![call(ServiceOp::SendMessage, &[1, ActivityEvent::Resume.code()])]
    );
}

#[test]
fn hosted_events_arrive_on_the_queue() {
    let host = ProcessHost::new("events", Duration::from_secs(2)).unwrap();
    let provider = Arc::new(LoopbackProvider::new());
    let registry = LoopbackRegistry::hosted(provider.clone(), &host);
    let mut controller = Controller::new(ClientConfig::default(), registry);

    let collect = Arc::new(Collect::default());
    let logs = Arc::new(Logs::default());
    let mut queue = DispatchQueue::new();
    controller.set_listener(Some(collect.clone()), queue.dispatcher());
    controller.set_monitor(Some(logs.clone()));
    assert_eq!(controller.init(), Ok(true));

    let motion = MotionEvent::new(20, 1)
        .with_axis(Axis::X, 0.5)
        .with_axis(Axis::RZ, -1.0)
        .with_precision(Axis::X, 0.125);
    assert_eq!(provider.emit(ControllerEvent::Motion(motion.clone())), 1);
    assert_eq!(provider.emit_log(1, 4, "battery low"), 1);

    assert!(collect.events().is_empty());
    assert_eq!(queue.run_pending(), 1);
    assert_eq!(collect.events(), vec![ControllerEvent::Motion(motion)]);
    assert_eq!(
        logs.0.lock().unwrap().as_slice(),
        &[(1, 4, "battery low".to_string())]
    );
}

#[test]
fn hosted_queries_are_marshaled() {
    let host = ProcessHost::new("queries", Duration::from_secs(2)).unwrap();
    let provider = Arc::new(LoopbackProvider::new());
    provider.set_axis(1, Axis::LTRIGGER, 0.3);
    provider.set_state(1, StateKind::POWER_LOW, 1);
    provider.set_info(InfoKind::ACTIVE_DEVICE_COUNT.0, 2);
    let registry = LoopbackRegistry::hosted(provider.clone(), &host);
    let mut controller = Controller::new(ClientConfig::default(), registry);
    controller.init().unwrap();

    assert_eq!(controller.get_axis_value(Axis::LTRIGGER), Ok(0.3));
    assert_eq!(controller.get_state(StateKind::POWER_LOW), Ok(1));
    assert_eq!(controller.get_info(InfoKind::ACTIVE_DEVICE_COUNT), Ok(2));

    controller.disallow_new_connections().unwrap();
    assert_eq!(controller.is_allowing_new_connections(), Ok(false));
    controller.allow_new_connections().unwrap();
    assert_eq!(controller.is_allowing_new_connections(), Ok(true));
}

#[test]
fn hosted_legacy_provider_is_detected() {
    let host = ProcessHost::new("legacy", Duration::from_secs(2)).unwrap();
    let provider = Arc::new(LoopbackProvider::legacy());
    let registry = LoopbackRegistry::hosted(provider.clone(), &host);
    let mut controller = Controller::new(ClientConfig::default(), registry);

    controller.init().unwrap();
    assert_eq!(controller.service_version(), Some(ServiceVersion::Legacy));
    assert_eq!(controller.get_key_code(KeyCode::BUTTON_X), Ok(KeyAction::Up as i32));
    assert_eq!(
        provider.calls_to(ServiceOp::GetKeyCode),
        vec![call(ServiceOp::GetKeyCode, &[1, 98])]
    );
}

#[test]
fn dead_provider_unbinds_the_client() {
    let mut host = ProcessHost::new("dying", Duration::from_secs(2)).unwrap();
    let provider = Arc::new(LoopbackProvider::new());
    let registry = LoopbackRegistry::hosted(provider.clone(), &host);
    let mut controller = Controller::new(ClientConfig::default(), registry.clone());
    controller.init().unwrap();

    host.kill();
    assert_eq!(
        controller.get_state(StateKind::CONNECTION),
        Err(ControllerError::Channel(ChannelError::RemoteDied))
    );
    assert_eq!(controller.state(), ConnectionState::Unbound);
    assert_eq!(registry.unbind_count(), 1);
    assert_eq!(
        controller.get_state(StateKind::CONNECTION),
        Err(ControllerError::NotBound)
    );

    // Lifecycle calls on a dead binding never fail
    controller.on_pause();
    controller.exit();
}

#[test]
fn key_query_on_dead_legacy_provider_reports_channel_error() {
    let mut host = ProcessHost::new("dying-legacy", Duration::from_secs(2)).unwrap();
    let provider = Arc::new(LoopbackProvider::legacy());
    let registry = LoopbackRegistry::hosted(provider.clone(), &host);
    let mut controller = Controller::new(ClientConfig::default(), registry);
    controller.init().unwrap();
    assert_eq!(controller.service_version(), Some(ServiceVersion::Legacy));

    host.kill();
    // Only the legacy call was made, so there was no fallback to exhaust
    assert_eq!(
        controller.get_key_code(KeyCode::BUTTON_B),
        Err(ControllerError::Channel(ChannelError::RemoteDied))
    );
    assert!(!controller.is_bound());
}

#[test]
fn key_query_failing_on_both_versions_exhausts_fallback() {
    let provider = Arc::new(LoopbackProvider::legacy());
    provider.delay_op(ServiceOp::GetKeyCode, Duration::from_secs(1));
    let config = ClientConfig {
        call_timeout_ms: 50,
        negotiate_version: false,
        ..ClientConfig::default()
    };
    let mut controller = Controller::new(config, LoopbackRegistry::direct(provider.clone()));
    controller.init().unwrap();
    assert_eq!(controller.service_version(), Some(ServiceVersion::Revised));

    assert_eq!(
        controller.get_key_code(KeyCode::BUTTON_B),
        Err(ControllerError::VersionFallbackExhausted {
            key: KeyCode::BUTTON_B,
            source: ChannelError::Timeout(Duration::from_millis(50)),
        })
    );
    assert_eq!(provider.calls_to(ServiceOp::GetKeyCode).len(), 1);
}

#[test]
fn slow_provider_call_times_out() {
    let provider = Arc::new(LoopbackProvider::new());
    provider.delay_op(ServiceOp::GetState, Duration::from_secs(1));
    provider.set_state(1, StateKind::CONNECTION, 1);
    let config = ClientConfig {
        call_timeout_ms: 50,
        ..ClientConfig::default()
    };
    let mut controller = Controller::new(config, LoopbackRegistry::direct(provider.clone()));
    controller.init().unwrap();

    assert_eq!(
        controller.get_state(StateKind::CONNECTION),
        Err(ControllerError::Channel(ChannelError::Timeout(
            Duration::from_millis(50)
        )))
    );
    // A slow answer is not a dead provider
    assert!(controller.is_bound());
    assert_eq!(controller.get_info(InfoKind::KNOWN_DEVICE_COUNT), Ok(0));
}

#[test]
fn failed_lifecycle_call_reaches_error_handler() {
    let mut host = ProcessHost::new("handler", Duration::from_secs(2)).unwrap();
    let provider = Arc::new(LoopbackProvider::new());
    let registry = LoopbackRegistry::hosted(provider.clone(), &host);
    let mut controller = Controller::new(ClientConfig::default(), registry);
    let errors = collect_errors(&mut controller);
    controller.init().unwrap();

    host.kill();
    controller.on_resume();

    assert_eq!(
        errors.lock().unwrap().as_slice(),
        &[ControllerError::Channel(ChannelError::RemoteDied)]
    );
    assert_eq!(controller.state(), ConnectionState::Unbound);
}
