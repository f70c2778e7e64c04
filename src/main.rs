use color_eyre::{eyre::eyre, Result};
use mogalink::controller::{
    Controller, ControllerListener, ControllerMonitor, DispatchQueue,
};
use mogalink::event::{
    state_action, Axis, ControllerEvent, InfoKind, KeyAction, KeyCode, KeyEvent, MotionEvent,
    StateEvent, StateKind,
};
use mogalink::loopback::{LoopbackProvider, LoopbackRegistry};
use mogalink::transport::ProcessHost;
use mogalink::ClientConfig;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Prints everything the provider delivers
struct PrintListener;

impl ControllerListener for PrintListener {
    fn on_key_event(&self, event: KeyEvent) {
        info!("Key: {}", event);
    }

    fn on_motion_event(&self, event: MotionEvent) {
        info!("Motion: {}", event);
    }

    fn on_state_event(&self, event: StateEvent) {
        info!("State: {}", event);
    }
}

struct PrintMonitor;

impl ControllerMonitor for PrintMonitor {
    fn on_log(&self, controller_id: i32, priority: i32, message: &str) {
        info!("Provider log [{}/{}]: {}", controller_id, priority, message);
    }
}

fn main() -> Result<()> {
    setup()?;

    let config = ClientConfig::load_or_default();
    info!("Probing with {:?}", config);
    let id = config.controller_id;

    // Provider im eigenen Host starten
    let host = ProcessHost::new("loopback", config.call_timeout())?;
    let provider = Arc::new(LoopbackProvider::new());
    provider.set_state(id, StateKind::CONNECTION, state_action::CONNECTED);
    provider.set_state(id, StateKind::CURRENT_PRODUCT_VERSION, state_action::VERSION_MOGAPRO);
    provider.set_info(InfoKind::ACTIVE_DEVICE_COUNT.0, 1);
    let registry = LoopbackRegistry::hosted(provider.clone(), &host);

    let mut controller = Controller::new(config, registry);
    controller.set_error_handler(|e| warn!("Controller reported: {}", e));

    let mut queue = DispatchQueue::new();
    controller.set_listener(Some(Arc::new(PrintListener)), queue.dispatcher());
    controller.set_monitor(Some(Arc::new(PrintMonitor)));

    controller.on_resume();
    if !controller
        .init()
        .map_err(|e| eyre!("Failed to bind controller service: {}", e))?
    {
        return Err(eyre!("Controller service did not connect"));
    }
    info!(
        "Bound to {:?} using {:?}",
        controller.provider(),
        controller.service_version()
    );

    // Skriptierte Eingaben
    provider.set_key(id, KeyCode::BUTTON_A, KeyAction::Down);
    provider.set_axis(id, Axis::X, 0.75);
    provider.emit(ControllerEvent::Key(KeyEvent::new(
        1,
        id,
        KeyCode::BUTTON_A,
        KeyAction::Down,
    )));
    provider.emit(ControllerEvent::Motion(
        MotionEvent::new(2, id)
            .with_axis(Axis::X, 0.75)
            .with_axis(Axis::Y, -0.25)
            .with_precision(Axis::X, 0.01),
    ));
    provider.emit(ControllerEvent::State(StateEvent::new(
        3,
        id,
        StateKind::POWER_LOW,
        state_action::TRUE,
    )));
    provider.emit(ControllerEvent::Key(KeyEvent::new(
        4,
        id + 1,
        KeyCode::BUTTON_B,
        KeyAction::Down,
    )));
    provider.emit_log(id, 3, "probe session running");
    info!("Dispatched {} queued events", queue.run_pending());

    report("BUTTON_A", controller.get_key_code(KeyCode::BUTTON_A));
    report("BUTTON_X", controller.get_key_code(KeyCode::BUTTON_X));
    report("AXIS_X", controller.get_axis_value(Axis::X));
    report("CONNECTION", controller.get_state(StateKind::CONNECTION));
    report("ACTIVE_DEVICES", controller.get_info(InfoKind::ACTIVE_DEVICE_COUNT));
    report("ALLOWING", controller.is_allowing_new_connections());

    controller.on_pause();
    controller.exit();
    info!(
        "Provider saw {} calls, {} listeners left",
        provider.calls().len(),
        provider.listener_count()
    );

    Ok(())
}

fn report<T: std::fmt::Debug>(what: &str, result: Result<T, mogalink::ControllerError>) {
    match result {
        Ok(value) => info!("{} = {:?}", what, value),
        Err(e) => warn!("{} unavailable: {}", what, e),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
