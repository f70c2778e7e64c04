//! `IControllerListener` and `IControllerMonitor`: calls from the provider
//! back into the client
//!
//! Same shape as the service interface: a call enum holds the marshal table,
//! a proxy writes it, a dispatch function reads it.

use std::sync::Arc;

use tracing::error;

use super::binder::{
    enforce_interface, local_binder, read_reply_header, Binder, ChannelError, LocalInterface,
    EX_ILLEGAL_STATE, LISTENER_DESCRIPTOR, MONITOR_DESCRIPTOR,
};
use super::parcel::{Parcel, ParcelError};
use crate::event::{ControllerEvent, KeyEvent, MotionEvent, StateEvent};

/// Event sink registered with the provider
pub trait RemoteListener: Send + Sync {
    fn on_key_event(&self, event: KeyEvent) -> Result<(), ChannelError>;
    fn on_motion_event(&self, event: MotionEvent) -> Result<(), ChannelError>;
    fn on_state_event(&self, event: StateEvent) -> Result<(), ChannelError>;
}

/// Diagnostic sink registered with the provider
pub trait RemoteMonitor: Send + Sync {
    fn on_log(
        &self,
        controller_id: i32,
        priority: i32,
        message: String,
    ) -> Result<(), ChannelError>;
}

pub mod listener_op {
    pub const ON_KEY_EVENT: u32 = 1;
    pub const ON_MOTION_EVENT: u32 = 2;
    pub const ON_STATE_EVENT: u32 = 3;
}

pub mod monitor_op {
    pub const ON_LOG: u32 = 1;
}

impl ControllerEvent {
    pub fn transaction_code(&self) -> u32 {
        match self {
            ControllerEvent::Key(_) => listener_op::ON_KEY_EVENT,
            ControllerEvent::Motion(_) => listener_op::ON_MOTION_EVENT,
            ControllerEvent::State(_) => listener_op::ON_STATE_EVENT,
        }
    }

    pub fn write_args(&self, parcel: &mut Parcel) {
        match self {
            ControllerEvent::Key(e) => parcel.write_nullable(Some(e)),
            ControllerEvent::Motion(e) => parcel.write_nullable(Some(e)),
            ControllerEvent::State(e) => parcel.write_nullable(Some(e)),
        }
    }

    pub fn read_args(code: u32, parcel: &mut Parcel) -> Result<Self, ChannelError> {
        let event = match code {
            listener_op::ON_KEY_EVENT => parcel.read_nullable()?.map(ControllerEvent::Key),
            listener_op::ON_MOTION_EVENT => parcel.read_nullable()?.map(ControllerEvent::Motion),
            listener_op::ON_STATE_EVENT => parcel.read_nullable()?.map(ControllerEvent::State),
            other => return Err(ChannelError::UnknownTransaction(other)),
        };
        Ok(event.ok_or(ParcelError::NullObject("event"))?)
    }

    /// Hands the event to the matching listener method
    pub fn deliver(self, listener: &dyn RemoteListener) -> Result<(), ChannelError> {
        match self {
            ControllerEvent::Key(e) => listener.on_key_event(e),
            ControllerEvent::Motion(e) => listener.on_motion_event(e),
            ControllerEvent::State(e) => listener.on_state_event(e),
        }
    }
}

/// One monitor log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorCall {
    pub controller_id: i32,
    pub priority: i32,
    pub message: String,
}

impl MonitorCall {
    pub fn write_args(&self, parcel: &mut Parcel) {
        parcel.write_i32(self.controller_id);
        parcel.write_i32(self.priority);
        parcel.write(&self.message);
    }

    pub fn read_args(parcel: &mut Parcel) -> Result<Self, ParcelError> {
        Ok(MonitorCall {
            controller_id: parcel.read_i32()?,
            priority: parcel.read_i32()?,
            message: parcel.read()?,
        })
    }
}

fn finish_reply(result: Result<(), ChannelError>, reply: &mut Parcel) {
    match result {
        Ok(()) => reply.write_no_exception(),
        Err(e) => reply.write_exception(EX_ILLEGAL_STATE, &e.to_string()),
    }
}

pub fn dispatch_listener(
    listener: &dyn RemoteListener,
    code: u32,
    data: &mut Parcel,
    reply: &mut Parcel,
) -> Result<(), ChannelError> {
    enforce_interface(data, LISTENER_DESCRIPTOR)?;
    let event = ControllerEvent::read_args(code, data).inspect_err(|e| {
        error!("Dropping listener transaction {}: {}", code, e);
    })?;
    finish_reply(event.deliver(listener), reply);
    Ok(())
}

pub fn dispatch_monitor(
    monitor: &dyn RemoteMonitor,
    code: u32,
    data: &mut Parcel,
    reply: &mut Parcel,
) -> Result<(), ChannelError> {
    if code != monitor_op::ON_LOG {
        return Err(ChannelError::UnknownTransaction(code));
    }
    enforce_interface(data, MONITOR_DESCRIPTOR)?;
    let call = MonitorCall::read_args(data).inspect_err(|e| {
        error!("Dropping monitor transaction: {}", e);
    })?;
    finish_reply(
        monitor.on_log(call.controller_id, call.priority, call.message),
        reply,
    );
    Ok(())
}

local_binder!(
    ListenerBinder,
    RemoteListener,
    Listener,
    LISTENER_DESCRIPTOR,
    dispatch_listener
);

local_binder!(
    MonitorBinder,
    RemoteMonitor,
    Monitor,
    MONITOR_DESCRIPTOR,
    dispatch_monitor
);

fn transact(
    remote: &dyn Binder,
    descriptor: &str,
    code: u32,
    write_args: impl FnOnce(&mut Parcel),
) -> Result<(), ChannelError> {
    let mut data = Parcel::new();
    data.write_interface_token(descriptor);
    write_args(&mut data);
    let mut reply = Parcel::new();
    remote.transact(code, &mut data, &mut reply)?;
    read_reply_header(&mut reply)
}

pub struct ListenerProxy {
    remote: Arc<dyn Binder>,
}

impl ListenerProxy {
    pub fn new(remote: Arc<dyn Binder>) -> Self {
        Self { remote }
    }

    pub fn send(&self, event: ControllerEvent) -> Result<(), ChannelError> {
        transact(
            self.remote.as_ref(),
            LISTENER_DESCRIPTOR,
            event.transaction_code(),
            |data| event.write_args(data),
        )
    }
}

impl RemoteListener for ListenerProxy {
    fn on_key_event(&self, event: KeyEvent) -> Result<(), ChannelError> {
        self.send(ControllerEvent::Key(event))
    }

    fn on_motion_event(&self, event: MotionEvent) -> Result<(), ChannelError> {
        self.send(ControllerEvent::Motion(event))
    }

    fn on_state_event(&self, event: StateEvent) -> Result<(), ChannelError> {
        self.send(ControllerEvent::State(event))
    }
}

pub struct MonitorProxy {
    remote: Arc<dyn Binder>,
}

impl MonitorProxy {
    pub fn new(remote: Arc<dyn Binder>) -> Self {
        Self { remote }
    }
}

impl RemoteMonitor for MonitorProxy {
    fn on_log(
        &self,
        controller_id: i32,
        priority: i32,
        message: String,
    ) -> Result<(), ChannelError> {
        let call = MonitorCall {
            controller_id,
            priority,
            message,
        };
        transact(
            self.remote.as_ref(),
            MONITOR_DESCRIPTOR,
            monitor_op::ON_LOG,
            |data| call.write_args(data),
        )
    }
}

pub fn as_listener(binder: Arc<dyn Binder>) -> Arc<dyn RemoteListener> {
    match binder.local_interface() {
        Some(LocalInterface::Listener(listener)) => listener,
        _ => Arc::new(ListenerProxy::new(binder)),
    }
}

pub fn as_monitor(binder: Arc<dyn Binder>) -> Arc<dyn RemoteMonitor> {
    match binder.local_interface() {
        Some(LocalInterface::Monitor(monitor)) => monitor,
        _ => Arc::new(MonitorProxy::new(binder)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Axis, KeyAction, KeyCode};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ControllerEvent>>,
    }

    impl RemoteListener for Recorder {
        fn on_key_event(&self, event: KeyEvent) -> Result<(), ChannelError> {
            self.events.lock().unwrap().push(ControllerEvent::Key(event));
            Ok(())
        }

        fn on_motion_event(&self, event: MotionEvent) -> Result<(), ChannelError> {
            self.events.lock().unwrap().push(ControllerEvent::Motion(event));
            Ok(())
        }

        fn on_state_event(&self, event: StateEvent) -> Result<(), ChannelError> {
            self.events.lock().unwrap().push(ControllerEvent::State(event));
            Ok(())
        }
    }

    /// Forces marshaling by hiding the local implementation
    struct Opaque(Arc<dyn Binder>);

    impl Binder for Opaque {
        fn descriptor(&self) -> &str {
            self.0.descriptor()
        }

        fn transact(
            &self,
            code: u32,
            data: &mut Parcel,
            reply: &mut Parcel,
        ) -> Result<(), ChannelError> {
            self.0.transact(code, data, reply)
        }

        fn object_id(&self) -> usize {
            self.0.object_id()
        }
    }

    #[test]
    fn events_cross_the_listener_proxy() {
        let recorder = Arc::new(Recorder::default());
        let binder = ListenerBinder::new(recorder.clone()).into_binder();
        let proxy = as_listener(Arc::new(Opaque(binder)));

        let key = KeyEvent::new(1, 1, KeyCode::BUTTON_START, KeyAction::Down);
        let motion = MotionEvent::new(2, 1).with_axis(Axis::RZ, -1.0);
        proxy.on_key_event(key).unwrap();
        proxy.on_motion_event(motion.clone()).unwrap();

        let events = recorder.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![ControllerEvent::Key(key), ControllerEvent::Motion(motion)]
        );
    }

    #[test]
    fn local_handles_skip_marshaling() {
        let recorder: Arc<dyn RemoteListener> = Arc::new(Recorder::default());
        let binder = ListenerBinder::new(recorder.clone()).into_binder();
        let resolved = as_listener(binder);
        assert!(Arc::ptr_eq(&resolved, &recorder));
    }

    #[test]
    fn null_event_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let mut data = Parcel::new();
        data.write_interface_token(LISTENER_DESCRIPTOR);
        data.write_nullable::<KeyEvent>(None);
        let mut reply = Parcel::new();

        let result = dispatch_listener(
            recorder.as_ref(),
            listener_op::ON_KEY_EVENT,
            &mut data,
            &mut reply,
        );
        assert_eq!(
            result,
            Err(ChannelError::Malformed(ParcelError::NullObject("event")))
        );
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn wrong_interface_token() {
        let recorder = Arc::new(Recorder::default());
        let mut data = Parcel::new();
        data.write_interface_token(MONITOR_DESCRIPTOR);
        let mut reply = Parcel::new();

        let result = dispatch_listener(
            recorder.as_ref(),
            listener_op::ON_STATE_EVENT,
            &mut data,
            &mut reply,
        );
        assert!(matches!(
            result,
            Err(ChannelError::InterfaceMismatch { .. })
        ));
    }
}
