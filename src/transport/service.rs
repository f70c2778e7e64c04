//! `IControllerService`: the provider-side interface
//!
//! The whole marshal table lives in [`ServiceCall`]: one variant per
//! operation, with `write_args`/`read_args` as the only place argument order
//! is spelled out. [`ServiceProxy`] and [`dispatch_service`] are the two ends
//! of the channel and both go through that table.

use std::sync::Arc;

use tracing::debug;

use super::binder::{
    enforce_interface, local_binder, read_reply_header, Binder, ChannelError, LocalInterface,
    EX_ILLEGAL_STATE, SERVICE_DESCRIPTOR,
};
use super::parcel::{Parcel, ParcelError};

/// Operations offered by the controller service
pub trait ControllerService: Send + Sync {
    fn register_listener(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError>;
    fn unregister_listener(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError>;
    fn register_listener2(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError>;
    fn unregister_listener2(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError>;
    fn register_monitor(
        &self,
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError>;
    fn unregister_monitor(
        &self,
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError>;
    fn get_info(&self, info: i32) -> Result<i32, ChannelError>;
    fn get_key_code(&self, controller_id: i32, key_code: i32) -> Result<i32, ChannelError>;
    fn get_key_code2(&self, controller_id: i32, key_code: i32) -> Result<i32, ChannelError>;
    fn get_axis_value(&self, controller_id: i32, axis: i32) -> Result<f32, ChannelError>;
    fn get_state(&self, controller_id: i32, state: i32) -> Result<i32, ChannelError>;
    fn send_message(&self, message: i32, value: i32) -> Result<(), ChannelError>;
    fn allow_new_connections(&self) -> Result<(), ChannelError>;
    fn disallow_new_connections(&self) -> Result<(), ChannelError>;
    fn is_allowing_new_connections(&self) -> Result<bool, ChannelError>;
}

/// Transaction codes, fixed by the interface definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ServiceOp {
    RegisterListener = 1,
    UnregisterListener = 2,
    GetInfo = 3,
    GetKeyCode = 4,
    GetAxisValue = 5,
    GetState = 6,
    SendMessage = 7,
    RegisterMonitor = 8,
    UnregisterMonitor = 9,
    RegisterListener2 = 10,
    UnregisterListener2 = 11,
    GetKeyCode2 = 12,
    AllowNewConnections = 13,
    DisallowNewConnections = 14,
    IsAllowingNewConnections = 15,
}

impl ServiceOp {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ServiceOp {
    type Error = ChannelError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        use ServiceOp::*;
        Ok(match code {
            1 => RegisterListener,
            2 => UnregisterListener,
            3 => GetInfo,
            4 => GetKeyCode,
            5 => GetAxisValue,
            6 => GetState,
            7 => SendMessage,
            8 => RegisterMonitor,
            9 => UnregisterMonitor,
            10 => RegisterListener2,
            11 => UnregisterListener2,
            12 => GetKeyCode2,
            13 => AllowNewConnections,
            14 => DisallowNewConnections,
            15 => IsAllowingNewConnections,
            other => return Err(ChannelError::UnknownTransaction(other)),
        })
    }
}

/// One decoded service call with its arguments
#[derive(Clone)]
pub enum ServiceCall {
    RegisterListener {
        listener: Arc<dyn Binder>,
        activity_event: i32,
    },
    UnregisterListener {
        listener: Arc<dyn Binder>,
        activity_event: i32,
    },
    GetInfo { info: i32 },
    GetKeyCode {
        controller_id: i32,
        key_code: i32,
    },
    GetAxisValue {
        controller_id: i32,
        axis: i32,
    },
    GetState {
        controller_id: i32,
        state: i32,
    },
    SendMessage {
        message: i32,
        value: i32,
    },
    RegisterMonitor {
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    },
    UnregisterMonitor {
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    },
    RegisterListener2 {
        listener: Arc<dyn Binder>,
        activity_event: i32,
    },
    UnregisterListener2 {
        listener: Arc<dyn Binder>,
        activity_event: i32,
    },
    GetKeyCode2 {
        controller_id: i32,
        key_code: i32,
    },
    AllowNewConnections,
    DisallowNewConnections,
    IsAllowingNewConnections,
}

/// Return value of a service call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServiceReply {
    Unit,
    Int(i32),
    Float(f32),
    Bool(bool),
}

impl ServiceCall {
    pub fn op(&self) -> ServiceOp {
        match self {
            ServiceCall::RegisterListener { .. } => ServiceOp::RegisterListener,
            ServiceCall::UnregisterListener { .. } => ServiceOp::UnregisterListener,
            ServiceCall::GetInfo { .. } => ServiceOp::GetInfo,
            ServiceCall::GetKeyCode { .. } => ServiceOp::GetKeyCode,
            ServiceCall::GetAxisValue { .. } => ServiceOp::GetAxisValue,
            ServiceCall::GetState { .. } => ServiceOp::GetState,
            ServiceCall::SendMessage { .. } => ServiceOp::SendMessage,
            ServiceCall::RegisterMonitor { .. } => ServiceOp::RegisterMonitor,
            ServiceCall::UnregisterMonitor { .. } => ServiceOp::UnregisterMonitor,
            ServiceCall::RegisterListener2 { .. } => ServiceOp::RegisterListener2,
            ServiceCall::UnregisterListener2 { .. } => ServiceOp::UnregisterListener2,
            ServiceCall::GetKeyCode2 { .. } => ServiceOp::GetKeyCode2,
            ServiceCall::AllowNewConnections => ServiceOp::AllowNewConnections,
            ServiceCall::DisallowNewConnections => ServiceOp::DisallowNewConnections,
            ServiceCall::IsAllowingNewConnections => ServiceOp::IsAllowingNewConnections,
        }
    }

    pub fn write_args(&self, parcel: &mut Parcel) {
        match self {
            ServiceCall::RegisterListener { listener: binder, activity_event }
            | ServiceCall::UnregisterListener { listener: binder, activity_event }
            | ServiceCall::RegisterListener2 { listener: binder, activity_event }
            | ServiceCall::UnregisterListener2 { listener: binder, activity_event }
            | ServiceCall::RegisterMonitor { monitor: binder, activity_event }
            | ServiceCall::UnregisterMonitor { monitor: binder, activity_event } => {
                parcel.write_binder(binder.clone());
                parcel.write_i32(*activity_event);
            }
            ServiceCall::GetInfo { info } => parcel.write_i32(*info),
            ServiceCall::GetKeyCode { controller_id, key_code }
            | ServiceCall::GetKeyCode2 { controller_id, key_code } => {
                parcel.write_i32(*controller_id);
                parcel.write_i32(*key_code);
            }
            ServiceCall::GetAxisValue { controller_id, axis } => {
                parcel.write_i32(*controller_id);
                parcel.write_i32(*axis);
            }
            ServiceCall::GetState { controller_id, state } => {
                parcel.write_i32(*controller_id);
                parcel.write_i32(*state);
            }
            ServiceCall::SendMessage { message, value } => {
                parcel.write_i32(*message);
                parcel.write_i32(*value);
            }
            ServiceCall::AllowNewConnections
            | ServiceCall::DisallowNewConnections
            | ServiceCall::IsAllowingNewConnections => {}
        }
    }

    pub fn read_args(op: ServiceOp, parcel: &mut Parcel) -> Result<Self, ParcelError> {
        Ok(match op {
            ServiceOp::RegisterListener => ServiceCall::RegisterListener {
                listener: parcel.read_binder()?,
                activity_event: parcel.read_i32()?,
            },
            ServiceOp::UnregisterListener => ServiceCall::UnregisterListener {
                listener: parcel.read_binder()?,
                activity_event: parcel.read_i32()?,
            },
            ServiceOp::RegisterListener2 => ServiceCall::RegisterListener2 {
                listener: parcel.read_binder()?,
                activity_event: parcel.read_i32()?,
            },
            ServiceOp::UnregisterListener2 => ServiceCall::UnregisterListener2 {
                listener: parcel.read_binder()?,
                activity_event: parcel.read_i32()?,
            },
            ServiceOp::RegisterMonitor => ServiceCall::RegisterMonitor {
                monitor: parcel.read_binder()?,
                activity_event: parcel.read_i32()?,
            },
            ServiceOp::UnregisterMonitor => ServiceCall::UnregisterMonitor {
                monitor: parcel.read_binder()?,
                activity_event: parcel.read_i32()?,
            },
            ServiceOp::GetInfo => ServiceCall::GetInfo {
                info: parcel.read_i32()?,
            },
            ServiceOp::GetKeyCode => ServiceCall::GetKeyCode {
                controller_id: parcel.read_i32()?,
                key_code: parcel.read_i32()?,
            },
            ServiceOp::GetKeyCode2 => ServiceCall::GetKeyCode2 {
                controller_id: parcel.read_i32()?,
                key_code: parcel.read_i32()?,
            },
            ServiceOp::GetAxisValue => ServiceCall::GetAxisValue {
                controller_id: parcel.read_i32()?,
                axis: parcel.read_i32()?,
            },
            ServiceOp::GetState => ServiceCall::GetState {
                controller_id: parcel.read_i32()?,
                state: parcel.read_i32()?,
            },
            ServiceOp::SendMessage => ServiceCall::SendMessage {
                message: parcel.read_i32()?,
                value: parcel.read_i32()?,
            },
            ServiceOp::AllowNewConnections => ServiceCall::AllowNewConnections,
            ServiceOp::DisallowNewConnections => ServiceCall::DisallowNewConnections,
            ServiceOp::IsAllowingNewConnections => ServiceCall::IsAllowingNewConnections,
        })
    }

    /// Runs the call against an implementation
    pub fn invoke(self, service: &dyn ControllerService) -> Result<ServiceReply, ChannelError> {
        Ok(match self {
            ServiceCall::RegisterListener { listener, activity_event } => {
                service.register_listener(listener, activity_event)?;
                ServiceReply::Unit
            }
            ServiceCall::UnregisterListener { listener, activity_event } => {
                service.unregister_listener(listener, activity_event)?;
                ServiceReply::Unit
            }
            ServiceCall::RegisterListener2 { listener, activity_event } => {
                service.register_listener2(listener, activity_event)?;
                ServiceReply::Unit
            }
            ServiceCall::UnregisterListener2 { listener, activity_event } => {
                service.unregister_listener2(listener, activity_event)?;
                ServiceReply::Unit
            }
            ServiceCall::RegisterMonitor { monitor, activity_event } => {
                service.register_monitor(monitor, activity_event)?;
                ServiceReply::Unit
            }
            ServiceCall::UnregisterMonitor { monitor, activity_event } => {
                service.unregister_monitor(monitor, activity_event)?;
                ServiceReply::Unit
            }
            ServiceCall::GetInfo { info } => ServiceReply::Int(service.get_info(info)?),
            ServiceCall::GetKeyCode { controller_id, key_code } => {
                ServiceReply::Int(service.get_key_code(controller_id, key_code)?)
            }
            ServiceCall::GetKeyCode2 { controller_id, key_code } => {
                ServiceReply::Int(service.get_key_code2(controller_id, key_code)?)
            }
            ServiceCall::GetAxisValue { controller_id, axis } => {
                ServiceReply::Float(service.get_axis_value(controller_id, axis)?)
            }
            ServiceCall::GetState { controller_id, state } => {
                ServiceReply::Int(service.get_state(controller_id, state)?)
            }
            ServiceCall::SendMessage { message, value } => {
                service.send_message(message, value)?;
                ServiceReply::Unit
            }
            ServiceCall::AllowNewConnections => {
                service.allow_new_connections()?;
                ServiceReply::Unit
            }
            ServiceCall::DisallowNewConnections => {
                service.disallow_new_connections()?;
                ServiceReply::Unit
            }
            ServiceCall::IsAllowingNewConnections => {
                ServiceReply::Bool(service.is_allowing_new_connections()?)
            }
        })
    }
}

impl ServiceReply {
    pub fn write_to(&self, parcel: &mut Parcel) {
        match self {
            ServiceReply::Unit => {}
            ServiceReply::Int(v) => parcel.write_i32(*v),
            ServiceReply::Float(v) => parcel.write_f32(*v),
            ServiceReply::Bool(v) => parcel.write_bool(*v),
        }
    }

    /// Reads the return value shape that `op` is defined to produce
    pub fn read_for(op: ServiceOp, parcel: &mut Parcel) -> Result<Self, ParcelError> {
        Ok(match op {
            ServiceOp::GetInfo
            | ServiceOp::GetKeyCode
            | ServiceOp::GetKeyCode2
            | ServiceOp::GetState => ServiceReply::Int(parcel.read_i32()?),
            ServiceOp::GetAxisValue => ServiceReply::Float(parcel.read_f32()?),
            ServiceOp::IsAllowingNewConnections => ServiceReply::Bool(parcel.read_bool()?),
            _ => ServiceReply::Unit,
        })
    }

    fn int(self) -> Result<i32, ChannelError> {
        match self {
            ServiceReply::Int(v) => Ok(v),
            _ => Err(unexpected_reply()),
        }
    }

    fn float(self) -> Result<f32, ChannelError> {
        match self {
            ServiceReply::Float(v) => Ok(v),
            _ => Err(unexpected_reply()),
        }
    }

    fn boolean(self) -> Result<bool, ChannelError> {
        match self {
            ServiceReply::Bool(v) => Ok(v),
            _ => Err(unexpected_reply()),
        }
    }

    fn unit(self) -> Result<(), ChannelError> {
        match self {
            ServiceReply::Unit => Ok(()),
            _ => Err(unexpected_reply()),
        }
    }
}

fn unexpected_reply() -> ChannelError {
    ChannelError::Malformed(ParcelError::NullObject("reply value"))
}

/// Server side: decodes one transaction and writes the reply
pub fn dispatch_service(
    service: &dyn ControllerService,
    code: u32,
    data: &mut Parcel,
    reply: &mut Parcel,
) -> Result<(), ChannelError> {
    let op = ServiceOp::try_from(code)?;
    enforce_interface(data, SERVICE_DESCRIPTOR)?;
    let call = ServiceCall::read_args(op, data)?;
    debug!("Service transaction {:?}", op);

    match call.invoke(service) {
        Ok(value) => {
            reply.write_no_exception();
            value.write_to(reply);
        }
        Err(e) => reply.write_exception(EX_ILLEGAL_STATE, &e.to_string()),
    }
    Ok(())
}

local_binder!(
    ServiceBinder,
    ControllerService,
    Service,
    SERVICE_DESCRIPTOR,
    dispatch_service
);

/// Client side of the service interface for a handle in another process
pub struct ServiceProxy {
    remote: Arc<dyn Binder>,
}

impl ServiceProxy {
    pub fn new(remote: Arc<dyn Binder>) -> Self {
        Self { remote }
    }

    pub fn call(&self, call: ServiceCall) -> Result<ServiceReply, ChannelError> {
        let op = call.op();
        let mut data = Parcel::new();
        data.write_interface_token(SERVICE_DESCRIPTOR);
        call.write_args(&mut data);

        let mut reply = Parcel::new();
        self.remote.transact(op.code(), &mut data, &mut reply)?;
        read_reply_header(&mut reply)?;
        Ok(ServiceReply::read_for(op, &mut reply)?)
    }
}

impl ControllerService for ServiceProxy {
    fn register_listener(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.call(ServiceCall::RegisterListener { listener, activity_event })?.unit()
    }

    fn unregister_listener(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.call(ServiceCall::UnregisterListener { listener, activity_event })?.unit()
    }

    fn register_listener2(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.call(ServiceCall::RegisterListener2 { listener, activity_event })?.unit()
    }

    fn unregister_listener2(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.call(ServiceCall::UnregisterListener2 { listener, activity_event })?.unit()
    }

    fn register_monitor(
        &self,
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.call(ServiceCall::RegisterMonitor { monitor, activity_event })?.unit()
    }

    fn unregister_monitor(
        &self,
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.call(ServiceCall::UnregisterMonitor { monitor, activity_event })?.unit()
    }

    fn get_info(&self, info: i32) -> Result<i32, ChannelError> {
        self.call(ServiceCall::GetInfo { info })?.int()
    }

    fn get_key_code(&self, controller_id: i32, key_code: i32) -> Result<i32, ChannelError> {
        self.call(ServiceCall::GetKeyCode { controller_id, key_code })?.int()
    }

    fn get_key_code2(&self, controller_id: i32, key_code: i32) -> Result<i32, ChannelError> {
        self.call(ServiceCall::GetKeyCode2 { controller_id, key_code })?.int()
    }

    fn get_axis_value(&self, controller_id: i32, axis: i32) -> Result<f32, ChannelError> {
        self.call(ServiceCall::GetAxisValue { controller_id, axis })?.float()
    }

    fn get_state(&self, controller_id: i32, state: i32) -> Result<i32, ChannelError> {
        self.call(ServiceCall::GetState { controller_id, state })?.int()
    }

    fn send_message(&self, message: i32, value: i32) -> Result<(), ChannelError> {
        self.call(ServiceCall::SendMessage { message, value })?.unit()
    }

    fn allow_new_connections(&self) -> Result<(), ChannelError> {
        self.call(ServiceCall::AllowNewConnections)?.unit()
    }

    fn disallow_new_connections(&self) -> Result<(), ChannelError> {
        self.call(ServiceCall::DisallowNewConnections)?.unit()
    }

    fn is_allowing_new_connections(&self) -> Result<bool, ChannelError> {
        self.call(ServiceCall::IsAllowingNewConnections)?.boolean()
    }
}

/// Resolves a handle to the service interface, marshaling only when needed
pub fn as_service(binder: Arc<dyn Binder>) -> Arc<dyn ControllerService> {
    match binder.local_interface() {
        Some(LocalInterface::Service(service)) => service,
        _ => Arc::new(ServiceProxy::new(binder)),
    }
}
