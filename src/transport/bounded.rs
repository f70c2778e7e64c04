//! Call time limits on the client side
//!
//! [`BoundedService`] wraps whatever service handle the client was given and
//! runs each call on a [`CallRunner`] thread, giving up after the configured
//! timeout. A call that times out keeps running on the provider side; only the
//! caller stops waiting for it.
//!
//! Like [`HostedBinder`](super::HostedBinder), calls block the calling thread
//! and must not be issued from inside an async context.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, warn};

use super::binder::{Binder, ChannelError};
use super::service::ControllerService;

/// Runtime that owns the threads bounded calls run on
pub struct CallRunner {
    runtime: Option<Runtime>,
}

impl CallRunner {
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread()
            .thread_name("mogalink-call")
            .enable_time()
            .build()?;
        debug!("Started call runner");
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    fn run<T, F>(&self, timeout: Duration, call: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ChannelError> + Send + 'static,
    {
        let Some(runtime) = &self.runtime else {
            return Err(ChannelError::RemoteDied);
        };

        let work = runtime.spawn_blocking(call);
        runtime.block_on(async {
            match tokio::time::timeout(timeout, work).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    error!("Bounded call panicked: {}", e);
                    Err(ChannelError::RemoteDied)
                }
                Err(_) => {
                    warn!("Call exceeded {:?}", timeout);
                    Err(ChannelError::Timeout(timeout))
                }
            }
        })
    }
}

impl Drop for CallRunner {
    fn drop(&mut self) {
        // Timed-out calls may still be sleeping in the blocking pool
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Service handle whose calls fail with [`ChannelError::Timeout`] instead of
/// blocking past `timeout`
pub struct BoundedService {
    inner: Arc<dyn ControllerService>,
    runner: Arc<CallRunner>,
    timeout: Duration,
}

impl BoundedService {
    pub fn new(
        inner: Arc<dyn ControllerService>,
        runner: Arc<CallRunner>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner,
            runner,
            timeout,
        }
    }

    fn bounded<T, F>(&self, call: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ControllerService) -> Result<T, ChannelError> + Send + 'static,
    {
        let inner = self.inner.clone();
        self.runner.run(self.timeout, move || call(inner.as_ref()))
    }
}

impl ControllerService for BoundedService {
    fn register_listener(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.bounded(move |s| s.register_listener(listener, activity_event))
    }

    fn unregister_listener(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.bounded(move |s| s.unregister_listener(listener, activity_event))
    }

    fn register_listener2(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.bounded(move |s| s.register_listener2(listener, activity_event))
    }

    fn unregister_listener2(
        &self,
        listener: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.bounded(move |s| s.unregister_listener2(listener, activity_event))
    }

    fn register_monitor(
        &self,
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.bounded(move |s| s.register_monitor(monitor, activity_event))
    }

    fn unregister_monitor(
        &self,
        monitor: Arc<dyn Binder>,
        activity_event: i32,
    ) -> Result<(), ChannelError> {
        self.bounded(move |s| s.unregister_monitor(monitor, activity_event))
    }

    fn get_info(&self, info: i32) -> Result<i32, ChannelError> {
        self.bounded(move |s| s.get_info(info))
    }

    fn get_key_code(&self, controller_id: i32, key_code: i32) -> Result<i32, ChannelError> {
        self.bounded(move |s| s.get_key_code(controller_id, key_code))
    }

    fn get_key_code2(&self, controller_id: i32, key_code: i32) -> Result<i32, ChannelError> {
        self.bounded(move |s| s.get_key_code2(controller_id, key_code))
    }

    fn get_axis_value(&self, controller_id: i32, axis: i32) -> Result<f32, ChannelError> {
        self.bounded(move |s| s.get_axis_value(controller_id, axis))
    }

    fn get_state(&self, controller_id: i32, state: i32) -> Result<i32, ChannelError> {
        self.bounded(move |s| s.get_state(controller_id, state))
    }

    fn send_message(&self, message: i32, value: i32) -> Result<(), ChannelError> {
        self.bounded(move |s| s.send_message(message, value))
    }

    fn allow_new_connections(&self) -> Result<(), ChannelError> {
        self.bounded(|s| s.allow_new_connections())
    }

    fn disallow_new_connections(&self) -> Result<(), ChannelError> {
        self.bounded(|s| s.disallow_new_connections())
    }

    fn is_allowing_new_connections(&self) -> Result<bool, ChannelError> {
        self.bounded(|s| s.is_allowing_new_connections())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackProvider;
    use crate::transport::ServiceOp;

    fn bounded(provider: Arc<LoopbackProvider>, timeout: Duration) -> BoundedService {
        BoundedService::new(provider, Arc::new(CallRunner::new().unwrap()), timeout)
    }

    #[test]
    fn fast_calls_pass_through() {
        let provider = Arc::new(LoopbackProvider::new());
        provider.set_info(2, 3);
        let service = bounded(provider.clone(), Duration::from_secs(2));

        assert_eq!(service.get_info(2), Ok(3));
        assert_eq!(service.is_allowing_new_connections(), Ok(true));
        assert_eq!(provider.calls().len(), 2);
    }

    #[test]
    fn slow_call_gives_up_after_timeout() {
        let provider = Arc::new(LoopbackProvider::new());
        provider.delay_op(ServiceOp::GetAxisValue, Duration::from_millis(500));
        let timeout = Duration::from_millis(50);
        let service = bounded(provider, timeout);

        assert_eq!(service.get_axis_value(1, 0), Err(ChannelError::Timeout(timeout)));
        assert_eq!(service.get_state(1, 1), Ok(0));
    }
}
