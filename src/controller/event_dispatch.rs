//! Delivery of provider callbacks to application code
//!
//! The provider calls into [`ListenerStub`] on whatever thread the channel
//! uses. The stub drops events for other controllers and hands the rest to
//! the application's [`ControllerListener`], either inline or by posting a
//! task onto a [`DispatchQueue`] that the application drains on its own
//! thread.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{ControllerEvent, KeyEvent, MotionEvent, StateEvent};
use crate::transport::{ChannelError, RemoteListener, RemoteMonitor};

/// Application callback for controller input
pub trait ControllerListener: Send + Sync {
    fn on_key_event(&self, event: KeyEvent);
    fn on_motion_event(&self, event: MotionEvent);
    fn on_state_event(&self, event: StateEvent);
}

/// Application callback for provider diagnostics
pub trait ControllerMonitor: Send + Sync {
    fn on_log(&self, controller_id: i32, priority: i32, message: &str);
}

/// Unit of work posted to a [`DispatchQueue`]
pub type Task = Box<dyn FnOnce() + Send>;

/// Execution context for listener callbacks
#[derive(Clone, Default)]
pub enum Dispatcher {
    /// Run on the channel thread that delivered the event
    #[default]
    Inline,
    /// Post onto a [`DispatchQueue`]
    Queue(mpsc::UnboundedSender<Task>),
}

impl Dispatcher {
    pub fn run(&self, task: Task) {
        match self {
            Dispatcher::Inline => task(),
            Dispatcher::Queue(tx) => {
                if tx.send(task).is_err() {
                    warn!("Dispatch queue is closed, dropping event");
                }
            }
        }
    }
}

/// Task queue owned by the application thread
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Task>,
    rx: mpsc::UnboundedReceiver<Task>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::Queue(self.tx.clone())
    }

    /// Runs every task posted so far and returns how many ran
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Waits for the next task and runs it
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}

#[derive(Clone)]
pub(crate) struct ListenerTarget {
    pub listener: Arc<dyn ControllerListener>,
    pub dispatcher: Dispatcher,
}

/// Listener slot shared between the client and its stub
pub(crate) type ListenerSlot = Arc<Mutex<Option<ListenerTarget>>>;

pub(crate) fn lock_slot(slot: &ListenerSlot) -> std::sync::MutexGuard<'_, Option<ListenerTarget>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The client's listener object as registered with the provider
pub(crate) struct ListenerStub {
    slot: ListenerSlot,
    controller_id: i32,
}

impl ListenerStub {
    pub fn new(slot: ListenerSlot, controller_id: i32) -> Self {
        Self {
            slot,
            controller_id,
        }
    }

    fn deliver(&self, event: ControllerEvent) {
        if event.controller_id() != self.controller_id {
            debug!(
                "Ignoring event for controller {}: {}",
                event.controller_id(),
                event
            );
            return;
        }

        let Some(target) = lock_slot(&self.slot).clone() else {
            debug!("No listener set, dropping {}", event);
            return;
        };

        debug!("Dispatching {}", event);
        let listener = target.listener;
        target.dispatcher.run(Box::new(move || match event {
            ControllerEvent::Key(e) => listener.on_key_event(e),
            ControllerEvent::Motion(e) => listener.on_motion_event(e),
            ControllerEvent::State(e) => listener.on_state_event(e),
        }));
    }
}

impl RemoteListener for ListenerStub {
    fn on_key_event(&self, event: KeyEvent) -> Result<(), ChannelError> {
        self.deliver(ControllerEvent::Key(event));
        Ok(())
    }

    fn on_motion_event(&self, event: MotionEvent) -> Result<(), ChannelError> {
        self.deliver(ControllerEvent::Motion(event));
        Ok(())
    }

    fn on_state_event(&self, event: StateEvent) -> Result<(), ChannelError> {
        self.deliver(ControllerEvent::State(event));
        Ok(())
    }
}

pub(crate) struct MonitorStub {
    monitor: Arc<dyn ControllerMonitor>,
}

impl MonitorStub {
    pub fn new(monitor: Arc<dyn ControllerMonitor>) -> Self {
        Self { monitor }
    }
}

impl RemoteMonitor for MonitorStub {
    fn on_log(
        &self,
        controller_id: i32,
        priority: i32,
        message: String,
    ) -> Result<(), ChannelError> {
        self.monitor.on_log(controller_id, priority, &message);
        Ok(())
    }
}
