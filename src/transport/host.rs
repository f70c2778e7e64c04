//! Stand-in for a provider process
//!
//! [`ProcessHost`] runs published binders on their own tokio runtime and hands
//! out [`HostedBinder`] handles to them. A hosted handle never exposes the
//! local implementation, so every call is marshaled, and every call is bounded
//! by the host's timeout. Binder objects sent into the host are re-wrapped as
//! foreign handles, which makes callbacks into the caller go through the
//! marshaling path too.
//!
//! Calls block the calling thread. They must not be issued from inside an
//! async context of any tokio runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::binder::{Binder, ChannelError};
use super::parcel::Parcel;

struct Transaction {
    code: u32,
    data: Parcel,
    reply_tx: oneshot::Sender<Result<Parcel, ChannelError>>,
}

pub struct ProcessHost {
    name: String,
    runtime: Option<Runtime>,
    alive: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl ProcessHost {
    pub fn new(name: &str, call_timeout: Duration) -> std::io::Result<Self> {
        info!(
            "Starting process host '{}' with call timeout {:?}",
            name, call_timeout
        );
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("{}-binder", name))
            .enable_time()
            .build()?;

        Ok(Self {
            name: name.to_string(),
            runtime: Some(runtime),
            alive: Arc::new(AtomicBool::new(true)),
            call_timeout,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Makes `target` reachable from outside the host
    pub fn publish(&self, target: Arc<dyn Binder>) -> Arc<dyn Binder> {
        let (tx, rx) = mpsc::unbounded_channel::<Transaction>();
        let descriptor = target.descriptor().to_string();
        let target_id = target.object_id();

        match &self.runtime {
            Some(runtime) => {
                runtime.spawn(serve(target, rx, self.call_timeout));
                debug!("Published {} on host '{}'", descriptor, self.name);
            }
            None => warn!(
                "Host '{}' is gone, {} will be unreachable",
                self.name, descriptor
            ),
        }

        Arc::new(HostedBinder {
            descriptor,
            target_id,
            tx,
            alive: self.alive.clone(),
        })
    }

    /// Simulates the provider process dying. Every later call through a
    /// handle from this host fails with [`ChannelError::RemoteDied`].
    pub fn kill(&mut self) {
        warn!("Killing process host '{}'", self.name);
        self.alive.store(false, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for ProcessHost {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn serve(
    target: Arc<dyn Binder>,
    mut rx: mpsc::UnboundedReceiver<Transaction>,
    call_timeout: Duration,
) {
    while let Some(Transaction {
        code,
        mut data,
        reply_tx,
    }) = rx.recv().await
    {
        data.map_objects(ForeignBinder::wrap);
        let target = target.clone();
        let work = tokio::task::spawn_blocking(move || {
            let mut reply = Parcel::new();
            target
                .transact(code, &mut data, &mut reply)
                .map(|_| reply)
        });

        let result = match tokio::time::timeout(call_timeout, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Transaction {} panicked in host: {}", code, e);
                Err(ChannelError::RemoteDied)
            }
            Err(_) => {
                warn!("Transaction {} exceeded {:?}", code, call_timeout);
                Err(ChannelError::Timeout(call_timeout))
            }
        };

        if reply_tx.send(result).is_err() {
            debug!("Caller went away before transaction {} replied", code);
        }
    }
    debug!("Host endpoint closed");
}

/// Handle to a binder living inside a [`ProcessHost`]
pub struct HostedBinder {
    descriptor: String,
    target_id: usize,
    tx: mpsc::UnboundedSender<Transaction>,
    alive: Arc<AtomicBool>,
}

impl Binder for HostedBinder {
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
    ) -> Result<(), ChannelError> {
        if !self.is_alive() {
            return Err(ChannelError::RemoteDied);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Transaction {
                code,
                data: std::mem::take(data),
                reply_tx,
            })
            .map_err(|_| ChannelError::RemoteDied)?;

        // The host answers every transaction, at the latest when its timeout
        // fires; a dropped sender means the host runtime is gone.
        match reply_rx.blocking_recv() {
            Ok(result) => {
                *reply = result?;
                reply.rewind();
                Ok(())
            }
            Err(_) => Err(ChannelError::RemoteDied),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn object_id(&self) -> usize {
        self.target_id
    }
}

/// A binder from outside the host, as seen from inside it
struct ForeignBinder {
    inner: Arc<dyn Binder>,
}

impl ForeignBinder {
    fn wrap(inner: Arc<dyn Binder>) -> Arc<dyn Binder> {
        if inner.local_interface().is_none() {
            return inner;
        }
        Arc::new(ForeignBinder { inner })
    }
}

impl Binder for ForeignBinder {
    fn descriptor(&self) -> &str {
        self.inner.descriptor()
    }

    fn transact(
        &self,
        code: u32,
        data: &mut Parcel,
        reply: &mut Parcel,
    ) -> Result<(), ChannelError> {
        data.rewind();
        self.inner.transact(code, data, reply)?;
        reply.rewind();
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    fn object_id(&self) -> usize {
        self.inner.object_id()
    }
}
