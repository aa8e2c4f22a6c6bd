//! The coalescing wake signal for the service loop.
//!
//! A bounded channel of capacity 1: producers (IPC ingress, interrupt
//! watchers, the shutdown handler) try to push a token and move on if one is
//! already there; the consumer drains it and re-runs. Any number of wake
//! requests arriving while the loop runs collapse into one restart.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};

/// Producer side. Cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct WakeHandle {
    tx: SyncSender<()>,
}

impl WakeHandle {
    /// Request service. A token already in flight absorbs this request.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Consumer side, owned by the service loop.
#[derive(Debug)]
pub struct WakeReceiver {
    rx: Receiver<()>,
}

impl WakeReceiver {
    /// Block until a wake token arrives. Returns false when every producer
    /// is gone.
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }

    /// Consume a pending token without blocking.
    pub fn drain(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }
}

/// Create the wake pair.
pub fn wake_channel() -> (WakeHandle, WakeReceiver) {
    let (tx, rx) = sync_channel(1);
    (WakeHandle { tx }, WakeReceiver { rx })
}
