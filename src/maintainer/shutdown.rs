//! Shutdown Signal
//!
//! Cooperative cancellation for background tasks, over a tokio watch channel.

use std::future::Future;
use tokio::sync::watch;

/// Create a connected trigger and signal
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, ShutdownSignal { receiver })
}

/// Sending half, owned by whoever stops the tasks
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Ask every task holding a signal to stop
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// A new signal connected to this trigger
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receiving half, cloned into each task
///
/// Dropping the trigger counts as a shutdown request.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested
    pub async fn recv(&self) {
        let mut receiver = self.receiver.clone();
        let _ = receiver.wait_for(|stop| *stop).await;
    }

    /// Run `future` unless shutdown is requested first.
    ///
    /// Returns `None` when shutdown won the race.
    pub async fn run_until_shutdown<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.recv() => None,
            output = future => Some(output),
        }
    }

    /// Sleep for `duration`; false when interrupted by shutdown
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        self.run_until_shutdown(tokio::time::sleep(duration))
            .await
            .is_some()
    }
}
