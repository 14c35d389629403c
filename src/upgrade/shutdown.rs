//! Cooperative shutdown signal shared by the poller, the installer, and
//! in-flight downloads.

use tokio::sync::watch;

/// Sending half; triggering it stops every [`Shutdown`] listener.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: watch::Sender<bool>,
}

/// Receiving half, cheap to clone into tasks.
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

/// Create a connected handle and listener.
pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (
        ShutdownHandle {
            sender,
        },
        Shutdown {
            receiver,
        },
    )
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        // Ignore the error when every listener is already gone.
        let _ = self.sender.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Shutdown {
    /// A listener that never fires.
    pub fn never() -> Self {
        let (_, receiver) = watch::channel(false);
        Self {
            receiver,
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once shutdown has been triggered. Pends forever if the handle
    /// was dropped without triggering.
    pub async fn wait(&mut self) {
        if self.receiver.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
