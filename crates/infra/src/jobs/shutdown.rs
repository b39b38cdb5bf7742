//! Cancellation shared by the HTTP server, the queue and its workers.

use tokio::sync::watch;

/// Owner side: trips the signal once.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

/// Observer side, cheap to clone. Dropping the [`Shutdown`] owner also counts
/// as cancellation.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_wakes_every_observer() {
        let shutdown = Shutdown::new();
        let a = shutdown.signal();
        let b = a.clone();
        assert!(!a.is_cancelled());

        let waiter = tokio::spawn(async move { b.cancelled().await });
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(a.is_cancelled());
        a.cancelled().await;
    }

    #[tokio::test]
    async fn dropping_owner_cancels() {
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();
        drop(shutdown);

        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled()).await.unwrap();
    }
}
