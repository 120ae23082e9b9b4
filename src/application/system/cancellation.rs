use crate::domain::errors::MlError;
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation shared by every long-running pipeline step.
///
/// Steps poll it between row-level iterations only, so a cancelled cycle
/// never stops in the middle of a write.
#[derive(Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        // send_replace never fails, even with no live receivers
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// `Err(MlError::Cancelled)` once `cancel` has been called
    pub fn check(&self) -> Result<(), MlError> {
        if self.is_cancelled() {
            Err(MlError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // An Err means the sender is gone; nobody can cancel any more.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());

        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(MlError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled() did not resolve")
            .unwrap();
    }
}
