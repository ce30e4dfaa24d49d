use futures::future::select_all;
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative stop signal shared by every task of a run
///
/// Cancelling is sticky: once set, every current and future waiter observes it.
/// A child token is also cancelled by any of its ancestors, but cancelling the
/// child leaves the ancestors untouched.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    ancestors: Vec<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            ancestors: Vec::new(),
        }
    }

    /// New token that follows this one but can be cancelled on its own
    pub fn child_token(&self) -> Self {
        let (tx, _) = watch::channel(false);
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        ancestors.push(Arc::clone(&self.tx));
        ancestors.extend(self.ancestors.iter().cloned());

        Self {
            tx: Arc::new(tx),
            ancestors,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.senders().any(|tx| *tx.borrow())
    }

    /// Resolves once this token or one of its ancestors is cancelled
    pub async fn cancelled(&self) {
        let waits = self.senders().map(|tx| {
            let mut rx = tx.subscribe();
            // Senders live in `self`, so no channel can close while we wait
            Box::pin(async move {
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            })
        });
        select_all(waits).await;
    }

    fn senders(&self) -> impl Iterator<Item = &Arc<watch::Sender<bool>>> {
        std::iter::once(&self.tx).chain(self.ancestors.iter())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
