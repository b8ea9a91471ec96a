//! Cancellation scopes for load/refresh cycles.
//!
//! `Reload` replaces the scope; work launched under the previous token sees
//! it cancelled and its result is discarded.

use std::sync::Arc;

use tokio::sync::watch;

/// Owns the current cancellation token.
#[derive(Debug)]
pub struct CancelScope {
    current: CancelToken,
}

impl CancelScope {
    pub fn new() -> Self {
        Self {
            current: CancelToken::new(),
        }
    }

    pub fn token(&self) -> CancelToken {
        self.current.clone()
    }

    /// Cancel the current token and start a fresh scope.
    pub fn renew(&mut self) -> CancelToken {
        self.current.cancel();
        self.current = CancelToken::new();
        self.current.clone()
    }

    pub fn cancel(&self) {
        self.current.cancel();
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Whether both tokens belong to the same scope.
    pub fn same_scope(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
