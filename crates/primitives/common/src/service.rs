//! Cooperative cancellation for long-running node services.
//!
//! Every background worker (block download, announcement handling, block execution) receives a [ServiceContext].
//! Cancelling a context stops every service using it, and every service using a [child](ServiceContext::child) of
//! it. A child context can be cancelled on its own without affecting its parent.
//!
//! Services race their main future against [ServiceContext::cancelled] or check [ServiceContext::is_cancelled]
//! between units of work. The latter is what the block executor does: a transaction that has started always runs to
//! completion, but no new transaction starts once the context is cancelled.

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Cancellation scope of a service.
///
/// The global token is shared by every context created from the same root. The local token, when present, only
/// covers this context and the contexts derived from it with [ServiceContext::child].
#[derive(Clone, Debug, Default)]
pub struct ServiceContext {
    token_global: CancellationToken,
    token_local: Option<CancellationToken>,
}

impl ServiceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every context sharing this root.
    pub fn cancel_global(&self) {
        tracing::info!("🔌 Stopping all services");
        self.token_global.cancel();
    }

    /// Cancels this context and its children. On a root context, this is the same as [ServiceContext::cancel_global].
    pub fn cancel_local(&self) {
        self.local_token().cancel();
    }

    /// Resolves once this context is cancelled, either globally or locally.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.token_global.cancelled() => {},
            _ = self.local_token().cancelled() => {},
        }
    }

    /// Non-blocking check, meant for loops over short synchronous steps.
    pub fn is_cancelled(&self) -> bool {
        self.token_global.is_cancelled() || self.token_local.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Drives `f` to completion, or returns `None` as soon as the context is cancelled. `f` is dropped at whichever
    /// await point it was suspended on, so it must be cancellation-safe.
    pub async fn run_until_cancelled<T, F>(&self, f: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            res = f => Some(res),
            _ = self.cancelled() => None
        }
    }

    /// A context that is cancelled with this one, but whose own [ServiceContext::cancel_local] leaves this one
    /// running.
    pub fn child(&self) -> Self {
        let token_local = self.local_token().child_token();
        Self { token_local: Some(token_local), token_global: self.token_global.clone() }
    }

    fn local_token(&self) -> &CancellationToken {
        self.token_local.as_ref().unwrap_or(&self.token_global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn child_cancellation_does_not_reach_parent() {
        let parent = ServiceContext::new();
        let child = parent.child();
        let grand_child = child.child();

        child.cancel_local();

        assert!(child.is_cancelled());
        assert!(grand_child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn global_cancellation_reaches_children() {
        let parent = ServiceContext::new();
        let child = parent.child();

        child.cancel_global();

        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());
        child.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_cancelled() {
        let ctx = ServiceContext::new();
        assert_eq!(ctx.run_until_cancelled(async { 1 }).await, Some(1));

        let ctx_clone = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            ctx_clone.cancel_local();
        });
        let res = ctx.run_until_cancelled(tokio::time::sleep(Duration::from_secs(3600))).await;
        assert_eq!(res, None);
    }
}
