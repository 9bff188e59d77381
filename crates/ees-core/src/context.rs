//! Request context carried through an export
//!
//! Synchronous exports share the caller's context, so cancelling the request
//! stops their remaining attempts. Asynchronous exports are detached onto a
//! fresh `ExportContext::background()` that nothing ever cancels.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct ExportContext {
    token: CancellationToken,
}

impl ExportContext {
    /// Context with no parent: only cancelled explicitly through its own handle
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Child context, cancelled together with `self`
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
