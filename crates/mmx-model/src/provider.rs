// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::types::{Message, StreamEvent, ToolSchema};

/// Receiving half of one model turn.  Emits chunk events in server send
/// order, terminated by exactly one `Done` or `Error` (an `EmptyResponse`
/// error precedes its `Done`).
pub type StreamHandle = mpsc::Receiver<StreamEvent>;

/// Request for one streamed completion round.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Start a streamed completion.  Failures surface as in-band `Error`
    /// events on the handle, never as a panic or a returned error.
    async fn stream(&self, req: CompletionRequest, cancel: CancelToken) -> StreamHandle;
}

/// Owning side of a cancellation signal.  The engine arms one per turn;
/// any holder of the paired token observes the cancel at its next await.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Clonable observer of a [`CancelHandle`].
///
/// A dropped handle counts as a cancellation: it means the owner of the turn
/// is gone and any in-flight work should stop.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is signalled (or the handle is dropped).
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_observes_cancel() {
        let handle = CancelHandle::new();
        let mut token = handle.token();
        assert!(!token.is_cancelled());
        handle.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_resolves_waiters() {
        let handle = CancelHandle::new();
        let mut token = handle.token();
        drop(handle);
        // Must not hang.
        token.cancelled().await;
    }

    #[tokio::test]
    async fn tokens_are_independent_clones() {
        let handle = CancelHandle::new();
        let a = handle.token();
        let b = a.clone();
        handle.cancel();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
