// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted provider for driving the engine loop in tests without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::provider::{CancelToken, CompletionRequest, ModelProvider, StreamHandle};
use crate::types::StreamEvent;

/// Replays one pre-recorded event sequence per `stream()` call.
///
/// When the script runs out, further rounds get an empty sequence, which the
/// client contract turns into nothing at all; tests should script every
/// round they expect.  Requests are recorded for assertions.
pub struct MockProvider {
    script: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn new(rounds: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            script: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn stream(&self, req: CompletionRequest, _cancel: CancelToken) -> StreamHandle {
        self.requests.lock().unwrap().push(req);
        let round = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for event in round {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
