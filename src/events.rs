// Copyright 2026 Deedhound Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed events from every pipeline component.
//!
//! The bus is a `tokio::sync::broadcast` channel carrying
//! [`RetrievalEvent`] values. Any consumer — progress UI, log shipper,
//! caller-side dashboards — subscribes independently. With no subscribers,
//! events are silently dropped (zero overhead).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::Stage;

/// Every event the pipeline emits. Serialized to JSON for streaming.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RetrievalEvent {
    /// A retrieval run has started.
    RunStarted {
        run_id: String,
        address: String,
        jurisdiction: String,
    },
    /// A stage began executing.
    StageStarted { run_id: String, stage: Stage },
    /// A stage was skipped by adapter declaration.
    StageSkipped {
        run_id: String,
        stage: Stage,
        reason: String,
    },
    /// A stage finished.
    StageComplete {
        run_id: String,
        stage: Stage,
        success: bool,
        elapsed_ms: u64,
    },
    /// The pipeline adopted a spawned window/tab as its active context.
    ContextAdopted { run_id: String, url: String },
    /// A capture strategy is being attempted.
    CaptureAttempt { run_id: String, strategy: String },
    /// The run finished, successfully or not.
    RunComplete {
        run_id: String,
        success: bool,
        duration_ms: u64,
    },
}

/// Broadcast bus for [`RetrievalEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RetrievalEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event. Dropped silently when nobody is listening.
    pub fn emit(&self, event: RetrievalEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RetrievalEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
