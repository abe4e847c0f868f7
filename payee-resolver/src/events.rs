//! Batch progress events
//!
//! Broadcast to any number of subscribers. Sends never block the
//! orchestrator; a lagging subscriber loses events, not the batch.

use crate::types::{BatchId, SearchStatus};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ResolutionEvent {
    BatchStarted {
        batch_id: BatchId,
        payees: usize,
    },
    /// Every payee has been looked up in the supplier cache
    CacheLookupsComplete {
        batch_id: BatchId,
        matched: usize,
        cache_available: bool,
    },
    SearchSubmitted {
        batch_id: BatchId,
        request_id: String,
        items: usize,
    },
    SearchStatusChanged {
        batch_id: BatchId,
        request_id: String,
        status: SearchStatus,
    },
    SearchDrained {
        batch_id: BatchId,
        request_id: String,
        items: usize,
    },
    /// Job passed its ceiling, or the batch was cancelled while it was pending
    SearchAbandoned {
        batch_id: BatchId,
        /// Absent when the batch stopped waiting before learning the request id
        request_id: Option<String>,
        reason: String,
    },
    BatchCompleted {
        batch_id: BatchId,
        classifications: usize,
        matched: usize,
        excluded: usize,
    },
}

impl ResolutionEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            ResolutionEvent::BatchStarted { batch_id, .. }
            | ResolutionEvent::CacheLookupsComplete { batch_id, .. }
            | ResolutionEvent::SearchSubmitted { batch_id, .. }
            | ResolutionEvent::SearchStatusChanged { batch_id, .. }
            | ResolutionEvent::SearchDrained { batch_id, .. }
            | ResolutionEvent::SearchAbandoned { batch_id, .. }
            | ResolutionEvent::BatchCompleted { batch_id, .. } => *batch_id,
        }
    }
}

/// Fan-out channel for [`ResolutionEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ResolutionEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before the oldest are dropped
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ResolutionEvent> {
        self.tx.subscribe()
    }

    /// Emit without caring whether anyone listens
    pub fn emit_lossy(&self, event: ResolutionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
