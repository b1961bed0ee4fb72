//! Pipeline progress events.
//!
//! The sequencer publishes [`PipelineEvent`]s on a [`tokio::sync::broadcast`]
//! channel. Observers subscribe without touching the engine; with no
//! subscribers an event is simply dropped.

use serde::{Deserialize, Serialize};

use hermetica_types::StageName;

/// Events emitted while a target's pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    PipelineStarted {
        domain: String,
        step_count: usize,
    },
    PipelineCompleted {
        domain: String,
        executed: usize,
        skipped: usize,
        duration_ms: u64,
    },
    PipelineFailed {
        domain: String,
        stage: Option<StageName>,
        error: String,
    },
    StepStarted {
        stage: StageName,
        handler_type: String,
        output: String,
    },
    StepSkipped {
        stage: StageName,
        handler_type: String,
        output: String,
    },
    StepCompleted {
        stage: StageName,
        handler_type: String,
        lines_written: u64,
        malformed_lines: u64,
        dropped_records: u64,
        duration_ms: u64,
    },
    StepFailed {
        stage: StageName,
        handler_type: String,
        error: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
