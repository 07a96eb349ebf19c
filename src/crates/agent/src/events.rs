//! Typed event stream between the orchestrator and a subscribed client.
//!
//! Every record on the wire is `{"type": <kind>, "content": <payload>}`
//! followed by a newline. Emission is single-producer FIFO per stream.
//! The emitter never blocks on a slow consumer for the chatty kinds: when
//! the bounded buffer is full, `log` records are dropped first, then
//! `thought`; `decision`, `stage`, `graph_snapshot`, `control`, `result`
//! and `error` always go through.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::trace;

use infra_graph::{DecisionLogEntry, GraphState};

/// Kind tag of a stream record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Operator-visible progress line.
    Log,
    /// Model reasoning summary.
    Thought,
    /// Structured decision record.
    Decision,
    /// Stage lifecycle update.
    Stage,
    /// Full graph state snapshot.
    GraphSnapshot,
    /// Control signal for the client (does not terminate the stream).
    Control,
    /// Terminal success payload.
    Result,
    /// Terminal error message.
    Error,
}

/// Stage status carried by `stage` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage entered.
    Running,
    /// Stage finished cleanly.
    Success,
    /// Stage failed.
    Failed,
    /// Repair in progress.
    Fixing,
    /// Waiting on the model.
    Thinking,
    /// Completed with warnings.
    Warning,
}

/// One stream record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Record kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Kind-specific payload.
    pub content: Value,
}

impl AgentEvent {
    /// A `log` record.
    pub fn log(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Log,
            content: Value::String(message.into()),
        }
    }

    /// A `thought` record.
    pub fn thought(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Thought,
            content: Value::String(message.into()),
        }
    }

    /// A `decision` record from a structured log entry.
    pub fn decision(entry: &DecisionLogEntry) -> Self {
        Self {
            kind: EventKind::Decision,
            content: serde_json::to_value(entry).unwrap_or_default(),
        }
    }

    /// A `stage` record.
    pub fn stage(name: impl Into<String>, status: StageStatus) -> Self {
        Self {
            kind: EventKind::Stage,
            content: json!({ "name": name.into(), "status": status }),
        }
    }

    /// A `graph_snapshot` record.
    pub fn snapshot(graph: &GraphState) -> Self {
        Self {
            kind: EventKind::GraphSnapshot,
            content: serde_json::to_value(graph).unwrap_or_default(),
        }
    }

    /// A `control` record.
    pub fn control(action: impl Into<String>, next_phase: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Control,
            content: json!({ "action": action.into(), "next_phase": next_phase.into() }),
        }
    }

    /// A terminal `result` record.
    pub fn result(payload: Value) -> Self {
        Self {
            kind: EventKind::Result,
            content: payload,
        }
    }

    /// A terminal `error` record.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            content: Value::String(message.into()),
        }
    }

    /// Serialize to one newline-delimited wire record.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","content":"event serialization failed"}"#.to_string()
        });
        line.push('\n');
        line
    }
}

/// The receiving end of an event stream.
pub type EventReceiver = mpsc::Receiver<AgentEvent>;

/// Error returned when the stream consumer has gone away.
#[derive(Debug, thiserror::Error)]
#[error("event stream closed by consumer")]
pub struct StreamClosed;

/// How long a `thought` record may wait for buffer space before it is
/// dropped. Logs get no grace at all.
const THOUGHT_GRACE: std::time::Duration = std::time::Duration::from_millis(100);

/// Single-producer emitter over a bounded channel.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<AgentEvent>,
    dropped: Arc<AtomicU64>,
    terminated: Arc<AtomicBool>,
}

impl EventEmitter {
    /// Create an emitter and its receiver with the given buffer capacity.
    pub fn channel(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
                terminated: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// Emit one event.
    ///
    /// Under backpressure, `log` records drop immediately and `thought`
    /// records drop after a short grace wait, so logs always go first.
    /// Critical kinds wait for space. A closed channel returns
    /// [`StreamClosed`]. The first `result` or `error` terminates the
    /// stream: everything after it is swallowed, so a stream carries
    /// exactly one terminal record.
    pub async fn emit(&self, event: AgentEvent) -> Result<(), StreamClosed> {
        if self.terminated.load(Ordering::Acquire) {
            return Ok(());
        }
        if matches!(event.kind, EventKind::Result | EventKind::Error) {
            self.terminated.store(true, Ordering::Release);
        }
        match event.kind {
            EventKind::Log => match self.tx.try_send(event) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.record_drop(&event);
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(StreamClosed),
            },
            EventKind::Thought => {
                let wait = tokio::time::timeout(THOUGHT_GRACE, self.tx.send(event.clone()));
                match wait.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(StreamClosed),
                    Err(_) => {
                        self.record_drop(&event);
                        Ok(())
                    }
                }
            }
            _ => self.tx.send(event).await.map_err(|_| StreamClosed),
        }
    }

    fn record_drop(&self, event: &AgentEvent) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(kind = ?event.kind, total, "dropped event under backpressure");
    }

    /// Convenience: emit a `log` record.
    pub async fn log(&self, message: impl Into<String>) -> Result<(), StreamClosed> {
        self.emit(AgentEvent::log(message)).await
    }

    /// Convenience: emit an `error` record.
    pub async fn error(&self, message: impl Into<String>) -> Result<(), StreamClosed> {
        self.emit(AgentEvent::error(message)).await
    }

    /// Number of records discarded under backpressure so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether a terminal record has already been emitted.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Whether the consumer is still connected.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_protocol() {
        let event = AgentEvent::stage("intent", StageStatus::Running);
        let line = event.to_ndjson();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["type"], "stage");
        assert_eq!(value["content"]["name"], "intent");
        assert_eq!(value["content"]["status"], "running");
    }

    #[test]
    fn snapshot_kind_serializes_with_underscore() {
        let graph = GraphState::empty(infra_graph::GraphPhase::Intent);
        let value: Value =
            serde_json::from_str(AgentEvent::snapshot(&graph).to_ndjson().trim()).unwrap();
        assert_eq!(value["type"], "graph_snapshot");
        assert_eq!(value["content"]["graph_phase"], "intent");
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (emitter, mut rx) = EventEmitter::channel(8);
        emitter.log("one").await.unwrap();
        emitter.log("two").await.unwrap();
        emitter
            .emit(AgentEvent::result(json!({"ok": true})))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().content, "one");
        assert_eq!(rx.recv().await.unwrap().content, "two");
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Result);
    }

    #[tokio::test]
    async fn full_buffer_drops_logs_but_keeps_decisions() {
        let (emitter, mut rx) = EventEmitter::channel(1);
        emitter.log("fills the buffer").await.unwrap();
        // Buffer is now full; further logs are discarded without blocking.
        emitter.log("dropped").await.unwrap();
        assert_eq!(emitter.dropped_count(), 1);

        // A critical event waits for space instead of dropping.
        let entry = DecisionLogEntry {
            stage: "reasoned".into(),
            cycle: 0,
            timestamp: chrono::Utc::now(),
            trigger: "isolation".into(),
            affected_nodes: vec!["db".into()],
            action: "rewire".into(),
            result: "applied".into(),
        };
        let emitter2 = emitter.clone();
        let send = tokio::spawn(async move { emitter2.emit(AgentEvent::decision(&entry)).await });

        assert_eq!(rx.recv().await.unwrap().content, "fills the buffer");
        let decision = rx.recv().await.unwrap();
        assert_eq!(decision.kind, EventKind::Decision);
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn only_one_terminal_record_goes_through() {
        let (emitter, mut rx) = EventEmitter::channel(8);
        emitter.error("first failure").await.unwrap();
        // Everything after the terminal is swallowed.
        emitter.error("second failure").await.unwrap();
        emitter
            .emit(AgentEvent::result(json!({"late": true})))
            .await
            .unwrap();
        emitter.log("late log").await.unwrap();
        drop(emitter);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        assert_eq!(kinds, vec![EventKind::Error]);
    }

    #[tokio::test]
    async fn closed_consumer_is_reported_for_critical_kinds() {
        let (emitter, rx) = EventEmitter::channel(1);
        drop(rx);
        let result = emitter.emit(AgentEvent::error("gone")).await;
        assert!(result.is_err());
        assert!(!emitter.is_open());
    }
}
