//! Shared test doubles for lifecycle tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use agent::{AgentEvent, EventKind, EventReceiver};
use llm::{GenerateRequest, LlmError, ModelBackend};
use pipeline::{CommandOutput, PipelineError, ToolCommand, ToolchainRunner};

/// Scripted model backend: canned responses served front to back for
/// both unary and streaming calls.
pub struct MockBackend {
    responses: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
        })
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn generate(&self, _request: &GenerateRequest) -> llm::Result<String> {
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            Err(LlmError::Provider("mock script exhausted".into()))
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn generate_stream(&self, request: &GenerateRequest) -> llm::Result<llm::ChunkReceiver> {
        let text = self.generate(request).await?;
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let _ = tx.send(Ok(text)).await;
        });
        Ok(rx)
    }
}

/// Toolchain whose subprocesses always succeed; verify prints the given
/// stdout.
pub struct OkToolchain {
    pub verify_stdout: String,
}

impl OkToolchain {
    pub fn new(verify_stdout: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            verify_stdout: verify_stdout.into(),
        })
    }
}

#[async_trait]
impl ToolchainRunner for OkToolchain {
    async fn run(
        &self,
        command: ToolCommand,
        _workspace: &Path,
    ) -> Result<CommandOutput, PipelineError> {
        let stdout = match command {
            ToolCommand::Verify => self.verify_stdout.clone(),
            _ => String::new(),
        };
        Ok(CommandOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }
}

/// Toolchain whose verify stdout is served from a queue, one entry per
/// verify invocation; the last entry repeats once the queue drains.
pub struct SeqToolchain {
    verify_outputs: Mutex<Vec<String>>,
}

impl SeqToolchain {
    pub fn new(verify_outputs: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            verify_outputs: Mutex::new(verify_outputs),
        })
    }
}

#[async_trait]
impl ToolchainRunner for SeqToolchain {
    async fn run(
        &self,
        command: ToolCommand,
        _workspace: &Path,
    ) -> Result<CommandOutput, PipelineError> {
        let stdout = match command {
            ToolCommand::Verify => {
                let mut outputs = self.verify_outputs.lock().await;
                if outputs.len() > 1 {
                    outputs.remove(0)
                } else {
                    outputs.first().cloned().unwrap_or_default()
                }
            }
            _ => String::new(),
        };
        Ok(CommandOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }
}

/// Drain an action's event stream to completion.
pub async fn drain(mut receiver: EventReceiver) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    events
}

/// The single terminal record of a stream (protocol: exactly one
/// `result` or `error`, as the last record).
pub fn terminal_of(events: &[AgentEvent]) -> &AgentEvent {
    let last = events.last().expect("stream produced no events");
    assert!(
        matches!(last.kind, EventKind::Result | EventKind::Error),
        "stream must end with result or error, got {:?}",
        last.kind
    );
    let terminal_count = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::Result | EventKind::Error))
        .count();
    assert_eq!(terminal_count, 1, "stream must have exactly one terminal");
    last
}
