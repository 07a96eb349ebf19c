//! Session state and persistence.
//!
//! The session exclusively owns the three lifecycle graph slots, the
//! pending-modification slot, the generated artifacts and the append-only
//! decision log. Everything persists to one directory as JSON files;
//! writes go through a temp file and an atomic rename so a crash never
//! leaves a half-written state file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use infra_graph::{DecisionLogEntry, GraphState};
use pipeline::ExecutionMode;

use crate::error::Result;

/// Workflow phase of a session, governing which user actions are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No active work.
    Idle,
    /// Intent graph generated, awaiting approval or refinement.
    IntentReview,
    /// Architecture produced, awaiting deploy or modification.
    ReasonedReview,
    /// A graph modification awaits confirmation.
    GraphPending,
    /// Code generation in progress.
    CodePending,
    /// Pipeline running.
    Deploying,
    /// Pipeline succeeded.
    Deployed,
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Idle
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::IntentReview => "intent_review",
            SessionPhase::ReasonedReview => "reasoned_review",
            SessionPhase::GraphPending => "graph_pending",
            SessionPhase::CodePending => "code_pending",
            SessionPhase::Deploying => "deploying",
            SessionPhase::Deployed => "deployed",
        };
        f.write_str(name)
    }
}

/// Persisted session metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Current phase.
    pub phase: SessionPhase,
    /// Execution mode for pipeline runs.
    pub execution_mode: ExecutionMode,
    /// Whether draft runs simulate apply/verify.
    pub simulate_pipeline: bool,
    /// Last save time (unix seconds).
    pub timestamp: i64,
}

const INTENT_FILE: &str = "intent_graph.json";
const REASONED_FILE: &str = "reasoned_graph.json";
const IMPLEMENTATION_FILE: &str = "implementation_graph.json";
const PENDING_FILE: &str = "pending_graph.json";
const DECISION_LOG_FILE: &str = "decision_log.json";
const META_FILE: &str = "session_meta.json";

/// Owns the lifecycle graphs, the decision log and their on-disk form.
#[derive(Debug)]
pub struct SessionManager {
    dir: PathBuf,
    /// Current workflow phase.
    pub phase: SessionPhase,
    /// Abstract intent graph.
    pub intent_graph: Option<GraphState>,
    /// Policy-checked reasoned graph.
    pub reasoned_graph: Option<GraphState>,
    /// Concrete implementation graph.
    pub implementation_graph: Option<GraphState>,
    /// Unconfirmed modification, if any.
    pub pending_graph: Option<GraphState>,
    /// Last generated Terraform configuration.
    pub generated_code: Option<String>,
    /// Last generated verification script.
    pub test_script: Option<String>,
    /// Append-only decision log.
    decision_log: Vec<DecisionLogEntry>,
    /// Execution mode for pipeline runs.
    pub execution_mode: ExecutionMode,
    /// Whether draft runs simulate apply/verify.
    pub simulate_pipeline: bool,
    /// Write timestamped debug snapshots on phase transitions.
    pub debug_snapshots: bool,
}

impl SessionManager {
    /// Create an empty session rooted at `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            phase: SessionPhase::default(),
            intent_graph: None,
            reasoned_graph: None,
            implementation_graph: None,
            pending_graph: None,
            generated_code: None,
            test_script: None,
            decision_log: Vec::new(),
            execution_mode: ExecutionMode::default(),
            simulate_pipeline: false,
            debug_snapshots: false,
        }
    }

    /// Load whatever state the directory holds; missing or unreadable
    /// files leave their slot empty.
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let mut session = Self::new(dir);

        session.intent_graph = session.read_json(INTENT_FILE);
        session.reasoned_graph = session.read_json(REASONED_FILE);
        session.implementation_graph = session.read_json(IMPLEMENTATION_FILE);
        session.pending_graph = session.read_json(PENDING_FILE);
        session.decision_log = session.read_json(DECISION_LOG_FILE).unwrap_or_default();
        if let Some(meta) = session.read_json::<SessionMeta>(META_FILE) {
            session.phase = meta.phase;
            session.execution_mode = meta.execution_mode;
            session.simulate_pipeline = meta.simulate_pipeline;
        }
        session
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.dir.join(name);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "ignoring unreadable session file");
                None
            }
        }
    }

    /// The append-only decision log.
    pub fn decision_log(&self) -> &[DecisionLogEntry] {
        &self.decision_log
    }

    /// Append decisions. Existing entries are never rewritten.
    pub fn append_decisions(&mut self, entries: impl IntoIterator<Item = DecisionLogEntry>) {
        self.decision_log.extend(entries);
    }

    /// Persist every populated slot plus the metadata record.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        if let Some(graph) = &self.intent_graph {
            self.write_json(INTENT_FILE, graph)?;
        }
        if let Some(graph) = &self.reasoned_graph {
            self.write_json(REASONED_FILE, graph)?;
        }
        if let Some(graph) = &self.implementation_graph {
            self.write_json(IMPLEMENTATION_FILE, graph)?;
        }
        match &self.pending_graph {
            Some(graph) => self.write_json(PENDING_FILE, graph)?,
            None => {
                // A discarded pending graph must not resurrect on reload.
                let _ = std::fs::remove_file(self.dir.join(PENDING_FILE));
            }
        }
        self.write_json(DECISION_LOG_FILE, &self.decision_log)?;
        self.write_json(
            META_FILE,
            &SessionMeta {
                phase: self.phase,
                execution_mode: self.execution_mode,
                simulate_pipeline: self.simulate_pipeline,
                timestamp: chrono::Utc::now().timestamp(),
            },
        )?;
        debug!(dir = %self.dir.display(), phase = %self.phase, "session saved");
        Ok(())
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let text = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Write a timestamped debug snapshot for a phase transition.
    pub fn debug_snapshot(&self, phase_name: &str, graph: &GraphState) {
        if !self.debug_snapshots {
            return;
        }
        let name = format!("debug_{}_{phase_name}.json", chrono::Utc::now().timestamp());
        if let Err(e) = self.write_json(&name, graph) {
            warn!(error = %e, "failed to write debug snapshot");
        }
    }

    /// Clear every slot, in memory and on disk.
    pub fn hard_reset(&mut self) -> Result<()> {
        self.phase = SessionPhase::Idle;
        self.intent_graph = None;
        self.reasoned_graph = None;
        self.implementation_graph = None;
        self.pending_graph = None;
        self.generated_code = None;
        self.test_script = None;
        self.decision_log.clear();

        for name in [
            INTENT_FILE,
            REASONED_FILE,
            IMPLEMENTATION_FILE,
            PENDING_FILE,
            DECISION_LOG_FILE,
            META_FILE,
        ] {
            let path = self.dir.join(name);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Root directory of this session.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
