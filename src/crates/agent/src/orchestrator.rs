//! User-action orchestration.
//!
//! The orchestrator wires user actions to phase runners, the architecture
//! loop and the verification pipeline, enforcing the phase contract:
//!
//! ```text
//! idle            --submit--------> intent_review
//! intent_review   --approve-------> (architecture loop) --> reasoned_review
//! intent_review   --modify--------> intent_review
//! reasoned_review --modify--------> graph_pending
//! graph_pending   --confirm(true)-> (architecture loop) --> reasoned_review
//! graph_pending   --confirm(false)> reasoned_review
//! reasoned_review --deploy--------> code_pending --(pipeline)--> deployed | reasoned_review
//! any             --reset---------> idle
//! ```
//!
//! Every streaming action returns an event receiver; the stream always
//! terminates with exactly one `result` or `error` record. Actions
//! arriving in the wrong phase are rejected before a stream is opened.
//! Session state mutates only after a workflow step succeeds, so an
//! unrecoverable error leaves the phase where it was at entry.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use infra_graph::{
    diff_graphs, is_abstract_type, validate, DecisionLogEntry, GraphPhase, GraphState,
    GraphStore, ResourceStatus,
};
use llm::{coerce_graph_payload, generate_with_retry, GenerateRequest, ModelBackend, RetryPolicy};
use pipeline::{ExecutionMode, PipelineConfig, PipelineManager, StageOutcome, ToolchainRunner};

use crate::architecture::{run_architecture, CancelGuard, LoopConfig};
use crate::blast::{self, BlastAnalysis, ImpactLevel};
use crate::cost::{self, CostReport, CostTable};
use crate::error::{AgentError, Result};
use crate::events::{AgentEvent, EventEmitter, EventKind, EventReceiver, StageStatus, StreamClosed};
use crate::phases::{
    graph_from_payload,
    intent::{run_intent, IntentInput},
    PhaseItem, PhaseStream,
};
use crate::prompts;
use crate::session::{SessionManager, SessionPhase};

/// Buffer capacity of each action's event stream.
const EVENT_BUFFER: usize = 256;

/// Code-regeneration attempts around the pipeline.
const MAX_CODEGEN_RETRIES: u32 = 2;

/// Orchestrator construction parameters.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory holding session state files.
    pub session_dir: PathBuf,
    /// Directory the pipeline toolchain runs in.
    pub workspace_dir: PathBuf,
    /// Execution mode for pipeline runs.
    pub execution_mode: ExecutionMode,
    /// Whether draft runs simulate apply/verify.
    pub simulate_pipeline: bool,
    /// Write timestamped debug snapshots on phase transitions.
    pub debug_snapshots: bool,
    /// Retry policy for model calls.
    pub retry: RetryPolicy,
    /// Cost rule table.
    pub cost_table: CostTable,
}

impl OrchestratorConfig {
    /// Config with defaults for the given directories.
    pub fn new(session_dir: impl Into<PathBuf>, workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
            workspace_dir: workspace_dir.into(),
            execution_mode: ExecutionMode::default(),
            simulate_pipeline: false,
            debug_snapshots: false,
            retry: RetryPolicy::default(),
            cost_table: CostTable::default(),
        }
    }
}

/// Read-only session view returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    /// Current phase.
    pub phase: SessionPhase,
    /// Intent graph, if generated.
    pub intent_graph: Option<GraphState>,
    /// Reasoned graph, if generated.
    pub reasoned_graph: Option<GraphState>,
    /// Implementation graph, if generated.
    pub implementation_graph: Option<GraphState>,
    /// Pending modification, if any.
    pub pending_graph: Option<GraphState>,
    /// Full decision history.
    pub decision_log: Vec<DecisionLogEntry>,
}

/// Traversal-only blast radius summary.
#[derive(Debug, Clone, Serialize)]
pub struct BlastSummary {
    /// The node under analysis.
    pub target: String,
    /// Severity bucket.
    pub impact_level: ImpactLevel,
    /// Size of the affected set.
    pub affected_count: usize,
    /// The affected resource ids.
    pub affected_nodes: Vec<String>,
}

/// Resource types the local simulator's free tier cannot provision.
const SIMULATOR_UNSUPPORTED: [(&str, &str); 5] = [
    ("aws_lb", "load balancers are not supported in the simulator free tier"),
    ("aws_db_instance", "managed databases are not supported in the simulator free tier"),
    ("aws_elasticache_cluster", "cache clusters are not supported"),
    ("aws_eks_cluster", "managed Kubernetes is not supported"),
    ("aws_cloudfront_distribution", "CDN distributions are not supported"),
];

/// Routes user actions through the lifecycle. Cheap to clone; all state
/// lives behind one shared core.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn ModelBackend>,
    toolchain: Arc<dyn ToolchainRunner>,
    session: Mutex<SessionManager>,
    store: Mutex<GraphStore>,
    epoch: Arc<AtomicU64>,
    config: OrchestratorConfig,
}

struct StreamOutcome {
    terminal: Option<GraphState>,
    decisions: Vec<DecisionLogEntry>,
    reasoned: Option<GraphState>,
}

impl Orchestrator {
    /// Build an orchestrator, restoring any persisted session state. The
    /// implementation graph, when present, seeds the graph store.
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        toolchain: Arc<dyn ToolchainRunner>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let mut session = SessionManager::load(&config.session_dir);
        session.execution_mode = config.execution_mode;
        session.simulate_pipeline = config.simulate_pipeline;
        session.debug_snapshots = config.debug_snapshots;

        let mut store = GraphStore::new();
        if let Some(graph) = &session.implementation_graph {
            store.import(graph)?;
        }

        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                toolchain,
                session: Mutex::new(session),
                store: Mutex::new(store),
                epoch: Arc::new(AtomicU64::new(0)),
                config,
            }),
        })
    }

    // ---------------------------------------------------------------
    // Streaming actions
    // ---------------------------------------------------------------

    /// `submit`: lift a text prompt into an intent graph.
    pub async fn submit_text(&self, prompt: String) -> Result<EventReceiver> {
        self.submit(IntentInput::Text(prompt)).await
    }

    /// `submit` (vision): lift a diagram image into an intent graph.
    pub async fn submit_image(&self, mime_type: String, data: Vec<u8>) -> Result<EventReceiver> {
        self.submit(IntentInput::Image { mime_type, data }).await
    }

    async fn submit(&self, input: IntentInput) -> Result<EventReceiver> {
        self.inner
            .require_phase("submit", &[SessionPhase::Idle])
            .await?;
        Ok(self.spawn_stream(move |this, emitter| async move {
            let stream = run_intent(this.backend.clone(), this.config.retry.clone(), input);
            let outcome = this.forward(stream, &emitter).await?;
            let graph = outcome.terminal.ok_or(AgentError::PhaseFailed("intent"))?;

            let mut session = this.session.lock().await;
            session.intent_graph = Some(graph.clone());
            session.phase = SessionPhase::IntentReview;
            session.save()?;
            session.debug_snapshot("intent", &graph);
            drop(session);

            Ok(json!({
                "phase": SessionPhase::IntentReview,
                "resources": graph.resources.len(),
            }))
        }))
    }

    /// `approve-intent`: run the architecture loop over the intent graph.
    pub async fn approve_intent(&self) -> Result<EventReceiver> {
        self.inner
            .require_phase("approve_intent", &[SessionPhase::IntentReview])
            .await?;
        let intent = self
            .inner
            .session
            .lock()
            .await
            .intent_graph
            .clone()
            .ok_or(AgentError::MissingGraph("intent"))?;

        Ok(self.spawn_stream(move |this, emitter| async move {
            this.stabilize(intent, &emitter).await
        }))
    }

    /// `modify`: refine the current graph from a natural-language
    /// instruction. In intent review the intent graph updates in place;
    /// in reasoned review the result becomes a pending modification.
    pub async fn modify(&self, instruction: String) -> Result<EventReceiver> {
        let phase = self
            .inner
            .require_phase(
                "modify",
                &[SessionPhase::IntentReview, SessionPhase::ReasonedReview],
            )
            .await?;

        let (current, target_phase) = {
            let session = self.inner.session.lock().await;
            match phase {
                SessionPhase::IntentReview => (
                    session
                        .intent_graph
                        .clone()
                        .ok_or(AgentError::MissingGraph("intent"))?,
                    GraphPhase::Intent,
                ),
                _ => (
                    session
                        .implementation_graph
                        .clone()
                        .ok_or(AgentError::MissingGraph("implementation"))?,
                    GraphPhase::Implementation,
                ),
            }
        };

        Ok(self.spawn_stream(move |this, emitter| async move {
            let stage_name = format!("refine_{target_phase}");
            emitter
                .log(format!("Refining {target_phase} graph: '{instruction}'..."))
                .await?;
            emitter
                .emit(AgentEvent::stage(&stage_name, StageStatus::Running))
                .await?;

            let graph_json = serde_json::to_string(&current)?;
            let request = GenerateRequest::json(prompts::modification_prompt(
                &graph_json,
                &instruction,
                &target_phase.to_string(),
            ));
            let raw = generate_with_retry(this.backend.as_ref(), &request, &this.config.retry)
                .await?;
            let updated = coerce_graph_payload(&raw)
                .and_then(|payload| graph_from_payload(payload, target_phase))?;
            validate::check_integrity(&updated)?;

            match target_phase {
                GraphPhase::Intent => {
                    this.apply_intent_modification(updated, &emitter, &stage_name)
                        .await
                }
                _ => {
                    this.propose_implementation_modification(
                        current,
                        updated,
                        &emitter,
                        &stage_name,
                    )
                    .await
                }
            }
        }))
    }

    /// `confirm`: accept or discard the pending modification.
    pub async fn confirm_change(&self, accept: bool) -> Result<EventReceiver> {
        self.inner
            .require_phase("confirm_change", &[SessionPhase::GraphPending])
            .await?;
        let (pending, implementation) = {
            let session = self.inner.session.lock().await;
            (
                session
                    .pending_graph
                    .clone()
                    .ok_or(AgentError::MissingGraph("pending"))?,
                session.implementation_graph.clone(),
            )
        };

        Ok(self.spawn_stream(move |this, emitter| async move {
            if !accept {
                let mut session = this.session.lock().await;
                session.pending_graph = None;
                session.phase = SessionPhase::ReasonedReview;
                session.save()?;
                drop(session);

                emitter
                    .log("Modifications discarded. Reverting to previous state.")
                    .await?;
                // Re-emit the unmodified graph rather than making the
                // client re-fetch.
                if let Some(graph) = &implementation {
                    emitter.emit(AgentEvent::snapshot(graph)).await?;
                }
                return Ok(json!({ "phase": SessionPhase::ReasonedReview }));
            }

            emitter
                .log("Changes confirmed. Applying and stabilizing...")
                .await?;
            let mut start = pending;
            for resource in &mut start.resources {
                if resource.status == ResourceStatus::Proposed {
                    resource.status = ResourceStatus::Planned;
                }
            }
            let payload = this.stabilize(start, &emitter).await?;
            let mut session = this.session.lock().await;
            session.pending_graph = None;
            session.save()?;
            Ok(payload)
        }))
    }

    /// `deploy`: generate code and run the verification pipeline.
    pub async fn deploy(&self, user_prompt: Option<String>) -> Result<EventReceiver> {
        let entry_phase = self
            .inner
            .require_phase(
                "deploy",
                &[SessionPhase::ReasonedReview, SessionPhase::Deployed],
            )
            .await?;
        let implementation = {
            let mut session = self.inner.session.lock().await;
            let graph = session
                .implementation_graph
                .clone()
                .ok_or(AgentError::MissingGraph("implementation"))?;
            session.phase = SessionPhase::CodePending;
            session.save()?;
            graph
        };

        Ok(self.spawn_stream(move |this, emitter| async move {
            match this
                .run_deploy(&implementation, user_prompt.as_deref(), &emitter)
                .await
            {
                Ok(payload) => Ok(payload),
                Err(e) => {
                    // Any failure (including a vanished client) restores
                    // the phase held at entry; a failed redeploy must not
                    // demote a deployed session.
                    let mut session = this.session.lock().await;
                    session.phase = entry_phase;
                    session.save()?;
                    Err(e)
                }
            }
        }))
    }

    /// `reset`: hard-reset the session and invalidate in-flight loops.
    pub async fn reset(&self) -> Result<()> {
        self.inner.epoch.fetch_add(1, Ordering::Release);
        self.inner.session.lock().await.hard_reset()?;
        self.inner.store.lock().await.clear();
        Ok(())
    }

    // ---------------------------------------------------------------
    // Read-only queries
    // ---------------------------------------------------------------

    /// Blast radius of a node under the containment relation.
    pub async fn blast_radius(&self, target: &str) -> Result<BlastSummary> {
        let store = self.inner.store.lock().await;
        let (affected, impact_level) = blast::blast_radius(&store, target)?;
        Ok(BlastSummary {
            target: target.to_string(),
            impact_level,
            affected_count: affected.len(),
            affected_nodes: affected,
        })
    }

    /// Model-written explanation of an impact set.
    pub async fn explain_blast(
        &self,
        target: &str,
        affected: Option<Vec<String>>,
    ) -> Result<BlastAnalysis> {
        let (graph, affected) = {
            let store = self.inner.store.lock().await;
            let affected = match affected {
                Some(list) => list,
                None => blast::blast_radius(&store, target)?.0,
            };
            (store.export(), affected)
        };
        blast::explain_impact(
            self.inner.backend.as_ref(),
            &self.inner.config.retry,
            &graph,
            target,
            &affected,
        )
        .await
    }

    /// Current session state for client recovery.
    pub async fn session_view(&self) -> SessionView {
        let session = self.inner.session.lock().await;
        SessionView {
            phase: session.phase,
            intent_graph: session.intent_graph.clone(),
            reasoned_graph: session.reasoned_graph.clone(),
            implementation_graph: session.implementation_graph.clone(),
            pending_graph: session.pending_graph.clone(),
            decision_log: session.decision_log().to_vec(),
        }
    }

    /// The live implementation graph, if any.
    pub async fn graph_view(&self) -> Option<GraphState> {
        let store = self.inner.store.lock().await;
        (!store.is_empty()).then(|| store.export())
    }

    /// Cost report over the current implementation graph.
    pub async fn cost_view(&self) -> Result<CostReport> {
        let session = self.inner.session.lock().await;
        let graph = session
            .implementation_graph
            .as_ref()
            .ok_or(AgentError::MissingGraph("implementation"))?;
        Ok(cost::estimate(&self.inner.config.cost_table, graph))
    }

    /// Spawn a workflow on its own task, bridging it to an event stream
    /// that terminates with exactly one `result` or `error`.
    fn spawn_stream<F, Fut>(&self, workflow: F) -> EventReceiver
    where
        F: FnOnce(Arc<Inner>, EventEmitter) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        let (emitter, receiver) = EventEmitter::channel(EVENT_BUFFER);
        let this = Arc::clone(&self.inner);
        tokio::spawn(async move {
            match workflow(this, emitter.clone()).await {
                Ok(payload) => {
                    let _ = emitter.emit(AgentEvent::result(payload)).await;
                }
                Err(AgentError::StreamClosed(_)) => {
                    // The consumer went away; nothing left to tell it.
                }
                Err(e) => {
                    let _ = emitter.error(e.to_string()).await;
                }
            }
        });
        receiver
    }
}

impl Inner {
    /// Run the architecture loop from `start`, commit its outputs, and
    /// hand the session to reasoned review.
    async fn stabilize(&self, start: GraphState, emitter: &EventEmitter) -> Result<Value> {
        let loop_config = LoopConfig {
            backend: self.backend.clone(),
            retry: self.config.retry.clone(),
            cost_table: self.config.cost_table.clone(),
            execution_mode: self.config.execution_mode,
            max_cycles: crate::architecture::MAX_GLOBAL_CYCLES,
        };
        let guard = CancelGuard::new(Arc::clone(&self.epoch));
        let stream = run_architecture(loop_config, start, guard);
        let outcome = self.forward(stream, emitter).await?;

        let implementation = outcome
            .terminal
            .ok_or(AgentError::PhaseFailed("architecture"))?;

        let mut session = self.session.lock().await;
        session.append_decisions(outcome.decisions);
        if let Some(reasoned) = outcome.reasoned {
            session.debug_snapshot("reasoned", &reasoned);
            session.reasoned_graph = Some(reasoned);
        }
        session.implementation_graph = Some(implementation.clone());
        session.phase = SessionPhase::ReasonedReview;
        session.save()?;
        session.debug_snapshot("implementation", &implementation);
        drop(session);

        self.store.lock().await.import(&implementation)?;

        emitter
            .log(format!(
                "Architecture ready: {} resources.",
                implementation.resources.len()
            ))
            .await?;
        emitter.emit(AgentEvent::snapshot(&implementation)).await?;
        emitter
            .emit(AgentEvent::control("wait_confirmation", "deployment"))
            .await?;

        Ok(json!({
            "phase": SessionPhase::ReasonedReview,
            "resources": implementation.resources.len(),
            "cost_estimate": implementation.metadata.get("cost_estimate"),
        }))
    }

    async fn apply_intent_modification(
        &self,
        updated: GraphState,
        emitter: &EventEmitter,
        stage_name: &str,
    ) -> Result<Value> {
        let foreign: Vec<&str> = updated
            .resources
            .iter()
            .filter(|r| !is_abstract_type(&r.resource_type))
            .map(|r| r.id.as_str())
            .collect();
        if !foreign.is_empty() {
            return Err(llm::LlmError::Parse(format!(
                "modified intent graph contains non-semantic types on: {}",
                foreign.join(", ")
            ))
            .into());
        }

        let mut session = self.session.lock().await;
        session.intent_graph = Some(updated.clone());
        session.phase = SessionPhase::IntentReview;
        session.save()?;
        drop(session);

        emitter.log("Intent updated.").await?;
        emitter.emit(AgentEvent::snapshot(&updated)).await?;
        emitter
            .emit(AgentEvent::stage(stage_name, StageStatus::Success))
            .await?;
        emitter
            .emit(AgentEvent::control("wait_confirmation", "reasoning"))
            .await?;
        Ok(json!({ "phase": SessionPhase::IntentReview }))
    }

    async fn propose_implementation_modification(
        &self,
        current: GraphState,
        mut updated: GraphState,
        emitter: &EventEmitter,
        stage_name: &str,
    ) -> Result<Value> {
        // Tag what changed as proposed; only the pending graph may carry
        // that status.
        let diff = diff_graphs(&current, &updated);
        for resource in &mut updated.resources {
            if diff.add_resources.iter().any(|r| r.id == resource.id) {
                resource.status = ResourceStatus::Proposed;
            }
        }

        let decision = DecisionLogEntry {
            stage: "implementation".to_string(),
            cycle: 0,
            timestamp: chrono::Utc::now(),
            trigger: "graph_modification".to_string(),
            affected_nodes: diff
                .add_resources
                .iter()
                .map(|r| r.id.clone())
                .chain(diff.remove_resources.iter().cloned())
                .collect(),
            action: "Proposed Changes".to_string(),
            result: "Awaiting user confirmation".to_string(),
        };

        let mut session = self.session.lock().await;
        session.pending_graph = Some(updated.clone());
        session.phase = SessionPhase::GraphPending;
        session.append_decisions([decision.clone()]);
        session.save()?;
        drop(session);

        emitter.emit(AgentEvent::decision(&decision)).await?;
        emitter.emit(AgentEvent::snapshot(&updated)).await?;
        emitter
            .emit(AgentEvent::stage(stage_name, StageStatus::Success))
            .await?;
        emitter
            .log(format!(
                "Changes proposed: {} updated, {} removed. Please confirm to apply.",
                diff.add_resources.len(),
                diff.remove_resources.len()
            ))
            .await?;
        emitter
            .emit(AgentEvent::control("wait_confirmation", "confirm_change"))
            .await?;
        Ok(json!({ "phase": SessionPhase::GraphPending, "diff": diff }))
    }

    async fn run_deploy(
        &self,
        implementation: &GraphState,
        user_prompt: Option<&str>,
        emitter: &EventEmitter,
    ) -> Result<Value> {
        if self.config.execution_mode == ExecutionMode::Deploy {
            let warnings = simulator_warnings(implementation);
            if !warnings.is_empty() {
                emitter.log("Simulator compatibility warnings:").await?;
                for warning in warnings {
                    emitter.log(format!("- {warning}")).await?;
                }
            }
        }

        emitter
            .emit(AgentEvent::stage("codegen", StageStatus::Running))
            .await?;
        emitter.log("Generating Terraform configuration...").await?;

        let graph_json = serde_json::to_string(implementation)?;
        let base_request = user_prompt
            .filter(|p| !matches!(p.trim().to_uppercase().as_str(), "CONFIRM" | "DEPLOY" | "GO"))
            .unwrap_or(
                "Generate a production-ready Terraform configuration for the architecture graph.",
            )
            .to_string();
        let expected_ids: Vec<String> = implementation.ids().map(String::from).collect();

        let mut last_error = String::new();
        for attempt in 0..=MAX_CODEGEN_RETRIES {
            let mut code_prompt = prompts::code_gen_prompt(&graph_json, &base_request);
            if attempt > 0 {
                emitter
                    .log(format!("Refining code (attempt {})...", attempt + 1))
                    .await?;
                emitter
                    .emit(AgentEvent::stage("codegen", StageStatus::Fixing))
                    .await?;
                code_prompt = format!(
                    "{code_prompt}\n\nThe previous attempt failed.\nError:\n{last_error}\n\nFix the configuration."
                );
            }

            let raw = generate_with_retry(
                self.backend.as_ref(),
                &GenerateRequest::json(code_prompt),
                &self.config.retry,
            )
            .await?;
            let payload = coerce_graph_payload(&raw)?;
            let hcl = payload
                .get("hcl_code")
                .and_then(Value::as_str)
                .ok_or_else(|| llm::LlmError::Parse("code payload missing hcl_code".into()))?
                .to_string();
            let test_script = payload
                .get("test_script")
                .and_then(Value::as_str)
                .ok_or_else(|| llm::LlmError::Parse("code payload missing test_script".into()))?
                .to_string();

            {
                let mut session = self.session.lock().await;
                session.generated_code = Some(hcl.clone());
                session.test_script = Some(test_script.clone());
                session.phase = SessionPhase::Deploying;
                session.save()?;
            }
            emitter
                .emit(AgentEvent::stage("codegen", StageStatus::Success))
                .await?;
            emitter
                .emit(AgentEvent::stage("pipeline", StageStatus::Running))
                .await?;

            let manager = Arc::new(PipelineManager::new(
                self.toolchain.clone(),
                self.backend.clone(),
                PipelineConfig::new(&self.config.workspace_dir)
                    .with_mode(self.config.execution_mode)
                    .with_simulated_apply(self.config.simulate_pipeline),
            ));
            let (mut reports, handle) = manager.spawn(hcl, test_script, expected_ids.clone());

            let mut verify_failed = false;
            while let Some(report) = reports.recv().await {
                let status = match report.status {
                    StageOutcome::Success => StageStatus::Success,
                    StageOutcome::Failed => StageStatus::Failed,
                };
                emitter.emit(AgentEvent::stage(&report.name, status)).await?;
                if let Some(error) = &report.error {
                    verify_failed = report.name == "verify";
                    emitter.log(format!("[{}] {error}", report.name)).await?;
                    let decision = DecisionLogEntry {
                        stage: "pipeline".to_string(),
                        cycle: attempt,
                        timestamp: chrono::Utc::now(),
                        trigger: "stage_failure".to_string(),
                        affected_nodes: Vec::new(),
                        action: "Correction needed".to_string(),
                        result: format!("Error in {}", report.name),
                    };
                    self.session.lock().await.append_decisions([decision.clone()]);
                    emitter.emit(AgentEvent::decision(&decision)).await?;
                }
            }

            let result = handle
                .await
                .map_err(|e| pipeline::PipelineError::Subprocess {
                    command: "pipeline".to_string(),
                    reason: e.to_string(),
                })??;

            if result.success {
                let mut session = self.session.lock().await;
                session.phase = SessionPhase::Deployed;
                session.save()?;
                drop(session);

                emitter
                    .emit(AgentEvent::stage("pipeline", StageStatus::Success))
                    .await?;
                info!("deployment verified");
                return Ok(serde_json::to_value(&result)?);
            }

            last_error = result.final_message.clone();
            emitter
                .emit(AgentEvent::stage("pipeline", StageStatus::Failed))
                .await?;
            emitter
                .log(format!("Verification failed: {last_error}"))
                .await?;

            // A failing verifier is a design error; regenerating the code
            // will not change the architecture.
            if verify_failed {
                break;
            }
        }

        warn!(error = %last_error, "deployment failed");
        Err(AgentError::Deploy(last_error))
    }

    /// Forward a phase stream to the emitter, collecting decisions, the
    /// latest reasoned snapshot, and the terminal graph.
    async fn forward(
        &self,
        mut stream: PhaseStream,
        emitter: &EventEmitter,
    ) -> std::result::Result<StreamOutcome, StreamClosed> {
        let mut outcome = StreamOutcome {
            terminal: None,
            decisions: Vec::new(),
            reasoned: None,
        };
        while let Some(item) = stream.next().await {
            match item {
                PhaseItem::Event(event) => {
                    if event.kind == EventKind::Decision {
                        if let Ok(entry) =
                            serde_json::from_value::<DecisionLogEntry>(event.content.clone())
                        {
                            outcome.decisions.push(entry);
                        }
                    }
                    if event.kind == EventKind::GraphSnapshot
                        && event.content.get("graph_phase") == Some(&json!("reasoned"))
                    {
                        if let Ok(graph) =
                            serde_json::from_value::<GraphState>(event.content.clone())
                        {
                            // Later loop cycles run policy over an already
                            // materialized graph; only a genuinely semantic
                            // graph may occupy the reasoned slot.
                            if graph
                                .resources
                                .iter()
                                .all(|r| is_abstract_type(&r.resource_type))
                            {
                                outcome.reasoned = Some(graph);
                            }
                        }
                    }
                    emitter.emit(event).await?;
                }
                PhaseItem::Terminal(graph) => outcome.terminal = Some(graph),
            }
        }
        Ok(outcome)
    }

    /// Check the phase contract for an action, returning the phase.
    async fn require_phase(&self, action: &str, allowed: &[SessionPhase]) -> Result<SessionPhase> {
        let phase = self.session.lock().await.phase;
        if allowed.contains(&phase) {
            Ok(phase)
        } else {
            Err(AgentError::PhaseContract {
                action: action.to_string(),
                phase,
            })
        }
    }
}

/// Warnings for resource types the simulator cannot provision.
fn simulator_warnings(graph: &GraphState) -> Vec<String> {
    graph
        .resources
        .iter()
        .filter_map(|resource| {
            SIMULATOR_UNSUPPORTED
                .iter()
                .find(|(risky, _)| resource.resource_type == *risky)
                .map(|(_, reason)| {
                    format!("'{}' ({}): {reason}", resource.id, resource.resource_type)
                })
        })
        .collect()
}
