//! Graph lifecycle orchestrator.
//!
//! The core of skyforge: a multi-phase state machine that lifts a user
//! request (text or diagram) into an abstract intent graph, refines it
//! through a self-correcting policy loop, expands it into concrete
//! provider resources under a fixed-point convergence loop, prices the
//! result, and, on deploy, drives a five-stage verification pipeline
//! with self-healing repair. Every phase streams its progress to the
//! subscribed client as newline-delimited JSON events.
//!
//! Component map:
//! - [`events`]: typed event emitter and the wire protocol
//! - [`phases`]: the four phase runners (intent, policy, expansion, cost)
//! - [`architecture`]: the fixed-point loop composing the runners
//! - [`session`]: graph slots, decision log, persistence
//! - [`orchestrator`]: user actions and the phase contract
//! - [`cost`], [`blast`], [`prompts`]: supporting pieces

pub mod architecture;
pub mod blast;
pub mod cost;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod phases;
pub mod prompts;
pub mod session;

pub use architecture::{run_architecture, CancelGuard, LoopConfig, MAX_GLOBAL_CYCLES};
pub use blast::{BlastAnalysis, ImpactLevel};
pub use cost::{CostReport, CostTable};
pub use error::{AgentError, Result};
pub use events::{AgentEvent, EventEmitter, EventKind, EventReceiver, StageStatus};
pub use orchestrator::{BlastSummary, Orchestrator, OrchestratorConfig, SessionView};
pub use phases::{intent::IntentInput, PhaseItem, PhaseStream};
pub use session::{SessionManager, SessionMeta, SessionPhase};
