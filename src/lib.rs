//! Investment Agent Orchestrator
//!
//! Produces an investment recommendation for one instrument by combining:
//! - technical indicators computed from recent price history
//! - retrieval over an embedded financial knowledge base
//! - a trained strategy classifier's signal
//!
//! and reconciling them through a generative synthesis step.
//!
//! RUN LOOP:
//! INIT → FETCH_DATA → PLAN → DISPATCH → AGGREGATE → SYNTHESIZE → COMPLETED

pub mod agent;
pub mod api;
pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod indicators;
pub mod knowledge;
pub mod market;
pub mod models;
pub mod planner;
pub mod retry;
pub mod state;
pub mod synthesis;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use agent::{Orchestrator, OrchestratorConfig};
pub use models::*;
pub use state::{AgentState, RunStatus};
