//! Run-scoped agent state
//!
//! Created when a run starts, mutated only by the orchestrator and
//! discarded once the caller has the result.

use crate::error::OrchestrationError;
use crate::models::{
    AnalysisPlan, AnalysisResponse, IndicatorSet, Prediction, PriceSeries, RetrievalResult,
    RetrievedSnippet, ToolCallRecord, ToolStatus,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Init,
    FetchData,
    Plan,
    Dispatch,
    Aggregate,
    Synthesize,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Init => "INIT",
            RunStatus::FetchData => "FETCH_DATA",
            RunStatus::Plan => "PLAN",
            RunStatus::Dispatch => "DISPATCH",
            RunStatus::Aggregate => "AGGREGATE",
            RunStatus::Synthesize => "SYNTHESIZE",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct AgentState {
    run_id: Uuid,
    symbol: String,
    query: String,
    price_series: Option<PriceSeries>,
    indicators: Option<IndicatorSet>,
    plan: Option<AnalysisPlan>,
    retrieval: Option<RetrievalResult>,
    prediction: Option<Prediction>,
    tool_call_log: Vec<ToolCallRecord>,
    state_trace: Vec<RunStatus>,
    final_analysis: Option<String>,
    run_status: RunStatus,
    error: Option<OrchestrationError>,
}

impl AgentState {
    /// Fresh state in INIT. The symbol is normalised to upper case.
    pub fn new(symbol: &str, query: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            symbol: symbol.trim().to_uppercase(),
            query: query.trim().to_string(),
            price_series: None,
            indicators: None,
            plan: None,
            retrieval: None,
            prediction: None,
            tool_call_log: Vec::new(),
            state_trace: vec![RunStatus::Init],
            final_analysis: None,
            run_status: RunStatus::Init,
            error: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn status(&self) -> RunStatus {
        self.run_status
    }

    pub fn price_series(&self) -> Option<&PriceSeries> {
        self.price_series.as_ref()
    }

    pub fn indicators(&self) -> Option<&IndicatorSet> {
        self.indicators.as_ref()
    }

    pub fn plan(&self) -> Option<&AnalysisPlan> {
        self.plan.as_ref()
    }

    pub fn retrieval(&self) -> Option<&RetrievalResult> {
        self.retrieval.as_ref()
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        self.prediction.as_ref()
    }

    pub fn tool_call_log(&self) -> &[ToolCallRecord] {
        &self.tool_call_log
    }

    pub fn state_trace(&self) -> &[RunStatus] {
        &self.state_trace
    }

    /// Only ever `Some` once the run has completed
    pub fn final_analysis(&self) -> Option<&str> {
        if self.run_status == RunStatus::Completed {
            self.final_analysis.as_deref()
        } else {
            None
        }
    }

    pub fn error(&self) -> Option<&OrchestrationError> {
        self.error.as_ref()
    }

    /// Records for the given tool, in call order
    pub fn calls_to<'a>(&'a self, tool_name: &'a str) -> impl Iterator<Item = &'a ToolCallRecord> {
        self.tool_call_log
            .iter()
            .filter(move |r| r.tool_name == tool_name)
    }

    //
    // ================= Orchestrator-only mutation =================
    //

    pub(crate) fn advance(&mut self, next: RunStatus) {
        debug!(from = %self.run_status, to = %next, "State transition");
        self.run_status = next;
        self.state_trace.push(next);
    }

    pub(crate) fn record(&mut self, record: ToolCallRecord) {
        self.tool_call_log.push(record);
    }

    pub(crate) fn log_mut(&mut self) -> &mut Vec<ToolCallRecord> {
        &mut self.tool_call_log
    }

    pub(crate) fn set_price_series(&mut self, series: PriceSeries) {
        self.price_series = Some(series);
    }

    pub(crate) fn set_plan(&mut self, plan: AnalysisPlan) {
        self.plan = Some(plan);
    }

    pub(crate) fn set_results(
        &mut self,
        indicators: Option<IndicatorSet>,
        retrieval: Option<RetrievalResult>,
        prediction: Option<Prediction>,
    ) {
        self.indicators = indicators;
        self.retrieval = retrieval;
        self.prediction = prediction;
    }

    pub(crate) fn complete(&mut self, analysis: String) {
        self.final_analysis = Some(analysis);
        self.advance(RunStatus::Completed);
    }

    pub(crate) fn fail(&mut self, error: OrchestrationError) {
        self.error = Some(error);
        self.final_analysis = None;
        self.advance(RunStatus::Failed);
    }

    /// Completed analysis, or the single fatal error that ended the run
    pub fn into_response(self) -> Result<AnalysisResponse> {
        if self.run_status != RunStatus::Completed {
            return Err(self.error.unwrap_or_else(|| {
                OrchestrationError::NoAnalysisAvailable(format!(
                    "run stopped in state {}",
                    self.run_status
                ))
            }));
        }

        let partial_failures = self
            .tool_call_log
            .iter()
            .filter(|r| r.status != ToolStatus::Success)
            .cloned()
            .collect();

        Ok(AnalysisResponse {
            run_id: self.run_id.to_string(),
            symbol: self.symbol,
            query: self.query,
            final_analysis: self.final_analysis.unwrap_or_default(),
            indicators: self.indicators,
            retrieval_matches: self
                .retrieval
                .map(|matches| matches.iter().map(RetrievedSnippet::from).collect()),
            prediction: self.prediction,
            partial_failures,
        })
    }
}
