//! Main orchestrator - an explicit state machine
//!
//! INIT → FETCH_DATA → PLAN → DISPATCH → AGGREGATE → SYNTHESIZE → COMPLETED
//!
//! Any non-terminal state can move to FAILED. Capability failures during
//! DISPATCH are logged and never abort the run on their own.

use crate::classifier::StrategyClassifier;
use crate::error::OrchestrationError;
use crate::execution::{self, timed_call};
use crate::gemini::TextGenerator;
use crate::indicators::IndicatorEngine;
use crate::knowledge::KnowledgeStore;
use crate::market::MarketDataSource;
use crate::models::{
    AnalysisContext, AnalysisPlan, AnalysisResponse, Capability, IndicatorSet, Prediction,
    PriceSeries, RetrievalResult, ToolCallRecord,
};
use crate::planner::Planner;
use crate::retry::RetryPolicy;
use crate::state::{AgentState, RunStatus};
use crate::synthesis;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

const MARKET_DATA_TOOL: &str = "market_data";
const PLANNER_TOOL: &str = "planner";
const SYNTHESIS_TOOL: &str = "synthesis";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub lookback_days: u32,
    pub fetch_retry: RetryPolicy,
    /// First attempt plus one retry by default
    pub synthesis_retry: RetryPolicy,
    pub fetch_timeout: Duration,
    pub planner_timeout: Duration,
    pub indicator_timeout: Duration,
    pub knowledge_timeout: Duration,
    pub classifier_timeout: Duration,
    pub synthesis_timeout: Duration,
    pub top_k: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lookback_days: 90,
            fetch_retry: RetryPolicy::new(3, 500, 4_000),
            synthesis_retry: RetryPolicy::new(2, 1_000, 1_000),
            fetch_timeout: Duration::from_secs(15),
            planner_timeout: Duration::from_secs(10),
            indicator_timeout: Duration::from_secs(5),
            knowledge_timeout: Duration::from_secs(10),
            classifier_timeout: Duration::from_secs(5),
            synthesis_timeout: Duration::from_secs(45),
            top_k: 3,
        }
    }
}

/// What DISPATCH produced
struct Dispatched {
    indicators: Option<IndicatorSet>,
    retrieval: Option<RetrievalResult>,
    prediction: Option<Prediction>,
    records: Vec<ToolCallRecord>,
}

/// Coordinates one analysis run per call. Shared resources are injected
/// and read-only, so one orchestrator serves concurrent runs.
pub struct Orchestrator {
    market: Arc<dyn MarketDataSource>,
    planner: Box<dyn Planner>,
    indicator_engine: IndicatorEngine,
    knowledge: Option<Arc<KnowledgeStore>>,
    classifier: Option<Arc<StrategyClassifier>>,
    generator: Arc<dyn TextGenerator>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        planner: Box<dyn Planner>,
        indicator_engine: IndicatorEngine,
        knowledge: Option<Arc<KnowledgeStore>>,
        classifier: Option<Arc<StrategyClassifier>>,
        generator: Arc<dyn TextGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            market,
            planner,
            indicator_engine,
            knowledge,
            classifier,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the state machine to a terminal state
    pub async fn run(&self, symbol: &str, query: &str) -> AgentState {
        let mut state = AgentState::new(symbol, query);
        let span = info_span!("run", run_id = %state.run_id(), symbol = %state.symbol());

        async {
            info!(query = %state.query(), "Orchestrator: starting run");

            match self.drive(&mut state).await {
                Ok(()) => info!(
                    tool_calls = state.tool_call_log().len(),
                    "Orchestrator: run completed"
                ),
                Err(e) => {
                    warn!(kind = e.kind(), error = %e, "Orchestrator: run failed");
                    state.fail(e);
                }
            }
        }
        .instrument(span)
        .await;

        state
    }

    /// Run and hand back either the completed analysis or the fatal error
    pub async fn analyze(&self, symbol: &str, query: &str) -> Result<AnalysisResponse> {
        self.run(symbol, query).await.into_response()
    }

    /// Fetch and compute indicators only, without planning or synthesis
    pub async fn indicators_for(&self, symbol: &str, days: u32) -> Result<IndicatorSet> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "symbol must not be empty".to_string(),
            ));
        }

        let mut log = Vec::new();
        let series = self.fetch_prices(&symbol, days, &mut log).await?;
        self.indicator_engine.compute(&series)
    }

    async fn drive(&self, state: &mut AgentState) -> Result<()> {
        // === INIT ===
        if state.symbol().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "symbol must not be empty".to_string(),
            ));
        }
        if state.query().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "query must not be empty".to_string(),
            ));
        }

        // === FETCH_DATA ===
        state.advance(RunStatus::FetchData);
        let symbol = state.symbol().to_string();
        let series = self
            .fetch_prices(&symbol, self.config.lookback_days, state.log_mut())
            .await?;

        // === PLAN ===
        state.advance(RunStatus::Plan);
        let plan = self.plan(state).await;
        state.set_plan(plan.clone());

        // === DISPATCH ===
        state.advance(RunStatus::Dispatch);
        let dispatched = self.dispatch(state.symbol(), state.query(), &series, &plan).await;
        state.set_price_series(series);
        for record in dispatched.records {
            state.record(record);
        }
        state.set_results(
            dispatched.indicators,
            dispatched.retrieval,
            dispatched.prediction,
        );

        // === AGGREGATE ===
        state.advance(RunStatus::Aggregate);
        let context = aggregate(state, &plan);
        if !context.has_any_analysis() {
            return Err(OrchestrationError::NoAnalysisAvailable(format!(
                "every selected analysis failed for {}",
                context.symbol
            )));
        }

        // === SYNTHESIZE ===
        state.advance(RunStatus::Synthesize);
        let analysis = self.synthesize(state, &context).await;

        // === COMPLETED ===
        state.complete(analysis);
        Ok(())
    }

    async fn fetch_prices(
        &self,
        symbol: &str,
        days: u32,
        log: &mut Vec<ToolCallRecord>,
    ) -> Result<PriceSeries> {
        let mut delays = self.config.fetch_retry.delays();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let call = timed_call(
                MARKET_DATA_TOOL,
                self.config.fetch_timeout,
                self.market.price_history(symbol, days),
            )
            .await;
            log.push(call.record);

            let error = match call.outcome {
                Ok(series) => {
                    info!(attempt, points = series.len(), "Price history fetched");
                    return Ok(series);
                }
                Err(e) => e,
            };

            match delays.next() {
                Some(delay) => {
                    warn!(
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %error,
                        "Price fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(OrchestrationError::DataUnavailable {
                        symbol: symbol.to_string(),
                        reason: format!("{} attempt(s) failed, last error: {}", attempt, error),
                    });
                }
            }
        }
    }

    async fn plan(&self, state: &mut AgentState) -> AnalysisPlan {
        let call = timed_call(
            PLANNER_TOOL,
            self.config.planner_timeout,
            self.planner.plan(state.symbol(), state.query()),
        )
        .await;
        state.record(call.record);

        match call.outcome {
            Ok(plan) => {
                info!(
                    capabilities = ?plan.capabilities(),
                    rationale = %plan.rationale,
                    "Plan selected"
                );
                plan
            }
            Err(e) => {
                warn!(error = %e, "Planner failed, falling back to the full plan");
                AnalysisPlan::full(format!("planner unavailable ({}); running every analysis", e.kind()))
            }
        }
    }

    async fn dispatch(
        &self,
        symbol: &str,
        query: &str,
        series: &PriceSeries,
        plan: &AnalysisPlan,
    ) -> Dispatched {
        let mut records = Vec::new();

        let knowledge_task = async {
            if !plan.use_knowledge {
                return None;
            }
            let tool = Capability::Knowledge.tool_name();
            match &self.knowledge {
                None => Some(Err(execution::skipped(tool, "knowledge store not configured"))),
                Some(store) => {
                    let call = timed_call(
                        tool,
                        self.config.knowledge_timeout,
                        store.query_for_symbol(symbol, query, self.config.top_k),
                    )
                    .await;
                    Some(Ok(call))
                }
            }
        };

        // Indicators run on the blocking pool while the knowledge query is in flight.
        let indicators_task = timed_call(
            Capability::Indicators.tool_name(),
            self.config.indicator_timeout,
            compute_indicators(self.indicator_engine.clone(), series.clone()),
        );

        let (knowledge_outcome, indicator_call) = tokio::join!(knowledge_task, indicators_task);

        records.push(indicator_call.record);
        let indicators = indicator_call.outcome.ok();

        let retrieval = match knowledge_outcome {
            None => None,
            Some(Err(skipped)) => {
                records.push(skipped);
                None
            }
            Some(Ok(call)) => {
                records.push(call.record);
                call.outcome.ok()
            }
        };

        let prediction = if plan.use_classifier {
            let tool = Capability::Classifier.tool_name();
            match (&self.classifier, &indicators) {
                (None, _) => {
                    records.push(execution::skipped(tool, "no classifier artifact loaded"));
                    None
                }
                (Some(_), None) => {
                    records.push(execution::skipped(tool, "indicators unavailable"));
                    None
                }
                (Some(classifier), Some(indicators)) => {
                    let call = timed_call(
                        tool,
                        self.config.classifier_timeout,
                        classify(classifier.clone(), indicators),
                    )
                    .await;
                    records.push(call.record);
                    call.outcome.ok()
                }
            }
        } else {
            None
        };

        Dispatched {
            indicators,
            retrieval,
            prediction,
            records,
        }
    }

    async fn synthesize(&self, state: &mut AgentState, context: &AnalysisContext) -> String {
        let prompt = synthesis::build_prompt(context);
        let mut delays = self.config.synthesis_retry.delays();

        loop {
            let call = timed_call(SYNTHESIS_TOOL, self.config.synthesis_timeout, async {
                let text = self.generator.generate(&prompt).await?;
                if text.trim().is_empty() {
                    return Err(OrchestrationError::SynthesisFailure(
                        "generator returned empty text".to_string(),
                    ));
                }
                Ok(text)
            })
            .await;
            state.record(call.record);

            match call.outcome {
                Ok(text) => return text,
                Err(e @ OrchestrationError::Config(_)) => {
                    warn!(error = %e, "Generator not configured, using templated summary");
                    return synthesis::fallback_summary(context);
                }
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!(error = %e, "Synthesis failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!(error = %e, "Synthesis failed, using templated summary");
                        return synthesis::fallback_summary(context);
                    }
                },
            }
        }
    }
}

/// Indicator computation on the blocking pool
async fn compute_indicators(
    engine: IndicatorEngine,
    series: PriceSeries,
) -> Result<IndicatorSet> {
    tokio::task::spawn_blocking(move || engine.compute(&series))
        .await
        .map_err(|e| OrchestrationError::Provider(format!("indicator task failed: {}", e)))?
}

/// Classifier inference on the blocking pool
async fn classify(
    classifier: Arc<StrategyClassifier>,
    indicators: &IndicatorSet,
) -> Result<Prediction> {
    let features = indicators.to_features(classifier.feature_names())?;

    tokio::task::spawn_blocking(move || classifier.predict(&features))
        .await
        .map_err(|e| OrchestrationError::Provider(format!("classifier task failed: {}", e)))?
}

fn aggregate(state: &AgentState, plan: &AnalysisPlan) -> AnalysisContext {
    let unavailable = plan
        .capabilities()
        .into_iter()
        .filter(|capability| match capability {
            Capability::Indicators => state.indicators().is_none(),
            Capability::Knowledge => state.retrieval().is_none(),
            Capability::Classifier => state.prediction().is_none(),
        })
        .map(|capability| capability.tool_name().to_string())
        .collect();

    AnalysisContext {
        symbol: state.symbol().to_string(),
        query: state.query().to_string(),
        indicators: state.indicators().copied(),
        retrieval: state.retrieval().cloned(),
        prediction: state.prediction().cloned(),
        unavailable,
    }
}
