//! Gemini-powered planner
//!
//! Routes obvious queries by keyword, and asks the LLM to choose the
//! analyses for everything else.

use crate::error::OrchestrationError;
use crate::gemini::TextGenerator;
use crate::models::AnalysisPlan;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub struct GeminiPlanner {
    generator: Arc<dyn TextGenerator>,
}

impl GeminiPlanner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    fn build_prompt(symbol: &str, query: &str) -> String {
        format!(
            r#"You are the planning step of an investment analysis engine.

Technical indicators (RSI, SMAs, volatility, price position) are always computed.
Decide which OPTIONAL analyses are worth running for this request.

SYMBOL:
{}

USER QUERY:
{}

Optional analyses:
- knowledge: retrieve strategy, indicator and sentiment notes from the knowledge base
- classifier: ML strategy signal (TOP = buy zone, BOTTOM = sell zone) from the indicators

Rules:
- Return ONLY valid JSON
- No explanation text outside the JSON
- JSON format:

{{
  "use_knowledge": true,
  "use_classifier": true,
  "rationale": "<one short sentence>"
}}
"#,
            symbol, query
        )
    }
}

#[async_trait]
impl crate::planner::Planner for GeminiPlanner {
    async fn plan(&self, symbol: &str, query: &str) -> Result<AnalysisPlan> {
        if let Some(plan) = crate::planner::route_by_intent(query) {
            debug!(rationale = %plan.rationale, "Plan chosen by intent routing");
            return Ok(plan);
        }

        let prompt = Self::build_prompt(symbol, query);
        let response = self.generator.generate(&prompt).await?;

        parse_plan_response(&response)
    }
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    use_knowledge: bool,
    use_classifier: bool,
    #[serde(default)]
    rationale: String,
}

/// Parse the planner's JSON, tolerating a markdown fence around it
fn parse_plan_response(response: &str) -> Result<AnalysisPlan> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let parsed: PlanResponse = serde_json::from_str(cleaned).map_err(|e| {
        OrchestrationError::Planning(format!(
            "Failed to parse Gemini plan response: {} | raw={}",
            e, response
        ))
    })?;

    let rationale = if parsed.rationale.trim().is_empty() {
        "selected by LLM planner".to_string()
    } else {
        parsed.rationale
    };

    Ok(AnalysisPlan {
        use_knowledge: parsed.use_knowledge,
        use_classifier: parsed.use_classifier,
        rationale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Planner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedGenerator {
        reply: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn canned(reply: &str) -> Arc<CannedGenerator> {
        Arc::new(CannedGenerator {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_parse_fenced_response() {
        let plan = parse_plan_response(
            "```json\n{\"use_knowledge\": false, \"use_classifier\": true, \"rationale\": \"signal only\"}\n```",
        )
        .unwrap();

        assert!(!plan.use_knowledge);
        assert!(plan.use_classifier);
        assert_eq!(plan.rationale, "signal only");
    }

    #[test]
    fn test_parse_garbage_is_planning_error() {
        let result = parse_plan_response("I think you should run everything");
        assert!(matches!(result, Err(OrchestrationError::Planning(_))));
    }

    #[tokio::test]
    async fn test_intent_routing_skips_llm() {
        let generator = canned("{}");
        let planner = GeminiPlanner::new(generator.clone());

        let plan = planner.plan("BTC", "should I sell?").await.unwrap();

        assert!(plan.use_classifier);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_query_asks_llm() {
        let generator = canned(r#"{"use_knowledge": true, "use_classifier": false}"#);
        let planner = GeminiPlanner::new(generator.clone());

        let plan = planner.plan("SPY", "thoughts on this one?").await.unwrap();

        assert!(plan.use_knowledge);
        assert!(!plan.use_classifier);
        assert_eq!(plan.rationale, "selected by LLM planner");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }
}
