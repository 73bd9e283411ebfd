//! Planner trait and implementations
//!
//! A planner decides which optional analyses a run performs. The indicator
//! engine is not optional and never appears in a plan.

use crate::models::AnalysisPlan;
use crate::Result;
use async_trait::async_trait;

pub mod gemini;
pub use gemini::GeminiPlanner;

/// Planning policy injected into the orchestrator
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, symbol: &str, query: &str) -> Result<AnalysisPlan>;
}

/// Deterministic keyword routing for high-confidence queries.
/// `None` means the query gives no clear signal.
pub fn route_by_intent(query: &str) -> Option<AnalysisPlan> {
    // Whole-word matching: " top " must not hit "stop", "laptop" or "desktop".
    let words = format!(" {} ", tokenize(query).join(" "));
    let has_any = |keywords: &[&str]| {
        keywords
            .iter()
            .any(|k| words.contains(&format!(" {} ", k)))
    };

    let wants_signal = has_any(&[
        "buy",
        "buying",
        "sell",
        "selling",
        "should i",
        "recommend",
        "entry",
        "exit",
        "signal",
        "signals",
        "predict",
        "top",
        "bottom",
        "strategy",
    ]);
    let wants_context = has_any(&[
        "news",
        "sentiment",
        "headline",
        "headlines",
        "why",
        "explain",
        "outlook",
    ]);
    let wants_technicals = has_any(&[
        "rsi",
        "sma",
        "moving average",
        "volatility",
        "technical",
        "technicals",
        "overbought",
        "oversold",
    ]);

    // ── Priority 1: an explicit call for a trade decision gets everything
    if wants_signal {
        return Some(AnalysisPlan::full("trade decision requested"));
    }

    // ── Priority 2: narrative or sentiment questions need the knowledge base only
    if wants_context {
        return Some(AnalysisPlan {
            use_knowledge: true,
            use_classifier: false,
            rationale: "context or sentiment question".to_string(),
        });
    }

    // ── Priority 3: pure technical read
    if wants_technicals {
        return Some(AnalysisPlan {
            use_knowledge: false,
            use_classifier: false,
            rationale: "technical indicators requested".to_string(),
        });
    }

    None
}

/// Lowercase alphanumeric words
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Keyword planner; keeps the system functional without an LLM.
/// Falls back to running every analysis when the query is ambiguous.
pub struct HeuristicPlanner;

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan(&self, _symbol: &str, query: &str) -> Result<AnalysisPlan> {
        Ok(route_by_intent(query)
            .unwrap_or_else(|| AnalysisPlan::full("no clear intent; running every analysis")))
    }
}
