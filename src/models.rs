//! Core data models for the investment agent

use crate::error::OrchestrationError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

//
// ================= Market Data =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub volume: f64,
}

/// Ordered price history for one symbol. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSeries {
    symbol: String,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Build a series, rejecting unusable closes and out-of-order timestamps.
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Result<Self> {
        let symbol = symbol.into();

        for (i, point) in points.iter().enumerate() {
            if !point.close.is_finite() || point.close <= 0.0 {
                return Err(OrchestrationError::InvalidInput(format!(
                    "{}: close at index {} is not a positive finite number ({})",
                    symbol, i, point.close
                )));
            }
            if i > 0 && point.timestamp <= points[i - 1].timestamp {
                return Err(OrchestrationError::InvalidInput(format!(
                    "{}: timestamps must be strictly ascending (index {})",
                    symbol, i
                )));
            }
        }

        Ok(Self { symbol, points })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.last()
    }
}

//
// ================= Indicators =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSet {
    pub latest_price: f64,
    /// Wilder RSI in [0, 100]
    pub rsi: f64,
    pub sma_short: f64,
    pub sma_long: f64,
    /// Annualized standard deviation of simple returns, never negative
    pub volatility: f64,
    /// Position of the latest close within the recent [min, max] range, in [0, 1]
    pub price_position: f64,
    pub last_return: f64,
    pub data_points: usize,
}

impl IndicatorSet {
    /// Look up a feature by its schema name
    pub fn feature(&self, name: &str) -> Option<f64> {
        match name {
            "rsi" => Some(self.rsi),
            "sma_short" => Some(self.sma_short),
            "sma_long" => Some(self.sma_long),
            "volatility" => Some(self.volatility),
            "price_position" => Some(self.price_position),
            "returns" => Some(self.last_return),
            "latest_price" => Some(self.latest_price),
            _ => None,
        }
    }

    /// Build a feature vector in exactly the given order
    pub fn to_features<S: AsRef<str>>(&self, names: &[S]) -> Result<FeatureVector> {
        let mut values = Vec::with_capacity(names.len());

        for name in names {
            let name = name.as_ref();
            let value = self.feature(name).ok_or_else(|| {
                OrchestrationError::SchemaMismatch(format!(
                    "indicator set has no feature named '{}'",
                    name
                ))
            })?;
            values.push(value);
        }

        Ok(FeatureVector {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            values,
        })
    }
}

/// Named, ordered classifier input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub names: Vec<String>,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

//
// ================= Knowledge =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalMatch {
    pub document: Document,
    pub score: f64,
}

/// Matches ordered by descending score
pub type RetrievalResult = Vec<RetrievalMatch>;

//
// ================= Classification =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Probability of `label`, in [0, 1]
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
}

//
// ================= Planning & Tool Calls =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Indicators,
    Knowledge,
    Classifier,
}

impl Capability {
    pub fn tool_name(&self) -> &'static str {
        match self {
            Capability::Indicators => "indicator_engine",
            Capability::Knowledge => "knowledge_store",
            Capability::Classifier => "strategy_classifier",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tool_name())
    }
}

/// Which optional analyses a run should perform. Indicators always run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisPlan {
    pub use_knowledge: bool,
    pub use_classifier: bool,
    pub rationale: String,
}

impl AnalysisPlan {
    pub fn full(rationale: impl Into<String>) -> Self {
        Self {
            use_knowledge: true,
            use_classifier: true,
            rationale: rationale.into(),
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut selected = vec![Capability::Indicators];
        if self.use_knowledge {
            selected.push(Capability::Knowledge);
        }
        if self.use_classifier {
            selected.push(Capability::Classifier);
        }
        selected
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub status: ToolStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//
// ================= Aggregation =================
//

/// Everything the synthesis step knows about a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub symbol: String,
    pub query: String,
    pub indicators: Option<IndicatorSet>,
    pub retrieval: Option<RetrievalResult>,
    pub prediction: Option<Prediction>,
    /// Tool names of analyses that were requested but produced nothing
    pub unavailable: Vec<String>,
}

impl AnalysisContext {
    /// An empty retrieval carries nothing to synthesize from
    pub fn has_any_analysis(&self) -> bool {
        self.indicators.is_some()
            || self.retrieval.as_ref().is_some_and(|r| !r.is_empty())
            || self.prediction.is_some()
    }
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub id: String,
    pub text: String,
    pub score: f64,
    pub metadata: BTreeMap<String, String>,
}

impl From<&RetrievalMatch> for RetrievedSnippet {
    fn from(m: &RetrievalMatch) -> Self {
        Self {
            id: m.document.id.clone(),
            text: m.document.text.clone(),
            score: m.score,
            metadata: m.document.metadata.clone(),
        }
    }
}

/// Structured response handed to the boundary layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub run_id: String,
    pub symbol: String,
    pub query: String,
    pub final_analysis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicators: Option<IndicatorSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval_matches: Option<Vec<RetrievedSnippet>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
    pub partial_failures: Vec<ToolCallRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn point(day: i64, close: f64) -> PricePoint {
        PricePoint {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(day),
            close,
            volume: 1_000.0,
        }
    }

    fn sample_indicators() -> IndicatorSet {
        IndicatorSet {
            latest_price: 110.0,
            rsi: 62.0,
            sma_short: 108.0,
            sma_long: 104.0,
            volatility: 0.21,
            price_position: 0.9,
            last_return: 0.01,
            data_points: 30,
        }
    }

    #[test]
    fn test_price_series_rejects_unordered_timestamps() {
        let result = PriceSeries::new("AAPL", vec![point(1, 10.0), point(0, 11.0)]);
        assert!(matches!(result, Err(OrchestrationError::InvalidInput(_))));
    }

    #[test]
    fn test_price_series_rejects_non_positive_close() {
        let result = PriceSeries::new("AAPL", vec![point(0, 10.0), point(1, 0.0)]);
        assert!(matches!(result, Err(OrchestrationError::InvalidInput(_))));

        let result = PriceSeries::new("AAPL", vec![point(0, f64::NAN)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_to_features_respects_requested_order() {
        let features = sample_indicators()
            .to_features(&["price_position", "rsi", "returns"])
            .unwrap();

        assert_eq!(features.names, vec!["price_position", "rsi", "returns"]);
        assert_eq!(features.values, vec![0.9, 62.0, 0.01]);
    }

    #[test]
    fn test_to_features_unknown_name_is_schema_mismatch() {
        let result = sample_indicators().to_features(&["rsi", "macd"]);
        assert!(matches!(result, Err(OrchestrationError::SchemaMismatch(_))));
    }

    #[test]
    fn test_plan_always_includes_indicators() {
        let plan = AnalysisPlan {
            use_knowledge: false,
            use_classifier: false,
            rationale: "indicators only".to_string(),
        };
        assert_eq!(plan.capabilities(), vec![Capability::Indicators]);
        assert_eq!(AnalysisPlan::full("all").capabilities().len(), 3);
    }
}
