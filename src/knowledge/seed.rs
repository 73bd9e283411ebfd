//! Default financial knowledge corpus used to initialize an empty index,
//! plus symbol-tagged news ingestion

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Metadata key that scopes a document to one instrument
pub const SYMBOL_KEY: &str = "symbol";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedDocument {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl SeedDocument {
    fn new(id: &str, text: &str, kind: &str, name: &str, category: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            metadata: BTreeMap::from([
                ("type".to_string(), kind.to_string()),
                ("name".to_string(), name.to_string()),
                ("category".to_string(), category.to_string()),
            ]),
        }
    }

    /// News item scoped to one symbol
    pub fn news(id: impl Into<String>, symbol: &str, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::from([
                ("type".to_string(), "news".to_string()),
                (SYMBOL_KEY.to_string(), symbol.trim().to_uppercase()),
                ("category".to_string(), "sentiment".to_string()),
            ]),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// One entry of a news feed file
#[derive(Debug, Clone, Deserialize)]
pub struct NewsItem {
    pub symbol: String,
    pub content: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
}

/// Turn news items into documents with ids `news_<SYMBOL>_<n>`,
/// numbered per symbol in input order.
pub fn news_documents(items: &[NewsItem]) -> Vec<SeedDocument> {
    let mut per_symbol: BTreeMap<String, usize> = BTreeMap::new();

    items
        .iter()
        .filter(|item| !item.symbol.trim().is_empty() && !item.content.trim().is_empty())
        .map(|item| {
            let symbol = item.symbol.trim().to_uppercase();
            let n = per_symbol.entry(symbol.clone()).or_insert(0);
            let id = format!("news_{}_{}", symbol, n);
            *n += 1;

            let doc = SeedDocument::news(id, &symbol, item.content.trim()).with_metadata(
                "sentiment",
                item.sentiment.clone().unwrap_or_else(|| "neutral".to_string()),
            );
            match &item.date {
                Some(date) => doc.with_metadata("date", date.clone()),
                None => doc,
            }
        })
        .collect()
}

/// Read a JSON array of news items
pub fn load_news(path: impl AsRef<Path>) -> Result<Vec<SeedDocument>> {
    let raw = std::fs::read_to_string(path)?;
    let items: Vec<NewsItem> = serde_json::from_str(&raw)?;
    Ok(news_documents(&items))
}

pub fn default_corpus() -> Vec<SeedDocument> {
    vec![
        SeedDocument::new(
            "doc_0",
            "TOP strategy (price opportunity technique): identifies assets in a favourable \
             position to buy. Key indicators: RSI below 30 (oversold), price below the 20-day \
             moving average, high volatility with an emerging upward trend, negative market \
             sentiment despite solid fundamentals.",
            "strategy",
            "TOP",
            "buy_signal",
        ),
        SeedDocument::new(
            "doc_1",
            "BOTTOM strategy (price opportunity technique): identifies assets in a favourable \
             position to sell. Key indicators: RSI above 70 (overbought), price above the 20-day \
             moving average, high volatility with an emerging downward trend, positive market \
             sentiment alongside overvaluation.",
            "strategy",
            "BOTTOM",
            "sell_signal",
        ),
        SeedDocument::new(
            "doc_2",
            "RSI (Relative Strength Index) measures the speed and magnitude of price changes. \
             RSI below 30 indicates oversold conditions and a possible buy signal. RSI above 70 \
             indicates overbought conditions and a possible sell signal. Between 30 and 70 the \
             reading is neutral.",
            "indicator",
            "RSI",
            "technical_analysis",
        ),
        SeedDocument::new(
            "doc_3",
            "Simple moving averages (SMA) smooth price data to reveal trends. Price crossing above \
             the SMA is bullish; crossing below is bearish. A short 10-day SMA crossing above the \
             long 20-day SMA is a golden cross (bullish); crossing below is a death cross (bearish).",
            "indicator",
            "SMA",
            "technical_analysis",
        ),
        SeedDocument::new(
            "doc_4",
            "Sentiment analysis combines news and qualitative data with technical analysis. \
             Negative sentiment with favourable technicals suggests a buying opportunity; positive \
             sentiment with unfavourable technicals suggests selling. Sentiment can precede price \
             moves.",
            "concept",
            "sentiment_analysis",
            "analysis",
        ),
        SeedDocument::new(
            "doc_5",
            "Volatility measures how much prices vary. High volatility means more risk but also \
             more opportunity; low volatility means a stable market with fewer opportunities. \
             Annualized volatility is the standard deviation of daily returns scaled by the square \
             root of 252 trading days.",
            "concept",
            "volatility",
            "risk_management",
        ),
    ]
}
