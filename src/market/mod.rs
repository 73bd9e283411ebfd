//! Market-data collaborators
//!
//! The orchestrator only sees `MarketDataSource`. Providers report raw
//! failures; translation to `DataUnavailable` happens once retries are spent.

pub mod providers;

pub use providers::{AlphaVantageSource, CoinGeckoSource};

use crate::error::OrchestrationError;
use crate::models::{PricePoint, PriceSeries};
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Daily price history covering roughly the last `days` days, oldest first
    async fn price_history(&self, symbol: &str, days: u32) -> Result<PriceSeries>;
}

/// Crypto tickers and the CoinGecko coin ids they map to
const CRYPTO_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("BITCOIN", "bitcoin"),
    ("ETH", "ethereum"),
    ("ETHEREUM", "ethereum"),
    ("SOL", "solana"),
    ("SOLANA", "solana"),
];

pub fn crypto_coin_id(symbol: &str) -> Option<&'static str> {
    let upper = symbol.to_uppercase();
    CRYPTO_IDS
        .iter()
        .find(|(ticker, _)| *ticker == upper)
        .map(|(_, id)| *id)
}

/// Sends crypto symbols to the crypto source and everything else to the equity source
pub struct RoutedMarketData {
    crypto: Arc<CoinGeckoSource>,
    equities: Arc<dyn MarketDataSource>,
}

impl RoutedMarketData {
    pub fn new(crypto: Arc<CoinGeckoSource>, equities: Arc<dyn MarketDataSource>) -> Self {
        Self { crypto, equities }
    }
}

#[async_trait]
impl MarketDataSource for RoutedMarketData {
    async fn price_history(&self, symbol: &str, days: u32) -> Result<PriceSeries> {
        match crypto_coin_id(symbol) {
            Some(coin_id) => {
                debug!(symbol, coin_id, "Routing to crypto provider");
                self.crypto.coin_history(symbol, coin_id, days).await
            }
            None => {
                debug!(symbol, "Routing to equity provider");
                self.equities.price_history(symbol, days).await
            }
        }
    }
}

/// Fixed price histories, for offline runs and tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketData {
    series: HashMap<String, PriceSeries>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: PriceSeries) {
        self.series.insert(series.symbol().to_uppercase(), series);
    }

    /// Load `{"SYMBOL": [{"timestamp": .., "close": .., "volume": ..}, ...]}`
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: HashMap<String, Vec<PricePoint>> = serde_json::from_str(&raw)?;

        let mut source = Self::new();
        for (symbol, points) in parsed {
            source.insert(PriceSeries::new(symbol, points)?);
        }
        Ok(source)
    }
}

#[async_trait]
impl MarketDataSource for InMemoryMarketData {
    async fn price_history(&self, symbol: &str, days: u32) -> Result<PriceSeries> {
        let series = self.series.get(&symbol.to_uppercase()).ok_or_else(|| {
            OrchestrationError::Provider(format!("no price history for {}", symbol))
        })?;

        let points = series.points();
        let start = points.len().saturating_sub(days as usize);
        PriceSeries::new(series.symbol(), points[start..].to_vec())
    }
}
