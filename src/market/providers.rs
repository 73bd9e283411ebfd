//! HTTP price-history providers (CoinGecko for crypto, Alpha Vantage for equities/ETFs)

use super::MarketDataSource;
use crate::error::OrchestrationError;
use crate::models::{PricePoint, PriceSeries};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .timeout(timeout)
        .build()?)
}

fn provider_error(provider: &str, e: impl std::fmt::Display) -> OrchestrationError {
    OrchestrationError::Provider(format!("{}: {}", provider, e))
}

//
// ================= CoinGecko =================
//

pub struct CoinGeckoSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, f64)>,
    #[serde(default)]
    total_volumes: Vec<(f64, f64)>,
}

impl CoinGeckoSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn coin_history(&self, symbol: &str, coin_id: &str, days: u32) -> Result<PriceSeries> {
        let url = format!("{}/coins/{}/market_chart", self.base_url, coin_id);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("vs_currency", "usd".to_string()),
                ("days", days.to_string()),
                ("interval", "daily".to_string()),
            ])
            .send()
            .await
            .map_err(|e| provider_error("coingecko", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(
                "coingecko",
                format!("returned {}: {}", status, body),
            ));
        }

        let chart: MarketChart = response
            .json()
            .await
            .map_err(|e| provider_error("coingecko", e))?;

        parse_market_chart(symbol, chart)
    }
}

fn parse_market_chart(symbol: &str, chart: MarketChart) -> Result<PriceSeries> {
    let volumes: HashMap<i64, f64> = chart
        .total_volumes
        .iter()
        .map(|(ts, v)| (*ts as i64, *v))
        .collect();

    let mut points: Vec<PricePoint> = Vec::with_capacity(chart.prices.len());
    for (ts, price) in chart.prices {
        let millis = ts as i64;
        let Some(timestamp) = DateTime::<Utc>::from_timestamp_millis(millis) else {
            warn!(millis, "Skipping point with invalid timestamp");
            continue;
        };
        // The last point is often an intraday duplicate of the previous day.
        if points.last().is_some_and(|p| p.timestamp >= timestamp) {
            continue;
        }
        points.push(PricePoint {
            timestamp,
            close: price,
            volume: volumes.get(&millis).copied().unwrap_or(0.0),
        });
    }

    debug!(symbol, points = points.len(), "CoinGecko history parsed");
    PriceSeries::new(symbol.to_uppercase(), points)
}

#[async_trait]
impl MarketDataSource for CoinGeckoSource {
    async fn price_history(&self, symbol: &str, days: u32) -> Result<PriceSeries> {
        let coin_id = super::crypto_coin_id(symbol)
            .map(str::to_string)
            .unwrap_or_else(|| symbol.to_lowercase());
        self.coin_history(symbol, &coin_id, days).await
    }
}

//
// ================= Alpha Vantage =================
//

pub struct AlphaVantageSource {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageSource {
    pub fn new(api_key: String, base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            base_url: base_url.into(),
        })
    }
}

fn parse_daily_series(symbol: &str, body: &Value, days: u32) -> Result<PriceSeries> {
    for key in ["Error Message", "Note", "Information"] {
        if let Some(message) = body.get(key).and_then(Value::as_str) {
            return Err(provider_error("alphavantage", message));
        }
    }

    let series = body
        .get("Time Series (Daily)")
        .and_then(Value::as_object)
        .ok_or_else(|| provider_error("alphavantage", "response has no daily time series"))?;

    let mut by_date: BTreeMap<NaiveDate, PricePoint> = BTreeMap::new();
    for (date, bar) in series {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| provider_error("alphavantage", format!("bad date '{}': {}", date, e)))?;
        let field = |name: &str| -> Result<f64> {
            bar.get(name)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| provider_error("alphavantage", format!("missing '{}' on {}", name, date)))
        };
        let timestamp = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| provider_error("alphavantage", "invalid date"))?;

        by_date.insert(
            date,
            PricePoint {
                timestamp,
                close: field("4. close")?,
                volume: field("5. volume")?,
            },
        );
    }

    let points: Vec<PricePoint> = by_date.into_values().collect();
    let start = points.len().saturating_sub(days as usize);
    PriceSeries::new(symbol.to_uppercase(), points[start..].to_vec())
}

#[async_trait]
impl MarketDataSource for AlphaVantageSource {
    async fn price_history(&self, symbol: &str, days: u32) -> Result<PriceSeries> {
        if self.api_key.is_empty() {
            return Err(provider_error("alphavantage", "ALPHA_VANTAGE_API_KEY not configured"));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", &symbol.to_uppercase()),
                ("outputsize", "compact"),
                ("apikey", &self.api_key),
            ])
            .send()
            .await
            .map_err(|e| provider_error("alphavantage", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(provider_error("alphavantage", format!("returned {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| provider_error("alphavantage", e))?;

        parse_daily_series(symbol, &body, days)
    }
}
