//! Technical indicator engine
//!
//! Pure, deterministic transform from a price series to an indicator set.
//! Fails instead of padding when the series is shorter than the longest window.

use crate::error::OrchestrationError;
use crate::models::{IndicatorSet, PriceSeries};
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Window lengths for every indicator the engine produces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub sma_short: usize,
    pub sma_long: usize,
    /// Number of returns used for volatility
    pub volatility_window: usize,
    /// Number of closes used for the price range
    pub range_window: usize,
    /// Periods per year used to annualize volatility
    pub annualization_periods: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            sma_short: 10,
            sma_long: 20,
            volatility_window: 20,
            range_window: 20,
            annualization_periods: 252.0,
        }
    }
}

impl IndicatorConfig {
    /// Minimum number of closes every indicator needs
    pub fn min_points(&self) -> usize {
        [
            self.rsi_period + 1,
            self.sma_short,
            self.sma_long,
            self.volatility_window + 1,
            self.range_window,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
    }

    fn validate(&self) -> Result<()> {
        if self.rsi_period == 0
            || self.sma_short == 0
            || self.sma_long == 0
            || self.range_window == 0
        {
            return Err(OrchestrationError::Config(
                "indicator windows must be non-zero".to_string(),
            ));
        }
        if self.volatility_window < 2 {
            return Err(OrchestrationError::Config(
                "volatility window needs at least 2 returns".to_string(),
            ));
        }
        if self.annualization_periods.is_nan() || self.annualization_periods <= 0.0 {
            return Err(OrchestrationError::Config(
                "annualization periods must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Compute the full indicator set from the tail of the series
    pub fn compute(&self, series: &PriceSeries) -> Result<IndicatorSet> {
        let required = self.config.min_points();
        let available = series.len();

        if available < required {
            return Err(OrchestrationError::InsufficientData {
                required,
                available,
            });
        }

        let closes = series.closes();
        let latest_price = closes[closes.len() - 1];
        let returns = simple_returns(&closes);

        let indicators = IndicatorSet {
            latest_price,
            rsi: wilder_rsi(&closes, self.config.rsi_period),
            sma_short: sma(&closes, self.config.sma_short),
            sma_long: sma(&closes, self.config.sma_long),
            volatility: sample_std_dev(tail(&returns, self.config.volatility_window))
                * self.config.annualization_periods.sqrt(),
            price_position: price_position(tail(&closes, self.config.range_window)),
            last_return: returns.last().copied().unwrap_or(0.0),
            data_points: available,
        };

        debug!(
            symbol = %series.symbol(),
            rsi = indicators.rsi,
            volatility = indicators.volatility,
            price_position = indicators.price_position,
            "Indicators computed"
        );

        Ok(indicators)
    }
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> f64 {
    let window = tail(values, period);
    if window.is_empty() {
        return 0.0;
    }
    window.iter().sum::<f64>() / window.len() as f64
}

/// Simple returns between consecutive closes
pub fn simple_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect()
}

/// RSI with Wilder smoothing, seeded by the mean of the first `period` changes
pub fn wilder_rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return 50.0;
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = closes
        .windows(2)
        .map(|pair| {
            let change = pair[1] - pair[0];
            (change.max(0.0), (-change).max(0.0))
        })
        .unzip();

    let n = period as f64;
    let mut avg_gain = gains[..period].iter().sum::<f64>() / n;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / n;

    for i in period..gains.len() {
        avg_gain = (avg_gain * (n - 1.0) + gains[i]) / n;
        avg_loss = (avg_loss * (n - 1.0) + losses[i]) / n;
    }

    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }

    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

/// Sample standard deviation (n - 1 denominator)
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.max(0.0).sqrt()
}

/// Normalized position of the last value within the window's range.
/// A flat window maps to the midpoint.
pub fn price_position(window: &[f64]) -> f64 {
    let Some(&current) = window.last() else {
        return 0.5;
    };

    let (min, max) = window
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if max - min <= f64::EPSILON * max.abs().max(1.0) {
        return 0.5;
    }

    ((current - min) / (max - min)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PricePoint;
    use chrono::{Duration, TimeZone, Utc};

    fn series_from(closes: &[f64]) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let points = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PricePoint {
                timestamp: start + Duration::days(i as i64),
                close,
                volume: 10_000.0,
            })
            .collect();
        PriceSeries::new("TEST", points).unwrap()
    }

    fn zigzag(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1)
            .collect()
    }

    #[test]
    fn test_uptrend_has_high_rsi_and_top_of_range() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 1.5).collect();
        let engine = IndicatorEngine::default();

        let indicators = engine.compute(&series_from(&closes)).unwrap();

        assert!(indicators.rsi > 50.0);
        assert!((indicators.price_position - 1.0).abs() < 1e-9);
        assert!(indicators.sma_short > indicators.sma_long);
        assert_eq!(indicators.data_points, 30);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let series = series_from(&zigzag(60));
        let engine = IndicatorEngine::default();

        let first = engine.compute(&series).unwrap();
        for _ in 0..5 {
            assert_eq!(engine.compute(&series).unwrap(), first);
        }
    }

    #[test]
    fn test_constant_series_stays_in_bounds() {
        let engine = IndicatorEngine::default();
        let indicators = engine.compute(&series_from(&[42.0; 25])).unwrap();

        assert_eq!(indicators.rsi, 50.0);
        assert_eq!(indicators.volatility, 0.0);
        assert_eq!(indicators.price_position, 0.5);
        assert_eq!(indicators.sma_short, 42.0);
    }

    #[test]
    fn test_bounds_hold_for_varied_series() {
        let engine = IndicatorEngine::default();

        for len in [21, 35, 80] {
            let indicators = engine.compute(&series_from(&zigzag(len))).unwrap();
            assert!((0.0..=100.0).contains(&indicators.rsi));
            assert!(indicators.volatility >= 0.0);
            assert!((0.0..=1.0).contains(&indicators.price_position));
        }
    }

    #[test]
    fn test_insufficient_data_is_reported() {
        let engine = IndicatorEngine::default();
        let required = engine.config().min_points();

        let result = engine.compute(&series_from(&zigzag(required - 1)));

        match result {
            Err(OrchestrationError::InsufficientData {
                required: r,
                available,
            }) => {
                assert_eq!(r, required);
                assert_eq!(available, required - 1);
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn test_downtrend_rsi_is_zero() {
        let closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        assert_eq!(wilder_rsi(&closes, 14), 0.0);
    }

    #[test]
    fn test_sma_and_std_dev() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), 3.5);
        let sd = sample_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.138089935).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = IndicatorConfig {
            volatility_window: 1,
            ..IndicatorConfig::default()
        };
        assert!(IndicatorEngine::new(config).is_err());
    }
}
