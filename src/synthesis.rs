//! Synthesis prompt and templated fallback narrative

use crate::models::{AnalysisContext, IndicatorSet};
use std::fmt::Write;

fn rsi_reading(rsi: f64) -> &'static str {
    if rsi >= 70.0 {
        "overbought"
    } else if rsi <= 30.0 {
        "oversold"
    } else {
        "neutral"
    }
}

fn trend_reading(indicators: &IndicatorSet) -> &'static str {
    if indicators.sma_short > indicators.sma_long {
        "bullish (short SMA above long SMA)"
    } else if indicators.sma_short < indicators.sma_long {
        "bearish (short SMA below long SMA)"
    } else {
        "flat (short and long SMA equal)"
    }
}

fn indicator_lines(out: &mut String, indicators: &IndicatorSet) {
    let _ = writeln!(out, "- Latest price: {:.2}", indicators.latest_price);
    let _ = writeln!(
        out,
        "- RSI: {:.1} ({})",
        indicators.rsi,
        rsi_reading(indicators.rsi)
    );
    let _ = writeln!(
        out,
        "- SMA short / long: {:.2} / {:.2}, trend {}",
        indicators.sma_short,
        indicators.sma_long,
        trend_reading(indicators)
    );
    let _ = writeln!(out, "- Annualized volatility: {:.1}%", indicators.volatility * 100.0);
    let _ = writeln!(
        out,
        "- Price position in recent range: {:.0}%",
        indicators.price_position * 100.0
    );
}

/// Prompt for the generative collaborator. Contains only what the run produced.
pub fn build_prompt(context: &AnalysisContext) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Analyze {} for the following request.", context.symbol);
    let _ = writeln!(out, "\nUSER QUERY:\n{}\n", context.query);

    out.push_str("TECHNICAL INDICATORS:\n");
    match &context.indicators {
        Some(indicators) => indicator_lines(&mut out, indicators),
        None => out.push_str("- unavailable\n"),
    }

    out.push_str("\nKNOWLEDGE BASE CONTEXT:\n");
    match &context.retrieval {
        Some(matches) if !matches.is_empty() => {
            for m in matches {
                let _ = writeln!(out, "- [{:.2}] {}", m.score, m.document.text);
            }
        }
        Some(_) => out.push_str("- no relevant documents\n"),
        None => out.push_str("- unavailable\n"),
    }

    out.push_str("\nML STRATEGY SIGNAL:\n");
    match &context.prediction {
        Some(prediction) => {
            let _ = writeln!(
                out,
                "- {} with confidence {:.0}%",
                prediction.label,
                prediction.confidence * 100.0
            );
        }
        None => out.push_str("- unavailable\n"),
    }

    if !context.unavailable.is_empty() {
        let _ = writeln!(
            out,
            "\nThese analyses failed and must be reported as unavailable: {}",
            context.unavailable.join(", ")
        );
    }

    out.push_str(
        "\nCombine the technical picture, the knowledge context and the model signal \
         into a concise recommendation. Reconcile them where they disagree and state the main risks.",
    );

    out
}

/// Deterministic narrative used when the generator cannot produce one. Never empty.
pub fn fallback_summary(context: &AnalysisContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "### {} analysis (automated summary)\n", context.symbol);

    if let Some(indicators) = &context.indicators {
        out.push_str("**Technical indicators**\n");
        indicator_lines(&mut out, indicators);
        out.push('\n');
    }

    if let Some(prediction) = &context.prediction {
        let stance = match prediction.label.as_str() {
            "TOP" => "a buy zone",
            "BOTTOM" => "a sell zone",
            _ => "the indicated regime",
        };
        let _ = writeln!(
            out,
            "**Model signal**: {} ({:.0}% confidence), suggesting {}.\n",
            prediction.label,
            prediction.confidence * 100.0,
            stance
        );
    }

    if let Some(matches) = &context.retrieval {
        if let Some(best) = matches.first() {
            let _ = writeln!(out, "**Most relevant note**: {}\n", best.document.text);
        }
    }

    if !context.unavailable.is_empty() {
        let _ = writeln!(out, "Unavailable: {}.\n", context.unavailable.join(", "));
    }

    out.push_str("This summary was generated without the reasoning service and is not financial advice.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, Prediction, RetrievalMatch};
    use std::collections::BTreeMap;

    fn context() -> AnalysisContext {
        AnalysisContext {
            symbol: "BTC".to_string(),
            query: "should I buy?".to_string(),
            indicators: Some(IndicatorSet {
                latest_price: 64_000.0,
                rsi: 74.0,
                sma_short: 63_000.0,
                sma_long: 60_000.0,
                volatility: 0.55,
                price_position: 0.95,
                last_return: 0.02,
                data_points: 90,
            }),
            retrieval: Some(vec![RetrievalMatch {
                document: Document {
                    id: "doc_2".to_string(),
                    text: "RSI above 70 indicates overbought conditions.".to_string(),
                    embedding: vec![1.0],
                    metadata: BTreeMap::new(),
                },
                score: 0.82,
            }]),
            prediction: None,
            unavailable: vec!["strategy_classifier".to_string()],
        }
    }

    #[test]
    fn test_prompt_contains_only_available_results() {
        let prompt = build_prompt(&context());

        assert!(prompt.contains("RSI: 74.0 (overbought)"));
        assert!(prompt.contains("overbought conditions"));
        assert!(prompt.contains("ML STRATEGY SIGNAL:\n- unavailable"));
        assert!(prompt.contains("strategy_classifier"));
    }

    #[test]
    fn test_fallback_summary_is_never_empty() {
        let empty = AnalysisContext {
            symbol: "SPY".to_string(),
            query: "q".to_string(),
            indicators: None,
            retrieval: None,
            prediction: None,
            unavailable: vec![],
        };
        assert!(!fallback_summary(&empty).trim().is_empty());
    }

    #[test]
    fn test_fallback_summary_reports_signal() {
        let mut ctx = context();
        ctx.prediction = Some(Prediction {
            label: "TOP".to_string(),
            confidence: 0.71,
            probabilities: BTreeMap::new(),
        });

        let summary = fallback_summary(&ctx);
        assert!(summary.contains("TOP (71% confidence)"));
        assert!(summary.contains("bullish"));
    }
}
