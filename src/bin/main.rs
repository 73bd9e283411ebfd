use investment_agent_orchestrator::{bootstrap::build_orchestrator, config::AppConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let symbol = args.next().unwrap_or_else(|| "BTC".to_string());
    let query = {
        let rest: Vec<String> = args.collect();
        if rest.is_empty() {
            "Should I buy or sell right now?".to_string()
        } else {
            rest.join(" ")
        }
    };

    let config = AppConfig::from_env()?;
    let orchestrator = build_orchestrator(&config).await?;

    info!(%symbol, %query, "Running orchestrator");

    let state = orchestrator.run(&symbol, &query).await;

    println!("\n=== RUN {} ===", state.run_id());
    println!("Status: {}", state.status());
    println!(
        "States: {}",
        state
            .state_trace()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    println!("\nTool calls:");
    for (i, call) in state.tool_call_log().iter().enumerate() {
        println!(
            "  {}: {} {:?} {} ms{}",
            i + 1,
            call.tool_name,
            call.status,
            call.latency_ms,
            call.error
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default()
        );
    }

    match state.into_response() {
        Ok(response) => {
            println!("\n=== ANALYSIS ===\n{}", response.final_analysis);
            if let Some(indicators) = &response.indicators {
                println!("\nIndicators: {}", serde_json::to_string_pretty(indicators)?);
            }
            if let Some(prediction) = &response.prediction {
                println!(
                    "Signal: {} ({:.0}%)",
                    prediction.label,
                    prediction.confidence * 100.0
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Run failed: {}", e);
            Err(Box::new(e) as Box<dyn std::error::Error>)
        }
    }
}
