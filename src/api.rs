//! REST API server for the investment agent orchestrator
//!
//! A thin adapter: requests go straight to the orchestrator and fatal run
//! errors become a single error body with a matching status code.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::error::OrchestrationError;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeRequest {
    pub symbol: String,
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct IndicatorParams {
    pub days: Option<u32>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Machine-readable error kind
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            error_kind: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(error: &OrchestrationError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Error → Status Mapping
/// =============================

pub fn status_for(error: &OrchestrationError) -> StatusCode {
    match error {
        OrchestrationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OrchestrationError::DataUnavailable { .. }
        | OrchestrationError::Provider(_)
        | OrchestrationError::Timeout { .. } => StatusCode::BAD_GATEWAY,
        OrchestrationError::NoAnalysisAvailable(_)
        | OrchestrationError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(error: OrchestrationError) -> (StatusCode, Json<ApiResponse>) {
    let status = status_for(&error);
    warn!(%status, kind = error.kind(), error = %error, "Request failed");
    (status, Json(ApiResponse::error(&error)))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Analysis Endpoint
/// =============================

async fn analyze(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(symbol = %req.symbol, query = %req.query, "Received analysis request");

    match state.orchestrator.analyze(&req.symbol, &req.query).await {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::success(response))),
        Err(e) => failure(e),
    }
}

/// =============================
/// Indicator Endpoint
/// =============================

async fn indicators(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(params): Query<IndicatorParams>,
) -> (StatusCode, Json<ApiResponse>) {
    let days = params
        .days
        .unwrap_or(state.orchestrator.config().lookback_days);

    match state.orchestrator.indicators_for(&symbol, days).await {
        Ok(indicators) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "symbol": symbol.trim().to_uppercase(),
                "days": days,
                "indicators": indicators,
            }))),
        ),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/v1/chat/analyze", post(analyze))
        .route("/v1/market/indicators/:symbol", get(indicators))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::OrchestratorConfig;
    use crate::gemini::TextGenerator;
    use crate::indicators::IndicatorEngine;
    use crate::market::InMemoryMarketData;
    use crate::models::{PricePoint, PriceSeries};
    use crate::planner::HeuristicPlanner;
    use crate::retry::RetryPolicy;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{Duration, TimeZone, Utc};
    use tower::ServiceExt;

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        async fn generate(&self, _prompt: &str) -> crate::Result<String> {
            Ok("Hold.".to_string())
        }
    }

    fn router() -> Router {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let points = (0..40)
            .map(|i| PricePoint {
                timestamp: start + Duration::days(i),
                close: 50.0 + (i % 7) as f64,
                volume: 10.0,
            })
            .collect();
        let mut market = InMemoryMarketData::new();
        market.insert(PriceSeries::new("SPY", points).unwrap());

        let orchestrator = Orchestrator::new(
            Arc::new(market),
            Box::new(HeuristicPlanner),
            IndicatorEngine::default(),
            None,
            None,
            Arc::new(EchoGenerator),
            OrchestratorConfig {
                fetch_retry: RetryPolicy::new(2, 1, 1),
                ..OrchestratorConfig::default()
            },
        );
        create_router(Arc::new(orchestrator))
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, ApiResponse) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn analyze_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/chat/analyze")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_analyze_returns_analysis() {
        let (status, body) = send(
            router(),
            analyze_request(serde_json::json!({"symbol": "spy", "query": "RSI check"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        let data = body.data.unwrap();
        assert_eq!(data["final_analysis"], "Hold.");
        assert_eq!(data["symbol"], "SPY");
        assert!(data["indicators"]["rsi"].is_number());
    }

    #[tokio::test]
    async fn test_blank_query_is_bad_request() {
        let (status, body) = send(
            router(),
            analyze_request(serde_json::json!({"symbol": "SPY", "query": "  "})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_kind.as_deref(), Some("invalid_input"));
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_bad_gateway() {
        let (status, body) = send(
            router(),
            analyze_request(serde_json::json!({"symbol": "NOPE", "query": "buy?"})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.error_kind.as_deref(), Some("data_unavailable"));
    }

    #[tokio::test]
    async fn test_indicator_endpoint() {
        let request = Request::builder()
            .uri("/v1/market/indicators/spy?days=30")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router(), request).await;

        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data["indicators"]["data_points"], 30);
    }

    #[tokio::test]
    async fn test_short_window_is_unprocessable() {
        let request = Request::builder()
            .uri("/v1/market/indicators/SPY?days=5")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router(), request).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error_kind.as_deref(), Some("insufficient_data"));
    }
}
