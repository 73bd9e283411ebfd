//! Timed capability invocation
//!
//! Every collaborator call made during a run goes through here, so each one
//! is bounded by a timeout and leaves exactly one `ToolCallRecord`.

use crate::error::OrchestrationError;
use crate::models::{ToolCallRecord, ToolStatus};
use crate::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of one invocation plus its log entry
#[derive(Debug)]
pub struct ToolCall<T> {
    pub outcome: Result<T>,
    pub record: ToolCallRecord,
}

fn record_for<T>(tool_name: &str, outcome: &Result<T>, started: Instant) -> ToolCallRecord {
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(_) => {
            debug!(tool_name, latency_ms, "Tool call succeeded");
            ToolCallRecord {
                tool_name: tool_name.to_string(),
                status: ToolStatus::Success,
                latency_ms,
                error: None,
            }
        }
        Err(e) => {
            warn!(tool_name, latency_ms, kind = e.kind(), error = %e, "Tool call failed");
            ToolCallRecord {
                tool_name: tool_name.to_string(),
                status: ToolStatus::Failed,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Await `call` for at most `timeout`. An elapsed timeout becomes
/// `OrchestrationError::Timeout` and the inner future is dropped.
pub async fn timed_call<T, F>(tool_name: &str, timeout: Duration, call: F) -> ToolCall<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();

    let outcome = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(OrchestrationError::Timeout {
            operation: tool_name.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    };

    let record = record_for(tool_name, &outcome, started);
    ToolCall { outcome, record }
}

/// Log entry for a selected capability that could not run
pub fn skipped(tool_name: &str, reason: impl Into<String>) -> ToolCallRecord {
    let reason = reason.into();
    warn!(tool_name, %reason, "Skipping tool call");

    ToolCallRecord {
        tool_name: tool_name.to_string(),
        status: ToolStatus::Skipped,
        latency_ms: 0,
        error: Some(reason),
    }
}
